// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Synchronized Warm-up ("tango")
//!
//! Before turns begin, the group runs a number of legs. Every participant has
//! to acknowledge a leg before it can be advanced; once the pending set is
//! empty the leg is ready, an authorized actor opens the advance window, and a
//! completion event moves to the next leg. When the number of completed
//! advances reaches the plan's total the warm-up is over.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Sub-machine owned by the `Contract` aggregate while in `WarmUp`

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::participant::ParticipantId;

// ============================================================================
// Value Objects: Plan
// ============================================================================

/// Leg sizing derived from the run target and the group size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmUpPlan {
    pub runs: u32,
    /// Advances required before turns begin
    pub legs: u32,
    pub first_leg: u32,
    pub middle_leg: u32,
    pub final_leg: u32,
}

impl WarmUpPlan {
    pub fn compute(group_size: u32, runs: u32, self_runs: bool) -> Self {
        let first_leg = group_size.saturating_sub(if self_runs { 0 } else { 1 });
        let middle_leg = first_leg.saturating_sub(1);
        let mut plan = Self {
            runs,
            legs: 0,
            first_leg,
            middle_leg,
            final_leg: 0,
        };
        if first_leg <= 1 || runs <= first_leg {
            return plan;
        }
        let mut remaining = runs - first_leg;
        plan.legs = 1;
        while remaining > middle_leg {
            remaining -= middle_leg;
            plan.legs += 1;
        }
        plan.final_leg = remaining;
        plan
    }

    /// A first leg of a single run cannot be coordinated.
    pub fn is_feasible(&self) -> bool {
        self.first_leg > 1
    }

    pub fn requires_warm_up(&self) -> bool {
        self.is_feasible() && self.legs > 0
    }

    /// Runs expected in the given zero-based leg.
    pub fn leg_target(&self, leg: u32) -> u32 {
        if leg == 0 {
            self.first_leg
        } else if leg >= self.legs {
            self.final_leg
        } else {
            self.middle_leg
        }
    }
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmUpPhase {
    AwaitingAcknowledgment,
    ReadyToAdvance,
    Advancing,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WarmUpError {
    #[error("{0} has already acknowledged this leg")]
    AlreadyAcknowledged(ParticipantId),

    #[error("the advance window for leg {0} is not open")]
    AdvanceNotOpen(u32),

    #[error("the warm-up has already finished")]
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgment {
    pub leg: u32,
    pub remaining: usize,
    /// Set when this acknowledgment emptied the pending set
    pub ready: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegOutcome {
    NextLeg(u32),
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmUpState {
    pub plan: WarmUpPlan,
    pub current_leg: u32,
    pub phase: WarmUpPhase,
    pending: Vec<ParticipantId>,
}

impl WarmUpState {
    pub fn begin(plan: WarmUpPlan, participants: &[ParticipantId]) -> Self {
        Self {
            plan,
            current_leg: 0,
            phase: WarmUpPhase::AwaitingAcknowledgment,
            pending: participants.to_vec(),
        }
    }

    pub fn pending(&self) -> &[ParticipantId] {
        &self.pending
    }

    pub fn is_finished(&self) -> bool {
        self.current_leg >= self.plan.legs
    }

    /// Removes `participant` from the pending set, or one of its `alts` if the
    /// participant itself has already acknowledged.
    pub fn acknowledge(
        &mut self,
        participant: &ParticipantId,
        alts: &[ParticipantId],
    ) -> Result<(ParticipantId, Acknowledgment), WarmUpError> {
        if self.is_finished() {
            return Err(WarmUpError::Finished);
        }
        let index = self
            .pending
            .iter()
            .position(|p| p == participant)
            .or_else(|| self.pending.iter().position(|p| alts.contains(p)))
            .ok_or_else(|| WarmUpError::AlreadyAcknowledged(participant.clone()))?;
        let acknowledged = self.pending.remove(index);

        let ready = self.pending.is_empty() && self.phase == WarmUpPhase::AwaitingAcknowledgment;
        if ready {
            self.phase = WarmUpPhase::ReadyToAdvance;
        }
        Ok((
            acknowledged,
            Acknowledgment {
                leg: self.current_leg,
                remaining: self.pending.len(),
                ready,
            },
        ))
    }

    /// Opens the advance window. Returns `false` if it was already open.
    ///
    /// The window may be opened while acknowledgments are still pending; the
    /// sink often runs the leg before the last player has confirmed.
    pub fn open_advance(&mut self) -> Result<bool, WarmUpError> {
        if self.is_finished() {
            return Err(WarmUpError::Finished);
        }
        if self.phase == WarmUpPhase::Advancing {
            return Ok(false);
        }
        self.phase = WarmUpPhase::Advancing;
        Ok(true)
    }

    pub fn complete_leg(&mut self, participants: &[ParticipantId]) -> Result<LegOutcome, WarmUpError> {
        if self.is_finished() {
            return Err(WarmUpError::Finished);
        }
        if self.phase != WarmUpPhase::Advancing {
            return Err(WarmUpError::AdvanceNotOpen(self.current_leg));
        }
        self.current_leg += 1;
        self.pending.clear();
        if self.is_finished() {
            return Ok(LegOutcome::Finished);
        }
        self.pending = participants.to_vec();
        self.phase = WarmUpPhase::AwaitingAcknowledgment;
        Ok(LegOutcome::NextLeg(self.current_leg))
    }

    pub fn forget(&mut self, participant: &ParticipantId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p != participant);
        let ready = before != self.pending.len()
            && self.pending.is_empty()
            && self.phase == WarmUpPhase::AwaitingAcknowledgment;
        if ready {
            self.phase = WarmUpPhase::ReadyToAdvance;
        }
        ready
    }
}
