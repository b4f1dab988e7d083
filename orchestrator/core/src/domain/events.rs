// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Contract domain events
//!
//! Emitted by the aggregate as the change descriptor of an applied command.
//! Side effects (rendering, notifications, audit, persistence) are derived
//! from these after the contract lock has been released.

use serde::{Deserialize, Serialize};

use crate::domain::contract::ContractState;
use crate::domain::participant::ParticipantId;
use crate::domain::token::{CorrelationId, TokenDirection};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContractEvent {
    ParticipantJoined {
        participant: ParticipantId,
        position: usize,
    },
    ParticipantLeft {
        participant: ParticipantId,
    },
    AltLinked {
        controller: ParticipantId,
        alt: ParticipantId,
    },
    TokensWantedChanged {
        participant: ParticipantId,
        wanted: u32,
    },
    StateChanged {
        from: ContractState,
        to: ContractState,
    },
    OrderChanged {
        revision: u64,
    },
    TurnStarted {
        participant: ParticipantId,
    },
    TurnCompleted {
        participant: ParticipantId,
        duration_secs: i64,
        out_of_turn: bool,
    },
    TurnSkipped {
        participant: ParticipantId,
    },
    TurnReverted {
        participant: ParticipantId,
    },
    AdvanceVoted {
        voter: ParticipantId,
        participant: ParticipantId,
        votes: usize,
    },
    TokensSent {
        from: ParticipantId,
        to: ParticipantId,
        quantity: u32,
        unit_value: f64,
        correlation_id: CorrelationId,
    },
    TokensFarmed {
        participant: ParticipantId,
        quantity: u32,
        unit_value: f64,
        correlation_id: CorrelationId,
    },
    LedgerEntryRemoved {
        participant: ParticipantId,
        direction: TokenDirection,
        correlation_id: CorrelationId,
    },
    SinksConfigured {
        warm_up_sink: Option<ParticipantId>,
        boosting_sink: Option<ParticipantId>,
        post_sink: Option<ParticipantId>,
    },
    BankerChanged {
        banker: Option<ParticipantId>,
    },
    WarmUpPlanned {
        legs: u32,
        first_leg: u32,
    },
    WarmUpLegAcknowledged {
        participant: ParticipantId,
        leg: u32,
        remaining: usize,
    },
    WarmUpLegReady {
        leg: u32,
    },
    WarmUpAdvanceOpened {
        leg: u32,
        by: ParticipantId,
        /// False when the window was opened before everyone acknowledged
        #[serde(default)]
        ready: bool,
    },
    WarmUpLegCompleted {
        leg: u32,
    },
    FinishAcknowledged {
        participant: ParticipantId,
        acknowledgments: usize,
        needed: usize,
    },
}

impl ContractEvent {
    /// Events worth a fresh notification rather than just a redraw.
    pub fn is_announcement(&self) -> bool {
        matches!(
            self,
            ContractEvent::StateChanged { .. }
                | ContractEvent::TurnStarted { .. }
                | ContractEvent::WarmUpLegReady { .. }
                | ContractEvent::WarmUpAdvanceOpened { .. }
        )
    }

    /// Participants a notification about this event should mention.
    pub fn mentions(&self) -> Vec<ParticipantId> {
        match self {
            ContractEvent::TurnStarted { participant } => vec![participant.clone()],
            ContractEvent::WarmUpAdvanceOpened { by, .. } => vec![by.clone()],
            _ => Vec::new(),
        }
    }
}
