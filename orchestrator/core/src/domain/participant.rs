// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Participant identity and per-contract turn state.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** One `TurnState` per participant (or linked alt) of a contract

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::token::TokenLedger;

/// Opaque participant identifier. Guests are identified by the name they joined with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Idle,
    Active,
    Done,
}

impl fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TurnStatus::Idle => "idle",
            TurnStatus::Active => "active",
            TurnStatus::Done => "done",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnState {
    pub participant_id: ParticipantId,
    pub display_name: String,
    /// Joined by name rather than by account
    pub guest: bool,
    pub status: TurnStatus,
    pub tokens_wanted: u32,
    pub tokens_received: u32,
    pub joined_at: DateTime<Utc>,
    pub turn_started_at: Option<DateTime<Utc>>,
    pub turn_ended_at: Option<DateTime<Utc>>,
    /// Alt accounts driven by this participant
    #[serde(default)]
    pub alts: Vec<ParticipantId>,
    /// Set when this participant is itself an alt
    #[serde(default)]
    pub alt_controller: Option<ParticipantId>,
    #[serde(default)]
    pub ledger: TokenLedger,
    /// Running sum of value sent minus value received
    #[serde(default)]
    pub token_value: f64,
    #[serde(default)]
    pub advance_votes: Vec<ParticipantId>,
}

impl TurnState {
    pub fn new(
        participant_id: ParticipantId,
        display_name: impl Into<String>,
        guest: bool,
        tokens_wanted: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            participant_id,
            display_name: display_name.into(),
            guest,
            status: TurnStatus::Idle,
            tokens_wanted,
            tokens_received: 0,
            joined_at: now,
            turn_started_at: None,
            turn_ended_at: None,
            alts: Vec::new(),
            alt_controller: None,
            ledger: TokenLedger::default(),
            token_value: 0.0,
            advance_votes: Vec::new(),
        }
    }

    pub fn begin_turn(&mut self, now: DateTime<Utc>) {
        self.status = TurnStatus::Active;
        self.turn_started_at = Some(now);
        self.turn_ended_at = None;
        self.advance_votes.clear();
    }

    pub fn finish_turn(&mut self, now: DateTime<Utc>) {
        self.status = TurnStatus::Done;
        if self.turn_started_at.is_none() {
            self.turn_started_at = Some(now);
        }
        self.turn_ended_at = Some(now);
        self.advance_votes.clear();
    }

    pub fn reset_turn(&mut self) {
        self.status = TurnStatus::Idle;
        self.turn_started_at = None;
        self.turn_ended_at = None;
        self.advance_votes.clear();
    }

    pub fn turn_duration(&self) -> Option<Duration> {
        match (self.turn_started_at, self.turn_ended_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    pub fn has_enough_tokens(&self) -> bool {
        self.tokens_received >= self.tokens_wanted
    }

    pub fn is_alt(&self) -> bool {
        self.alt_controller.is_some()
    }

    /// Tokens sent minus tokens received.
    pub fn fairness_delta(&self) -> i64 {
        self.ledger.delta()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_lifecycle_records_duration() {
        let start = Utc::now();
        let mut turn = TurnState::new("alice".into(), "Alice", false, 6, start);
        assert_eq!(turn.status, TurnStatus::Idle);

        turn.begin_turn(start);
        turn.advance_votes.push("bob".into());
        turn.finish_turn(start + Duration::minutes(4));

        assert_eq!(turn.status, TurnStatus::Done);
        assert_eq!(turn.turn_duration(), Some(Duration::minutes(4)));
        assert!(turn.advance_votes.is_empty());

        turn.reset_turn();
        assert_eq!(turn.status, TurnStatus::Idle);
        assert!(turn.turn_duration().is_none());
    }

    #[test]
    fn test_out_of_turn_finish_has_zero_duration() {
        let now = Utc::now();
        let mut turn = TurnState::new("guest".into(), "guest", true, 8, now);
        turn.finish_turn(now);
        assert_eq!(turn.turn_duration(), Some(Duration::zero()));
    }
}
