// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Token valuation and per-participant ledgers.
//!
//! A token is worth about 1.0 at the start of a contract and decays towards a
//! 0.03 floor as the contract approaches its estimated duration. Every exchange
//! writes one entry into the sender's `sent` list and one into the receiver's
//! `received` list, both carrying the same [`CorrelationId`].
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure valuation function and append-only ledgers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::participant::ParticipantId;

pub const TOKEN_VALUE_FLOOR: f64 = 0.03;

/// `max(0.03, (1 - 0.9 * min(elapsed, total) / total)^4)`, rounded to 3 decimals.
///
/// A zero `total` is treated as an already-finished contract.
pub fn token_value(elapsed: Duration, total: Duration) -> f64 {
    if total.is_zero() {
        return TOKEN_VALUE_FLOOR;
    }
    let ratio = elapsed.min(total).as_secs_f64() / total.as_secs_f64();
    let value = (1.0 - 0.9 * ratio).powi(4).max(TOKEN_VALUE_FLOOR);
    (value * 1000.0).round() / 1000.0
}

/// Value of a token sent at `now` for a contract that started at `started_at`.
pub fn token_value_at(
    started_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    total: Duration,
) -> f64 {
    let elapsed = started_at
        .and_then(|start| (now - start).to_std().ok())
        .unwrap_or(Duration::ZERO);
    token_value(elapsed, total)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenDirection {
    Sent,
    Received,
    /// Produced by the participant for themselves
    Farmed,
}

impl fmt::Display for TokenDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TokenDirection::Sent => "sent",
            TokenDirection::Received => "received",
            TokenDirection::Farmed => "farmed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub recorded_at: DateTime<Utc>,
    pub quantity: u32,
    /// Value of a single token at `recorded_at`
    pub unit_value: f64,
    pub counterparty: ParticipantId,
    pub correlation_id: CorrelationId,
}

impl LedgerEntry {
    pub fn total_value(&self) -> f64 {
        f64::from(self.quantity) * self.unit_value
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenLedger {
    #[serde(default)]
    sent: Vec<LedgerEntry>,
    #[serde(default)]
    received: Vec<LedgerEntry>,
    #[serde(default)]
    farmed: Vec<LedgerEntry>,
}

impl TokenLedger {
    pub fn record(&mut self, direction: TokenDirection, entry: LedgerEntry) {
        self.entries_mut(direction).push(entry);
    }

    pub fn entries(&self, direction: TokenDirection) -> &[LedgerEntry] {
        match direction {
            TokenDirection::Sent => &self.sent,
            TokenDirection::Received => &self.received,
            TokenDirection::Farmed => &self.farmed,
        }
    }

    fn entries_mut(&mut self, direction: TokenDirection) -> &mut Vec<LedgerEntry> {
        match direction {
            TokenDirection::Sent => &mut self.sent,
            TokenDirection::Received => &mut self.received,
            TokenDirection::Farmed => &mut self.farmed,
        }
    }

    pub fn count(&self, direction: TokenDirection) -> u32 {
        self.entries(direction).iter().map(|e| e.quantity).sum()
    }

    pub fn value(&self, direction: TokenDirection) -> f64 {
        self.entries(direction).iter().map(LedgerEntry::total_value).sum()
    }

    /// Σsent − Σreceived
    pub fn delta(&self) -> i64 {
        i64::from(self.count(TokenDirection::Sent)) - i64::from(self.count(TokenDirection::Received))
    }

    pub fn remove(&mut self, direction: TokenDirection, index: usize) -> Option<LedgerEntry> {
        let entries = self.entries_mut(direction);
        if index < entries.len() {
            Some(entries.remove(index))
        } else {
            None
        }
    }

    pub fn remove_correlated(
        &mut self,
        direction: TokenDirection,
        correlation_id: CorrelationId,
    ) -> Option<LedgerEntry> {
        let entries = self.entries_mut(direction);
        let index = entries.iter().position(|e| e.correlation_id == correlation_id)?;
        Some(entries.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(quantity: u32, unit_value: f64, counterparty: &str) -> LedgerEntry {
        LedgerEntry {
            recorded_at: Utc::now(),
            quantity,
            unit_value,
            counterparty: counterparty.into(),
            correlation_id: CorrelationId::new(),
        }
    }

    #[test]
    fn test_token_value_endpoints() {
        for minutes in [1_u64, 30, 90, 720, 4320] {
            let total = Duration::from_secs(minutes * 60);
            assert_eq!(token_value(Duration::ZERO, total), 1.0);
            assert_eq!(token_value(total, total), 0.03);
        }
    }

    #[test]
    fn test_token_value_is_monotonic_and_floored() {
        let total = Duration::from_secs(3600);
        let mut previous = f64::MAX;
        for seconds in (0..=7200).step_by(60) {
            let value = token_value(Duration::from_secs(seconds), total);
            assert!(value <= previous, "value rose at {seconds}s");
            assert!(value >= TOKEN_VALUE_FLOOR);
            previous = value;
        }
    }

    #[test]
    fn test_token_value_midpoint() {
        let total = Duration::from_secs(100);
        // (1 - 0.45)^4 = 0.0915...
        assert_eq!(token_value(Duration::from_secs(50), total), 0.092);
    }

    #[test]
    fn test_zero_total_uses_floor() {
        assert_eq!(token_value(Duration::from_secs(10), Duration::ZERO), TOKEN_VALUE_FLOOR);
    }

    #[test]
    fn test_token_value_before_start_is_full() {
        let now = Utc::now();
        assert_eq!(token_value_at(None, now, Duration::from_secs(60)), 1.0);
        let future_start = now + chrono::Duration::minutes(5);
        assert_eq!(token_value_at(Some(future_start), now, Duration::from_secs(60)), 1.0);
    }

    #[test]
    fn test_ledger_delta_and_correlated_removal() {
        let mut ledger = TokenLedger::default();
        let shared = entry(6, 0.5, "bob");
        let correlation = shared.correlation_id;
        ledger.record(TokenDirection::Sent, shared);
        ledger.record(TokenDirection::Sent, entry(2, 1.0, "carol"));
        ledger.record(TokenDirection::Received, entry(3, 1.0, "bob"));

        assert_eq!(ledger.count(TokenDirection::Sent), 8);
        assert_eq!(ledger.delta(), 5);
        assert!((ledger.value(TokenDirection::Sent) - 5.0).abs() < f64::EPSILON);

        let removed = ledger.remove_correlated(TokenDirection::Sent, correlation).unwrap();
        assert_eq!(removed.quantity, 6);
        assert_eq!(ledger.delta(), -1);
        assert!(ledger.remove(TokenDirection::Farmed, 0).is_none());
    }
}
