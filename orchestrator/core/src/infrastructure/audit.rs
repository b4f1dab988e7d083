// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Token audit adapters
//!
//! - `InMemoryTokenAudit` keeps every record and also answers totals queries,
//!   so it can stand in for the external audit system in tests and replays.
//! - `TracingTokenAudit` writes records to the log and nothing else.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use crate::domain::audit::{
    AuditError, ExternalTokenSource, ExternalTokenTotals, TokenAudit, TokenAuditRecord,
};
use crate::domain::contract::ContractHash;
use crate::domain::participant::ParticipantId;
use crate::domain::token::TokenDirection;

#[derive(Default)]
pub struct InMemoryTokenAudit {
    records: RwLock<Vec<TokenAuditRecord>>,
    unavailable: RwLock<HashSet<ParticipantId>>,
    overrides: RwLock<HashMap<(ContractHash, ParticipantId), ExternalTokenTotals>>,
}

impl InMemoryTokenAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TokenAuditRecord> {
        self.records.read().clone()
    }

    /// Makes totals lookups for `participant` fail.
    pub fn mark_unavailable(&self, participant: ParticipantId) {
        self.unavailable.write().insert(participant);
    }

    /// Replaces the totals reported for `participant`, regardless of the records.
    pub fn override_totals(
        &self,
        contract: ContractHash,
        participant: ParticipantId,
        totals: ExternalTokenTotals,
    ) {
        self.overrides.write().insert((contract, participant), totals);
    }
}

#[async_trait]
impl TokenAudit for InMemoryTokenAudit {
    async fn record_token_event(&self, record: &TokenAuditRecord) -> Result<(), AuditError> {
        self.records.write().push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl ExternalTokenSource for InMemoryTokenAudit {
    async fn token_totals(
        &self,
        contract: &ContractHash,
        participant: &ParticipantId,
    ) -> Result<ExternalTokenTotals, AuditError> {
        if self.unavailable.read().contains(participant) {
            return Err(AuditError::Unavailable(format!("no route to {participant}")));
        }
        if let Some(totals) = self
            .overrides
            .read()
            .get(&(contract.clone(), participant.clone()))
        {
            return Ok(*totals);
        }

        let mut totals = ExternalTokenTotals::default();
        for record in self
            .records
            .read()
            .iter()
            .filter(|r| &r.contract == contract && &r.participant == participant)
        {
            match record.direction {
                TokenDirection::Sent => totals.sent += record.quantity,
                TokenDirection::Received => totals.received += record.quantity,
                TokenDirection::Farmed => {}
            }
        }
        Ok(totals)
    }
}

/// Logs every token movement at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTokenAudit;

#[async_trait]
impl TokenAudit for TracingTokenAudit {
    async fn record_token_event(&self, record: &TokenAuditRecord) -> Result<(), AuditError> {
        tracing::info!(
            contract = %record.contract,
            participant = %record.participant,
            direction = %record.direction,
            quantity = record.quantity,
            counterparty = %record.counterparty,
            correlation_id = %record.correlation_id,
            "Token event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::token::CorrelationId;
    use chrono::Utc;

    fn record(participant: &str, direction: TokenDirection, quantity: u32) -> TokenAuditRecord {
        TokenAuditRecord {
            contract: ContractHash::new("c", "k"),
            participant: participant.into(),
            direction,
            quantity,
            counterparty: "other".into(),
            correlation_id: CorrelationId::new(),
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_totals_follow_records() {
        let audit = InMemoryTokenAudit::new();
        audit.record_token_event(&record("a", TokenDirection::Sent, 3)).await.unwrap();
        audit.record_token_event(&record("a", TokenDirection::Received, 2)).await.unwrap();
        audit.record_token_event(&record("a", TokenDirection::Farmed, 9)).await.unwrap();
        audit.record_token_event(&record("b", TokenDirection::Sent, 1)).await.unwrap();

        let totals = audit
            .token_totals(&ContractHash::new("c", "k"), &"a".into())
            .await
            .unwrap();
        assert_eq!(totals, ExternalTokenTotals { sent: 3, received: 2 });

        audit.mark_unavailable("b".into());
        assert!(audit
            .token_totals(&ContractHash::new("c", "k"), &"b".into())
            .await
            .is_err());
    }
}
