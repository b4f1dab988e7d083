// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! External token audit
//!
//! Every token movement is mirrored to an external audit sink so that sent and
//! received counts can be reconciled independently of in-memory state. The
//! same external system is read back by the ledger cross-check.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::contract::ContractHash;
use crate::domain::participant::ParticipantId;
use crate::domain::token::{CorrelationId, TokenDirection};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenAuditRecord {
    pub contract: ContractHash,
    pub participant: ParticipantId,
    pub direction: TokenDirection,
    pub quantity: u32,
    pub counterparty: ParticipantId,
    pub correlation_id: CorrelationId,
    pub recorded_at: DateTime<Utc>,
}

/// Best-effort sink; not required for in-memory correctness.
#[async_trait]
pub trait TokenAudit: Send + Sync {
    async fn record_token_event(&self, record: &TokenAuditRecord) -> Result<(), AuditError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalTokenTotals {
    pub sent: u32,
    pub received: u32,
}

/// Read side of the external audit system.
#[async_trait]
pub trait ExternalTokenSource: Send + Sync {
    async fn token_totals(
        &self,
        contract: &ContractHash,
        participant: &ParticipantId,
    ) -> Result<ExternalTokenTotals, AuditError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),

    #[error("no audit data for {0}")]
    Missing(String),
}
