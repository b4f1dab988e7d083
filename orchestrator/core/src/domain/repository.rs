// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Snapshot Persistence Interface
//!
//! Contracts are persisted as opaque snapshots keyed by their [`ContractHash`].
//! Persistence is fire-and-forget durability, not a transaction boundary: the
//! in-memory aggregate is authoritative and a failed save never unwinds a
//! committed transition.
//!
//! | Trait | Implementations |
//! |-------|----------------|
//! | `SnapshotStore` | `InMemorySnapshotStore`, `FileSnapshotStore` |
//!
//! Concrete implementations are selected at startup from the `storage`
//! section of `tokentime-config.yaml`.

use async_trait::async_trait;

use crate::domain::contract::{Contract, ContractHash};

/// Key/blob persistence collaborator.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Save a blob under `key` (create or overwrite)
    async fn save(&self, key: &ContractHash, blob: Vec<u8>) -> Result<(), RepositoryError>;

    /// Load the blob stored under `key`
    async fn load(&self, key: &ContractHash) -> Result<Option<Vec<u8>>, RepositoryError>;

    async fn delete(&self, key: &ContractHash) -> Result<(), RepositoryError>;

    /// Every key currently stored
    async fn list_keys(&self) -> Result<Vec<ContractHash>, RepositoryError>;
}

/// Snapshot encoding shared by every store.
pub fn encode_snapshot(contract: &Contract) -> Result<Vec<u8>, RepositoryError> {
    serde_json::to_vec(contract).map_err(|e| RepositoryError::Serialization(e.to_string()))
}

pub fn decode_snapshot(blob: &[u8]) -> Result<Contract, RepositoryError> {
    serde_json::from_slice(blob).map_err(|e| RepositoryError::Serialization(e.to_string()))
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Snapshot not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
