// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Snapshot Store Implementations
//!
//! Infrastructure implementations of [`SnapshotStore`].
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist contract snapshots
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **InMemorySnapshotStore** - HashMap-backed, for tests and ephemeral runs
//! - **FileSnapshotStore** - one JSON file per contract under a base directory.
//!   Single-node only; writes go to a temporary file and are renamed into place.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::domain::contract::ContractHash;
use crate::domain::repository::{RepositoryError, SnapshotStore};

const SNAPSHOT_EXTENSION: &str = "json";

#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    blobs: Arc<RwLock<HashMap<ContractHash, Vec<u8>>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, key: &ContractHash, blob: Vec<u8>) -> Result<(), RepositoryError> {
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| RepositoryError::Storage("Lock poisoned".to_string()))?;
        blobs.insert(key.clone(), blob);
        Ok(())
    }

    async fn load(&self, key: &ContractHash) -> Result<Option<Vec<u8>>, RepositoryError> {
        let blobs = self
            .blobs
            .read()
            .map_err(|_| RepositoryError::Storage("Lock poisoned".to_string()))?;
        Ok(blobs.get(key).cloned())
    }

    async fn delete(&self, key: &ContractHash) -> Result<(), RepositoryError> {
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| RepositoryError::Storage("Lock poisoned".to_string()))?;
        blobs.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<ContractHash>, RepositoryError> {
        let blobs = self
            .blobs
            .read()
            .map_err(|_| RepositoryError::Storage("Lock poisoned".to_string()))?;
        let mut keys: Vec<ContractHash> = blobs.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Local filesystem snapshot store
pub struct FileSnapshotStore {
    /// Base directory for snapshot files (e.g., "/var/lib/tokentime/snapshots")
    base_path: PathBuf,
}

impl FileSnapshotStore {
    /// Create the store, creating `base_path` if it does not exist
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path).map_err(|e| {
            RepositoryError::Storage(format!(
                "Failed to create snapshot directory {}: {}",
                base_path.display(),
                e
            ))
        })?;
        Ok(Self { base_path })
    }

    fn path_for(&self, key: &ContractHash) -> PathBuf {
        self.base_path
            .join(format!("{}.{}", encode_file_stem(key.as_str()), SNAPSHOT_EXTENSION))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, key: &ContractHash, blob: Vec<u8>) -> Result<(), RepositoryError> {
        let path = self.path_for(key);
        // Each write stages to its own file; concurrent saves never share one.
        let staging = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&staging, blob).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn load(&self, key: &ContractHash) -> Result<Option<Vec<u8>>, RepositoryError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &ContractHash) -> Result<(), RepositoryError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_keys(&self) -> Result<Vec<ContractHash>, RepositoryError> {
        let mut entries = tokio::fs::read_dir(&self.base_path).await?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match decode_file_stem(stem) {
                Some(key) => keys.push(ContractHash(key)),
                None => tracing::warn!(file = %path.display(), "Skipping unrecognized snapshot file"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Escapes everything outside `[A-Za-z0-9_-]` as `%XX` so any key maps to a safe file name.
fn encode_file_stem(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }
    stem
}

fn decode_file_stem(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}
