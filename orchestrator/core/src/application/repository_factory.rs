// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates the concrete snapshot store selected by the `storage` section of
//! the coordinator configuration. The domain layer only sees the
//! [`SnapshotStore`] trait.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Selects the persistence adapter at startup

use std::sync::Arc;

use crate::domain::coordinator_config::{StorageBackend, StorageConfig};
use crate::domain::repository::{RepositoryError, SnapshotStore};
use crate::infrastructure::snapshot_store::{FileSnapshotStore, InMemorySnapshotStore};

/// Creates a SnapshotStore implementation based on the configured backend
pub fn create_snapshot_store(config: &StorageConfig) -> Result<Arc<dyn SnapshotStore>, RepositoryError> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(InMemorySnapshotStore::new())),
        StorageBackend::File => {
            let path = config.path.as_ref().ok_or_else(|| {
                RepositoryError::Storage("file storage backend requires a path".to_string())
            })?;
            Ok(Arc::new(FileSnapshotStore::new(path)?))
        }
    }
}
