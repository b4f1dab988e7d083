// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Contract Registry
//!
//! Directory of live contracts keyed by location. The directory has its own
//! lock, separate from each contract's lock, so lookups and creation never
//! wait on another contract's business logic.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Owns the per-contract locks and the location directory

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::domain::commands::CommandEnvelope;
use crate::domain::contract::{
    Contract, ContractChange, ContractError, ContractHash, ContractState, LocationId,
};

/// One live contract and its lock.
pub struct ContractHandle {
    hash: ContractHash,
    location: LocationId,
    contract: Mutex<Contract>,
    /// Mirrors `state == Archived` so the directory never has to lock a contract
    archived: AtomicBool,
    /// Highest version written to the snapshot store
    persisted_version: Mutex<Option<u64>>,
    /// Serializes snapshot writes for this contract
    save_lock: tokio::sync::Mutex<()>,
}

impl ContractHandle {
    pub fn new(contract: Contract) -> Self {
        Self {
            hash: contract.hash().clone(),
            location: contract.location().clone(),
            archived: AtomicBool::new(contract.state() == ContractState::Archived),
            contract: Mutex::new(contract),
            persisted_version: Mutex::new(None),
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn hash(&self) -> &ContractHash {
        &self.hash
    }

    pub fn location(&self) -> &LocationId {
        &self.location
    }

    /// Applies a command while holding this contract's lock for the whole
    /// read-modify-write. Nothing else happens under the lock.
    pub fn apply(
        &self,
        envelope: &CommandEnvelope,
        now: DateTime<Utc>,
    ) -> Result<ContractChange, ContractError> {
        let mut contract = self.contract.lock();
        let change = contract.apply(envelope, now)?;
        self.archived
            .store(contract.state() == ContractState::Archived, Ordering::Release);
        Ok(change)
    }

    pub fn snapshot(&self) -> Contract {
        self.contract.lock().clone()
    }

    pub fn state(&self) -> ContractState {
        self.contract.lock().state()
    }

    /// Lock-free view of whether the contract is archived.
    pub fn is_archived(&self) -> bool {
        self.archived.load(Ordering::Acquire)
    }

    /// Held for the whole encode-and-save of a snapshot, so writes for one
    /// contract reach the store one at a time.
    pub async fn lock_saves(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.save_lock.lock().await
    }

    /// Records that `version` reached the snapshot store. Older acknowledgments
    /// arriving late never move the marker backwards.
    pub fn mark_persisted(&self, version: u64) {
        let mut persisted = self.persisted_version.lock();
        if persisted.is_none_or(|current| version > current) {
            *persisted = Some(version);
        }
    }

    pub fn persisted_version(&self) -> Option<u64> {
        *self.persisted_version.lock()
    }

    /// True when the latest committed version is durable.
    pub fn is_persisted(&self) -> bool {
        let version = self.contract.lock().version();
        self.persisted_version()
            .is_some_and(|persisted| persisted >= version)
    }
}

#[derive(Default)]
pub struct ContractRegistry {
    by_location: RwLock<HashMap<LocationId, Arc<ContractHandle>>>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, location: &LocationId) -> Option<Arc<ContractHandle>> {
        self.by_location.read().get(location).cloned()
    }

    pub fn find_by_hash(&self, hash: &ContractHash) -> Option<Arc<ContractHandle>> {
        self.by_location
            .read()
            .values()
            .find(|handle| handle.hash() == hash)
            .cloned()
    }

    /// Registers `contract` at its location. Re-opening the same contract at the
    /// same location returns the existing handle; a different live contract at
    /// that location is an error. An archived contract gives up its location.
    pub fn open(&self, contract: Contract) -> Result<(Arc<ContractHandle>, bool), ContractError> {
        let mut by_location = self.by_location.write();
        if let Some(existing) = by_location.get(contract.location()) {
            if existing.hash() == contract.hash() {
                return Ok((existing.clone(), false));
            }
            if !existing.is_archived() {
                return Err(ContractError::InvalidState(format!(
                    "contract {} is already running at {}",
                    existing.hash(),
                    contract.location()
                )));
            }
        }
        if by_location
            .values()
            .any(|handle| handle.hash() == contract.hash() && !handle.is_archived())
        {
            return Err(ContractError::InvalidState(format!(
                "contract {} is already running elsewhere",
                contract.hash()
            )));
        }
        let handle = Arc::new(ContractHandle::new(contract));
        by_location.insert(handle.location().clone(), handle.clone());
        Ok((handle, true))
    }

    /// Inserts a restored contract, replacing whatever was at its location.
    pub fn restore(&self, contract: Contract, persisted_version: u64) -> Arc<ContractHandle> {
        let handle = Arc::new(ContractHandle::new(contract));
        handle.mark_persisted(persisted_version);
        self.by_location
            .write()
            .insert(handle.location().clone(), handle.clone());
        handle
    }

    pub fn remove(&self, location: &LocationId) -> Option<Arc<ContractHandle>> {
        self.by_location.write().remove(location)
    }

    pub fn list(&self) -> Vec<Arc<ContractHandle>> {
        let mut handles: Vec<Arc<ContractHandle>> =
            self.by_location.read().values().cloned().collect();
        handles.sort_by(|a, b| a.location().cmp(b.location()));
        handles
    }

    pub fn len(&self) -> usize {
        self.by_location.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_location.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::contract::ContractParams;
    use std::time::Duration;

    fn contract(location: &str, contract_id: &str) -> Contract {
        let params = ContractParams::new(contract_id, "coop", 4, Duration::from_secs(600));
        Contract::new(LocationId::from(location), params, Utc::now()).unwrap()
    }

    #[test]
    fn test_open_is_idempotent_per_location() {
        let registry = ContractRegistry::new();
        let (first, created) = registry.open(contract("room", "a")).unwrap();
        assert!(created);
        let (again, created) = registry.open(contract("room", "a")).unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &again));

        let err = registry.open(contract("room", "b")).err().unwrap();
        assert!(matches!(err, ContractError::InvalidState(_)));
        assert!(registry.open(contract("hall", "a")).is_err());
        assert_eq!(registry.len(), 1);
        assert!(registry.find_by_hash(&ContractHash::new("a", "coop")).is_some());
    }

    #[test]
    fn test_persisted_marker_only_moves_forward() {
        let handle = ContractHandle::new(contract("room", "a"));
        assert!(!handle.is_persisted());
        handle.mark_persisted(3);
        handle.mark_persisted(1);
        assert_eq!(handle.persisted_version(), Some(3));
        assert!(handle.is_persisted());
    }

    #[test]
    fn test_archived_location_can_be_reused() {
        use crate::domain::commands::{Actor, Command};

        let registry = ContractRegistry::new();
        let (handle, _) = registry.open(contract("room", "a")).unwrap();
        assert!(!handle.is_archived());
        handle
            .apply(
                &CommandEnvelope::new(Actor::system(), Command::Archive { force: true }),
                Utc::now(),
            )
            .unwrap();
        assert!(handle.is_archived());

        // Holding the archived contract's lock must not block the directory.
        let _busy = handle.contract.lock();
        let (next, created) = registry.open(contract("room", "b")).unwrap();
        assert!(created);
        assert!(!next.is_archived());
    }
}
