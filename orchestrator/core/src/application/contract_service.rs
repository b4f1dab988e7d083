// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Contract Service
//!
//! Entry point for every inbound event. Each call looks the contract up in
//! the registry, applies the command under that contract's lock, then hands
//! the resulting change to the side-effect dispatcher once the lock is gone.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Command handling use case and contract lifecycle management

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::cross_check::{CrossCheckReport, LedgerCrossCheck};
use crate::application::registry::ContractRegistry;
use crate::application::side_effects::SideEffectDispatcher;
use crate::domain::commands::{Command, CommandEnvelope};
use crate::domain::contract::{
    Contract, ContractChange, ContractError, ContractHash, ContractParams, ContractState,
    LocationId,
};
use crate::domain::events::ContractEvent;
use crate::domain::identity::IdentityResolver;
use crate::domain::repository::decode_snapshot;

/// Read model of one live contract, used by listings and the sweeper.
#[derive(Debug, Clone, Serialize)]
pub struct ContractSummary {
    pub hash: ContractHash,
    pub location: LocationId,
    pub state: ContractState,
    pub participants: usize,
    pub coop_size: usize,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub last_interaction: DateTime<Utc>,
    pub waiting_since: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    /// Latest version has reached the snapshot store
    pub persisted: bool,
}

impl ContractSummary {
    fn from_contract(contract: &Contract, persisted_version: Option<u64>) -> Self {
        Self {
            hash: contract.hash().clone(),
            location: contract.location().clone(),
            state: contract.state(),
            participants: contract.participant_count(),
            coop_size: contract.coop_size(),
            version: contract.version(),
            created_at: contract.created_at(),
            last_interaction: contract.last_interaction(),
            waiting_since: contract.waiting_since(),
            archived_at: contract.archived_at(),
            persisted: persisted_version.is_some_and(|v| v >= contract.version()),
        }
    }
}

#[async_trait]
pub trait ContractService: Send + Sync {
    /// Creates a contract at `location`, or returns the one already there when
    /// it carries the same hash.
    async fn open_contract(
        &self,
        location: LocationId,
        params: ContractParams,
    ) -> Result<Contract, ContractError>;

    async fn execute(
        &self,
        location: &LocationId,
        envelope: CommandEnvelope,
    ) -> Result<ContractChange, ContractError>;

    async fn contract(&self, location: &LocationId) -> Result<Contract, ContractError>;

    async fn list_contracts(&self) -> Vec<ContractSummary>;

    /// Drops an archived contract from the registry. Its snapshot stays in the store.
    async fn purge(&self, location: &LocationId) -> Result<(), ContractError>;
}

pub struct StandardContractService {
    registry: Arc<ContractRegistry>,
    side_effects: Arc<SideEffectDispatcher>,
    identity: Option<Arc<dyn IdentityResolver>>,
    cross_check: Option<LedgerCrossCheck>,
}

impl StandardContractService {
    pub fn new(registry: Arc<ContractRegistry>, side_effects: Arc<SideEffectDispatcher>) -> Self {
        Self {
            registry,
            side_effects,
            identity: None,
            cross_check: None,
        }
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_cross_check(mut self, cross_check: LedgerCrossCheck) -> Self {
        self.cross_check = Some(cross_check);
        self
    }

    pub fn registry(&self) -> &Arc<ContractRegistry> {
        &self.registry
    }

    /// Loads every snapshot in the store into the registry. Archived contracts
    /// and unreadable snapshots are skipped.
    pub async fn restore(&self) -> anyhow::Result<usize> {
        let store = self.side_effects.store();
        let keys = store
            .list_keys()
            .await
            .context("Failed to list stored snapshots")?;

        let mut restored = 0;
        for key in keys {
            let blob = match store.load(&key).await {
                Ok(Some(blob)) => blob,
                Ok(None) => continue,
                Err(e) => {
                    warn!(contract = %key, "Failed to load snapshot: {}", e);
                    continue;
                }
            };
            let contract = match decode_snapshot(&blob) {
                Ok(contract) => contract,
                Err(e) => {
                    warn!(contract = %key, "Skipping unreadable snapshot: {}", e);
                    continue;
                }
            };
            if contract.state() == ContractState::Archived {
                debug!(contract = %key, "Skipping archived snapshot");
                continue;
            }
            let version = contract.version();
            self.registry.restore(contract, version);
            restored += 1;
        }

        info!(restored, "Restored contracts from snapshot store");
        Ok(restored)
    }

    /// Applies `envelope` at an explicit instant.
    pub async fn execute_at(
        &self,
        location: &LocationId,
        mut envelope: CommandEnvelope,
        now: DateTime<Utc>,
    ) -> Result<ContractChange, ContractError> {
        let command_name = envelope.command.name();
        let handle = match self.registry.get(location) {
            Some(handle) => handle,
            None => {
                record_command(command_name, "rejected");
                return Err(ContractError::NotFound(format!(
                    "no contract at {location}"
                )));
            }
        };

        self.resolve_display_name(&mut envelope).await;

        let change = match handle.apply(&envelope, now) {
            Ok(change) => change,
            Err(e) => {
                record_command(command_name, "rejected");
                debug!(
                    contract = %handle.hash(),
                    command = command_name,
                    actor = %envelope.actor.id,
                    "Command rejected: {}",
                    e
                );
                return Err(e);
            }
        };

        let outcome = if change.duplicate {
            "duplicate"
        } else if change.is_noop() {
            "noop"
        } else {
            "applied"
        };
        record_command(command_name, outcome);
        observe_events(&change);

        self.side_effects.dispatch(&handle, &change, false).await;
        Ok(change)
    }

    /// Compares every participant's ledger with the external token source.
    pub async fn cross_check(&self, location: &LocationId) -> anyhow::Result<CrossCheckReport> {
        let cross_check = self
            .cross_check
            .as_ref()
            .context("Ledger cross-check is not configured")?;
        let contract = self.contract(location).await?;
        Ok(cross_check.run(&contract).await)
    }

    async fn resolve_display_name(&self, envelope: &mut CommandEnvelope) {
        let Some(identity) = &self.identity else {
            return;
        };
        if let Command::Join {
            participant,
            display_name: display_name @ None,
            guest: false,
        } = &mut envelope.command
        {
            *display_name = identity.display_name(participant).await;
        }
    }
}

#[async_trait]
impl ContractService for StandardContractService {
    async fn open_contract(
        &self,
        location: LocationId,
        params: ContractParams,
    ) -> Result<Contract, ContractError> {
        let contract = Contract::new(location, params, Utc::now())?;
        let (handle, created) = self.registry.open(contract)?;
        let snapshot = handle.snapshot();
        if created {
            info!(
                contract = %snapshot.hash(),
                location = %snapshot.location(),
                coop_size = snapshot.coop_size(),
                "Contract opened"
            );
            let change = ContractChange {
                hash: snapshot.hash().clone(),
                location: snapshot.location().clone(),
                version: snapshot.version(),
                occurred_at: snapshot.created_at(),
                duplicate: false,
                events: Vec::new(),
                snapshot: snapshot.clone(),
            };
            self.side_effects.dispatch(&handle, &change, true).await;
        }
        Ok(snapshot)
    }

    async fn execute(
        &self,
        location: &LocationId,
        envelope: CommandEnvelope,
    ) -> Result<ContractChange, ContractError> {
        self.execute_at(location, envelope, Utc::now()).await
    }

    async fn contract(&self, location: &LocationId) -> Result<Contract, ContractError> {
        self.registry
            .get(location)
            .map(|handle| handle.snapshot())
            .ok_or_else(|| ContractError::NotFound(format!("no contract at {location}")))
    }

    async fn list_contracts(&self) -> Vec<ContractSummary> {
        self.registry
            .list()
            .iter()
            .map(|handle| ContractSummary::from_contract(&handle.snapshot(), handle.persisted_version()))
            .collect()
    }

    async fn purge(&self, location: &LocationId) -> Result<(), ContractError> {
        let handle = self
            .registry
            .get(location)
            .ok_or_else(|| ContractError::NotFound(format!("no contract at {location}")))?;
        if handle.state() != ContractState::Archived {
            return Err(ContractError::InvalidState(format!(
                "contract {} must be archived before it is purged",
                handle.hash()
            )));
        }
        self.registry.remove(location);
        self.side_effects.forget(location);
        info!(contract = %handle.hash(), location = %location, "Contract purged");
        Ok(())
    }
}

fn record_command(command: &'static str, outcome: &'static str) {
    metrics::counter!("tokentime_commands_total", "command" => command, "outcome" => outcome)
        .increment(1);
}

fn observe_events(change: &ContractChange) {
    for event in &change.events {
        match event {
            ContractEvent::StateChanged { from, to } => {
                metrics::counter!("tokentime_transitions_total", "to" => to.as_str()).increment(1);
                info!(
                    contract = %change.hash,
                    from = %from,
                    to = %to,
                    version = change.version,
                    "Contract state changed"
                );
            }
            ContractEvent::TokensSent { quantity, .. } => {
                metrics::counter!("tokentime_tokens_sent_total").increment(u64::from(*quantity));
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::commands::Actor;
    use crate::domain::repository::SnapshotStore;
    use crate::infrastructure::audit::InMemoryTokenAudit;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::identity::StaticIdentityResolver;
    use crate::infrastructure::snapshot_store::InMemorySnapshotStore;
    use crate::infrastructure::transport::RecordingTransport;
    use std::time::Duration;

    struct Fixture {
        service: StandardContractService,
        transport: Arc<RecordingTransport>,
        store: Arc<InMemorySnapshotStore>,
        audit: Arc<InMemoryTokenAudit>,
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(RecordingTransport::new());
        let store = Arc::new(InMemorySnapshotStore::new());
        let audit = Arc::new(InMemoryTokenAudit::new());
        let side_effects = SideEffectDispatcher::new(transport.clone(), store.clone(), EventBus::new(64))
            .with_audit(audit.clone());
        let service = StandardContractService::new(Arc::new(ContractRegistry::new()), Arc::new(side_effects));
        Fixture {
            service,
            transport,
            store,
            audit,
        }
    }

    fn params(size: usize) -> ContractParams {
        ContractParams::new("cake", "bakers", size, Duration::from_secs(3600))
    }

    fn join(id: &str) -> CommandEnvelope {
        CommandEnvelope::new(
            Actor::member(id),
            Command::Join {
                participant: id.into(),
                display_name: None,
                guest: false,
            },
        )
    }

    #[tokio::test]
    async fn test_execute_unknown_location_is_not_found() {
        let fx = fixture();
        let err = fx
            .service
            .execute(&LocationId::from("nowhere"), join("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_open_posts_board_and_persists() {
        let fx = fixture();
        let location = LocationId::from("room");
        let contract = fx.service.open_contract(location.clone(), params(3)).await.unwrap();
        assert_eq!(contract.state(), ContractState::Signup);
        assert_eq!(fx.transport.messages_at(&location).len(), 1);
        assert!(fx.store.load(contract.hash()).await.unwrap().is_some());

        // Re-opening is idempotent and posts nothing new.
        fx.service.open_contract(location.clone(), params(3)).await.unwrap();
        assert_eq!(fx.transport.messages_at(&location).len(), 1);
    }

    #[tokio::test]
    async fn test_board_is_edited_in_place() {
        let fx = fixture();
        let location = LocationId::from("room");
        fx.service.open_contract(location.clone(), params(3)).await.unwrap();
        fx.service.execute(&location, join("a")).await.unwrap();
        fx.service.execute(&location, join("b")).await.unwrap();

        let messages = fx.transport.messages_at(&location);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].edits, 2);
    }

    #[tokio::test]
    async fn test_duplicate_event_ids_are_ignored() {
        let fx = fixture();
        let location = LocationId::from("room");
        fx.service.open_contract(location.clone(), params(3)).await.unwrap();

        let event_id = uuid::Uuid::new_v4();
        let first = fx
            .service
            .execute(&location, join("a").with_event_id(event_id))
            .await
            .unwrap();
        let second = fx
            .service
            .execute(&location, join("a").with_event_id(event_id))
            .await
            .unwrap();
        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(second.version, first.version);
        assert_eq!(fx.service.contract(&location).await.unwrap().participant_count(), 1);
    }

    #[tokio::test]
    async fn test_identity_fills_missing_display_names() {
        let fx = fixture();
        let identity = Arc::new(StaticIdentityResolver::with_names([("a", "Alice")]));
        let service = fx.service.with_identity(identity);
        let location = LocationId::from("room");
        service.open_contract(location.clone(), params(3)).await.unwrap();
        service.execute(&location, join("a")).await.unwrap();

        let contract = service.contract(&location).await.unwrap();
        assert_eq!(contract.participant(&"a".into()).unwrap().display_name, "Alice");
    }

    #[tokio::test]
    async fn test_transport_failure_does_not_unwind_transition() {
        let fx = fixture();
        let location = LocationId::from("room");
        fx.service.open_contract(location.clone(), params(3)).await.unwrap();
        fx.transport.set_failing(true);

        let change = fx.service.execute(&location, join("a")).await.unwrap();
        assert_eq!(change.snapshot.participant_count(), 1);
        assert_eq!(fx.service.contract(&location).await.unwrap().participant_count(), 1);
        // Persistence still ran.
        let summary = &fx.service.list_contracts().await[0];
        assert!(summary.persisted);
    }

    #[tokio::test]
    async fn test_start_announces_first_turn() {
        let fx = fixture();
        let location = LocationId::from("room");
        fx.service.open_contract(location.clone(), params(2)).await.unwrap();
        fx.service.execute(&location, join("a")).await.unwrap();
        fx.service.execute(&location, join("b")).await.unwrap();
        fx.service
            .execute(&location, CommandEnvelope::new(Actor::member("a"), Command::Start))
            .await
            .unwrap();

        let announcements = fx
            .transport
            .messages_at(&location)
            .into_iter()
            .filter(|m| !m.content.contains("boosters"))
            .count();
        assert!(announcements >= 2);

        fx.service
            .execute(
                &location,
                CommandEnvelope::new(
                    Actor::member("b"),
                    Command::SendTokens {
                        sender: "b".into(),
                        quantity: 6,
                        recipient: None,
                    },
                ),
            )
            .await
            .unwrap();
        let records = fx.audit.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.quantity == 6));
    }

    #[tokio::test]
    async fn test_purge_requires_archived() {
        let fx = fixture();
        let location = LocationId::from("room");
        fx.service.open_contract(location.clone(), params(2)).await.unwrap();
        let err = fx.service.purge(&location).await.unwrap_err();
        assert!(matches!(err, ContractError::InvalidState(_)));

        fx.service
            .execute(
                &location,
                CommandEnvelope::new(Actor::admin("ops"), Command::Archive { force: true }),
            )
            .await
            .unwrap();
        fx.service.purge(&location).await.unwrap();
        assert!(fx.service.list_contracts().await.is_empty());
    }

    #[tokio::test]
    async fn test_restore_reloads_live_snapshots() {
        let fx = fixture();
        let location = LocationId::from("room");
        fx.service.open_contract(location.clone(), params(3)).await.unwrap();
        fx.service.execute(&location, join("a")).await.unwrap();

        let side_effects = SideEffectDispatcher::new(
            Arc::new(RecordingTransport::new()),
            fx.store.clone(),
            EventBus::new(16),
        );
        let restored = StandardContractService::new(Arc::new(ContractRegistry::new()), Arc::new(side_effects));
        assert_eq!(restored.restore().await.unwrap(), 1);
        let contract = restored.contract(&location).await.unwrap();
        assert_eq!(contract.participant_count(), 1);
        assert!(restored.list_contracts().await[0].persisted);
    }
}
