// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Side-effect dispatcher
//!
//! Runs everything a committed change implies once the contract lock has been
//! released: event bus publication, token audit, snapshot persistence and
//! the transport's render/notify calls. Collaborator failures are logged and
//! counted, never propagated; the in-memory transition has already committed.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Post-commit fan-out to collaborators

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::application::registry::ContractHandle;
use crate::domain::audit::TokenAudit;
use crate::domain::contract::{ContractChange, LocationId};
use crate::domain::repository::{encode_snapshot, SnapshotStore};
use crate::domain::transport::{ContractTransport, MessageId, Notification, TransportError};
use crate::infrastructure::event_bus::EventBus;

/// The board message last posted at a location and the version it shows.
#[derive(Debug, Clone)]
struct BoardMessage {
    id: MessageId,
    version: u64,
}

pub struct SideEffectDispatcher {
    transport: Arc<dyn ContractTransport>,
    store: Arc<dyn SnapshotStore>,
    audit: Option<Arc<dyn TokenAudit>>,
    event_bus: EventBus,
    boards: Mutex<HashMap<LocationId, BoardMessage>>,
}

impl SideEffectDispatcher {
    pub fn new(
        transport: Arc<dyn ContractTransport>,
        store: Arc<dyn SnapshotStore>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            transport,
            store,
            audit: None,
            event_bus,
            boards: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn TokenAudit>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn store(&self) -> Arc<dyn SnapshotStore> {
        self.store.clone()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Performs the side effects of `change`. Duplicates are skipped. A no-op
    /// change is only persisted, since it may still carry a remembered event id;
    /// `force` (used when a contract is first opened) runs everything.
    pub async fn dispatch(&self, handle: &ContractHandle, change: &ContractChange, force: bool) {
        if change.duplicate {
            return;
        }
        if change.is_noop() && !force {
            self.persist(handle, change).await;
            return;
        }

        self.event_bus.publish_change(change);
        self.record_audit(change).await;
        self.persist(handle, change).await;
        self.render(change).await;
    }

    /// Drops the tracked board for a location whose contract is gone.
    pub fn forget(&self, location: &LocationId) {
        self.boards.lock().remove(location);
    }

    async fn record_audit(&self, change: &ContractChange) {
        let Some(audit) = &self.audit else {
            return;
        };
        for record in change.audit_records() {
            if let Err(e) = audit.record_token_event(&record).await {
                warn!(
                    contract = %change.hash,
                    participant = %record.participant,
                    correlation_id = %record.correlation_id,
                    "Failed to record token event: {}",
                    e
                );
                failure("audit");
            }
        }
    }

    /// Writes the snapshot unless the store already holds this version or a
    /// newer one. Saves for one contract are serialized by the handle.
    async fn persist(&self, handle: &ContractHandle, change: &ContractChange) {
        let _saving = handle.lock_saves().await;
        if handle
            .persisted_version()
            .is_some_and(|persisted| persisted >= change.version)
        {
            debug!(contract = %change.hash, version = change.version, "Snapshot already superseded");
            return;
        }
        let blob = match encode_snapshot(&change.snapshot) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(contract = %change.hash, "Failed to encode snapshot: {}", e);
                failure("persistence");
                return;
            }
        };
        match self.store.save(&change.hash, blob).await {
            Ok(()) => {
                handle.mark_persisted(change.version);
                debug!(contract = %change.hash, version = change.version, "Snapshot saved");
            }
            Err(e) => {
                warn!(contract = %change.hash, version = change.version, "Failed to save snapshot: {}", e);
                failure("persistence");
            }
        }
    }

    async fn render(&self, change: &ContractChange) {
        let contract = &change.snapshot;
        match self.transport.render_state(contract).await {
            Ok(content) => {
                if let Err(e) = self.publish_board(change, content).await {
                    warn!(contract = %change.hash, location = %change.location, "Failed to update board: {}", e);
                    failure("transport");
                }
            }
            Err(e) => {
                warn!(contract = %change.hash, "Failed to render contract: {}", e);
                failure("transport");
            }
        }

        for event in change.events.iter().filter(|event| event.is_announcement()) {
            let notification = Notification::Announcement {
                event: event.clone(),
                mentions: event.mentions(),
            };
            if let Err(e) = self.transport.notify(contract, &notification).await {
                warn!(contract = %change.hash, "Failed to send announcement: {}", e);
                failure("transport");
            }
        }
    }

    /// Edits the tracked board in place, or posts a new one. A board already
    /// showing a newer version is left alone.
    async fn publish_board(&self, change: &ContractChange, content: String) -> Result<(), TransportError> {
        let existing = {
            let mut boards = self.boards.lock();
            match boards.get_mut(&change.location) {
                Some(board) if board.version > change.version => return Ok(()),
                Some(board) => {
                    board.version = change.version;
                    Some(board.id.clone())
                }
                None => None,
            }
        };

        if let Some(id) = existing {
            match self
                .transport
                .edit_message(&change.location, &id, &content)
                .await
            {
                Ok(()) => return Ok(()),
                Err(TransportError::MessageGone(_)) => {
                    debug!(location = %change.location, "Board message gone, posting a new one");
                }
                Err(e) => return Err(e),
            }
        }

        let posted = self
            .transport
            .notify(&change.snapshot, &Notification::Board { content })
            .await?;
        if let Some(id) = posted {
            let mut boards = self.boards.lock();
            let stale = boards
                .get(&change.location)
                .is_some_and(|board| board.version > change.version && board.id != id);
            if !stale {
                boards.insert(
                    change.location.clone(),
                    BoardMessage {
                        id,
                        version: change.version,
                    },
                );
            }
        }
        Ok(())
    }
}

fn failure(collaborator: &'static str) {
    metrics::counter!("tokentime_side_effect_failures_total", "collaborator" => collaborator)
        .increment(1);
}
