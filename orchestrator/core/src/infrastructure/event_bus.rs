// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Contract Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Observers (console transport, tests, future dashboards) subscribe here
// instead of hooking into the aggregate.
//
// In-memory only: events are lost on restart, snapshots are the durable record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::contract::{ContractChange, ContractHash, LocationId};
use crate::domain::events::ContractEvent;

/// A contract event together with the contract it happened to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub contract: ContractHash,
    pub location: LocationId,
    /// Contract version after the change that produced this event
    pub version: u64,
    pub occurred_at: DateTime<Utc>,
    pub event: ContractEvent,
}

/// Event bus for publishing and subscribing to contract events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish every event of an applied change, in order
    pub fn publish_change(&self, change: &ContractChange) {
        for event in &change.events {
            self.publish(DomainEvent {
                contract: change.hash.clone(),
                location: change.location.clone(),
                version: change.version,
                occurred_at: change.occurred_at,
                event: event.clone(),
            });
        }
    }

    /// Publish a domain event to all subscribers
    pub fn publish(&self, event: DomainEvent) {
        debug!(contract = %event.contract, "Publishing event: {:?}", event.event);

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all domain events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe and filter for a single contract
    pub fn subscribe_contract(&self, contract: ContractHash) -> ContractEventReceiver {
        ContractEventReceiver {
            receiver: self.sender.subscribe(),
            contract,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all domain events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for one contract's events (filtered)
pub struct ContractEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    contract: ContractHash,
}

impl ContractEventReceiver {
    /// Receive the next event for the subscribed contract, skipping all others
    pub async fn recv(&mut self) -> Result<ContractEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.contract == self.contract {
                return Ok(event.event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
