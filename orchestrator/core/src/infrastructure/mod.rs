// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod audit;
pub mod event_bus;
pub mod identity;
pub mod snapshot_store;
pub mod transport;

pub use event_bus::{DomainEvent, EventBus, EventBusError};
pub use snapshot_store::{FileSnapshotStore, InMemorySnapshotStore};
