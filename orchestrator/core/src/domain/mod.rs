// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! The contract aggregate and everything it owns, plus the collaborator
//! interfaces (transport, persistence, audit, identity) it is driven through.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure business rules; no I/O

pub mod audit;
pub mod banker;
pub mod boost_order;
pub mod commands;
pub mod contract;
pub mod coordinator_config;
pub mod events;
pub mod identity;
pub mod mode;
pub mod participant;
pub mod repository;
pub mod token;
pub mod transport;
pub mod warm_up;
