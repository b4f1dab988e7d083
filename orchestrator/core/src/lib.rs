// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! TokenTime coordinator core
//!
//! Turn-taking and token accounting for cooperative boosting contracts.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, use cases and collaborator adapters

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
