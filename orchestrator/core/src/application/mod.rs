// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod contract_service;
pub mod cross_check;
pub mod registry;
pub mod repository_factory;
pub mod side_effects;
pub mod sweeper;

// Re-export use cases for convenience
pub use contract_service::{ContractService, ContractSummary, StandardContractService};
pub use cross_check::{CrossCheckReport, LedgerCrossCheck, LedgerMismatch};
pub use registry::{ContractHandle, ContractRegistry};
pub use side_effects::SideEffectDispatcher;
pub use sweeper::{LifecycleSweeper, LifecycleSweeperConfig, SweepReport};
