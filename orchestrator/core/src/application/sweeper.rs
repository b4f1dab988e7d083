// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lifecycle Sweeper - Background task for contract expiry and cleanup
//!
//! Each cycle walks the live contracts and:
//! - completes Waiting contracts whose late-join window has run out
//! - archives contracts that are old enough and have gone quiet
//! - purges archived contracts from the registry once their final version is
//!   persisted and the grace period has passed
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Time-driven lifecycle transitions

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::application::contract_service::{ContractService, ContractSummary};
use crate::domain::commands::{Actor, Command, CommandEnvelope};
use crate::domain::contract::ContractState;
use crate::domain::coordinator_config::LifecycleConfig;

/// Configuration for the lifecycle sweeper
#[derive(Debug, Clone)]
pub struct LifecycleSweeperConfig {
    /// Waiting contracts complete after this long without a late joiner
    pub late_join_timeout: Duration,

    /// Contracts younger than this are never archived automatically
    pub archive_after: Duration,

    /// Quiet period required before automatic archival
    pub idle_after: Duration,

    /// Time an archived contract stays in the registry
    pub purge_grace: Duration,

    /// How often to run the sweeper
    pub interval: Duration,

    /// Whether sweeping is enabled
    pub enabled: bool,
}

impl Default for LifecycleSweeperConfig {
    fn default() -> Self {
        Self::from(&LifecycleConfig::default())
    }
}

impl From<&LifecycleConfig> for LifecycleSweeperConfig {
    fn from(config: &LifecycleConfig) -> Self {
        Self {
            late_join_timeout: config.late_join_timeout,
            archive_after: config.archive_after,
            idle_after: config.idle_after,
            purge_grace: config.purge_grace,
            interval: config.sweep_interval,
            enabled: true,
        }
    }
}

/// Outcome of one sweep cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub archived: usize,
    pub purged: usize,
    pub failures: usize,
}

pub struct LifecycleSweeper {
    contracts: Arc<dyn ContractService>,
    config: LifecycleSweeperConfig,
    shutdown_token: tokio_util::sync::CancellationToken,
}

impl LifecycleSweeper {
    pub fn new(contracts: Arc<dyn ContractService>, config: LifecycleSweeperConfig) -> Self {
        Self {
            contracts,
            config,
            shutdown_token: tokio_util::sync::CancellationToken::new(),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> tokio_util::sync::CancellationToken {
        self.shutdown_token.clone()
    }

    /// Start the sweeper background task
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!("Lifecycle sweeper is disabled");
            return;
        }

        info!(
            interval = ?self.config.interval,
            late_join_timeout = ?self.config.late_join_timeout,
            "Starting lifecycle sweeper background task"
        );

        let mut tick = interval(self.config.interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    debug!("Running lifecycle sweep");
                    match self.sweep_at(Utc::now()).await {
                        Ok(report) if report == SweepReport::default() => {}
                        Ok(report) => {
                            info!(
                                expired = report.expired,
                                archived = report.archived,
                                purged = report.purged,
                                failures = report.failures,
                                "Lifecycle sweep completed"
                            );
                        }
                        Err(e) => {
                            warn!("Lifecycle sweep failed: {}", e);
                        }
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping lifecycle sweeper");
                    break;
                }
            }
        }

        info!("Lifecycle sweeper background task stopped");
    }

    /// Runs one sweep as of `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for summary in self.contracts.list_contracts().await {
            let command = match self.due_action(&summary, now) {
                Some(SweepAction::Expire) => Command::ExpireLateJoin,
                Some(SweepAction::Archive) => Command::Archive { force: true },
                Some(SweepAction::Purge) => {
                    match self.contracts.purge(&summary.location).await {
                        Ok(()) => report.purged += 1,
                        Err(e) => {
                            warn!(contract = %summary.hash, "Failed to purge contract: {}", e);
                            report.failures += 1;
                        }
                    }
                    continue;
                }
                None => continue,
            };

            let envelope = CommandEnvelope::new(Actor::system(), command);
            match self.contracts.execute(&summary.location, envelope).await {
                Ok(_) if summary.state == ContractState::Waiting => report.expired += 1,
                Ok(_) => report.archived += 1,
                Err(e) => {
                    warn!(contract = %summary.hash, state = %summary.state, "Sweep transition rejected: {}", e);
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }

    fn due_action(&self, summary: &ContractSummary, now: DateTime<Utc>) -> Option<SweepAction> {
        match summary.state {
            ContractState::Archived => {
                let archived_at = summary.archived_at?;
                (summary.persisted && elapsed(archived_at, now) >= self.config.purge_grace)
                    .then_some(SweepAction::Purge)
            }
            ContractState::Waiting
                if summary
                    .waiting_since
                    .is_some_and(|since| elapsed(since, now) >= self.config.late_join_timeout) =>
            {
                Some(SweepAction::Expire)
            }
            _ => (elapsed(summary.created_at, now) >= self.config.archive_after
                && elapsed(summary.last_interaction, now) >= self.config.idle_after)
                .then_some(SweepAction::Archive),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepAction {
    Expire,
    Archive,
    Purge,
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}
