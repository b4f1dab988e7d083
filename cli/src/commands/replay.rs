// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Replay command
//!
//! Drives a scripted list of commands through the coordinator service with a
//! console transport, then prints the final board and fairness deltas.
//!
//! ```yaml
//! location: boost-room
//! contract:
//!   contract_id: cake
//!   coop_id: bakers
//!   coop_size: 2
//!   estimated_duration: 12h
//! steps:
//!   - actor: { id: alice }
//!     command: { action: join, participant: alice }
//!   - after: 10m
//!     actor: { id: bob }
//!     command: { action: send_tokens, sender: bob, quantity: 6 }
//! ```

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use tokentime_core::application::contract_service::{ContractService, StandardContractService};
use tokentime_core::application::cross_check::LedgerCrossCheck;
use tokentime_core::application::registry::ContractRegistry;
use tokentime_core::application::repository_factory::create_snapshot_store;
use tokentime_core::application::side_effects::SideEffectDispatcher;
use tokentime_core::application::sweeper::{LifecycleSweeper, LifecycleSweeperConfig};
use tokentime_core::domain::commands::{Actor, Command, CommandEnvelope};
use tokentime_core::domain::contract::{Contract, ContractParams, LocationId};
use tokentime_core::domain::coordinator_config::CoordinatorConfigManifest;
use tokentime_core::domain::events::ContractEvent;
use tokentime_core::domain::mode::{BoostOrderStrategy, ContractStyle};
use tokentime_core::domain::token::TokenDirection;
use tokentime_core::infrastructure::audit::InMemoryTokenAudit;
use tokentime_core::infrastructure::event_bus::{EventBus, EventBusError, EventReceiver};
use tokentime_core::infrastructure::transport::render_board;

use crate::console::ConsoleTransport;

#[derive(Args)]
pub struct ReplayArgs {
    /// Replay script (YAML)
    #[arg(value_name = "SCRIPT")]
    script: PathBuf,

    /// Only print the final summary
    #[arg(short, long)]
    quiet: bool,

    /// Restore contracts from the configured snapshot store before replaying
    #[arg(long)]
    restore: bool,

    /// Compare ledgers with the recorded audit trail after the last step
    #[arg(long)]
    cross_check: bool,

    /// Run one lifecycle sweep at the replay clock after the last step
    #[arg(long)]
    sweep: bool,
}

#[derive(Debug, Deserialize)]
struct ReplayScript {
    location: LocationId,
    contract: ScriptContract,
    #[serde(default)]
    steps: Vec<ReplayStep>,
}

/// Contract parameters; missing values come from the configured defaults.
#[derive(Debug, Deserialize)]
struct ScriptContract {
    contract_id: String,
    coop_id: String,
    #[serde(default)]
    coop_size: Option<usize>,
    #[serde(with = "humantime_serde")]
    estimated_duration: Duration,
    #[serde(default)]
    style: Option<ContractStyle>,
    /// Flag word used by older bots, e.g. 0x4000
    #[serde(default)]
    legacy_style: Option<u32>,
    #[serde(default)]
    order_strategy: BoostOrderStrategy,
    #[serde(default)]
    tokens_wanted: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ReplayStep {
    /// Advances the replay clock before the step runs
    #[serde(default, with = "humantime_serde")]
    after: Option<Duration>,
    #[serde(default)]
    event_id: Option<Uuid>,
    actor: Actor,
    command: Command,
    #[serde(default)]
    expect: Expectation,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Expectation {
    #[default]
    Applied,
    Rejected,
}

pub async fn execute(args: ReplayArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = CoordinatorConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    let script = load_script(&args.script)?;
    let params = build_params(&script.contract, &config)?;

    let store = create_snapshot_store(&config.spec.storage)
        .context("Failed to initialize snapshot store")?;
    let audit = Arc::new(InMemoryTokenAudit::new());
    let side_effects = Arc::new(
        SideEffectDispatcher::new(
            Arc::new(ConsoleTransport::new(args.quiet)),
            store,
            EventBus::new(config.spec.event_bus.capacity),
        )
        .with_audit(audit.clone()),
    );
    let mut events = side_effects.event_bus().subscribe();
    let service = Arc::new(
        StandardContractService::new(Arc::new(ContractRegistry::new()), side_effects)
            .with_cross_check(LedgerCrossCheck::new(
                audit,
                config.spec.cross_check.max_workers,
            )),
    );

    if args.restore {
        let restored = service
            .restore()
            .await
            .context("Failed to restore snapshots")?;
        println!("Restored {} contract(s)", restored);
    }

    let location = script.location.clone();
    service
        .open_contract(location.clone(), params)
        .await
        .with_context(|| format!("Failed to open contract at {}", location))?;

    let mut clock = Utc::now();
    for (index, step) in script.steps.into_iter().enumerate() {
        let number = index + 1;
        if let Some(after) = step.after {
            clock += chrono::Duration::from_std(after)
                .with_context(|| format!("step {number}: delay is out of range"))?;
        }

        let command_name = step.command.name();
        let mut envelope = CommandEnvelope::new(step.actor, step.command);
        if let Some(event_id) = step.event_id {
            envelope = envelope.with_event_id(event_id);
        }
        debug!(step = number, command = command_name, "Replaying step");

        match (service.execute_at(&location, envelope, clock).await, step.expect) {
            (Ok(change), Expectation::Applied) => {
                if !args.quiet {
                    let note = if change.duplicate { " (duplicate)" } else { "" };
                    println!(
                        "{}",
                        format!("✓ step {number}: {command_name} -> v{}{note}", change.version)
                            .green()
                    );
                }
            }
            (Err(e), Expectation::Rejected) => {
                if !args.quiet {
                    println!(
                        "{}",
                        format!("✓ step {number}: {command_name} rejected: {e}").yellow()
                    );
                }
            }
            (Ok(_), Expectation::Rejected) => {
                bail!("step {number} ({command_name}) was expected to be rejected");
            }
            (Err(e), Expectation::Applied) => {
                return Err(e).with_context(|| format!("step {number} ({command_name}) failed"));
            }
        }
    }

    if args.sweep {
        let sweeper = LifecycleSweeper::new(
            service.clone(),
            LifecycleSweeperConfig::from(&config.spec.lifecycle),
        );
        let report = sweeper.sweep_at(clock).await?;
        info!(
            expired = report.expired,
            archived = report.archived,
            purged = report.purged,
            "Replay sweep finished"
        );
    }

    let contract = service
        .contract(&location)
        .await
        .with_context(|| format!("No contract left at {}", location))?;

    println!();
    println!("{}", "Final board:".bold());
    print!("{}", render_board(&contract));
    println!();
    print_fairness(&contract);
    print_lifecycle(&mut events);

    if args.cross_check {
        let report = service.cross_check(&location).await?;
        println!();
        if report.is_clean() {
            println!(
                "{}",
                format!("✓ Ledgers match for {} participant(s)", report.checked).green()
            );
        } else {
            for mismatch in &report.mismatches {
                println!(
                    "{} {}: local {}/{} external {}/{} (sent/received)",
                    "✗".red(),
                    mismatch.participant,
                    mismatch.local.sent,
                    mismatch.local.received,
                    mismatch.external.sent,
                    mismatch.external.received
                );
            }
            for (participant, error) in &report.failures {
                println!("{} {}: {}", "✗".red(), participant, error);
            }
        }
    }

    Ok(())
}

fn load_script(path: &Path) -> Result<ReplayScript> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read replay script {:?}", path))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse replay script {:?}", path))
}

fn build_params(script: &ScriptContract, config: &CoordinatorConfigManifest) -> Result<ContractParams> {
    let style = match (&script.style, script.legacy_style) {
        (Some(_), Some(_)) => bail!("set either style or legacy_style, not both"),
        (Some(style), None) => *style,
        (None, Some(bits)) => ContractStyle::from_bits(bits)
            .with_context(|| format!("Unsupported legacy style {bits:#x}"))?,
        (None, None) => ContractStyle::default(),
    };

    let mut params = ContractParams::new(
        script.contract_id.clone(),
        script.coop_id.clone(),
        script.coop_size.unwrap_or(config.spec.defaults.coop_size),
        script.estimated_duration,
    )
    .with_style(style)
    .with_order_strategy(script.order_strategy);
    params.tokens_wanted = script
        .tokens_wanted
        .unwrap_or(config.spec.defaults.tokens_wanted);
    Ok(params)
}

fn print_fairness(contract: &Contract) {
    println!("{}", "Fairness:".bold());
    println!(
        "  {:<16} {:>5} {:>9} {:>6} {:>8}",
        "participant", "sent", "received", "delta", "value"
    );
    for turn in contract.participants_in_order() {
        let delta = turn.fairness_delta();
        let delta = match delta {
            d if d > 0 => format!("{d:+}").green(),
            d if d < 0 => format!("{d:+}").red(),
            d => format!("{d:+}").normal(),
        };
        println!(
            "  {:<16} {:>5} {:>9} {:>6} {:>8.3}",
            turn.display_name,
            turn.ledger.count(TokenDirection::Sent),
            turn.ledger.count(TokenDirection::Received),
            delta,
            turn.token_value
        );
    }
}

fn print_lifecycle(events: &mut EventReceiver) {
    let mut states = Vec::new();
    let mut published = 0usize;
    loop {
        match events.try_recv() {
            Ok(event) => {
                published += 1;
                if let ContractEvent::StateChanged { from, to } = event.event {
                    if states.is_empty() {
                        states.push(from.to_string());
                    }
                    states.push(to.to_string());
                }
            }
            Err(EventBusError::Lagged(_)) => continue,
            Err(EventBusError::Empty) | Err(EventBusError::Closed) => break,
        }
    }
    println!();
    println!("{} {} event(s)", "Events published:".bold(), published);
    if !states.is_empty() {
        println!("{} {}", "Lifecycle:".bold(), states.join(" -> "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_scripts_parse() {
        for script in [
            include_str!("../../../demos/direct-contract.yaml"),
            include_str!("../../../demos/banker-contract.yaml"),
        ] {
            let parsed: ReplayScript = serde_yaml::from_str(script).unwrap();
            assert!(!parsed.steps.is_empty());
            build_params(&parsed.contract, &CoordinatorConfigManifest::default()).unwrap();
        }
    }

    #[test]
    fn test_missing_values_use_config_defaults() {
        let script: ScriptContract = serde_yaml::from_str(
            "contract_id: cake\ncoop_id: bakers\nestimated_duration: 2h\nlegacy_style: 16384\n",
        )
        .unwrap();
        let mut config = CoordinatorConfigManifest::default();
        config.spec.defaults.tokens_wanted = 8;
        let params = build_params(&script, &config).unwrap();
        assert_eq!(params.coop_size, 10);
        assert_eq!(params.tokens_wanted, 8);
        assert_eq!(params.estimated_duration, Duration::from_secs(7200));
    }
}
