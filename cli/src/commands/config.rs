// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use tokentime_core::domain::coordinator_config::{CoordinatorConfigManifest, StorageBackend};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./tokentime-config.yaml)
        #[arg(short, long, default_value = "./tokentime-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, examples } => generate(output, examples),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = CoordinatorConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. TOKENTIME_CONFIG_PATH: {}",
            std::env::var("TOKENTIME_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./tokentime-config.yaml");
        println!("  4. ~/.tokentime/config.yaml");
        println!("  5. /etc/tokentime/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    println!("{}", "Contract defaults:".bold());
    println!("  Tokens wanted: {}", spec.defaults.tokens_wanted);
    println!("  Coop size: {}", spec.defaults.coop_size);
    println!();

    println!("{}", "Lifecycle:".bold());
    println!(
        "  Late-join timeout: {}",
        humantime::format_duration(spec.lifecycle.late_join_timeout)
    );
    println!(
        "  Archive after: {} (idle for {})",
        humantime::format_duration(spec.lifecycle.archive_after),
        humantime::format_duration(spec.lifecycle.idle_after)
    );
    println!(
        "  Purge grace: {}",
        humantime::format_duration(spec.lifecycle.purge_grace)
    );
    println!(
        "  Sweep interval: {}",
        humantime::format_duration(spec.lifecycle.sweep_interval)
    );
    println!();

    println!("{}", "Storage:".bold());
    match spec.storage.backend {
        StorageBackend::Memory => println!("  Backend: memory"),
        StorageBackend::File => println!(
            "  Backend: file ({})",
            spec.storage
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "no path".to_string())
        ),
    }
    println!();

    println!("{}", "Other:".bold());
    println!("  Cross-check workers: {}", spec.cross_check.max_workers);
    println!("  Event bus capacity: {}", spec.event_bus.capacity);
    println!("  Log level: {}", spec.logging.level);
    println!();

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = CoordinatorConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    };

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
