// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Token valuation command
//!
//! Evaluates the value of a single token at a point in a contract, or prints
//! a table of values across the whole contract.

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use std::time::Duration;

use tokentime_core::domain::token::token_value;

#[derive(Args)]
pub struct TokenValueArgs {
    /// Time since the contract started (e.g. "90m", "1h 30m")
    #[arg(long, value_parser = humantime::parse_duration, default_value = "0s")]
    elapsed: Duration,

    /// Estimated contract duration (e.g. "12h")
    #[arg(long, value_parser = humantime::parse_duration)]
    duration: Duration,

    /// Print a table with this many evenly spaced rows instead
    #[arg(long, value_name = "ROWS")]
    table: Option<u32>,
}

pub fn execute(args: TokenValueArgs) -> Result<()> {
    if args.duration.is_zero() {
        bail!("--duration must be greater than zero");
    }

    match args.table {
        Some(rows) => {
            if rows < 2 {
                bail!("--table needs at least 2 rows");
            }
            println!("{:>16}  {}", "elapsed".bold(), "value".bold());
            for (elapsed, value) in value_table(args.duration, rows) {
                println!(
                    "{:>16}  {:.3}",
                    humantime::format_duration(elapsed).to_string(),
                    value
                );
            }
        }
        None => {
            let value = token_value(args.elapsed, args.duration);
            println!(
                "Token value after {} of {}: {}",
                humantime::format_duration(args.elapsed),
                humantime::format_duration(args.duration),
                format!("{value:.3}").green()
            );
        }
    }

    Ok(())
}

fn value_table(duration: Duration, rows: u32) -> Vec<(Duration, f64)> {
    (0..rows)
        .map(|row| {
            let elapsed = Duration::from_secs(duration.as_secs() * u64::from(row) / u64::from(rows - 1));
            (elapsed, token_value(elapsed, duration))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_spans_whole_contract() {
        let table = value_table(Duration::from_secs(3600), 5);
        assert_eq!(table.len(), 5);
        assert_eq!(table[0], (Duration::ZERO, 1.0));
        assert_eq!(table[4].0, Duration::from_secs(3600));
        assert_eq!(table[4].1, 0.03);
        assert!(table.windows(2).all(|w| w[0].1 >= w[1].1));
    }
}
