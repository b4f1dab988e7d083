// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Console transport
//!
//! Prints boards and announcements to stdout. Board edits are printed as a
//! fresh copy of the board marked as an update.

use async_trait::async_trait;
use colored::Colorize;
use std::sync::atomic::{AtomicU64, Ordering};

use tokentime_core::domain::contract::{Contract, LocationId};
use tokentime_core::domain::transport::{
    ContractTransport, MessageId, Notification, TransportError,
};
use tokentime_core::infrastructure::transport::{render_announcement, render_board};

#[derive(Default)]
pub struct ConsoleTransport {
    next_id: AtomicU64,
    quiet: bool,
}

impl ConsoleTransport {
    pub fn new(quiet: bool) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            quiet,
        }
    }
}

#[async_trait]
impl ContractTransport for ConsoleTransport {
    async fn render_state(&self, contract: &Contract) -> Result<String, TransportError> {
        Ok(render_board(contract))
    }

    async fn notify(
        &self,
        contract: &Contract,
        notification: &Notification,
    ) -> Result<Option<MessageId>, TransportError> {
        let id = MessageId(format!("console-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1));
        if self.quiet {
            return Ok(Some(id));
        }
        match notification {
            Notification::Board { content } => {
                println!("{} {}", format!("[{}]", contract.location()).dimmed(), "board".bold());
                print!("{content}");
            }
            Notification::Announcement { event, mentions } => {
                let mut line = render_announcement(contract, event);
                if !mentions.is_empty() {
                    let names: Vec<String> = mentions.iter().map(|m| format!("@{m}")).collect();
                    line = format!("{line} {}", names.join(" "));
                }
                println!("{} {}", format!("[{}]", contract.location()).dimmed(), line.cyan());
            }
        }
        Ok(Some(id))
    }

    async fn edit_message(
        &self,
        location: &LocationId,
        message: &MessageId,
        content: &str,
    ) -> Result<(), TransportError> {
        if !self.quiet {
            println!(
                "{} {}",
                format!("[{location}]").dimmed(),
                format!("board updated ({message})").bold()
            );
            print!("{content}");
        }
        Ok(())
    }
}
