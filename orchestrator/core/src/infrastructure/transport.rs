// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Transport Adapters
//!
//! Plain-text board rendering shared by every text transport, and a
//! `RecordingTransport` that keeps everything it was asked to post in memory.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements `ContractTransport` without a chat platform

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::domain::contract::{Contract, LocationId};
use crate::domain::events::ContractEvent;
use crate::domain::participant::{TurnState, TurnStatus};
use crate::domain::token::token_value_at;
use crate::domain::transport::{ContractTransport, MessageId, Notification, TransportError};

/// Renders the contract as a plain-text board.
pub fn render_board(contract: &Contract) -> String {
    let mut board = String::new();
    let _ = writeln!(
        board,
        "{} / {}  [{}]  {}/{} boosters",
        contract.contract_id(),
        contract.coop_id(),
        contract.state(),
        contract.participant_count(),
        contract.coop_size()
    );
    if let Some(banker) = &contract.banker().current {
        let _ = writeln!(board, "Banker: {banker}");
    }
    if let Some(warm_up) = contract.warm_up() {
        if !warm_up.is_finished() {
            let _ = writeln!(
                board,
                "Warm-up leg {}/{}: waiting on {}",
                warm_up.current_leg + 1,
                warm_up.plan.legs,
                warm_up.pending().len()
            );
        }
    }
    for (index, turn) in contract.participants_in_order().enumerate() {
        let _ = writeln!(board, "{:>2}. {}", index + 1, render_turn(turn));
    }
    board
}

fn render_turn(turn: &TurnState) -> String {
    let marker = match turn.status {
        TurnStatus::Idle => "[ ]",
        TurnStatus::Active => "[>]",
        TurnStatus::Done => "[x]",
    };
    let mut line = format!(
        "{marker} {:<16} {:>2}/{:<2}",
        turn.display_name, turn.tokens_received, turn.tokens_wanted
    );
    let delta = turn.fairness_delta();
    if delta != 0 {
        let _ = write!(line, "  delta {delta:+}");
    }
    if let Some(controller) = &turn.alt_controller {
        let _ = write!(line, "  (alt of {controller})");
    }
    line
}

/// Renders a single announcement line.
pub fn render_announcement(contract: &Contract, event: &ContractEvent) -> String {
    match event {
        ContractEvent::StateChanged { to, .. } => {
            format!("{} is now {}", contract.hash(), to)
        }
        ContractEvent::TurnStarted { participant } => {
            let value = token_value_at(
                contract.started_at(),
                contract.last_interaction(),
                contract.estimated_duration(),
            );
            format!("{participant}, it's your turn to boost (token value {value:.3})")
        }
        ContractEvent::WarmUpLegReady { leg } => {
            format!("Warm-up leg {} is ready to advance", leg + 1)
        }
        ContractEvent::WarmUpAdvanceOpened { leg, by, ready } => {
            let early = if *ready { "" } else { " before everyone acknowledged" };
            format!("{by} opened the advance for warm-up leg {}{early}", leg + 1)
        }
        other => format!("{other:?}"),
    }
}

/// A posted message as seen by the recording transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMessage {
    pub id: MessageId,
    pub location: LocationId,
    pub content: String,
    pub edits: usize,
}

/// Transport that keeps every posted message in memory. Can be told to fail
/// so that callers can observe how failures are handled.
#[derive(Default)]
pub struct RecordingTransport {
    messages: Mutex<Vec<RecordedMessage>>,
    next_id: AtomicU64,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<RecordedMessage> {
        self.messages.lock().clone()
    }

    pub fn messages_at(&self, location: &LocationId) -> Vec<RecordedMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|message| &message.location == location)
            .cloned()
            .collect()
    }

    fn check(&self) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Failed("recording transport set to fail".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContractTransport for RecordingTransport {
    async fn render_state(&self, contract: &Contract) -> Result<String, TransportError> {
        self.check()?;
        Ok(render_board(contract))
    }

    async fn notify(
        &self,
        contract: &Contract,
        notification: &Notification,
    ) -> Result<Option<MessageId>, TransportError> {
        self.check()?;
        let content = match notification {
            Notification::Board { content } => content.clone(),
            Notification::Announcement { event, .. } => render_announcement(contract, event),
        };
        let id = MessageId(format!("msg-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1));
        self.messages.lock().push(RecordedMessage {
            id: id.clone(),
            location: contract.location().clone(),
            content,
            edits: 0,
        });
        Ok(Some(id))
    }

    async fn edit_message(
        &self,
        location: &LocationId,
        message: &MessageId,
        content: &str,
    ) -> Result<(), TransportError> {
        self.check()?;
        let mut messages = self.messages.lock();
        let recorded = messages
            .iter_mut()
            .find(|m| &m.id == message && &m.location == location)
            .ok_or_else(|| TransportError::MessageGone(message.to_string()))?;
        recorded.content = content.to_string();
        recorded.edits += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::commands::{Actor, Command, CommandEnvelope};
    use crate::domain::contract::ContractParams;
    use chrono::Utc;
    use std::time::Duration;

    fn contract() -> Contract {
        let params = ContractParams::new("winter", "coop", 4, Duration::from_secs(3600));
        let mut contract = Contract::new(LocationId::from("room"), params, Utc::now()).unwrap();
        for name in ["alice", "bob"] {
            let join = CommandEnvelope::new(
                Actor::member(name),
                Command::Join {
                    participant: name.into(),
                    display_name: None,
                    guest: false,
                },
            );
            contract.apply(&join, Utc::now()).unwrap();
        }
        contract
            .apply(&CommandEnvelope::new(Actor::member("alice"), Command::Start), Utc::now())
            .unwrap();
        contract
    }

    #[test]
    fn test_board_lists_participants_in_order() {
        let board = render_board(&contract());
        let lines: Vec<&str> = board.lines().collect();
        assert!(lines[0].starts_with("winter / coop  [direct]  2/4"));
        assert!(lines[1].contains("[>] alice"));
        assert!(lines[2].contains("[ ] bob"));
    }

    #[test]
    fn test_early_advance_is_called_out() {
        let contract = contract();
        let early = ContractEvent::WarmUpAdvanceOpened {
            leg: 0,
            by: "alice".into(),
            ready: false,
        };
        assert_eq!(
            render_announcement(&contract, &early),
            "alice opened the advance for warm-up leg 1 before everyone acknowledged"
        );
        let ready = ContractEvent::WarmUpAdvanceOpened {
            leg: 0,
            by: "alice".into(),
            ready: true,
        };
        assert_eq!(
            render_announcement(&contract, &ready),
            "alice opened the advance for warm-up leg 1"
        );
    }

    #[tokio::test]
    async fn test_recording_transport_posts_and_edits() {
        let transport = RecordingTransport::new();
        let contract = contract();
        let id = transport
            .notify(&contract, &Notification::Board { content: "v1".to_string() })
            .await
            .unwrap()
            .unwrap();
        transport
            .edit_message(contract.location(), &id, "v2")
            .await
            .unwrap();

        let messages = transport.messages_at(contract.location());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "v2");
        assert_eq!(messages[0].edits, 1);

        transport.set_failing(true);
        assert!(transport.render_state(&contract).await.is_err());
    }
}
