// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Inbound commands against a contract.
//!
//! Every external interaction (button press, reaction, slash command) is
//! translated by the transport into a [`CommandEnvelope`] naming who acted and
//! what they asked for. An optional `event_id` lets the aggregate recognise a
//! replayed interaction and ignore it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::mode::SinkPosition;
use crate::domain::participant::ParticipantId;
use crate::domain::token::TokenDirection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    #[default]
    Member,
    /// Passes every coordinator check
    Admin,
    /// Background tasks acting on their own
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ParticipantId,
    #[serde(default)]
    pub role: ActorRole,
}

impl Actor {
    pub fn member(id: impl Into<ParticipantId>) -> Self {
        Self {
            id: id.into(),
            role: ActorRole::Member,
        }
    }

    pub fn admin(id: impl Into<ParticipantId>) -> Self {
        Self {
            id: id.into(),
            role: ActorRole::Admin,
        }
    }

    pub fn system() -> Self {
        Self {
            id: ParticipantId::from("system"),
            role: ActorRole::System,
        }
    }

    pub fn is_privileged(&self) -> bool {
        self.role != ActorRole::Member
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    Join {
        participant: ParticipantId,
        #[serde(default)]
        display_name: Option<String>,
        #[serde(default)]
        guest: bool,
    },
    Leave {
        participant: ParticipantId,
    },
    SetTokens {
        participant: ParticipantId,
        wanted: u32,
    },
    LinkAlt {
        controller: ParticipantId,
        alt: ParticipantId,
    },
    ConfigureBanker {
        #[serde(default)]
        boosting_sink: Option<ParticipantId>,
        #[serde(default)]
        post_sink: Option<ParticipantId>,
        #[serde(default)]
        sink_position: Option<SinkPosition>,
    },
    ConfigureWarmUp {
        sink: ParticipantId,
        runs: u32,
    },
    Start,
    Boost {
        participant: ParticipantId,
    },
    Unboost {
        participant: ParticipantId,
    },
    VoteAdvance,
    Skip {
        #[serde(default)]
        target: Option<ParticipantId>,
    },
    SendToBack {
        participant: ParticipantId,
    },
    Move {
        participant: ParticipantId,
        position: usize,
    },
    Reorder {
        positions: String,
    },
    SetActive {
        participant: ParticipantId,
    },
    SendTokens {
        sender: ParticipantId,
        quantity: u32,
        #[serde(default)]
        recipient: Option<ParticipantId>,
    },
    BankerSend {
        #[serde(default)]
        quantity: Option<u32>,
    },
    VolunteerSink {
        participant: ParticipantId,
    },
    AcknowledgeLeg {
        participant: ParticipantId,
    },
    OpenAdvance,
    CompleteLeg,
    AcknowledgeFinish {
        participant: ParticipantId,
    },
    Finish,
    ExpireLateJoin,
    Archive {
        #[serde(default)]
        force: bool,
    },
    RemoveLedgerEntry {
        participant: ParticipantId,
        direction: TokenDirection,
        index: usize,
    },
}

impl Command {
    /// Stable name used for metrics labels and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Join { .. } => "join",
            Command::Leave { .. } => "leave",
            Command::SetTokens { .. } => "set_tokens",
            Command::LinkAlt { .. } => "link_alt",
            Command::ConfigureBanker { .. } => "configure_banker",
            Command::ConfigureWarmUp { .. } => "configure_warm_up",
            Command::Start => "start",
            Command::Boost { .. } => "boost",
            Command::Unboost { .. } => "unboost",
            Command::VoteAdvance => "vote_advance",
            Command::Skip { .. } => "skip",
            Command::SendToBack { .. } => "send_to_back",
            Command::Move { .. } => "move",
            Command::Reorder { .. } => "reorder",
            Command::SetActive { .. } => "set_active",
            Command::SendTokens { .. } => "send_tokens",
            Command::BankerSend { .. } => "banker_send",
            Command::VolunteerSink { .. } => "volunteer_sink",
            Command::AcknowledgeLeg { .. } => "acknowledge_leg",
            Command::OpenAdvance => "open_advance",
            Command::CompleteLeg => "complete_leg",
            Command::AcknowledgeFinish { .. } => "acknowledge_finish",
            Command::Finish => "finish",
            Command::ExpireLateJoin => "expire_late_join",
            Command::Archive { .. } => "archive",
            Command::RemoveLedgerEntry { .. } => "remove_ledger_entry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
    pub actor: Actor,
    pub command: Command,
}

impl CommandEnvelope {
    pub fn new(actor: Actor, command: Command) -> Self {
        Self {
            event_id: None,
            actor,
            command,
        }
    }

    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = Some(event_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_yaml_shape() {
        let yaml = "action: send_tokens\nsender: alice\nquantity: 2\n";
        let command: Command = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            command,
            Command::SendTokens {
                sender: "alice".into(),
                quantity: 2,
                recipient: None,
            }
        );
        assert_eq!(command.name(), "send_tokens");

        let start: Command = serde_yaml::from_str("action: start").unwrap();
        assert_eq!(start, Command::Start);
    }
}
