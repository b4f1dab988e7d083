// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Transport Collaborator
//!
//! The chat surface a contract is coordinated on. The core never sees message
//! markup; it asks the transport to render a contract, to post a notification
//! and to edit a previously posted message by id.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer (interface), Infrastructure Layer (implementations)
//! - **Purpose:** Outbound render/notify port invoked after a change commits

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::contract::{Contract, LocationId};
use crate::domain::events::ContractEvent;
use crate::domain::participant::ParticipantId;

/// Identifier of a message posted by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A freshly rendered board for the contract
    Board { content: String },
    /// A one-off announcement of an event
    Announcement {
        event: ContractEvent,
        mentions: Vec<ParticipantId>,
    },
}

#[async_trait]
pub trait ContractTransport: Send + Sync {
    /// Renders the current state of `contract` as displayable content.
    async fn render_state(&self, contract: &Contract) -> Result<String, TransportError>;

    /// Posts a notification at the contract's location. Returns the id of the
    /// posted message when the transport tracks one.
    async fn notify(
        &self,
        contract: &Contract,
        notification: &Notification,
    ) -> Result<Option<MessageId>, TransportError>;

    async fn edit_message(
        &self,
        location: &LocationId,
        message: &MessageId,
        content: &str,
    ) -> Result<(), TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("location {0} is unavailable")]
    LocationUnavailable(String),

    #[error("message {0} no longer exists")]
    MessageGone(String),

    #[error("transport failure: {0}")]
    Failed(String),
}
