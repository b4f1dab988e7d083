// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Identity collaborator: resolves participant IDs to display names.

use async_trait::async_trait;

use crate::domain::participant::ParticipantId;

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Display name for `participant`, or `None` when the platform does not know it.
    async fn display_name(&self, participant: &ParticipantId) -> Option<String>;
}
