// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Static identity resolver backed by a name table.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::domain::identity::IdentityResolver;
use crate::domain::participant::ParticipantId;

#[derive(Default)]
pub struct StaticIdentityResolver {
    names: RwLock<HashMap<ParticipantId, String>>,
}

impl StaticIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_names<I, K, V>(names: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<ParticipantId>,
        V: Into<String>,
    {
        let names = names
            .into_iter()
            .map(|(id, name)| (id.into(), name.into()))
            .collect();
        Self {
            names: RwLock::new(names),
        }
    }

    pub fn insert(&self, participant: ParticipantId, name: impl Into<String>) {
        self.names.write().insert(participant, name.into());
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn display_name(&self, participant: &ParticipantId) -> Option<String> {
        self.names.read().get(participant).cloned()
    }
}
