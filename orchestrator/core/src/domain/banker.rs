// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Banker / sink assignments.
//!
//! Three sink slots exist: the warm-up sink who collects tokens while the
//! warm-up legs run, the boosting sink who pays out each turn in delegated
//! mode, and the post-contract sink (which a participant may volunteer for).
//! Which one is the *current* banker depends on the lifecycle state.

use serde::{Deserialize, Serialize};

use crate::domain::contract::ContractState;
use crate::domain::mode::{ContractMode, SinkPosition};
use crate::domain::participant::ParticipantId;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BankerState {
    #[serde(default)]
    pub warm_up_sink: Option<ParticipantId>,
    #[serde(default)]
    pub boosting_sink: Option<ParticipantId>,
    #[serde(default)]
    pub post_sink: Option<ParticipantId>,
    #[serde(default)]
    pub sink_position: SinkPosition,
    #[serde(default)]
    pub current: Option<ParticipantId>,
}

impl BankerState {
    pub fn banker_for(&self, state: ContractState, mode: ContractMode) -> Option<ParticipantId> {
        match state {
            ContractState::WarmUp => self.warm_up_sink.clone(),
            ContractState::Delegated => self.boosting_sink.clone(),
            ContractState::Waiting => match mode {
                ContractMode::Delegated => self.boosting_sink.clone(),
                ContractMode::Direct => self.post_sink.clone(),
            },
            ContractState::Completed => self.post_sink.clone(),
            _ => None,
        }
    }

    /// Recomputes the current banker and reports whether it changed.
    pub fn refresh(&mut self, state: ContractState, mode: ContractMode) -> bool {
        let next = self.banker_for(state, mode);
        if next == self.current {
            return false;
        }
        self.current = next;
        true
    }

    pub fn is_sink(&self, id: &ParticipantId) -> bool {
        [&self.warm_up_sink, &self.boosting_sink, &self.post_sink]
            .into_iter()
            .any(|slot| slot.as_ref() == Some(id))
    }

    /// Hands every slot held by `id` to `fallback` (or clears it).
    pub fn release(&mut self, id: &ParticipantId, fallback: Option<&ParticipantId>) {
        for slot in [
            &mut self.warm_up_sink,
            &mut self.boosting_sink,
            &mut self.post_sink,
        ] {
            if slot.as_ref() == Some(id) {
                *slot = fallback.cloned();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bankers() -> BankerState {
        BankerState {
            warm_up_sink: Some("crt".into()),
            boosting_sink: Some("bank".into()),
            post_sink: Some("post".into()),
            ..BankerState::default()
        }
    }

    #[test]
    fn test_current_banker_follows_state() {
        let mut state = bankers();
        let expectations = [
            (ContractState::Signup, ContractMode::Direct, None),
            (ContractState::WarmUp, ContractMode::Direct, Some("crt")),
            (ContractState::Delegated, ContractMode::Delegated, Some("bank")),
            (ContractState::Direct, ContractMode::Direct, None),
            (ContractState::Waiting, ContractMode::Delegated, Some("bank")),
            (ContractState::Waiting, ContractMode::Direct, Some("post")),
            (ContractState::Completed, ContractMode::Delegated, Some("post")),
            (ContractState::Archived, ContractMode::Delegated, None),
        ];
        for (contract_state, mode, expected) in expectations {
            state.refresh(contract_state, mode);
            assert_eq!(state.current, expected.map(ParticipantId::from));
        }
    }

    #[test]
    fn test_release_hands_slots_to_fallback() {
        let mut state = bankers();
        state.boosting_sink = Some("crt".into());
        state.release(&"crt".into(), Some(&"main".into()));
        assert_eq!(state.warm_up_sink, Some("main".into()));
        assert_eq!(state.boosting_sink, Some("main".into()));
        assert!(state.is_sink(&"post".into()));

        state.release(&"post".into(), None);
        assert!(state.post_sink.is_none());
        assert!(!state.is_sink(&"post".into()));
    }
}
