// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Boost Order Queue
//!
//! Ordered list of participant IDs plus a cursor naming the current turn. Every
//! operation that changes the sequence bumps `revision` and re-derives the
//! cursor by locating the ID it referenced before the change, so the cursor
//! never points at a stale or removed participant.
//!
//! Positions accepted by the public API are 1-based positions in the resulting
//! order. A cursor equal to `len()` means no participant is current.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Sequence bookkeeping owned by the `Contract` aggregate

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;
use thiserror::Error;

use crate::domain::participant::ParticipantId;

static POSITION_TERM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*(?:-\s*(\d+))?\s*$").expect("position term pattern is valid")
});

// Mention decorations that chat clients wrap around pasted values
static MENTION_NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\\<>@#&!]").expect("mention pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("{0} is not in the boost order")]
    UnknownParticipant(ParticipantId),

    #[error("{0} is already in the boost order")]
    DuplicateParticipant(ParticipantId),

    #[error("{participant} is already in position {position}")]
    AlreadyInPosition {
        participant: ParticipantId,
        position: usize,
    },

    #[error("there is nobody after the current booster to swap with")]
    NothingToSwap,

    #[error("{0}")]
    MalformedOrder(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoostOrder {
    order: Vec<ParticipantId>,
    cursor: usize,
    revision: u64,
}

impl BoostOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn ids(&self) -> &[ParticipantId] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParticipantId> {
        self.order.iter()
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.order.contains(id)
    }

    /// Zero-based index of `id`.
    pub fn index_of(&self, id: &ParticipantId) -> Option<usize> {
        self.order.iter().position(|p| p == id)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn current(&self) -> Option<&ParticipantId> {
        self.order.get(self.cursor)
    }

    pub fn get(&self, index: usize) -> Option<&ParticipantId> {
        self.order.get(index)
    }

    /// Moves the cursor without touching the sequence. Out-of-range values clamp to `len()`.
    pub fn set_cursor(&mut self, index: usize) {
        self.cursor = index.min(self.order.len());
    }

    pub fn point_at(&mut self, id: &ParticipantId) -> Result<usize, QueueError> {
        let index = self
            .index_of(id)
            .ok_or_else(|| QueueError::UnknownParticipant(id.clone()))?;
        self.cursor = index;
        Ok(index)
    }

    /// Applies `mutate` to the sequence, then relocates the cursor onto the ID it
    /// referenced beforehand. If that ID is gone the cursor keeps its slot, clamped.
    fn rearrange<F>(&mut self, mutate: F)
    where
        F: FnOnce(&mut Vec<ParticipantId>),
    {
        let anchor = self.current().cloned();
        mutate(&mut self.order);
        self.cursor = match anchor.and_then(|id| self.index_of(&id)) {
            Some(index) => index,
            None => self.cursor.min(self.order.len()),
        };
        self.revision += 1;
    }

    pub fn append(&mut self, id: ParticipantId) -> Result<usize, QueueError> {
        self.insert(usize::MAX, id)
    }

    /// Inserts at a 1-based position, clamped to the end. An empty queue inserts at 1.
    pub fn insert(&mut self, position: usize, id: ParticipantId) -> Result<usize, QueueError> {
        if self.contains(&id) {
            return Err(QueueError::DuplicateParticipant(id));
        }
        let index = position.saturating_sub(1).min(self.order.len());
        let was_exhausted = self.cursor >= self.order.len();
        self.rearrange(|order| order.insert(index, id));
        if was_exhausted {
            // A queue with no current participant stays that way
            self.cursor = self.order.len();
        }
        Ok(index + 1)
    }

    /// Removes `id` and returns its former zero-based index. Removing the current
    /// participant leaves the cursor on the slot that now holds the next one.
    pub fn remove(&mut self, id: &ParticipantId) -> Result<usize, QueueError> {
        let index = self
            .index_of(id)
            .ok_or_else(|| QueueError::UnknownParticipant(id.clone()))?;
        self.rearrange(|order| {
            order.remove(index);
        });
        Ok(index)
    }

    /// Moves `id` so that it ends up at the 1-based `position` of the resulting
    /// order. Positions past the end clamp to the last slot; 0 clamps to 1.
    pub fn move_to(&mut self, id: &ParticipantId, position: usize) -> Result<usize, QueueError> {
        let from = self
            .index_of(id)
            .ok_or_else(|| QueueError::UnknownParticipant(id.clone()))?;
        let to = position.max(1).min(self.order.len()) - 1;
        if from == to {
            return Err(QueueError::AlreadyInPosition {
                participant: id.clone(),
                position: to + 1,
            });
        }
        self.rearrange(|order| {
            let moved = order.remove(from);
            order.insert(to, moved);
        });
        Ok(to + 1)
    }

    pub fn send_to_back(&mut self, id: &ParticipantId) -> Result<usize, QueueError> {
        let position = self.order.len();
        self.move_to(id, position)
    }

    /// Exchanges the current participant with the next one. The cursor stays on
    /// its slot and therefore names the participant that moved up.
    pub fn swap_with_next(&mut self) -> Result<(), QueueError> {
        let next = self.cursor + 1;
        if next >= self.order.len() {
            return Err(QueueError::NothingToSwap);
        }
        self.order.swap(self.cursor, next);
        self.revision += 1;
        Ok(())
    }

    /// Applies a reorder specification such as `"3,1,2"` or `"1,2,3,6,7,5,8-10"`.
    pub fn reorder(&mut self, spec: &str) -> Result<(), QueueError> {
        let permutation = parse_permutation(spec, self.order.len())?;
        let reordered: Vec<ParticipantId> = permutation
            .iter()
            .map(|&index| self.order[index].clone())
            .collect();
        self.rearrange(|order| *order = reordered);
        Ok(())
    }

    /// Replaces the whole sequence with a permutation of itself.
    pub fn replace_all(&mut self, order: Vec<ParticipantId>) -> Result<(), QueueError> {
        let current: HashSet<&ParticipantId> = self.order.iter().collect();
        let proposed: HashSet<&ParticipantId> = order.iter().collect();
        if order.len() != self.order.len() || proposed.len() != order.len() || current != proposed {
            return Err(QueueError::MalformedOrder(
                "replacement order must contain every participant exactly once".to_string(),
            ));
        }
        if order == self.order {
            return Ok(());
        }
        self.rearrange(|existing| *existing = order);
        Ok(())
    }
}

/// Parses a comma separated list of 1-based positions and `a-b` ranges into a
/// zero-based permutation of `len` elements. Ranges may run backwards, repeated
/// positions are ignored after their first occurrence.
pub fn parse_permutation(spec: &str, len: usize) -> Result<Vec<usize>, QueueError> {
    let cleaned = MENTION_NOISE.replace_all(spec, "");
    let mut seen = HashSet::new();
    let mut positions = Vec::with_capacity(len);

    for term in cleaned.split(',') {
        if term.trim().is_empty() {
            continue;
        }
        let captures = POSITION_TERM.captures(term).ok_or_else(|| {
            QueueError::MalformedOrder(format!("'{}' is not a position or range", term.trim()))
        })?;
        let start = parse_position(&captures[1], len)?;
        let end = match captures.get(2) {
            Some(end) => parse_position(end.as_str(), len)?,
            None => start,
        };
        let expanded: Box<dyn Iterator<Item = usize>> = if start <= end {
            Box::new(start..=end)
        } else {
            Box::new((end..=start).rev())
        };
        for position in expanded {
            if seen.insert(position) {
                positions.push(position - 1);
            }
        }
    }

    if positions.len() != len {
        return Err(QueueError::MalformedOrder(format!(
            "every position needs to be specified exactly once: got {} of {}",
            positions.len(),
            len
        )));
    }
    Ok(positions)
}

fn parse_position(raw: &str, len: usize) -> Result<usize, QueueError> {
    let position: usize = raw
        .parse()
        .map_err(|_| QueueError::MalformedOrder(format!("'{raw}' is not a valid position")))?;
    if position == 0 || position > len {
        return Err(QueueError::MalformedOrder(format!(
            "position {position} is outside 1..={len}"
        )));
    }
    Ok(position)
}
