// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Contract Aggregate
//!
//! The contract is the aggregate root of a coordinated boosting event. It owns
//! the lifecycle state, the boost order queue, each participant's turn state and
//! token ledger, the banker assignments and the optional warm-up sub-machine.
//!
//! All mutation goes through [`Contract::apply`], which runs the command on a
//! working copy, re-derives the cursor, checks the aggregate invariants and only
//! then commits. A rejected command leaves the contract untouched; an accepted
//! one returns a [`ContractChange`] describing what happened so that side
//! effects can be performed after the caller releases its lock.
//!
//! # Lifecycle
//!
//! ```text
//! Signup ──► WarmUp ──► Direct | Delegated ──► Waiting ──► Completed ──► Archived
//!    └───────────────────────►┘                  ▲  │
//!                                     late join  └──┘
//! ```
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Turn order, token economy and lifecycle invariants

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::audit::TokenAuditRecord;
use crate::domain::banker::BankerState;
use crate::domain::boost_order::{BoostOrder, QueueError};
use crate::domain::commands::{Actor, ActorRole, Command, CommandEnvelope};
use crate::domain::events::ContractEvent;
use crate::domain::mode::{
    BoostOrderStrategy, ContractMode, ContractStyle, SinkPosition, TOKENS_EIGHT, TOKENS_SIX,
};
use crate::domain::participant::{ParticipantId, TurnState, TurnStatus};
use crate::domain::token::{token_value_at, CorrelationId, LedgerEntry, TokenDirection};
use crate::domain::warm_up::{LegOutcome, WarmUpError, WarmUpPhase, WarmUpPlan, WarmUpState};

pub const DEFAULT_TOKENS_WANTED: u32 = 6;
const RECENT_EVENT_CAPACITY: usize = 128;
const ADVANCE_VOTES_REQUIRED: usize = 2;

// ============================================================================
// Identity
// ============================================================================

/// Opaque contract key: `"{contract_id}-{coop_id}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractHash(pub String);

impl ContractHash {
    pub fn new(contract_id: &str, coop_id: &str) -> Self {
        Self(format!("{contract_id}-{coop_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContractHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the contract is being coordinated (a channel, a thread).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub String);

impl LocationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LocationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractState {
    Signup,
    WarmUp,
    Direct,
    Delegated,
    Waiting,
    Completed,
    Archived,
}

impl ContractState {
    /// States in which exactly one participant may hold the turn.
    pub fn is_single_active_turn(self) -> bool {
        matches!(self, ContractState::Direct | ContractState::Delegated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContractState::Signup => "signup",
            ContractState::WarmUp => "warm_up",
            ContractState::Direct => "direct",
            ContractState::Delegated => "delegated",
            ContractState::Waiting => "waiting",
            ContractState::Completed => "completed",
            ContractState::Archived => "archived",
        }
    }
}

impl fmt::Display for ContractState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractError {
    #[error("no contract found for {0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{actor} is not allowed to {action}")]
    Unauthorized {
        actor: ParticipantId,
        action: &'static str,
    },

    #[error("{0}")]
    InvalidTarget(String),

    #[error("{0}")]
    MalformedInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<QueueError> for ContractError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::MalformedOrder(_) => ContractError::MalformedInput(err.to_string()),
            QueueError::NothingToSwap => ContractError::InvalidState(err.to_string()),
            QueueError::UnknownParticipant(_)
            | QueueError::DuplicateParticipant(_)
            | QueueError::AlreadyInPosition { .. } => ContractError::InvalidTarget(err.to_string()),
        }
    }
}

impl From<WarmUpError> for ContractError {
    fn from(err: WarmUpError) -> Self {
        ContractError::InvalidState(err.to_string())
    }
}

// ============================================================================
// Creation parameters
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractParams {
    pub contract_id: String,
    pub coop_id: String,
    pub coop_size: usize,
    #[serde(with = "humantime_serde")]
    pub estimated_duration: Duration,
    #[serde(default)]
    pub style: ContractStyle,
    #[serde(default)]
    pub order_strategy: BoostOrderStrategy,
    #[serde(default = "default_tokens_wanted")]
    pub tokens_wanted: u32,
}

fn default_tokens_wanted() -> u32 {
    DEFAULT_TOKENS_WANTED
}

impl ContractParams {
    pub fn new(
        contract_id: impl Into<String>,
        coop_id: impl Into<String>,
        coop_size: usize,
        estimated_duration: Duration,
    ) -> Self {
        Self {
            contract_id: contract_id.into(),
            coop_id: coop_id.into(),
            coop_size,
            estimated_duration,
            style: ContractStyle::default(),
            order_strategy: BoostOrderStrategy::default(),
            tokens_wanted: DEFAULT_TOKENS_WANTED,
        }
    }

    pub fn with_style(mut self, style: ContractStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_order_strategy(mut self, strategy: BoostOrderStrategy) -> Self {
        self.order_strategy = strategy;
        self
    }

    pub fn hash(&self) -> ContractHash {
        ContractHash::new(&self.contract_id, &self.coop_id)
    }

    pub fn validate(&self) -> Result<(), ContractError> {
        if self.contract_id.trim().is_empty() || self.coop_id.trim().is_empty() {
            return Err(ContractError::MalformedInput(
                "contract and coop identifiers cannot be empty".to_string(),
            ));
        }
        if self.coop_size == 0 {
            return Err(ContractError::MalformedInput(
                "coop size must be at least 1".to_string(),
            ));
        }
        if self.tokens_wanted == 0 {
            return Err(ContractError::MalformedInput(
                "a boost needs at least one token".to_string(),
            ));
        }
        self.style.validate()
    }
}

// ============================================================================
// Change descriptor
// ============================================================================

/// Result of an applied command: what happened and the state it left behind.
#[derive(Debug, Clone)]
pub struct ContractChange {
    pub hash: ContractHash,
    pub location: LocationId,
    pub version: u64,
    pub occurred_at: DateTime<Utc>,
    /// The envelope's event id had already been applied
    pub duplicate: bool,
    pub events: Vec<ContractEvent>,
    pub snapshot: Contract,
}

impl ContractChange {
    fn unchanged(contract: &Contract, now: DateTime<Utc>, duplicate: bool) -> Self {
        Self {
            hash: contract.hash.clone(),
            location: contract.location.clone(),
            version: contract.version,
            occurred_at: now,
            duplicate,
            events: Vec::new(),
            snapshot: contract.clone(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }

    /// Audit records for every token movement in this change. Exchanges produce a
    /// sent and a received record sharing one correlation id.
    pub fn audit_records(&self) -> Vec<TokenAuditRecord> {
        let mut records = Vec::new();
        for event in &self.events {
            match event {
                ContractEvent::TokensSent {
                    from,
                    to,
                    quantity,
                    correlation_id,
                    ..
                } => {
                    records.push(TokenAuditRecord {
                        contract: self.hash.clone(),
                        participant: from.clone(),
                        direction: TokenDirection::Sent,
                        quantity: *quantity,
                        counterparty: to.clone(),
                        correlation_id: *correlation_id,
                        recorded_at: self.occurred_at,
                    });
                    records.push(TokenAuditRecord {
                        contract: self.hash.clone(),
                        participant: to.clone(),
                        direction: TokenDirection::Received,
                        quantity: *quantity,
                        counterparty: from.clone(),
                        correlation_id: *correlation_id,
                        recorded_at: self.occurred_at,
                    });
                }
                ContractEvent::TokensFarmed {
                    participant,
                    quantity,
                    correlation_id,
                    ..
                } => records.push(TokenAuditRecord {
                    contract: self.hash.clone(),
                    participant: participant.clone(),
                    direction: TokenDirection::Farmed,
                    quantity: *quantity,
                    counterparty: participant.clone(),
                    correlation_id: *correlation_id,
                    recorded_at: self.occurred_at,
                }),
                _ => {}
            }
        }
        records
    }
}

// ============================================================================
// Aggregate
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    hash: ContractHash,
    contract_id: String,
    coop_id: String,
    location: LocationId,
    coop_size: usize,
    style: ContractStyle,
    order_strategy: BoostOrderStrategy,
    default_tokens_wanted: u32,
    #[serde(with = "humantime_serde")]
    estimated_duration: Duration,
    state: ContractState,
    coordinators: Vec<ParticipantId>,
    order: BoostOrder,
    participants: BTreeMap<ParticipantId, TurnState>,
    boosted_order: Vec<ParticipantId>,
    banker: BankerState,
    #[serde(default)]
    warm_up_runs: u32,
    #[serde(default)]
    warm_up: Option<WarmUpState>,
    #[serde(default)]
    finish_acks: Vec<ParticipantId>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    waiting_since: Option<DateTime<Utc>>,
    archived_at: Option<DateTime<Utc>>,
    last_interaction: DateTime<Utc>,
    version: u64,
    #[serde(default)]
    recent_events: VecDeque<Uuid>,
}

type Events = Vec<ContractEvent>;

impl Contract {
    pub fn new(
        location: LocationId,
        params: ContractParams,
        now: DateTime<Utc>,
    ) -> Result<Self, ContractError> {
        params.validate()?;
        Ok(Self {
            hash: params.hash(),
            contract_id: params.contract_id,
            coop_id: params.coop_id,
            location,
            coop_size: params.coop_size,
            style: params.style,
            order_strategy: params.order_strategy,
            default_tokens_wanted: params.tokens_wanted,
            estimated_duration: params.estimated_duration,
            state: ContractState::Signup,
            coordinators: Vec::new(),
            order: BoostOrder::new(),
            participants: BTreeMap::new(),
            boosted_order: Vec::new(),
            banker: BankerState::default(),
            warm_up_runs: 0,
            warm_up: None,
            finish_acks: Vec::new(),
            created_at: now,
            started_at: None,
            ended_at: None,
            waiting_since: None,
            archived_at: None,
            last_interaction: now,
            version: 0,
            recent_events: VecDeque::new(),
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn hash(&self) -> &ContractHash {
        &self.hash
    }

    pub fn contract_id(&self) -> &str {
        &self.contract_id
    }

    pub fn coop_id(&self) -> &str {
        &self.coop_id
    }

    pub fn location(&self) -> &LocationId {
        &self.location
    }

    pub fn coop_size(&self) -> usize {
        self.coop_size
    }

    pub fn style(&self) -> &ContractStyle {
        &self.style
    }

    pub fn order_strategy(&self) -> BoostOrderStrategy {
        self.order_strategy
    }

    pub fn estimated_duration(&self) -> Duration {
        self.estimated_duration
    }

    pub fn state(&self) -> ContractState {
        self.state
    }

    pub fn coordinators(&self) -> &[ParticipantId] {
        &self.coordinators
    }

    pub fn order(&self) -> &BoostOrder {
        &self.order
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<&TurnState> {
        self.participants.get(id)
    }

    /// Turn states in boost order.
    pub fn participants_in_order(&self) -> impl Iterator<Item = &TurnState> {
        self.order.iter().filter_map(|id| self.participants.get(id))
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() >= self.coop_size
    }

    pub fn boosted_order(&self) -> &[ParticipantId] {
        &self.boosted_order
    }

    pub fn banker(&self) -> &BankerState {
        &self.banker
    }

    pub fn warm_up(&self) -> Option<&WarmUpState> {
        self.warm_up.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn waiting_since(&self) -> Option<DateTime<Utc>> {
        self.waiting_since
    }

    pub fn archived_at(&self) -> Option<DateTime<Utc>> {
        self.archived_at
    }

    pub fn last_interaction(&self) -> DateTime<Utc> {
        self.last_interaction
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn active_participant(&self) -> Option<&TurnState> {
        self.participants_in_order()
            .find(|turn| turn.status == TurnStatus::Active)
    }

    // ------------------------------------------------------------------
    // Command application
    // ------------------------------------------------------------------

    /// Applies one command atomically. On error nothing changes.
    pub fn apply(
        &mut self,
        envelope: &CommandEnvelope,
        now: DateTime<Utc>,
    ) -> Result<ContractChange, ContractError> {
        if let Some(event_id) = envelope.event_id {
            if self.recent_events.contains(&event_id) {
                return Ok(ContractChange::unchanged(self, now, true));
            }
        }

        let mut draft = self.clone();
        let mut events = Vec::new();
        draft.execute(&envelope.actor, &envelope.command, now, &mut events)?;
        draft.normalize_cursor();
        draft.check_invariants()?;

        // A remembered event id is state too; it has to reach the next snapshot.
        if let Some(event_id) = envelope.event_id {
            draft.remember(event_id);
            draft.version += 1;
        } else if !events.is_empty() {
            draft.version += 1;
        }
        if !events.is_empty() {
            draft.last_interaction = now;
        }
        *self = draft;

        Ok(ContractChange {
            hash: self.hash.clone(),
            location: self.location.clone(),
            version: self.version,
            occurred_at: now,
            duplicate: false,
            events,
            snapshot: self.clone(),
        })
    }

    fn remember(&mut self, event_id: Uuid) {
        if self.recent_events.len() == RECENT_EVENT_CAPACITY {
            self.recent_events.pop_front();
        }
        self.recent_events.push_back(event_id);
    }

    fn execute(
        &mut self,
        actor: &Actor,
        command: &Command,
        now: DateTime<Utc>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        match command {
            Command::Join {
                participant,
                display_name,
                guest,
            } => self.join(actor, participant, display_name.as_deref(), *guest, now, events),
            Command::Leave { participant } => self.leave(actor, participant, now, events),
            Command::SetTokens {
                participant,
                wanted,
            } => self.set_tokens(actor, participant, *wanted, events),
            Command::LinkAlt { controller, alt } => self.link_alt(actor, controller, alt, events),
            Command::ConfigureBanker {
                boosting_sink,
                post_sink,
                sink_position,
            } => self.configure_banker(
                actor,
                boosting_sink.as_ref(),
                post_sink.as_ref(),
                *sink_position,
                events,
            ),
            Command::ConfigureWarmUp { sink, runs } => {
                self.configure_warm_up(actor, sink, *runs, events)
            }
            Command::Start => self.start(actor, now, events),
            Command::Boost { participant } => self.boost(actor, participant, now, events),
            Command::Unboost { participant } => self.unboost(actor, participant, now, events),
            Command::VoteAdvance => self.vote_advance(actor, now, events),
            Command::Skip { target } => self.skip(actor, target.as_ref(), now, events),
            Command::SendToBack { participant } => {
                self.send_to_back(actor, participant, now, events)
            }
            Command::Move {
                participant,
                position,
            } => self.move_participant(actor, participant, *position, events),
            Command::Reorder { positions } => self.reorder(actor, positions, events),
            Command::SetActive { participant } => self.set_active(actor, participant, now, events),
            Command::SendTokens {
                sender,
                quantity,
                recipient,
            } => self.send_tokens(actor, sender, *quantity, recipient.as_ref(), now, events),
            Command::BankerSend { quantity } => self.banker_send(actor, *quantity, now, events),
            Command::VolunteerSink { participant } => {
                self.volunteer_sink(actor, participant, events)
            }
            Command::AcknowledgeLeg { participant } => {
                self.acknowledge_leg(actor, participant, events)
            }
            Command::OpenAdvance => self.open_advance(actor, events),
            Command::CompleteLeg => self.complete_leg(actor, now, events),
            Command::AcknowledgeFinish { participant } => {
                self.acknowledge_finish(actor, participant, now, events)
            }
            Command::Finish => self.finish(actor, now, events),
            Command::ExpireLateJoin => self.expire_late_join(actor, now, events),
            Command::Archive { force } => self.archive(actor, *force, now, events),
            Command::RemoveLedgerEntry {
                participant,
                direction,
                index,
            } => self.remove_ledger_entry(actor, participant, *direction, *index, events),
        }
    }

    // ------------------------------------------------------------------
    // Roster
    // ------------------------------------------------------------------

    fn join(
        &mut self,
        actor: &Actor,
        participant: &ParticipantId,
        display_name: Option<&str>,
        guest: bool,
        now: DateTime<Utc>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        use ContractState::*;
        self.require_state(&[Signup, Direct, Delegated, Waiting], "join")?;
        if self.participants.contains_key(participant) {
            return Ok(());
        }
        if actor.id != *participant && !self.coordinators.is_empty() {
            self.require_coordinator(actor, "add other participants")?;
        }
        if self.is_full() {
            return Err(ContractError::InvalidState(format!(
                "contract is full ({} of {})",
                self.participants.len(),
                self.coop_size
            )));
        }

        let wanted = self.style.fixed_tokens.unwrap_or(self.default_tokens_wanted);
        let name = display_name
            .map(str::to_string)
            .unwrap_or_else(|| participant.to_string());
        self.participants.insert(
            participant.clone(),
            TurnState::new(participant.clone(), name, guest, wanted, now),
        );
        let position = self.order.append(participant.clone())?;
        events.push(ContractEvent::ParticipantJoined {
            participant: participant.clone(),
            position,
        });
        if self.coordinators.is_empty() && !guest {
            self.coordinators.push(participant.clone());
        }

        if self.state == Waiting {
            let to = self.boosting_state();
            self.transition(to, now, events);
            self.ensure_boosting_sink(events);
        }
        self.ensure_turn(now, events)?;
        self.refresh_token_targets();
        Ok(())
    }

    fn leave(
        &mut self,
        actor: &Actor,
        participant: &ParticipantId,
        now: DateTime<Utc>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        use ContractState::*;
        self.require_state(&[Signup, WarmUp, Direct, Delegated, Waiting, Completed], "leave")?;
        let departing = self.turn(participant)?.clone();
        self.require_acts_for_or_coordinator(actor, participant, "remove participants")?;

        if let Some(controller) = &departing.alt_controller {
            if let Some(main) = self.participants.get_mut(controller) {
                main.alts.retain(|alt| alt != participant);
            }
        }
        for alt in &departing.alts {
            if let Some(turn) = self.participants.get_mut(alt) {
                turn.alt_controller = None;
            }
        }
        self.banker
            .release(participant, departing.alt_controller.as_ref());

        self.order.remove(participant)?;
        self.participants.remove(participant);
        self.boosted_order.retain(|id| id != participant);
        self.finish_acks.retain(|id| id != participant);
        for turn in self.participants.values_mut() {
            turn.advance_votes.retain(|id| id != participant);
        }
        if let Some(warm_up) = self.warm_up.as_mut() {
            if warm_up.forget(participant) {
                events.push(ContractEvent::WarmUpLegReady {
                    leg: warm_up.current_leg,
                });
            }
        }

        self.coordinators.retain(|id| id != participant);
        if self.coordinators.is_empty() {
            let successor = self
                .participants_in_order()
                .find(|turn| !turn.guest && !turn.is_alt())
                .map(|turn| turn.participant_id.clone());
            if let Some(successor) = successor {
                self.coordinators.push(successor);
            }
        }
        self.ensure_boosting_sink(events);
        events.push(ContractEvent::ParticipantLeft {
            participant: participant.clone(),
        });

        match self.state {
            Direct | Delegated if departing.status == TurnStatus::Active => {
                self.ensure_turn(now, events)?
            }
            Completed => self.transition(Waiting, now, events),
            _ => {}
        }
        self.refresh_banker(events);
        self.refresh_token_targets();
        Ok(())
    }

    fn set_tokens(
        &mut self,
        actor: &Actor,
        participant: &ParticipantId,
        wanted: u32,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        use ContractState::*;
        self.require_state(&[Signup, WarmUp, Direct, Delegated, Waiting], "change token counts")?;
        self.require_acts_for_or_coordinator(actor, participant, "change token counts")?;
        if wanted == 0 {
            return Err(ContractError::MalformedInput(
                "a boost needs at least one token".to_string(),
            ));
        }
        let turn = self.turn_mut(participant)?;
        if turn.tokens_wanted == wanted {
            return Ok(());
        }
        turn.tokens_wanted = wanted;
        events.push(ContractEvent::TokensWantedChanged {
            participant: participant.clone(),
            wanted,
        });
        Ok(())
    }

    fn link_alt(
        &mut self,
        actor: &Actor,
        controller: &ParticipantId,
        alt: &ParticipantId,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        use ContractState::*;
        self.require_state(&[Signup, WarmUp, Direct, Delegated, Waiting], "link alts")?;
        if actor.id != *controller {
            self.require_coordinator(actor, "link alts for someone else")?;
        }
        if controller == alt {
            return Err(ContractError::MalformedInput(format!(
                "{controller} cannot be their own alt"
            )));
        }
        if self.turn(controller)?.is_alt() {
            return Err(ContractError::InvalidTarget(format!(
                "{controller} is already an alt and cannot control others"
            )));
        }
        let alt_turn = self.turn(alt)?;
        if alt_turn.alt_controller.as_ref() == Some(controller) {
            return Ok(());
        }
        if alt_turn.is_alt() || !alt_turn.alts.is_empty() {
            return Err(ContractError::InvalidTarget(format!(
                "{alt} is already linked to another account"
            )));
        }

        self.turn_mut(alt)?.alt_controller = Some(controller.clone());
        self.turn_mut(controller)?.alts.push(alt.clone());
        events.push(ContractEvent::AltLinked {
            controller: controller.clone(),
            alt: alt.clone(),
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Configuration and start
    // ------------------------------------------------------------------

    fn configure_banker(
        &mut self,
        actor: &Actor,
        boosting_sink: Option<&ParticipantId>,
        post_sink: Option<&ParticipantId>,
        sink_position: Option<SinkPosition>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        use ContractState::*;
        self.require_coordinator(actor, "configure bankers")?;
        self.require_state(&[Signup, WarmUp, Direct, Delegated, Waiting], "configure bankers")?;
        for sink in [boosting_sink, post_sink].into_iter().flatten() {
            self.turn(sink)?;
        }
        if let Some(sink) = boosting_sink {
            self.banker.boosting_sink = Some(sink.clone());
        }
        if let Some(sink) = post_sink {
            self.banker.post_sink = Some(sink.clone());
        }
        if let Some(position) = sink_position {
            self.banker.sink_position = position;
        }
        self.push_sinks(events);
        self.refresh_banker(events);
        Ok(())
    }

    fn configure_warm_up(
        &mut self,
        actor: &Actor,
        sink: &ParticipantId,
        runs: u32,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        self.require_coordinator(actor, "configure the warm-up")?;
        self.require_state(&[ContractState::Signup], "configure the warm-up")?;
        if !self.style.capabilities.warm_up {
            return Err(ContractError::InvalidState(
                "warm-up is not enabled for this contract".to_string(),
            ));
        }
        self.turn(sink)?;
        if runs == 0 {
            return Err(ContractError::MalformedInput(
                "warm-up needs at least one run".to_string(),
            ));
        }
        let plan = self.warm_up_plan(runs);
        if !plan.is_feasible() {
            return Err(ContractError::InvalidState(format!(
                "a group of {} cannot coordinate a warm-up",
                self.coop_size
            )));
        }

        self.warm_up_runs = runs;
        self.banker.warm_up_sink = Some(sink.clone());
        if self.banker.boosting_sink.is_none() {
            self.banker.boosting_sink = Some(sink.clone());
        }
        events.push(ContractEvent::WarmUpPlanned {
            legs: plan.legs,
            first_leg: plan.first_leg,
        });
        self.push_sinks(events);
        Ok(())
    }

    fn warm_up_plan(&self, runs: u32) -> WarmUpPlan {
        let group_size = u32::try_from(self.coop_size).unwrap_or(u32::MAX);
        WarmUpPlan::compute(group_size, runs, self.style.capabilities.self_runs)
    }

    fn start(
        &mut self,
        actor: &Actor,
        now: DateTime<Utc>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        self.require_state(&[ContractState::Signup], "start the contract")?;
        let is_warm_up_sink = self.banker.warm_up_sink.as_ref() == Some(&actor.id);
        if !self.is_coordinator(actor) && !is_warm_up_sink {
            return Err(ContractError::Unauthorized {
                actor: actor.id.clone(),
                action: "start the contract",
            });
        }
        if self.order.is_empty() {
            return Err(ContractError::InvalidState(
                "cannot start a contract nobody has joined".to_string(),
            ));
        }
        if self.style.mode == ContractMode::Delegated && self.banker.boosting_sink.is_none() {
            return Err(ContractError::InvalidState(
                "a delegated contract needs a banker before it can start".to_string(),
            ));
        }

        self.arrange_start_order(events)?;
        if let Some(fixed) = self.style.fixed_tokens {
            for turn in self.participants.values_mut() {
                turn.tokens_wanted = fixed;
            }
        }
        self.started_at = Some(now);

        let plan = self.warm_up_plan(self.warm_up_runs);
        let warm_up = self.style.capabilities.warm_up
            && self.banker.warm_up_sink.is_some()
            && plan.requires_warm_up();
        if warm_up && !self.is_full() {
            return Err(ContractError::InvalidState(format!(
                "the warm-up needs a full group ({} of {})",
                self.participants.len(),
                self.coop_size
            )));
        }
        if warm_up {
            self.warm_up = Some(WarmUpState::begin(plan, self.order.ids()));
            self.order.set_cursor(0);
            self.transition(ContractState::WarmUp, now, events);
        } else {
            let to = self.boosting_state();
            self.transition(to, now, events);
            self.ensure_turn(now, events)?;
        }
        self.refresh_token_targets();
        Ok(())
    }

    fn arrange_start_order(&mut self, events: &mut Events) -> Result<(), ContractError> {
        let mut ids = self.order.ids().to_vec();
        match self.order_strategy {
            BoostOrderStrategy::Signup => {}
            BoostOrderStrategy::Reverse => ids.reverse(),
            BoostOrderStrategy::Random => ids.shuffle(&mut rand::rng()),
            BoostOrderStrategy::TokenValue => {
                ids.sort_by(|a, b| self.value_of(b).total_cmp(&self.value_of(a)))
            }
        }
        if let Some(sink) = self.banker.boosting_sink.clone() {
            if let Some(index) = ids.iter().position(|id| *id == sink) {
                match self.banker.sink_position {
                    SinkPosition::FollowOrder => {}
                    SinkPosition::First => {
                        let sink = ids.remove(index);
                        ids.insert(0, sink);
                    }
                    SinkPosition::Last => {
                        let sink = ids.remove(index);
                        ids.push(sink);
                    }
                }
            }
        }
        self.replace_order(ids, events)
    }

    fn replace_order(
        &mut self,
        ids: Vec<ParticipantId>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        let revision = self.order.revision();
        self.order.replace_all(ids)?;
        if self.order.revision() != revision {
            events.push(ContractEvent::OrderChanged {
                revision: self.order.revision(),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Turns
    // ------------------------------------------------------------------

    fn boost(
        &mut self,
        actor: &Actor,
        participant: &ParticipantId,
        now: DateTime<Utc>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        use ContractState::*;
        self.require_state(&[Direct, Delegated], "boost")?;
        self.require_acts_for_or_coordinator(actor, participant, "mark someone else as boosted")?;
        let status = self.turn(participant)?.status;
        match status {
            TurnStatus::Done => Err(ContractError::InvalidState(format!(
                "{participant} has already boosted"
            ))),
            TurnStatus::Active => self.complete_turn(participant, now, false, events),
            TurnStatus::Idle => self.complete_turn(participant, now, true, events),
        }
    }

    fn unboost(
        &mut self,
        actor: &Actor,
        participant: &ParticipantId,
        now: DateTime<Utc>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        use ContractState::*;
        self.require_state(&[Direct, Delegated, Waiting], "undo a boost")?;
        self.require_acts_for_or_coordinator(actor, participant, "undo someone else's boost")?;
        if self.turn(participant)?.status != TurnStatus::Done {
            return Err(ContractError::InvalidState(format!(
                "{participant} has not boosted yet"
            )));
        }

        self.boosted_order.retain(|id| id != participant);
        self.turn_mut(participant)?.reset_turn();
        events.push(ContractEvent::TurnReverted {
            participant: participant.clone(),
        });
        if self.state == Waiting {
            let to = self.boosting_state();
            self.transition(to, now, events);
            self.promote(participant, now, events)?;
        }
        self.refresh_token_targets();
        Ok(())
    }

    fn vote_advance(
        &mut self,
        actor: &Actor,
        now: DateTime<Utc>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        use ContractState::*;
        self.require_state(&[Direct, Delegated], "vote to advance")?;
        let active = self.active_id().ok_or_else(|| {
            ContractError::InvalidState("nobody is boosting right now".to_string())
        })?;
        if actor.id == active || self.is_coordinator(actor) {
            return self.complete_turn(&active, now, false, events);
        }
        self.turn(&actor.id)?;

        let turn = self.turn_mut(&active)?;
        if turn.advance_votes.contains(&actor.id) {
            return Ok(());
        }
        turn.advance_votes.push(actor.id.clone());
        let votes = turn.advance_votes.len();
        events.push(ContractEvent::AdvanceVoted {
            voter: actor.id.clone(),
            participant: active.clone(),
            votes,
        });
        if votes >= ADVANCE_VOTES_REQUIRED {
            self.complete_turn(&active, now, false, events)?;
        }
        Ok(())
    }

    fn skip(
        &mut self,
        actor: &Actor,
        target: Option<&ParticipantId>,
        now: DateTime<Utc>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        use ContractState::*;
        self.require_state(&[Direct, Delegated], "skip a turn")?;
        let active = self.active_id().ok_or_else(|| {
            ContractError::InvalidState("nobody is boosting right now".to_string())
        })?;
        self.require_acts_for_or_coordinator(actor, &active, "skip someone else's turn")?;

        let next = match target {
            None => {
                let next = self
                    .order
                    .get(self.order.cursor() + 1)
                    .cloned()
                    .ok_or(QueueError::NothingToSwap)?;
                self.require_idle(&next)?;
                self.order.swap_with_next()?;
                next
            }
            Some(target) => {
                if *target == active {
                    return Err(ContractError::InvalidTarget(format!(
                        "{target} already holds the turn"
                    )));
                }
                self.require_idle(target)?;
                let cursor = self.order.cursor();
                let from = self
                    .order
                    .index_of(target)
                    .ok_or_else(|| QueueError::UnknownParticipant(target.clone()))?;
                // Land directly ahead of the participant being skipped
                let slot = if from < cursor { cursor } else { cursor + 1 };
                if from + 1 != slot {
                    self.order.move_to(target, slot)?;
                }
                target.clone()
            }
        };
        events.push(ContractEvent::OrderChanged {
            revision: self.order.revision(),
        });

        self.turn_mut(&active)?.reset_turn();
        events.push(ContractEvent::TurnSkipped {
            participant: active,
        });
        self.promote(&next, now, events)
    }

    fn send_to_back(
        &mut self,
        actor: &Actor,
        participant: &ParticipantId,
        now: DateTime<Utc>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        use ContractState::*;
        self.require_state(&[Signup, Direct, Delegated], "move to the back")?;
        self.require_acts_for_or_coordinator(actor, participant, "move someone else to the back")?;
        let status = self.turn(participant)?.status;
        if status == TurnStatus::Done {
            return Err(ContractError::InvalidState(format!(
                "{participant} has already boosted"
            )));
        }
        if self.order.index_of(participant) == Some(self.order.len() - 1) {
            return Ok(());
        }

        self.order.send_to_back(participant)?;
        events.push(ContractEvent::OrderChanged {
            revision: self.order.revision(),
        });
        if status == TurnStatus::Active {
            self.turn_mut(participant)?.reset_turn();
            events.push(ContractEvent::TurnSkipped {
                participant: participant.clone(),
            });
            self.ensure_turn(now, events)?;
        }
        Ok(())
    }

    fn move_participant(
        &mut self,
        actor: &Actor,
        participant: &ParticipantId,
        position: usize,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        use ContractState::*;
        self.require_coordinator(actor, "change the boost order")?;
        self.require_state(&[WarmUp, Direct, Delegated, Waiting], "change the boost order")?;
        self.order.move_to(participant, position)?;
        events.push(ContractEvent::OrderChanged {
            revision: self.order.revision(),
        });
        Ok(())
    }

    fn reorder(
        &mut self,
        actor: &Actor,
        positions: &str,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        use ContractState::*;
        self.require_coordinator(actor, "change the boost order")?;
        self.require_state(&[WarmUp, Direct, Delegated, Waiting], "change the boost order")?;
        self.order.reorder(positions)?;
        events.push(ContractEvent::OrderChanged {
            revision: self.order.revision(),
        });
        Ok(())
    }

    fn set_active(
        &mut self,
        actor: &Actor,
        participant: &ParticipantId,
        now: DateTime<Utc>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        use ContractState::*;
        self.require_coordinator(actor, "change the current booster")?;
        self.require_state(&[Direct, Delegated], "change the current booster")?;
        let status = self.turn(participant)?.status;
        match status {
            TurnStatus::Active => {
                return Err(ContractError::InvalidState(format!(
                    "{participant} is already boosting"
                )))
            }
            TurnStatus::Done => {
                return Err(ContractError::InvalidState(format!(
                    "{participant} has already boosted"
                )))
            }
            TurnStatus::Idle => {}
        }
        if let Some(active) = self.active_id() {
            self.turn_mut(&active)?.reset_turn();
            events.push(ContractEvent::TurnSkipped {
                participant: active,
            });
        }
        self.promote(participant, now, events)
    }

    // ------------------------------------------------------------------
    // Tokens
    // ------------------------------------------------------------------

    fn send_tokens(
        &mut self,
        actor: &Actor,
        sender: &ParticipantId,
        quantity: u32,
        recipient: Option<&ParticipantId>,
        now: DateTime<Utc>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        use ContractState::*;
        self.require_state(&[WarmUp, Direct, Delegated, Waiting, Completed], "send tokens")?;
        self.require_acts_for_or_coordinator(actor, sender, "send tokens for someone else")?;
        if quantity == 0 {
            return Err(ContractError::MalformedInput(
                "token count must be at least 1".to_string(),
            ));
        }
        self.turn(sender)?;
        let recipient = match recipient {
            Some(recipient) => {
                self.turn(recipient)?;
                recipient.clone()
            }
            None => self
                .banker
                .current
                .clone()
                .or_else(|| self.active_id())
                .ok_or_else(|| {
                    ContractError::InvalidState("nobody is receiving tokens right now".to_string())
                })?,
        };

        let unit_value = token_value_at(self.started_at, now, self.estimated_duration);
        let correlation_id = CorrelationId::new();
        if *sender == recipient {
            self.record_farmed(sender, quantity, unit_value, correlation_id, now, events)?;
        } else {
            self.exchange(sender, &recipient, quantity, unit_value, correlation_id, now, events)?;
        }

        if self.state == Direct {
            let turn = self.turn(&recipient)?;
            let auto_complete = turn.status == TurnStatus::Active
                && turn.guest
                && turn.alt_controller.is_none()
                && turn.has_enough_tokens();
            if auto_complete {
                self.complete_turn(&recipient, now, false, events)?;
            }
        }
        self.apply_token_value_order(events)?;
        self.refresh_token_targets();
        Ok(())
    }

    fn banker_send(
        &mut self,
        actor: &Actor,
        quantity: Option<u32>,
        now: DateTime<Utc>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        self.require_state(&[ContractState::Delegated], "pay out as banker")?;
        let sink = self.banker.boosting_sink.clone().ok_or_else(|| {
            ContractError::Internal("delegated contract without a boosting sink".to_string())
        })?;
        if !self.acts_for(actor, &sink) {
            return Err(ContractError::Unauthorized {
                actor: actor.id.clone(),
                action: "pay out as banker",
            });
        }
        let active = self.active_id().ok_or_else(|| {
            ContractError::InvalidState("nobody is boosting right now".to_string())
        })?;
        let quantity = quantity.unwrap_or(self.turn(&active)?.tokens_wanted);
        if quantity == 0 {
            return Err(ContractError::MalformedInput(
                "token count must be at least 1".to_string(),
            ));
        }

        let unit_value = token_value_at(self.started_at, now, self.estimated_duration);
        let correlation_id = CorrelationId::new();
        if active == sink {
            self.record_farmed(&sink, quantity, unit_value, correlation_id, now, events)?;
        } else {
            self.exchange(&sink, &active, quantity, unit_value, correlation_id, now, events)?;
            let bank = self.turn_mut(&sink)?;
            bank.tokens_received = bank
                .ledger
                .count(TokenDirection::Received)
                .saturating_sub(bank.ledger.count(TokenDirection::Sent));
        }
        self.apply_token_value_order(events)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn exchange(
        &mut self,
        sender: &ParticipantId,
        recipient: &ParticipantId,
        quantity: u32,
        unit_value: f64,
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        let total = f64::from(quantity) * unit_value;
        let from = self.turn_mut(sender)?;
        from.ledger.record(
            TokenDirection::Sent,
            LedgerEntry {
                recorded_at: now,
                quantity,
                unit_value,
                counterparty: recipient.clone(),
                correlation_id,
            },
        );
        from.token_value += total;

        let to = self.turn_mut(recipient)?;
        to.ledger.record(
            TokenDirection::Received,
            LedgerEntry {
                recorded_at: now,
                quantity,
                unit_value,
                counterparty: sender.clone(),
                correlation_id,
            },
        );
        to.tokens_received += quantity;
        to.token_value -= total;

        events.push(ContractEvent::TokensSent {
            from: sender.clone(),
            to: recipient.clone(),
            quantity,
            unit_value,
            correlation_id,
        });
        Ok(())
    }

    fn record_farmed(
        &mut self,
        participant: &ParticipantId,
        quantity: u32,
        unit_value: f64,
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        self.turn_mut(participant)?.ledger.record(
            TokenDirection::Farmed,
            LedgerEntry {
                recorded_at: now,
                quantity,
                unit_value,
                counterparty: participant.clone(),
                correlation_id,
            },
        );
        events.push(ContractEvent::TokensFarmed {
            participant: participant.clone(),
            quantity,
            unit_value,
            correlation_id,
        });
        Ok(())
    }

    fn remove_ledger_entry(
        &mut self,
        actor: &Actor,
        participant: &ParticipantId,
        direction: TokenDirection,
        index: usize,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        if self.state == ContractState::Archived {
            return Err(ContractError::InvalidState(
                "archived contracts cannot be edited".to_string(),
            ));
        }
        self.require_acts_for_or_coordinator(actor, participant, "edit someone else's ledger")?;

        let owner = self.turn_mut(participant)?;
        let entry = owner.ledger.remove(direction, index).ok_or_else(|| {
            ContractError::InvalidTarget(format!(
                "{participant} has no {direction} entry #{}",
                index + 1
            ))
        })?;
        let total = entry.total_value();
        match direction {
            TokenDirection::Sent => owner.token_value -= total,
            TokenDirection::Received => {
                owner.tokens_received = owner.tokens_received.saturating_sub(entry.quantity);
                owner.token_value += total;
            }
            TokenDirection::Farmed => {}
        }

        let mirrored = match direction {
            TokenDirection::Sent => Some(TokenDirection::Received),
            TokenDirection::Received => Some(TokenDirection::Sent),
            TokenDirection::Farmed => None,
        };
        if let Some(mirror) = mirrored {
            if let Some(other) = self.participants.get_mut(&entry.counterparty) {
                if let Some(removed) = other.ledger.remove_correlated(mirror, entry.correlation_id) {
                    match mirror {
                        TokenDirection::Received => {
                            other.tokens_received =
                                other.tokens_received.saturating_sub(removed.quantity);
                            other.token_value += removed.total_value();
                        }
                        _ => other.token_value -= removed.total_value(),
                    }
                }
            }
        }

        events.push(ContractEvent::LedgerEntryRemoved {
            participant: participant.clone(),
            direction,
            correlation_id: entry.correlation_id,
        });
        Ok(())
    }

    fn volunteer_sink(
        &mut self,
        actor: &Actor,
        participant: &ParticipantId,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        use ContractState::*;
        self.require_state(&[Signup, Direct, Delegated, Waiting], "volunteer as sink")?;
        if self.style.capabilities.warm_up {
            return Err(ContractError::InvalidState(
                "warm-up contracts assign their sinks during configuration".to_string(),
            ));
        }
        self.require_acts_for_or_coordinator(actor, participant, "volunteer someone else")?;
        self.turn(participant)?;
        match &self.banker.post_sink {
            Some(existing) if existing == participant => return Ok(()),
            Some(existing) => {
                return Err(ContractError::InvalidState(format!(
                    "{existing} has already volunteered as sink"
                )))
            }
            None => {}
        }
        self.banker.post_sink = Some(participant.clone());
        self.push_sinks(events);
        self.refresh_banker(events);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Warm-up
    // ------------------------------------------------------------------

    fn acknowledge_leg(
        &mut self,
        actor: &Actor,
        participant: &ParticipantId,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        self.require_state(&[ContractState::WarmUp], "acknowledge a warm-up leg")?;
        if !self.acts_for(actor, participant) {
            return Err(ContractError::Unauthorized {
                actor: actor.id.clone(),
                action: "acknowledge for someone else",
            });
        }
        let alts = self.turn(participant)?.alts.clone();
        let warm_up = self
            .warm_up
            .as_mut()
            .ok_or_else(|| ContractError::Internal("warm-up state missing".to_string()))?;
        let (acknowledged, ack) = warm_up.acknowledge(participant, &alts)?;
        events.push(ContractEvent::WarmUpLegAcknowledged {
            participant: acknowledged,
            leg: ack.leg,
            remaining: ack.remaining,
        });
        if ack.ready {
            events.push(ContractEvent::WarmUpLegReady { leg: ack.leg });
        }
        Ok(())
    }

    fn open_advance(&mut self, actor: &Actor, events: &mut Events) -> Result<(), ContractError> {
        self.require_state(&[ContractState::WarmUp], "open the warm-up advance")?;
        self.require_banker_or_coordinator(actor, "open the warm-up advance")?;
        let warm_up = self
            .warm_up
            .as_mut()
            .ok_or_else(|| ContractError::Internal("warm-up state missing".to_string()))?;
        let ready = warm_up.phase == WarmUpPhase::ReadyToAdvance;
        if warm_up.open_advance()? {
            events.push(ContractEvent::WarmUpAdvanceOpened {
                leg: warm_up.current_leg,
                by: actor.id.clone(),
                ready,
            });
        }
        Ok(())
    }

    fn complete_leg(
        &mut self,
        actor: &Actor,
        now: DateTime<Utc>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        self.require_state(&[ContractState::WarmUp], "complete a warm-up leg")?;
        self.require_banker_or_coordinator(actor, "complete a warm-up leg")?;
        let ids = self.order.ids().to_vec();
        let warm_up = self
            .warm_up
            .as_mut()
            .ok_or_else(|| ContractError::Internal("warm-up state missing".to_string()))?;
        let leg = warm_up.current_leg;
        let outcome = warm_up.complete_leg(&ids)?;
        events.push(ContractEvent::WarmUpLegCompleted { leg });

        if outcome == LegOutcome::Finished {
            let to = self.boosting_state();
            self.transition(to, now, events);
            self.ensure_turn(now, events)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Finishing
    // ------------------------------------------------------------------

    fn acknowledge_finish(
        &mut self,
        actor: &Actor,
        participant: &ParticipantId,
        now: DateTime<Utc>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        self.require_state(&[ContractState::Waiting], "acknowledge the finish")?;
        if !self.acts_for(actor, participant) {
            return Err(ContractError::Unauthorized {
                actor: actor.id.clone(),
                action: "acknowledge for someone else",
            });
        }
        self.turn(participant)?;
        if self.finish_acks.contains(participant) {
            return Ok(());
        }
        self.finish_acks.push(participant.clone());
        let needed = self.participants.len() / 2 + 1;
        events.push(ContractEvent::FinishAcknowledged {
            participant: participant.clone(),
            acknowledgments: self.finish_acks.len(),
            needed,
        });
        if self.finish_acks.len() >= needed {
            self.transition(ContractState::Completed, now, events);
        }
        Ok(())
    }

    fn finish(
        &mut self,
        actor: &Actor,
        now: DateTime<Utc>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        self.require_coordinator(actor, "finish the contract")?;
        match self.state {
            ContractState::Completed => Ok(()),
            ContractState::Waiting => {
                self.transition(ContractState::Completed, now, events);
                Ok(())
            }
            other => Err(ContractError::InvalidState(format!(
                "only a waiting contract can be finished (contract is {other})"
            ))),
        }
    }

    fn expire_late_join(
        &mut self,
        actor: &Actor,
        now: DateTime<Utc>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        if actor.role != ActorRole::System {
            return Err(ContractError::Unauthorized {
                actor: actor.id.clone(),
                action: "expire the late-join window",
            });
        }
        match self.state {
            ContractState::Completed | ContractState::Archived => Ok(()),
            ContractState::Waiting => {
                self.transition(ContractState::Completed, now, events);
                Ok(())
            }
            other => Err(ContractError::InvalidState(format!(
                "late-join window only applies to waiting contracts (contract is {other})"
            ))),
        }
    }

    fn archive(
        &mut self,
        actor: &Actor,
        force: bool,
        now: DateTime<Utc>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        self.require_coordinator(actor, "archive the contract")?;
        match self.state {
            ContractState::Archived => Ok(()),
            ContractState::Completed => {
                self.transition(ContractState::Archived, now, events);
                Ok(())
            }
            _ if force && actor.is_privileged() => {
                self.transition(ContractState::Completed, now, events);
                self.transition(ContractState::Archived, now, events);
                Ok(())
            }
            other => Err(ContractError::InvalidState(format!(
                "only completed contracts can be archived (contract is {other})"
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    fn boosting_state(&self) -> ContractState {
        match self.style.mode {
            ContractMode::Direct => ContractState::Direct,
            ContractMode::Delegated => ContractState::Delegated,
        }
    }

    fn transition(&mut self, to: ContractState, now: DateTime<Utc>, events: &mut Events) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        match to {
            ContractState::Direct | ContractState::Delegated => {
                self.waiting_since = None;
                self.ended_at = None;
            }
            ContractState::Waiting => {
                self.waiting_since = Some(now);
                self.ended_at.get_or_insert(now);
                self.finish_acks.clear();
            }
            ContractState::Completed => {
                self.ended_at.get_or_insert(now);
            }
            ContractState::Archived => self.archived_at = Some(now),
            ContractState::Signup | ContractState::WarmUp => {}
        }
        events.push(ContractEvent::StateChanged { from, to });
        self.refresh_banker(events);
    }

    fn refresh_banker(&mut self, events: &mut Events) {
        if self.banker.refresh(self.state, self.style.mode) {
            events.push(ContractEvent::BankerChanged {
                banker: self.banker.current.clone(),
            });
        }
    }

    /// Delegated turns cannot run without a boosting sink. A vacated slot goes to
    /// the lead coordinator, or the first participant in line.
    fn ensure_boosting_sink(&mut self, events: &mut Events) {
        if self.style.mode != ContractMode::Delegated
            || self.state == ContractState::Signup
            || self.banker.boosting_sink.is_some()
        {
            return;
        }
        let successor = self
            .coordinators
            .first()
            .or_else(|| self.order.iter().next())
            .cloned();
        if successor.is_some() {
            self.banker.boosting_sink = successor;
            self.push_sinks(events);
            self.refresh_banker(events);
        }
    }

    fn push_sinks(&self, events: &mut Events) {
        events.push(ContractEvent::SinksConfigured {
            warm_up_sink: self.banker.warm_up_sink.clone(),
            boosting_sink: self.banker.boosting_sink.clone(),
            post_sink: self.banker.post_sink.clone(),
        });
    }

    /// Makes sure someone holds the turn, or moves on to `Waiting` when nobody is left.
    fn ensure_turn(&mut self, now: DateTime<Utc>, events: &mut Events) -> Result<(), ContractError> {
        if !self.state.is_single_active_turn() {
            return Ok(());
        }
        if let Some(active) = self.active_id() {
            self.order.point_at(&active)?;
            return Ok(());
        }
        let next = self
            .order
            .iter()
            .find(|id| self.status_of(id) == Some(TurnStatus::Idle))
            .cloned();
        match next {
            Some(next) => self.promote(&next, now, events),
            None => {
                self.order.set_cursor(self.order.len());
                self.transition(ContractState::Waiting, now, events);
                if self.is_full() {
                    self.transition(ContractState::Completed, now, events);
                }
                Ok(())
            }
        }
    }

    fn promote(
        &mut self,
        participant: &ParticipantId,
        now: DateTime<Utc>,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        let is_bank = self.style.mode == ContractMode::Delegated
            && self.banker.boosting_sink.as_ref() == Some(participant);
        let turn = self.turn_mut(participant)?;
        turn.begin_turn(now);
        if is_bank {
            // Tokens held for others do not count towards the banker's own boost
            turn.tokens_received = 0;
        }
        self.order.point_at(participant)?;
        events.push(ContractEvent::TurnStarted {
            participant: participant.clone(),
        });
        Ok(())
    }

    fn complete_turn(
        &mut self,
        participant: &ParticipantId,
        now: DateTime<Utc>,
        out_of_turn: bool,
        events: &mut Events,
    ) -> Result<(), ContractError> {
        let turn = self.turn_mut(participant)?;
        turn.finish_turn(now);
        let duration_secs = turn.turn_duration().map_or(0, |d| d.num_seconds());
        if !self.boosted_order.contains(participant) {
            self.boosted_order.push(participant.clone());
        }
        events.push(ContractEvent::TurnCompleted {
            participant: participant.clone(),
            duration_secs,
            out_of_turn,
        });
        self.ensure_turn(now, events)?;
        self.refresh_token_targets();
        Ok(())
    }

    fn apply_token_value_order(&mut self, events: &mut Events) -> Result<(), ContractError> {
        if self.order_strategy != BoostOrderStrategy::TokenValue
            || !self.state.is_single_active_turn()
        {
            return Ok(());
        }
        let (mut settled, mut waiting): (Vec<ParticipantId>, Vec<ParticipantId>) = self
            .order
            .iter()
            .cloned()
            .partition(|id| self.status_of(id) != Some(TurnStatus::Idle));
        waiting.sort_by(|a, b| self.value_of(b).total_cmp(&self.value_of(a)));
        settled.extend(waiting);
        self.replace_order(settled, events)
    }

    /// Dynamic sizing: every waiting participant wants 6 except the last in line, who wants 8.
    fn refresh_token_targets(&mut self) {
        if !self.style.capabilities.dynamic_tokens || self.state == ContractState::Signup {
            return;
        }
        let waiting: Vec<ParticipantId> = self
            .order
            .iter()
            .filter(|id| self.status_of(id) == Some(TurnStatus::Idle))
            .cloned()
            .collect();
        let last = waiting.len().saturating_sub(1);
        for (index, id) in waiting.iter().enumerate() {
            if let Some(turn) = self.participants.get_mut(id) {
                turn.tokens_wanted = if index == last { TOKENS_EIGHT } else { TOKENS_SIX };
            }
        }
    }

    fn normalize_cursor(&mut self) {
        if !self.state.is_single_active_turn() {
            return;
        }
        let index = self
            .active_id()
            .and_then(|active| self.order.index_of(&active));
        if let Some(index) = index {
            self.order.set_cursor(index);
        }
    }

    /// Verifies the aggregate invariants; a violation means a bug, so the
    /// command is rejected instead of committed.
    pub fn check_invariants(&self) -> Result<(), ContractError> {
        let mut seen = HashSet::new();
        for id in self.order.iter() {
            if !seen.insert(id) {
                return Err(ContractError::Internal(format!(
                    "{id} appears twice in the boost order"
                )));
            }
            if !self.participants.contains_key(id) {
                return Err(ContractError::Internal(format!(
                    "{id} is in the boost order but not a participant"
                )));
            }
        }
        if let Some(missing) = self.participants.keys().find(|id| !seen.contains(id)) {
            return Err(ContractError::Internal(format!(
                "{missing} is a participant but missing from the boost order"
            )));
        }

        let active: Vec<&TurnState> = self
            .participants
            .values()
            .filter(|turn| turn.status == TurnStatus::Active)
            .collect();
        if active.len() > 1 {
            return Err(ContractError::Internal(format!(
                "{} participants are active at once",
                active.len()
            )));
        }
        match (self.state, active.first()) {
            (state, Some(turn)) if state.is_single_active_turn() => {
                if self.order.current() != Some(&turn.participant_id) {
                    return Err(ContractError::Internal(format!(
                        "cursor does not reference the active participant {}",
                        turn.participant_id
                    )));
                }
            }
            (ContractState::Signup | ContractState::WarmUp | ContractState::Waiting, Some(turn)) => {
                return Err(ContractError::Internal(format!(
                    "{} is active while the contract is {}",
                    turn.participant_id, self.state
                )));
            }
            _ => {}
        }
        if self.state == ContractState::Delegated && self.banker.boosting_sink.is_none() {
            return Err(ContractError::Internal(
                "delegated contract without a boosting sink".to_string(),
            ));
        }
        Ok(())
    }

    fn turn(&self, id: &ParticipantId) -> Result<&TurnState, ContractError> {
        self.participants
            .get(id)
            .ok_or_else(|| ContractError::InvalidTarget(format!("{id} is not part of this contract")))
    }

    fn turn_mut(&mut self, id: &ParticipantId) -> Result<&mut TurnState, ContractError> {
        self.participants
            .get_mut(id)
            .ok_or_else(|| ContractError::InvalidTarget(format!("{id} is not part of this contract")))
    }

    fn status_of(&self, id: &ParticipantId) -> Option<TurnStatus> {
        self.participants.get(id).map(|turn| turn.status)
    }

    fn value_of(&self, id: &ParticipantId) -> f64 {
        self.participants.get(id).map_or(0.0, |turn| turn.token_value)
    }

    fn active_id(&self) -> Option<ParticipantId> {
        self.active_participant()
            .map(|turn| turn.participant_id.clone())
    }

    fn require_idle(&self, id: &ParticipantId) -> Result<(), ContractError> {
        match self.turn(id)?.status {
            TurnStatus::Idle => Ok(()),
            status => Err(ContractError::InvalidState(format!(
                "{id} is not waiting for a turn ({status})"
            ))),
        }
    }

    fn require_state(&self, allowed: &[ContractState], action: &str) -> Result<(), ContractError> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        Err(ContractError::InvalidState(format!(
            "cannot {action} while the contract is {}",
            self.state
        )))
    }

    pub fn is_coordinator(&self, actor: &Actor) -> bool {
        actor.is_privileged() || self.coordinators.contains(&actor.id)
    }

    /// True when `actor` is `target`, controls `target` as an alt, or is privileged.
    pub fn acts_for(&self, actor: &Actor, target: &ParticipantId) -> bool {
        actor.is_privileged()
            || actor.id == *target
            || self
                .participants
                .get(target)
                .and_then(|turn| turn.alt_controller.as_ref())
                == Some(&actor.id)
    }

    fn require_coordinator(&self, actor: &Actor, action: &'static str) -> Result<(), ContractError> {
        if self.is_coordinator(actor) {
            return Ok(());
        }
        Err(ContractError::Unauthorized {
            actor: actor.id.clone(),
            action,
        })
    }

    fn require_acts_for_or_coordinator(
        &self,
        actor: &Actor,
        target: &ParticipantId,
        action: &'static str,
    ) -> Result<(), ContractError> {
        if self.acts_for(actor, target) || self.is_coordinator(actor) {
            return Ok(());
        }
        Err(ContractError::Unauthorized {
            actor: actor.id.clone(),
            action,
        })
    }

    fn require_banker_or_coordinator(
        &self,
        actor: &Actor,
        action: &'static str,
    ) -> Result<(), ContractError> {
        let is_banker = self
            .banker
            .current
            .as_ref()
            .is_some_and(|banker| self.acts_for(actor, banker));
        if is_banker || self.is_coordinator(actor) {
            return Ok(());
        }
        Err(ContractError::Unauthorized {
            actor: actor.id.clone(),
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap()
    }

    fn contract(size: usize, style: ContractStyle) -> Contract {
        let params = ContractParams::new("deep-space", "crew1", size, Duration::from_secs(3600))
            .with_style(style);
        Contract::new(LocationId::from("channel-1"), params, at(0)).unwrap()
    }

    fn run(contract: &mut Contract, actor: Actor, command: Command) -> ContractChange {
        contract
            .apply(&CommandEnvelope::new(actor, command), at(1))
            .unwrap()
    }

    fn join_all(contract: &mut Contract, names: &[&str]) {
        for name in names {
            run(
                contract,
                Actor::member(*name),
                Command::Join {
                    participant: (*name).into(),
                    display_name: None,
                    guest: false,
                },
            );
        }
    }

    fn order_of(contract: &Contract) -> Vec<&str> {
        contract.order().iter().map(ParticipantId::as_str).collect()
    }

    fn started(size: usize, names: &[&str]) -> Contract {
        let mut c = contract(size, ContractStyle::default());
        join_all(&mut c, names);
        run(&mut c, Actor::member(names[0]), Command::Start);
        c
    }

    #[test]
    fn test_first_joiner_coordinates_and_start_activates_first() {
        let c = started(5, &["a", "b", "c"]);
        assert_eq!(c.coordinators(), &[ParticipantId::from("a")]);
        assert_eq!(c.state(), ContractState::Direct);
        assert_eq!(c.active_participant().unwrap().participant_id.as_str(), "a");
        assert_eq!(c.order().cursor(), 0);
    }

    #[test]
    fn test_rejected_command_leaves_contract_untouched() {
        let mut c = started(5, &["a", "b", "c"]);
        let before = c.version();
        let err = c
            .apply(
                &CommandEnvelope::new(
                    Actor::member("a"),
                    Command::Reorder {
                        positions: "1,1".to_string(),
                    },
                ),
                at(2),
            )
            .unwrap_err();
        assert!(matches!(err, ContractError::MalformedInput(_)));
        assert_eq!(c.version(), before);
        assert_eq!(order_of(&c), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_reorder_during_signup_is_invalid_state() {
        let mut c = contract(5, ContractStyle::default());
        join_all(&mut c, &["a", "b"]);
        let err = c
            .apply(
                &CommandEnvelope::new(
                    Actor::member("a"),
                    Command::Reorder {
                        positions: "2,1".to_string(),
                    },
                ),
                at(1),
            )
            .unwrap_err();
        assert!(matches!(err, ContractError::InvalidState(_)));
    }

    #[test]
    fn test_move_keeps_active_participant() {
        let mut c = started(5, &["a", "b", "c", "d", "e"]);
        run(&mut c, Actor::member("a"), Command::Boost { participant: "a".into() });
        assert_eq!(c.order().current().unwrap().as_str(), "b");

        run(
            &mut c,
            Actor::member("a"),
            Command::Move {
                participant: "e".into(),
                position: 2,
            },
        );
        assert_eq!(order_of(&c), vec!["a", "e", "b", "c", "d"]);
        assert_eq!(c.order().current().unwrap().as_str(), "b");
        assert_eq!(c.active_participant().unwrap().participant_id.as_str(), "b");
    }

    #[test]
    fn test_non_coordinator_cannot_reorder() {
        let mut c = started(5, &["a", "b", "c"]);
        let err = c
            .apply(
                &CommandEnvelope::new(
                    Actor::member("b"),
                    Command::Move {
                        participant: "c".into(),
                        position: 1,
                    },
                ),
                at(1),
            )
            .unwrap_err();
        assert!(matches!(err, ContractError::Unauthorized { .. }));
    }

    #[test]
    fn test_skip_swaps_with_next() {
        let mut c = started(5, &["a", "b", "c"]);
        run(&mut c, Actor::member("a"), Command::Skip { target: None });
        assert_eq!(order_of(&c), vec!["b", "a", "c"]);
        assert_eq!(c.active_participant().unwrap().participant_id.as_str(), "b");
        assert_eq!(c.participant(&"a".into()).unwrap().status, TurnStatus::Idle);
    }

    #[test]
    fn test_skip_without_successor_is_rejected() {
        let mut c = started(5, &["a", "b"]);
        run(&mut c, Actor::member("a"), Command::Boost { participant: "a".into() });
        let err = c
            .apply(
                &CommandEnvelope::new(Actor::member("b"), Command::Skip { target: None }),
                at(2),
            )
            .unwrap_err();
        assert!(matches!(err, ContractError::InvalidState(_)));
    }

    #[test]
    fn test_skip_to_target_lands_ahead_of_skipped() {
        let mut c = started(5, &["a", "b", "c", "d"]);
        run(
            &mut c,
            Actor::member("a"),
            Command::Skip {
                target: Some("d".into()),
            },
        );
        assert_eq!(order_of(&c), vec!["d", "a", "b", "c"]);
        assert_eq!(c.active_participant().unwrap().participant_id.as_str(), "d");
    }

    #[test]
    fn test_last_boost_moves_to_waiting_then_late_join_reactivates() {
        let mut c = started(3, &["a", "b"]);
        run(&mut c, Actor::member("a"), Command::Boost { participant: "a".into() });
        run(&mut c, Actor::member("b"), Command::Boost { participant: "b".into() });
        assert_eq!(c.state(), ContractState::Waiting);
        assert!(c.active_participant().is_none());
        assert_eq!(c.order().cursor(), c.order().len());

        join_all(&mut c, &["c"]);
        assert_eq!(c.state(), ContractState::Direct);
        assert_eq!(c.active_participant().unwrap().participant_id.as_str(), "c");

        run(&mut c, Actor::member("c"), Command::Boost { participant: "c".into() });
        assert_eq!(c.state(), ContractState::Completed);
        assert!(c.ended_at().is_some());
    }

    #[test]
    fn test_out_of_turn_boost_keeps_current_turn() {
        let mut c = started(5, &["a", "b", "c"]);
        let change = run(&mut c, Actor::member("c"), Command::Boost { participant: "c".into() });
        assert!(change.events.iter().any(|e| matches!(
            e,
            ContractEvent::TurnCompleted { out_of_turn: true, .. }
        )));
        assert_eq!(c.active_participant().unwrap().participant_id.as_str(), "a");
        assert_eq!(c.boosted_order(), &[ParticipantId::from("c")]);
    }

    #[test]
    fn test_two_votes_advance_the_turn() {
        let mut c = started(5, &["a", "b", "c"]);
        run(&mut c, Actor::member("b"), Command::VoteAdvance);
        assert_eq!(c.active_participant().unwrap().participant_id.as_str(), "a");
        run(&mut c, Actor::member("b"), Command::VoteAdvance);
        assert_eq!(c.active_participant().unwrap().advance_votes.len(), 1);
        run(&mut c, Actor::member("c"), Command::VoteAdvance);
        assert_eq!(c.active_participant().unwrap().participant_id.as_str(), "b");
        assert_eq!(c.participant(&"a".into()).unwrap().status, TurnStatus::Done);
    }

    #[test]
    fn test_direct_guest_auto_completes_when_paid() {
        let mut c = contract(5, ContractStyle::default());
        join_all(&mut c, &["a"]);
        run(
            &mut c,
            Actor::member("a"),
            Command::Join {
                participant: "guest".into(),
                display_name: Some("Guest".to_string()),
                guest: true,
            },
        );
        assert_eq!(c.coordinators(), &[ParticipantId::from("a")]);
        run(&mut c, Actor::member("a"), Command::Start);
        run(&mut c, Actor::member("a"), Command::Boost { participant: "a".into() });
        assert_eq!(c.active_participant().unwrap().participant_id.as_str(), "guest");

        run(
            &mut c,
            Actor::member("a"),
            Command::SendTokens {
                sender: "a".into(),
                quantity: 6,
                recipient: None,
            },
        );
        assert_eq!(c.participant(&"guest".into()).unwrap().status, TurnStatus::Done);
        assert_eq!(c.state(), ContractState::Waiting);
    }

    #[test]
    fn test_idempotent_replay_applies_once() {
        let mut c = started(5, &["a", "b", "c"]);
        let envelope = CommandEnvelope::new(
            Actor::member("a"),
            Command::Boost {
                participant: "a".into(),
            },
        )
        .with_event_id(Uuid::new_v4());
        let first = c.apply(&envelope, at(3)).unwrap();
        let second = c.apply(&envelope, at(4)).unwrap();
        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert!(second.is_noop());
        assert_eq!(second.version, first.version);
        assert_eq!(c.active_participant().unwrap().participant_id.as_str(), "b");
    }

    #[test]
    fn test_exchange_records_correlated_entries() {
        let mut c = started(5, &["a", "b", "c"]);
        let change = run(
            &mut c,
            Actor::member("b"),
            Command::SendTokens {
                sender: "b".into(),
                quantity: 2,
                recipient: None,
            },
        );
        let records = change.audit_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].correlation_id, records[1].correlation_id);

        let a = c.participant(&"a".into()).unwrap();
        let b = c.participant(&"b".into()).unwrap();
        assert_eq!(a.tokens_received, 2);
        assert_eq!(b.fairness_delta(), 2);
        assert_eq!(a.fairness_delta(), -2);
        assert!(b.token_value > 0.0);

        run(
            &mut c,
            Actor::member("a"),
            Command::RemoveLedgerEntry {
                participant: "b".into(),
                direction: TokenDirection::Sent,
                index: 0,
            },
        );
        let a = c.participant(&"a".into()).unwrap();
        assert_eq!(a.tokens_received, 0);
        assert_eq!(a.ledger.count(TokenDirection::Received), 0);
        assert_eq!(c.participant(&"b".into()).unwrap().fairness_delta(), 0);
    }

    #[test]
    fn test_delegated_banker_send_does_not_complete_turn() {
        let mut c = contract(5, ContractStyle::new(ContractMode::Delegated));
        join_all(&mut c, &["a", "bank", "c"]);
        run(
            &mut c,
            Actor::member("a"),
            Command::ConfigureBanker {
                boosting_sink: Some("bank".into()),
                post_sink: None,
                sink_position: Some(SinkPosition::Last),
            },
        );
        run(&mut c, Actor::member("a"), Command::Start);
        assert_eq!(c.state(), ContractState::Delegated);
        assert_eq!(order_of(&c), vec!["a", "c", "bank"]);
        assert_eq!(c.banker().current, Some("bank".into()));

        run(&mut c, Actor::member("bank"), Command::BankerSend { quantity: None });
        let a = c.participant(&"a".into()).unwrap();
        assert_eq!(a.tokens_received, 6);
        assert_eq!(a.status, TurnStatus::Active);
    }

    #[test]
    fn test_delegated_start_requires_banker() {
        let mut c = contract(5, ContractStyle::new(ContractMode::Delegated));
        join_all(&mut c, &["a"]);
        let err = c
            .apply(&CommandEnvelope::new(Actor::member("a"), Command::Start), at(1))
            .unwrap_err();
        assert!(matches!(err, ContractError::InvalidState(_)));
        assert_eq!(c.state(), ContractState::Signup);
    }

    #[test]
    fn test_finish_quorum_is_strict_majority() {
        let mut c = started(5, &["a", "b", "c", "d"]);
        for name in ["a", "b", "c", "d"] {
            run(&mut c, Actor::member(name), Command::Boost { participant: name.into() });
        }
        assert_eq!(c.state(), ContractState::Waiting);
        run(&mut c, Actor::member("b"), Command::AcknowledgeFinish { participant: "b".into() });
        run(&mut c, Actor::member("c"), Command::AcknowledgeFinish { participant: "c".into() });
        assert_eq!(c.state(), ContractState::Waiting);
        run(&mut c, Actor::member("d"), Command::AcknowledgeFinish { participant: "d".into() });
        assert_eq!(c.state(), ContractState::Completed);
    }

    #[test]
    fn test_only_system_expires_late_join() {
        let mut c = started(5, &["a"]);
        run(&mut c, Actor::member("a"), Command::Boost { participant: "a".into() });
        let err = c
            .apply(&CommandEnvelope::new(Actor::member("a"), Command::ExpireLateJoin), at(2))
            .unwrap_err();
        assert!(matches!(err, ContractError::Unauthorized { .. }));
        run(&mut c, Actor::system(), Command::ExpireLateJoin);
        assert_eq!(c.state(), ContractState::Completed);
        run(&mut c, Actor::member("a"), Command::Archive { force: false });
        assert_eq!(c.state(), ContractState::Archived);
        assert!(c.archived_at().is_some());
    }

    #[test]
    fn test_dynamic_tokens_give_last_in_line_eight() {
        let mut c = contract(5, ContractStyle::default().with_dynamic_tokens());
        join_all(&mut c, &["a", "b", "c"]);
        assert_eq!(c.participant(&"c".into()).unwrap().tokens_wanted, DEFAULT_TOKENS_WANTED);
        run(&mut c, Actor::member("a"), Command::Start);
        // a is active, b and c are waiting
        assert_eq!(c.participant(&"b".into()).unwrap().tokens_wanted, TOKENS_SIX);
        assert_eq!(c.participant(&"c".into()).unwrap().tokens_wanted, TOKENS_EIGHT);
    }

    #[test]
    fn test_warm_up_runs_before_turns() {
        let style = ContractStyle::default().with_warm_up(false);
        let mut c = contract(3, style);
        join_all(&mut c, &["a", "b", "c"]);
        run(
            &mut c,
            Actor::member("a"),
            Command::ConfigureWarmUp {
                sink: "a".into(),
                runs: 4,
            },
        );
        run(&mut c, Actor::member("a"), Command::Start);
        assert_eq!(c.state(), ContractState::WarmUp);
        assert_eq!(c.warm_up().unwrap().plan.legs, 2);

        for leg in 0..2 {
            for name in ["a", "b", "c"] {
                run(&mut c, Actor::member(name), Command::AcknowledgeLeg { participant: name.into() });
            }
            run(&mut c, Actor::member("a"), Command::OpenAdvance);
            let change = run(&mut c, Actor::member("a"), Command::CompleteLeg);
            assert!(change
                .events
                .contains(&ContractEvent::WarmUpLegCompleted { leg }));
        }
        assert_eq!(c.state(), ContractState::Direct);
        let active = c.active_participant().unwrap();
        assert_eq!(active.participant_id.as_str(), "a");
        assert_eq!(active.turn_started_at, Some(at(1)));
    }

    #[test]
    fn test_leaving_active_participant_promotes_next() {
        let mut c = started(5, &["a", "b", "c"]);
        run(&mut c, Actor::member("a"), Command::Leave { participant: "a".into() });
        assert_eq!(c.active_participant().unwrap().participant_id.as_str(), "b");
        assert_eq!(c.coordinators(), &[ParticipantId::from("b")]);
        c.check_invariants().unwrap();
    }

    #[test]
    fn test_full_contract_rejects_joins() {
        let mut c = contract(2, ContractStyle::default());
        join_all(&mut c, &["a", "b"]);
        let err = c
            .apply(
                &CommandEnvelope::new(
                    Actor::member("c"),
                    Command::Join {
                        participant: "c".into(),
                        display_name: None,
                        guest: false,
                    },
                ),
                at(1),
            )
            .unwrap_err();
        assert!(matches!(err, ContractError::InvalidState(_)));
    }

    fn delegated_with_bank() -> Contract {
        let mut c = contract(5, ContractStyle::new(ContractMode::Delegated));
        join_all(&mut c, &["a", "bank", "c"]);
        run(
            &mut c,
            Actor::member("a"),
            Command::ConfigureBanker {
                boosting_sink: Some("bank".into()),
                post_sink: None,
                sink_position: Some(SinkPosition::Last),
            },
        );
        run(&mut c, Actor::member("a"), Command::Start);
        c
    }

    #[test]
    fn test_departing_banker_hands_sink_to_coordinator() {
        let mut c = delegated_with_bank();
        run(&mut c, Actor::member("a"), Command::Leave { participant: "bank".into() });
        assert_eq!(c.banker().boosting_sink, Some("a".into()));
        assert_eq!(c.banker().current, Some("a".into()));
        c.check_invariants().unwrap();

        run(&mut c, Actor::member("a"), Command::Boost { participant: "a".into() });
        run(&mut c, Actor::member("a"), Command::BankerSend { quantity: None });
        let receiver = c.participant(&"c".into()).unwrap();
        assert_eq!(receiver.status, TurnStatus::Active);
        assert_eq!(receiver.tokens_received, receiver.tokens_wanted);
    }

    #[test]
    fn test_delegated_contract_without_sink_fails_invariants() {
        let mut c = delegated_with_bank();
        c.banker.boosting_sink = None;
        assert!(matches!(c.check_invariants(), Err(ContractError::Internal(_))));
    }

    #[test]
    fn test_banker_starts_own_turn_with_empty_count() {
        let mut c = delegated_with_bank();
        assert_eq!(order_of(&c), vec!["a", "c", "bank"]);
        run(
            &mut c,
            Actor::member("c"),
            Command::SendTokens {
                sender: "c".into(),
                quantity: 3,
                recipient: Some("bank".into()),
            },
        );
        assert_eq!(c.participant(&"bank".into()).unwrap().tokens_received, 3);

        run(&mut c, Actor::member("a"), Command::Boost { participant: "a".into() });
        run(&mut c, Actor::member("c"), Command::Boost { participant: "c".into() });
        let bank = c.participant(&"bank".into()).unwrap();
        assert_eq!(bank.status, TurnStatus::Active);
        assert_eq!(bank.tokens_received, 0);
        assert_eq!(bank.ledger.count(TokenDirection::Received), 3);
    }

    #[test]
    fn test_set_active_demotes_current_booster() {
        let mut c = started(5, &["a", "b", "c", "d"]);
        let change = run(&mut c, Actor::member("a"), Command::SetActive { participant: "c".into() });
        assert!(change.events.contains(&ContractEvent::TurnSkipped { participant: "a".into() }));
        assert!(change.events.contains(&ContractEvent::TurnStarted { participant: "c".into() }));
        assert_eq!(c.participant(&"a".into()).unwrap().status, TurnStatus::Idle);
        assert_eq!(c.active_participant().unwrap().participant_id.as_str(), "c");
        assert_eq!(c.order().cursor(), 2);

        let set_active = |who: &str, target: &str| {
            CommandEnvelope::new(Actor::member(who), Command::SetActive { participant: target.into() })
        };
        let err = c.apply(&set_active("a", "c"), at(2)).unwrap_err();
        assert!(matches!(err, ContractError::InvalidState(_)));
        let err = c.apply(&set_active("b", "d"), at(2)).unwrap_err();
        assert!(matches!(err, ContractError::Unauthorized { .. }));

        run(&mut c, Actor::member("c"), Command::Boost { participant: "c".into() });
        assert_eq!(c.active_participant().unwrap().participant_id.as_str(), "a");
        let err = c.apply(&set_active("a", "c"), at(2)).unwrap_err();
        assert!(matches!(err, ContractError::InvalidState(_)));
    }

    #[test]
    fn test_unboost_reopens_waiting_contract() {
        let mut c = started(5, &["a", "b"]);
        run(&mut c, Actor::member("a"), Command::Boost { participant: "a".into() });
        run(&mut c, Actor::member("b"), Command::Boost { participant: "b".into() });
        assert_eq!(c.state(), ContractState::Waiting);
        assert!(c.waiting_since().is_some());

        let change = run(&mut c, Actor::member("b"), Command::Unboost { participant: "b".into() });
        assert!(change.events.contains(&ContractEvent::TurnReverted { participant: "b".into() }));
        assert_eq!(c.state(), ContractState::Direct);
        assert!(c.waiting_since().is_none());
        assert_eq!(c.active_participant().unwrap().participant_id.as_str(), "b");
        assert_eq!(c.order().cursor(), 1);
        c.check_invariants().unwrap();
    }

    #[test]
    fn test_send_to_back_passes_turn_along() {
        let mut c = started(5, &["a", "b", "c"]);
        run(&mut c, Actor::member("a"), Command::SendToBack { participant: "a".into() });
        assert_eq!(order_of(&c), vec!["b", "c", "a"]);
        assert_eq!(c.participant(&"a".into()).unwrap().status, TurnStatus::Idle);
        assert_eq!(c.active_participant().unwrap().participant_id.as_str(), "b");
        assert_eq!(c.order().cursor(), 0);
        c.check_invariants().unwrap();
    }

    #[test]
    fn test_controller_acts_for_linked_alt() {
        let mut c = started(5, &["a", "b", "c"]);
        run(
            &mut c,
            Actor::member("a"),
            Command::LinkAlt {
                controller: "a".into(),
                alt: "c".into(),
            },
        );
        assert_eq!(c.participant(&"c".into()).unwrap().alt_controller, Some("a".into()));
        assert_eq!(c.participant(&"a".into()).unwrap().alts, vec![ParticipantId::from("c")]);

        let err = c
            .apply(
                &CommandEnvelope::new(
                    Actor::member("b"),
                    Command::LinkAlt {
                        controller: "b".into(),
                        alt: "c".into(),
                    },
                ),
                at(2),
            )
            .unwrap_err();
        assert!(matches!(err, ContractError::InvalidTarget(_)));

        let err = c
            .apply(
                &CommandEnvelope::new(Actor::member("b"), Command::Boost { participant: "c".into() }),
                at(2),
            )
            .unwrap_err();
        assert!(matches!(err, ContractError::Unauthorized { .. }));

        run(&mut c, Actor::member("a"), Command::Boost { participant: "c".into() });
        assert_eq!(c.participant(&"c".into()).unwrap().status, TurnStatus::Done);
        assert_eq!(c.active_participant().unwrap().participant_id.as_str(), "a");
    }

    #[test]
    fn test_sink_can_only_be_claimed_once() {
        let mut c = started(5, &["a", "b", "c"]);
        run(&mut c, Actor::member("b"), Command::VolunteerSink { participant: "b".into() });
        assert_eq!(c.banker().post_sink, Some("b".into()));

        let again = run(&mut c, Actor::member("b"), Command::VolunteerSink { participant: "b".into() });
        assert!(again.is_noop());
        let err = c
            .apply(
                &CommandEnvelope::new(Actor::member("c"), Command::VolunteerSink { participant: "c".into() }),
                at(2),
            )
            .unwrap_err();
        assert!(matches!(err, ContractError::InvalidState(_)));
        assert_eq!(c.banker().post_sink, Some("b".into()));
    }

    #[test]
    fn test_coordinator_role_skips_guests_on_leave() {
        let mut c = contract(5, ContractStyle::default());
        join_all(&mut c, &["a"]);
        run(
            &mut c,
            Actor::member("g"),
            Command::Join {
                participant: "g".into(),
                display_name: None,
                guest: true,
            },
        );
        join_all(&mut c, &["b"]);
        assert_eq!(c.coordinators(), &[ParticipantId::from("a")]);

        run(&mut c, Actor::member("a"), Command::Leave { participant: "a".into() });
        assert_eq!(c.coordinators(), &[ParticipantId::from("b")]);
        run(&mut c, Actor::member("b"), Command::Start);
        assert_eq!(c.state(), ContractState::Direct);
    }

    #[test]
    fn test_advance_opened_early_is_flagged() {
        let mut c = contract(3, ContractStyle::default().with_warm_up(false));
        join_all(&mut c, &["a", "b", "c"]);
        run(
            &mut c,
            Actor::member("a"),
            Command::ConfigureWarmUp {
                sink: "a".into(),
                runs: 4,
            },
        );
        run(&mut c, Actor::member("a"), Command::Start);

        run(&mut c, Actor::member("a"), Command::AcknowledgeLeg { participant: "a".into() });
        let early = run(&mut c, Actor::member("a"), Command::OpenAdvance);
        assert!(early.events.contains(&ContractEvent::WarmUpAdvanceOpened {
            leg: 0,
            by: "a".into(),
            ready: false,
        }));
        run(&mut c, Actor::member("a"), Command::CompleteLeg);

        for name in ["a", "b", "c"] {
            run(&mut c, Actor::member(name), Command::AcknowledgeLeg { participant: name.into() });
        }
        let on_time = run(&mut c, Actor::member("a"), Command::OpenAdvance);
        assert!(on_time.events.contains(&ContractEvent::WarmUpAdvanceOpened {
            leg: 1,
            by: "a".into(),
            ready: true,
        }));
    }

    #[test]
    fn test_noop_with_event_id_is_remembered_in_snapshot() {
        let mut c = started(5, &["a", "b"]);
        let before = c.version();
        let wanted = c.participant(&"a".into()).unwrap().tokens_wanted;
        let event_id = Uuid::new_v4();
        let envelope = CommandEnvelope::new(
            Actor::member("a"),
            Command::SetTokens {
                participant: "a".into(),
                wanted,
            },
        )
        .with_event_id(event_id);

        let change = c.apply(&envelope, at(2)).unwrap();
        assert!(change.is_noop());
        assert_eq!(change.version, before + 1);

        let json = serde_json::to_string(&change.snapshot).unwrap();
        let mut restored: Contract = serde_json::from_str(&json).unwrap();
        let replay = restored.apply(&envelope, at(3)).unwrap();
        assert!(replay.duplicate);
        assert_eq!(restored.version(), before + 1);
    }
}
