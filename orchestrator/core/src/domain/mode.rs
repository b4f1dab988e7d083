// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Contract Style
//!
//! A contract runs turns in exactly one [`ContractMode`]; independent features
//! are plain booleans on [`Capabilities`]. Legacy snapshots stored the whole
//! style as one flag word, which [`ContractStyle::from_bits`] decodes and
//! validates.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Value objects describing how a contract is run

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::contract::ContractError;

pub const TOKENS_SIX: u32 = 6;
pub const TOKENS_EIGHT: u32 = 8;

// Legacy flag word
const FLAG_WARM_UP: u32 = 0x1;
const FLAG_SELF_RUNS: u32 = 0x2;
const FLAG_SIX_TOKENS: u32 = 0x100;
const FLAG_EIGHT_TOKENS: u32 = 0x200;
const FLAG_DYNAMIC_TOKENS: u32 = 0x400;
const FLAG_DIRECT: u32 = 0x4000;
const FLAG_DELEGATED: u32 = 0x8000;
const KNOWN_FLAGS: u32 = FLAG_WARM_UP
    | FLAG_SELF_RUNS
    | FLAG_SIX_TOKENS
    | FLAG_EIGHT_TOKENS
    | FLAG_DYNAMIC_TOKENS
    | FLAG_DIRECT
    | FLAG_DELEGATED;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractMode {
    /// Participants send tokens straight to whoever holds the turn
    #[default]
    Direct,
    /// Tokens flow through a banker who pays out each turn
    Delegated,
}

impl fmt::Display for ContractMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractMode::Direct => f.write_str("direct"),
            ContractMode::Delegated => f.write_str("delegated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub warm_up: bool,
    #[serde(default)]
    pub self_runs: bool,
    #[serde(default)]
    pub dynamic_tokens: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContractStyle {
    #[serde(default)]
    pub mode: ContractMode,
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Token count applied to everyone at start, overriding individual requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_tokens: Option<u32>,
}

impl ContractStyle {
    pub fn new(mode: ContractMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn with_warm_up(mut self, self_runs: bool) -> Self {
        self.capabilities.warm_up = true;
        self.capabilities.self_runs = self_runs;
        self
    }

    pub fn with_dynamic_tokens(mut self) -> Self {
        self.capabilities.dynamic_tokens = true;
        self
    }

    pub fn with_fixed_tokens(mut self, tokens: u32) -> Self {
        self.fixed_tokens = Some(tokens);
        self
    }

    pub fn validate(&self) -> Result<(), ContractError> {
        match self.fixed_tokens {
            None | Some(TOKENS_SIX) | Some(TOKENS_EIGHT) => {}
            Some(other) => {
                return Err(ContractError::MalformedInput(format!(
                    "fixed token preset must be {TOKENS_SIX} or {TOKENS_EIGHT}, got {other}"
                )))
            }
        }
        if self.fixed_tokens.is_some() && self.capabilities.dynamic_tokens {
            return Err(ContractError::MalformedInput(
                "a fixed token preset cannot be combined with dynamic token sizing".to_string(),
            ));
        }
        Ok(())
    }

    /// Decodes a legacy flag word. Exactly one of the direct/delegated bits must be set.
    pub fn from_bits(bits: u32) -> Result<Self, ContractError> {
        if bits & !KNOWN_FLAGS != 0 {
            return Err(ContractError::Internal(format!(
                "unrecognized style flags {:#x}",
                bits & !KNOWN_FLAGS
            )));
        }
        let mode = match (bits & FLAG_DIRECT != 0, bits & FLAG_DELEGATED != 0) {
            (true, false) => ContractMode::Direct,
            (false, true) => ContractMode::Delegated,
            (true, true) => {
                return Err(ContractError::Internal(format!(
                    "style {bits:#x} selects both direct and delegated turns"
                )))
            }
            (false, false) => {
                return Err(ContractError::Internal(format!(
                    "style {bits:#x} selects no turn mode"
                )))
            }
        };
        let fixed_tokens = match (bits & FLAG_SIX_TOKENS != 0, bits & FLAG_EIGHT_TOKENS != 0) {
            (false, false) => None,
            (true, false) => Some(TOKENS_SIX),
            (false, true) => Some(TOKENS_EIGHT),
            (true, true) => {
                return Err(ContractError::Internal(format!(
                    "style {bits:#x} selects two token presets"
                )))
            }
        };
        let style = Self {
            mode,
            capabilities: Capabilities {
                warm_up: bits & FLAG_WARM_UP != 0,
                self_runs: bits & FLAG_SELF_RUNS != 0,
                dynamic_tokens: bits & FLAG_DYNAMIC_TOKENS != 0,
            },
            fixed_tokens,
        };
        style.validate().map_err(|e| ContractError::Internal(e.to_string()))?;
        Ok(style)
    }

    pub fn to_bits(&self) -> u32 {
        let mut bits = match self.mode {
            ContractMode::Direct => FLAG_DIRECT,
            ContractMode::Delegated => FLAG_DELEGATED,
        };
        if self.capabilities.warm_up {
            bits |= FLAG_WARM_UP;
        }
        if self.capabilities.self_runs {
            bits |= FLAG_SELF_RUNS;
        }
        if self.capabilities.dynamic_tokens {
            bits |= FLAG_DYNAMIC_TOKENS;
        }
        match self.fixed_tokens {
            Some(TOKENS_SIX) => bits |= FLAG_SIX_TOKENS,
            Some(TOKENS_EIGHT) => bits |= FLAG_EIGHT_TOKENS,
            _ => {}
        }
        bits
    }
}

/// How the boost order is arranged when the contract starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoostOrderStrategy {
    #[default]
    Signup,
    Reverse,
    Random,
    /// Highest accumulated token value first; re-applied after every exchange
    TokenValue,
}

/// Where the boosting sink takes its own turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkPosition {
    #[default]
    FollowOrder,
    First,
    Last,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bits_requires_exactly_one_mode() {
        assert!(matches!(
            ContractStyle::from_bits(FLAG_DIRECT | FLAG_DELEGATED),
            Err(ContractError::Internal(_))
        ));
        assert!(matches!(
            ContractStyle::from_bits(FLAG_WARM_UP),
            Err(ContractError::Internal(_))
        ));
        assert!(matches!(
            ContractStyle::from_bits(FLAG_DIRECT | 0x10_0000),
            Err(ContractError::Internal(_))
        ));
    }

    #[test]
    fn test_from_bits_decodes_capabilities() {
        let style =
            ContractStyle::from_bits(FLAG_DELEGATED | FLAG_WARM_UP | FLAG_SELF_RUNS | FLAG_EIGHT_TOKENS)
                .unwrap();
        assert_eq!(style.mode, ContractMode::Delegated);
        assert!(style.capabilities.warm_up);
        assert!(style.capabilities.self_runs);
        assert!(!style.capabilities.dynamic_tokens);
        assert_eq!(style.fixed_tokens, Some(TOKENS_EIGHT));
        assert_eq!(ContractStyle::from_bits(style.to_bits()).unwrap(), style);
    }

    #[test]
    fn test_validate_rejects_conflicting_token_sizing() {
        assert!(ContractStyle::new(ContractMode::Direct)
            .with_fixed_tokens(7)
            .validate()
            .is_err());
        assert!(ContractStyle::new(ContractMode::Direct)
            .with_fixed_tokens(6)
            .with_dynamic_tokens()
            .validate()
            .is_err());
        assert!(ContractStyle::from_bits(FLAG_DIRECT | FLAG_SIX_TOKENS | FLAG_DYNAMIC_TOKENS).is_err());
    }
}
