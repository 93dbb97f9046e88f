//! Strict rule validation.
//!
//! Matching skips tokens it cannot classify; validation reports them. Positions
//! are 1-indexed over the non-empty tokens.

use serde::{Deserialize, Serialize};

use crate::classify::is_classifiable;
use crate::tokenizer::tokenize;

/// Machine-readable code for an unclassifiable rule token.
pub const INVALID_IP_FORMAT: &str = "INVALID_IP_FORMAT";

/// A token that fits no rule notation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidToken {
    pub position: usize,
    pub token: String,
}

/// Errors raised by strict validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum RuleError {
    #[error("Invalid rule token at #{position}: [{token}]")]
    InvalidToken { position: usize, token: String },
}

impl RuleError {
    pub fn code(&self) -> &'static str {
        match self {
            RuleError::InvalidToken { .. } => INVALID_IP_FORMAT,
        }
    }

    pub fn position(&self) -> usize {
        match self {
            RuleError::InvalidToken { position, .. } => *position,
        }
    }
}

impl From<InvalidToken> for RuleError {
    fn from(invalid: InvalidToken) -> Self {
        RuleError::InvalidToken {
            position: invalid.position,
            token: invalid.token,
        }
    }
}

/// Every unclassifiable token, in order.
pub fn invalid_tokens(rules: &str) -> Vec<InvalidToken> {
    tokenize(rules)
        .into_iter()
        .enumerate()
        .filter(|(_, token)| !is_classifiable(token))
        .map(|(i, token)| InvalidToken {
            position: i + 1,
            token: token.to_string(),
        })
        .collect()
}

/// Fail on the first unclassifiable token. Blank input is valid.
pub fn assert_valid_rules(rules: &str) -> Result<(), RuleError> {
    match invalid_tokens(rules).into_iter().next() {
        Some(invalid) => Err(invalid.into()),
        None => Ok(()),
    }
}
