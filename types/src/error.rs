use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Stable, machine-readable error codes returned to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidPhase,
    InvalidNumber,
    InvalidAmount,
    DuplicateBet,
    NotFound,
    InsufficientFunds,
    ResolutionFailure,
    Unauthorized,
    Unavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidPhase => "INVALID_PHASE",
            ErrorKind::InvalidNumber => "INVALID_NUMBER",
            ErrorKind::InvalidAmount => "INVALID_AMOUNT",
            ErrorKind::DuplicateBet => "DUPLICATE_BET",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorKind::ResolutionFailure => "RESOLUTION_FAILURE",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Unavailable => "UNAVAILABLE",
        }
    }

    /// Whether retrying the same request can succeed without the caller
    /// changing anything.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Unavailable)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum InvalidDice {
    #[error("expected {expected} dice faces, got {got}")]
    WrongCount { expected: usize, got: usize },
    #[error("die face out of range (got={0}, allowed=1..=6)")]
    FaceOutOfRange(u8),
}
