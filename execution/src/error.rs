use rust_decimal::Decimal;
use sixdice_types::{ErrorKind, Phase};
use thiserror::Error as ThisError;

use crate::ledger::LedgerError;

/// Rejections from bet placement, removal and operator table actions.
///
/// A rejected request never leaves a partial effect behind: no debit without
/// a recorded bet, no removed bet without its refund.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum BetError {
    #[error("not accepted in phase {0}")]
    InvalidPhase(Phase),
    #[error("number must be a die face (got={0}, allowed=1..=6)")]
    InvalidNumber(u8),
    #[error("amount must be positive with at most two decimals (got={0})")]
    InvalidAmount(Decimal),
    #[error("amount outside table limits (got={amount}, min={min}, max={max})")]
    OutsideLimits {
        amount: Decimal,
        min: Decimal,
        max: Decimal,
    },
    #[error("already holding a bet on {0} this round")]
    DuplicateBet(u8),
    #[error("no bet on {0} this round")]
    NotFound(u8),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl BetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BetError::InvalidPhase(_) => ErrorKind::InvalidPhase,
            BetError::InvalidNumber(_) => ErrorKind::InvalidNumber,
            BetError::InvalidAmount(_) | BetError::OutsideLimits { .. } => ErrorKind::InvalidAmount,
            BetError::DuplicateBet(_) => ErrorKind::DuplicateBet,
            BetError::NotFound(_) => ErrorKind::NotFound,
            BetError::Ledger(err) => err.kind(),
        }
    }
}
