//! Shared domain and wire types for the six-dice table.
//!
//! Everything here is plain data: the execution crate owns the rules that
//! mutate these values and the live-table service owns the transport.

pub mod api;
mod constants;
mod error;
mod round;
mod wallet;

pub use constants::*;
pub use error::{ErrorKind, InvalidDice};
pub use round::{is_face, Bet, BetOutcome, DiceFaces, Phase, RoundId, UserId};
pub use wallet::{normalize_amount, Transaction, TransactionKind};
