//! Six-dice table execution layer.
//!
//! This crate holds the rules of the table: the round phase machine, dice
//! resolution, the payout table, the bet book and the wallet ledger, tied
//! together by [`RoundEngine`]. Everything here is synchronous and takes the
//! clock as an argument, so the same calls replay identically in tests.
//!
//! ## Ownership
//! - Only the [`Ledger`] changes balances. The bet book and the engine request
//!   debits and credits and react to the outcome.
//! - The engine owns the round in play and its bets. Once a round completes,
//!   its bets move to the read-only [`RoundArchive`].
//!
//! ## Minimal round (example)
//! ```rust
//! use std::sync::Arc;
//! use rust_decimal::Decimal;
//! use sixdice_execution::{Entry, EngineConfig, InMemoryLedger, Ledger, RoundEngine};
//! use sixdice_types::{Phase, TransactionKind, UserId};
//!
//! let ledger = Arc::new(InMemoryLedger::new());
//! let player = UserId::from("player-1");
//! ledger
//!     .credit(Entry::new(player.clone(), Decimal::from(100), TransactionKind::Deposit, "deposit", 0))
//!     .unwrap();
//!
//! let mut engine = RoundEngine::new(EngineConfig::default(), ledger.clone(), 0).unwrap();
//! engine.advance(5_000);
//! assert_eq!(engine.round().phase, Phase::Betting);
//!
//! engine.place_bet(&player, 3, Decimal::from(10), 6_000).unwrap();
//! assert_eq!(ledger.balance(&player), Decimal::from(90));
//! ```

pub mod bet_book;
pub mod config;
pub mod dice;
pub mod engine;
pub mod error;
pub mod history;
pub mod ledger;
pub mod payout;
pub mod round_scheduler;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

pub use bet_book::BetBook;
pub use config::{ConfigError, EngineConfig, SettlementConfig, TableRules};
pub use dice::DiceRoller;
pub use engine::{settlement_reference, EngineEvent, Round, RoundEngine};
pub use error::BetError;
pub use history::{ArchivedRound, RoundArchive, SettledBet};
pub use ledger::{Entry, HistoryFilter, InMemoryLedger, Ledger, LedgerError};
pub use payout::{SixMatchPolicy, Settlement};
pub use round_scheduler::{PhaseConfig, RoundScheduler, TransitionResult};
