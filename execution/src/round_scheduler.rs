//! Round scheduler state machine for the six-dice table.
//!
//! This module provides a deterministic state machine for round phase timing.
//! It encapsulates the phase transition logic and timing calculations
//! separately from bets, wallets and I/O.
//!
//! ## Phases
//!
//! A round progresses through five phases:
//! 1. **Waiting** - Between rounds, no betting
//! 2. **Betting** - Players can place and remove bets
//! 3. **Closed** - Bet book frozen, dice not yet resolved
//! 4. **Result** - Dice resolved, payouts applied, results visible
//! 5. **Completed** - Round archived; the next round opens in Waiting
//!
//! ## Clock
//!
//! Every call takes `now_ms` (milliseconds since the unix epoch, supplied by
//! the caller). Whether a transition is due is re-derived from the stored
//! `phase_ends_at_ms` on every call, so a late or repeated tick can neither
//! lose nor duplicate a transition.
//!
//! ## Usage
//!
//! ```rust
//! use sixdice_execution::round_scheduler::{PhaseConfig, RoundScheduler, TransitionResult};
//! use sixdice_types::Phase;
//!
//! let scheduler = RoundScheduler::new(PhaseConfig::default());
//! let now_ms = 100_000;
//! let ends_at = scheduler.new_round_timing(now_ms);
//!
//! assert_eq!(
//!     scheduler.check_transition(Phase::Waiting, ends_at, now_ms),
//!     TransitionResult::NoTransition
//! );
//! assert!(matches!(
//!     scheduler.check_transition(Phase::Waiting, ends_at, ends_at),
//!     TransitionResult::TransitionTo { phase: Phase::Betting, .. }
//! ));
//! ```

use serde::{Deserialize, Serialize};
use sixdice_types::Phase;

/// Phase configuration with durations in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseConfig {
    /// Duration of the waiting phase in milliseconds.
    pub waiting_ms: u64,
    /// Duration of the betting window in milliseconds.
    pub betting_ms: u64,
    /// Time between betting closing and dice resolution in milliseconds.
    pub closed_ms: u64,
    /// How long results stay on display in milliseconds.
    pub result_ms: u64,
    /// Duration of the completed phase in milliseconds.
    pub completed_ms: u64,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            waiting_ms: 5_000,
            betting_ms: 30_000,
            closed_ms: 21_000,
            result_ms: 20_000,
            completed_ms: 1_000,
        }
    }
}

impl PhaseConfig {
    /// Create a new phase configuration with the given durations.
    pub fn new(
        waiting_ms: u64,
        betting_ms: u64,
        closed_ms: u64,
        result_ms: u64,
        completed_ms: u64,
    ) -> Self {
        Self {
            waiting_ms,
            betting_ms,
            closed_ms,
            result_ms,
            completed_ms,
        }
    }

    /// Validate the configuration (betting and closed windows must be > 0).
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.betting_ms == 0 {
            return Err("betting_ms must be greater than zero");
        }
        if self.closed_ms == 0 {
            return Err("closed_ms must be greater than zero");
        }
        Ok(())
    }

    /// Get the duration for a specific phase.
    pub fn duration_for_phase(&self, phase: Phase) -> u64 {
        match phase {
            Phase::Waiting => self.waiting_ms,
            Phase::Betting => self.betting_ms,
            Phase::Closed => self.closed_ms,
            Phase::Result => self.result_ms,
            Phase::Completed => self.completed_ms,
        }
    }
}

/// Result of a phase transition check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionResult {
    /// No transition needed, remain in current phase.
    NoTransition,
    /// Transition to the specified phase with the given end time.
    TransitionTo { phase: Phase, phase_ends_at_ms: u64 },
    /// The round is over and a new one should open.
    NewRound { phase_ends_at_ms: u64 },
}

/// Pure state machine for round phase management.
///
/// This struct provides deterministic phase transition logic without any I/O.
/// It can be used to:
/// - Determine if a phase transition is due
/// - Calculate the next phase and its end time
/// - Validate whether an action is allowed in the current phase
#[derive(Clone, Debug)]
pub struct RoundScheduler {
    config: PhaseConfig,
}

impl RoundScheduler {
    /// Create a new round scheduler with the given configuration.
    pub fn new(config: PhaseConfig) -> Self {
        Self { config }
    }

    /// Determine the next phase after the given phase.
    ///
    /// Returns `None` if the phase is `Completed` (end of round).
    pub fn next_phase(phase: Phase) -> Option<Phase> {
        match phase {
            Phase::Waiting => Some(Phase::Betting),
            Phase::Betting => Some(Phase::Closed),
            Phase::Closed => Some(Phase::Result),
            Phase::Result => Some(Phase::Completed),
            Phase::Completed => None,
        }
    }

    /// Check if a transition from the current phase is due.
    ///
    /// A transition is due when `now_ms >= phase_ends_at_ms`. Leaving
    /// `Completed` opens a new round.
    pub fn check_transition(
        &self,
        current_phase: Phase,
        phase_ends_at_ms: u64,
        now_ms: u64,
    ) -> TransitionResult {
        // Not time yet
        if now_ms < phase_ends_at_ms {
            return TransitionResult::NoTransition;
        }

        match Self::next_phase(current_phase) {
            Some(phase) => TransitionResult::TransitionTo {
                phase,
                phase_ends_at_ms: now_ms.saturating_add(self.config.duration_for_phase(phase)),
            },
            None => TransitionResult::NewRound {
                phase_ends_at_ms: self.new_round_timing(now_ms),
            },
        }
    }

    /// Calculate timing for a new round (the end of its Waiting phase).
    pub fn new_round_timing(&self, start_time_ms: u64) -> u64 {
        start_time_ms.saturating_add(self.config.waiting_ms)
    }

    /// Check if betting is currently allowed.
    pub fn is_betting_open(&self, current_phase: Phase, phase_ends_at_ms: u64, now_ms: u64) -> bool {
        matches!(current_phase, Phase::Betting) && now_ms < phase_ends_at_ms
    }

    /// Check if the bet book is frozen.
    pub fn is_book_frozen(&self, current_phase: Phase) -> bool {
        current_phase >= Phase::Closed
    }

    /// Check if operator dice overrides are accepted.
    ///
    /// Overrides are accepted until the dice are resolved.
    pub fn can_override_dice(&self, current_phase: Phase) -> bool {
        matches!(current_phase, Phase::Betting | Phase::Closed)
    }

    /// Milliseconds until the current phase ends.
    pub fn remaining_ms(&self, phase_ends_at_ms: u64, now_ms: u64) -> u64 {
        phase_ends_at_ms.saturating_sub(now_ms)
    }

    /// Whole seconds until the current phase ends, rounded up so a client never
    /// sees zero while the phase is still open.
    pub fn remaining_seconds(&self, phase_ends_at_ms: u64, now_ms: u64) -> u64 {
        self.remaining_ms(phase_ends_at_ms, now_ms).div_ceil(1_000)
    }
}
