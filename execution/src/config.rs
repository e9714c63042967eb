use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sixdice_types::normalize_amount;
use thiserror::Error as ThisError;

use crate::payout::SixMatchPolicy;
use crate::round_scheduler::PhaseConfig;

#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ConfigError {
    #[error("invalid phase timing: {0}")]
    Phases(&'static str),
    #[error("invalid bet limits (min={min}, max={max})")]
    BetLimits { min: Decimal, max: Decimal },
    #[error("settlement max_attempts must be greater than zero")]
    SettlementAttempts,
    #[error("archive retention must be greater than zero")]
    ArchiveRetention,
}

/// Stake limits and payout policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRules {
    pub min_bet: Decimal,
    pub max_bet: Decimal,
    pub six_match: SixMatchPolicy,
}

impl Default for TableRules {
    fn default() -> Self {
        Self {
            min_bet: Decimal::ONE,
            max_bet: Decimal::from(10_000),
            six_match: SixMatchPolicy::default(),
        }
    }
}

impl TableRules {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = ConfigError::BetLimits {
            min: self.min_bet,
            max: self.max_bet,
        };
        if normalize_amount(self.min_bet).is_none() || normalize_amount(self.max_bet).is_none() {
            return Err(limits);
        }
        if self.min_bet > self.max_bet {
            return Err(limits);
        }
        Ok(())
    }

    pub fn within_limits(&self, amount: Decimal) -> bool {
        amount >= self.min_bet && amount <= self.max_bet
    }
}

/// Bounds on settlement retries before a round is voided.
///
/// A round stays in CLOSED while settlement is retried on each tick. It is
/// voided once `max_attempts` attempts have failed or `grace_ms` has elapsed
/// since the first attempt, whichever comes first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementConfig {
    pub max_attempts: u32,
    pub grace_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            grace_ms: 10_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub phases: PhaseConfig,
    pub rules: TableRules,
    pub settlement: SettlementConfig,
    /// Completed rounds kept for results, history and stats.
    pub archive_retention: usize,
    /// Fixed RNG seed for reproducible dice.
    pub dice_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(
            PhaseConfig::default(),
            TableRules::default(),
            SettlementConfig::default(),
        )
    }
}

impl EngineConfig {
    pub const DEFAULT_ARCHIVE_RETENTION: usize = 500;

    pub fn new(phases: PhaseConfig, rules: TableRules, settlement: SettlementConfig) -> Self {
        Self {
            phases,
            rules,
            settlement,
            archive_retention: Self::DEFAULT_ARCHIVE_RETENTION,
            dice_seed: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.phases.validate().map_err(ConfigError::Phases)?;
        self.rules.validate()?;
        if self.settlement.max_attempts == 0 {
            return Err(ConfigError::SettlementAttempts);
        }
        if self.archive_retention == 0 {
            return Err(ConfigError::ArchiveRetention);
        }
        Ok(())
    }
}
