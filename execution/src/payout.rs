//! Payout rules.
//!
//! A bet on `n` pays `stake × multiplier(k)` where `k` is how many of the six
//! dice show `n`:
//!
//! | matches | multiplier |
//! |---------|------------|
//! | 0       | 0          |
//! | 1       | 2          |
//! | 2       | 4          |
//! | 3       | 6          |
//! | 4       | 8          |
//! | 5       | 10         |
//! | 6       | see [`SixMatchPolicy`] |
//!
//! The payout is the full return (stake included). The stake was debited when
//! the bet was placed, so a losing bet needs no ledger write at all.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sixdice_types::{Bet, BetOutcome, DiceFaces, AMOUNT_SCALE, DICE_PER_ROUND, MATCH_MULTIPLIERS};

/// What six matching dice pay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy", content = "multiplier")]
pub enum SixMatchPolicy {
    /// Six matches pay nothing.
    Zero,
    /// Six matches pay the five-match multiplier.
    #[default]
    TopTier,
    /// Six matches pay a configured multiplier.
    Jackpot(u32),
}

impl std::str::FromStr for SixMatchPolicy {
    type Err = String;

    /// Accepts `zero`, `top-tier` or `jackpot:<multiplier>`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_ascii_lowercase();
        match value.as_str() {
            "zero" => Ok(SixMatchPolicy::Zero),
            "top-tier" | "top_tier" => Ok(SixMatchPolicy::TopTier),
            other => {
                let multiplier = other
                    .strip_prefix("jackpot:")
                    .ok_or_else(|| format!("unknown six-match policy: {other}"))?;
                multiplier
                    .parse::<u32>()
                    .map(SixMatchPolicy::Jackpot)
                    .map_err(|_| format!("invalid jackpot multiplier: {multiplier}"))
            }
        }
    }
}

/// Multiplier for `match_count` dice showing the bet number.
pub fn multiplier(match_count: usize, policy: SixMatchPolicy) -> u32 {
    match match_count {
        DICE_PER_ROUND => match policy {
            SixMatchPolicy::Zero => 0,
            SixMatchPolicy::TopTier => MATCH_MULTIPLIERS[DICE_PER_ROUND - 1],
            SixMatchPolicy::Jackpot(multiplier) => multiplier,
        },
        k if k < DICE_PER_ROUND => MATCH_MULTIPLIERS[k],
        _ => 0,
    }
}

/// Round to minor units, half to even.
pub fn round_amount(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Full return for `stake` at `multiplier`.
pub fn payout(stake: Decimal, multiplier: u32) -> Decimal {
    round_amount(stake * Decimal::from(multiplier))
}

/// Resolution of a single bet against the round's dice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settlement {
    pub bet: Bet,
    pub match_count: u8,
    pub multiplier: u32,
    pub payout: Decimal,
}

impl Settlement {
    pub fn outcome(&self) -> BetOutcome {
        if self.payout > Decimal::ZERO {
            BetOutcome::Win
        } else {
            BetOutcome::Lose
        }
    }
}

/// Compute settlements for every bet in `bets`.
///
/// The result is a pure function of `dice` and `bets`, so calling it again
/// for a retry yields identical amounts.
pub fn settle(dice: &DiceFaces, bets: &[Bet], policy: SixMatchPolicy) -> Vec<Settlement> {
    bets.iter()
        .map(|bet| {
            let match_count = dice.count(bet.number);
            let multiplier = multiplier(match_count, policy);
            Settlement {
                bet: bet.clone(),
                match_count: match_count as u8,
                multiplier,
                payout: payout(bet.amount, multiplier),
            }
        })
        .collect()
}
