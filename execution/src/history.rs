//! Archive of finished rounds.
//!
//! Once a round leaves RESULT its bets become read-only history. The archive
//! keeps the most recent `retention` rounds and answers last-result, betting
//! history and stats queries from them.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use sixdice_types::{
    api::{GameStats, HistoryEntry, LastRoundResults},
    Bet, BetOutcome, DiceFaces, RoundId, UserId,
};

/// Final state of one bet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettledBet {
    pub bet: Bet,
    pub match_count: u8,
    pub payout: Decimal,
    pub outcome: BetOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchivedRound {
    pub round_id: RoundId,
    /// Absent when the round was aborted before resolution.
    pub dice: Option<DiceFaces>,
    pub forced: bool,
    pub voided: bool,
    pub completed_at_ms: u64,
    pub bets: Vec<SettledBet>,
}

impl ArchivedRound {
    pub fn last_result(&self) -> LastRoundResults {
        LastRoundResults {
            round_id: self.round_id,
            dice: self.dice,
            total: self.dice.map(|dice| dice.total()),
            voided: self.voided,
            completed_at_ms: self.completed_at_ms,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RoundArchive {
    retention: usize,
    rounds: VecDeque<ArchivedRound>,
}

impl RoundArchive {
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            rounds: VecDeque::new(),
        }
    }

    pub fn push(&mut self, round: ArchivedRound) {
        if self.rounds.len() == self.retention {
            self.rounds.pop_front();
        }
        self.rounds.push_back(round);
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub fn latest(&self) -> Option<&ArchivedRound> {
        self.rounds.back()
    }

    pub fn get(&self, round_id: RoundId) -> Option<&ArchivedRound> {
        self.rounds.iter().rev().find(|round| round.round_id == round_id)
    }

    /// The user's bets in `round_id`, if that round is still retained.
    pub fn user_bets(&self, user: &UserId, round_id: RoundId) -> Vec<Bet> {
        self.get(round_id)
            .map(|round| {
                round
                    .bets
                    .iter()
                    .filter(|settled| &settled.bet.user == user)
                    .map(|settled| settled.bet.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Settled bets of `user`, newest round first.
    pub fn betting_history(&self, user: &UserId, limit: Option<usize>) -> Vec<HistoryEntry> {
        self.rounds
            .iter()
            .rev()
            .flat_map(|round| {
                round
                    .bets
                    .iter()
                    .filter(move |settled| &settled.bet.user == user)
                    .map(move |settled| HistoryEntry {
                        round_id: round.round_id,
                        number: settled.bet.number,
                        amount: settled.bet.amount,
                        match_count: settled.match_count,
                        payout: settled.payout,
                        outcome: settled.outcome,
                        settled_at_ms: round.completed_at_ms,
                    })
            })
            .take(limit.unwrap_or(usize::MAX))
            .collect()
    }

    pub fn stats(&self) -> GameStats {
        let mut stats = GameStats::default();
        for round in &self.rounds {
            if round.voided {
                stats.rounds_voided += 1;
            } else {
                stats.rounds_completed += 1;
            }
            if let Some(dice) = round.dice {
                for face in dice.faces() {
                    stats.face_counts[(face - 1) as usize] += 1;
                }
            }
            for settled in &round.bets {
                // Refunded stakes never left the player.
                if settled.outcome == BetOutcome::Refunded {
                    continue;
                }
                stats.total_wagered += settled.bet.amount;
                stats.total_paid += settled.payout;
            }
        }
        stats
    }
}
