//! The round engine: one authoritative table.
//!
//! [`RoundEngine`] owns the current round, its bet book, the dice roller and
//! the archive. It is synchronous and does no I/O of its own beyond calls into
//! the [`Ledger`]; the caller serializes access (the live-table service runs
//! it behind a single mutation queue) and drives time through
//! [`RoundEngine::advance`].
//!
//! ## Settlement
//!
//! When CLOSED expires the dice are resolved once and settlements are computed
//! from one snapshot of the book. Every WIN credit of the round goes to the
//! ledger as a single [`Ledger::credit_all`] batch keyed by idempotency
//! references, so either every winner is paid or nobody is, and a failed batch
//! is retried on the next tick without double-crediting. The round only enters
//! RESULT once the batch is written. If settlement keeps failing past the
//! configured budget the round is voided: it enters RESULT with an error flag,
//! pays nothing and refunds every stake, leaving each bettor where they
//! started. Refunds the ledger refuses are queued and retried on later ticks.

use std::sync::Arc;

use rust_decimal::Decimal;
use sixdice_types::{
    api::{DiceMode, GameStats, HistoryEntry, LastRoundResults, ResetResponse, RoundSnapshot},
    Bet, BetOutcome, DiceFaces, Phase, RoundId, Transaction, TransactionKind, UserId,
};
use tracing::{error, info, warn};

use crate::bet_book::BetBook;
use crate::config::{ConfigError, EngineConfig};
use crate::dice::DiceRoller;
use crate::error::BetError;
use crate::history::{ArchivedRound, RoundArchive, SettledBet};
use crate::ledger::{Entry, Ledger, LedgerError};
use crate::payout::{self, Settlement};
use crate::round_scheduler::{RoundScheduler, TransitionResult};

/// Idempotency reference for a round-scoped ledger write.
pub fn settlement_reference(
    round_id: RoundId,
    user: &UserId,
    number: u8,
    kind: TransactionKind,
) -> String {
    format!(
        "round:{round_id}:{user}:{number}:{}",
        kind.as_str().to_ascii_lowercase()
    )
}

/// Mutable state of the round in play.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Round {
    pub id: RoundId,
    pub phase: Phase,
    pub opened_at_ms: u64,
    pub phase_ends_at_ms: u64,
    /// Set exactly once, when CLOSED expires.
    pub dice: Option<DiceFaces>,
    pub forced: bool,
    pub errored: bool,
}

impl Round {
    fn open(id: RoundId, now_ms: u64, phase_ends_at_ms: u64) -> Self {
        Self {
            id,
            phase: Phase::Waiting,
            opened_at_ms: now_ms,
            phase_ends_at_ms,
            dice: None,
            forced: false,
            errored: false,
        }
    }
}

/// What happened during a call to [`RoundEngine::advance`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    RoundStarted {
        round_id: RoundId,
    },
    PhaseChanged {
        round_id: RoundId,
        phase: Phase,
    },
    DiceResolved {
        round_id: RoundId,
        dice: DiceFaces,
        forced: bool,
    },
    SettlementRetry {
        round_id: RoundId,
        attempt: u32,
        error: LedgerError,
    },
    RoundVoided {
        round_id: RoundId,
        refunded: usize,
    },
    RoundArchived {
        round_id: RoundId,
        voided: bool,
    },
}

#[derive(Debug)]
struct Settling {
    settlements: Vec<Settlement>,
    attempts: u32,
    first_attempt_ms: u64,
}

impl Settling {
    /// The round's WIN credits, one per winning bet.
    fn wins(&self, now_ms: u64) -> Vec<Entry> {
        self.settlements
            .iter()
            .filter(|settlement| settlement.payout > Decimal::ZERO)
            .map(|settlement| {
                let bet = &settlement.bet;
                Entry::new(
                    bet.user.clone(),
                    settlement.payout,
                    TransactionKind::Win,
                    format!(
                        "Won on {} in round {} ({} matches)",
                        bet.number, bet.round_id, settlement.match_count
                    ),
                    now_ms,
                )
                .with_reference(settlement_reference(
                    bet.round_id,
                    &bet.user,
                    bet.number,
                    TransactionKind::Win,
                ))
            })
            .collect()
    }
}

pub struct RoundEngine {
    config: EngineConfig,
    scheduler: RoundScheduler,
    ledger: Arc<dyn Ledger>,
    roller: DiceRoller,
    round: Round,
    book: BetBook,
    dice_override: Option<DiceFaces>,
    settling: Option<Settling>,
    archived: bool,
    archive: RoundArchive,
    pending_refunds: Vec<Entry>,
}

impl RoundEngine {
    /// Open round 1 in WAITING at `now_ms`.
    pub fn new(
        config: EngineConfig,
        ledger: Arc<dyn Ledger>,
        now_ms: u64,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let scheduler = RoundScheduler::new(config.phases);
        let round = Round::open(1, now_ms, scheduler.new_round_timing(now_ms));
        info!(round_id = round.id, "round opened");
        Ok(Self {
            roller: DiceRoller::new(config.dice_seed),
            archive: RoundArchive::new(config.archive_retention),
            book: BetBook::new(round.id),
            scheduler,
            ledger,
            round,
            dice_override: None,
            settling: None,
            archived: false,
            pending_refunds: Vec::new(),
            config,
        })
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn round(&self) -> &Round {
        &self.round
    }

    pub fn dice_mode(&self) -> DiceMode {
        self.roller.mode()
    }

    /// Refunds from voided or reset rounds still waiting on the ledger.
    pub fn pending_refunds(&self) -> usize {
        self.pending_refunds.len()
    }

    /// Apply every transition due at `now_ms`. Calling it again with the same
    /// clock is a no-op.
    pub fn advance(&mut self, now_ms: u64) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while self.step(now_ms, &mut events) {}
        events
    }

    /// Apply the next transition due at `now_ms`, appending what happened to
    /// `events`. Returns `false` once nothing more is due or settlement has to
    /// wait for a retry. Callers that show every phase walk the round with
    /// this, one transition at a time, instead of [`RoundEngine::advance`].
    pub fn step(&mut self, now_ms: u64, events: &mut Vec<EngineEvent>) -> bool {
        self.retry_pending_refunds(now_ms);
        let transition = self.scheduler.check_transition(
            self.round.phase,
            self.round.phase_ends_at_ms,
            now_ms,
        );
        match transition {
            TransitionResult::NoTransition => false,
            TransitionResult::TransitionTo {
                phase: Phase::Result,
                phase_ends_at_ms,
            } => self.settle(now_ms, phase_ends_at_ms, events),
            TransitionResult::TransitionTo {
                phase,
                phase_ends_at_ms,
            } => {
                self.enter_phase(phase, phase_ends_at_ms, now_ms, events);
                true
            }
            TransitionResult::NewRound { phase_ends_at_ms } => {
                self.start_round(now_ms, phase_ends_at_ms, events);
                true
            }
        }
    }

    fn enter_phase(
        &mut self,
        phase: Phase,
        phase_ends_at_ms: u64,
        now_ms: u64,
        events: &mut Vec<EngineEvent>,
    ) {
        self.round.phase = phase;
        self.round.phase_ends_at_ms = phase_ends_at_ms;
        if self.scheduler.is_book_frozen(phase) {
            self.book.freeze();
        }
        info!(
            round_id = self.round.id,
            phase = %phase,
            bets = self.book.len(),
            "phase transition"
        );
        events.push(EngineEvent::PhaseChanged {
            round_id: self.round.id,
            phase,
        });
        if phase == Phase::Completed {
            let voided = self.round.errored;
            self.archive_round(now_ms, voided, events);
        }
    }

    fn start_round(&mut self, now_ms: u64, phase_ends_at_ms: u64, events: &mut Vec<EngineEvent>) {
        let id = self.round.id + 1;
        self.round = Round::open(id, now_ms, phase_ends_at_ms);
        self.book = BetBook::new(id);
        self.dice_override = None;
        self.settling = None;
        self.archived = false;
        info!(round_id = id, phase = %Phase::Waiting, "round opened");
        events.push(EngineEvent::RoundStarted { round_id: id });
    }

    /// Resolve dice (first call only) and try to commit the round's winning
    /// credits as one batch. Returns whether the round moved to RESULT.
    fn settle(
        &mut self,
        now_ms: u64,
        result_ends_at_ms: u64,
        events: &mut Vec<EngineEvent>,
    ) -> bool {
        if self.settling.is_none() {
            self.resolve_dice(now_ms, events);
        }
        let Some(settling) = self.settling.as_mut() else {
            return false;
        };

        settling.attempts += 1;
        let wins = settling.wins(now_ms);
        let committed = if wins.is_empty() {
            Ok(())
        } else {
            self.ledger.credit_all(wins).map(|_| ())
        };

        let attempt = settling.attempts;
        let elapsed_ms = now_ms.saturating_sub(settling.first_attempt_ms);
        let Err(err) = committed else {
            self.enter_result(result_ends_at_ms, events);
            return true;
        };

        let budget = self.config.settlement;
        if attempt >= budget.max_attempts || elapsed_ms >= budget.grace_ms {
            self.void_round(now_ms, result_ends_at_ms, &err, events);
            return true;
        }
        warn!(
            round_id = self.round.id,
            attempt,
            error = %err,
            "settlement failed, retrying"
        );
        events.push(EngineEvent::SettlementRetry {
            round_id: self.round.id,
            attempt,
            error: err,
        });
        false
    }

    fn resolve_dice(&mut self, now_ms: u64, events: &mut Vec<EngineEvent>) {
        let (resolution, fallback) = self.roller.resolve(self.dice_override.take());
        if fallback {
            warn!(round_id = self.round.id, "manual dice mode without override, rolled instead");
        }
        self.round.dice = Some(resolution.dice);
        self.round.forced = resolution.forced;
        let settlements = payout::settle(
            &resolution.dice,
            &self.book.snapshot(),
            self.config.rules.six_match,
        );
        info!(
            round_id = self.round.id,
            dice = ?resolution.dice.faces(),
            forced = resolution.forced,
            bets = settlements.len(),
            "dice resolved"
        );
        events.push(EngineEvent::DiceResolved {
            round_id: self.round.id,
            dice: resolution.dice,
            forced: resolution.forced,
        });
        self.settling = Some(Settling {
            settlements,
            attempts: 0,
            first_attempt_ms: now_ms,
        });
    }

    fn enter_result(&mut self, phase_ends_at_ms: u64, events: &mut Vec<EngineEvent>) {
        self.round.phase = Phase::Result;
        self.round.phase_ends_at_ms = phase_ends_at_ms;
        info!(
            round_id = self.round.id,
            phase = %Phase::Result,
            total = self.round.dice.map(|dice| dice.total()),
            errored = self.round.errored,
            "phase transition"
        );
        events.push(EngineEvent::PhaseChanged {
            round_id: self.round.id,
            phase: Phase::Result,
        });
    }

    fn void_round(
        &mut self,
        now_ms: u64,
        result_ends_at_ms: u64,
        err: &LedgerError,
        events: &mut Vec<EngineEvent>,
    ) {
        let refunded = self.refund_open_bets(now_ms);
        self.round.errored = true;
        error!(
            round_id = self.round.id,
            error = %err,
            refunded,
            "settlement budget exhausted, round voided"
        );
        events.push(EngineEvent::RoundVoided {
            round_id: self.round.id,
            refunded,
        });
        self.enter_result(result_ends_at_ms, events);
    }

    /// Refund the stake of every bet in the book. Only called before any WIN
    /// of the round has been written. Returns how many bets were refunded
    /// (including refunds queued for retry).
    fn refund_open_bets(&mut self, now_ms: u64) -> usize {
        let mut refunded = 0;
        for bet in self.book.snapshot() {
            let entry = Entry::new(
                bet.user.clone(),
                bet.amount,
                TransactionKind::Refund,
                format!("Refund for bet on {} in voided round {}", bet.number, bet.round_id),
                now_ms,
            )
            .with_reference(settlement_reference(
                bet.round_id,
                &bet.user,
                bet.number,
                TransactionKind::Refund,
            ));
            if let Err(err) = self.ledger.credit(entry.clone()) {
                warn!(
                    round_id = bet.round_id,
                    user = %bet.user,
                    number = bet.number,
                    error = %err,
                    "refund failed, queued for retry"
                );
                self.pending_refunds.push(entry);
            }
            refunded += 1;
        }
        refunded
    }

    fn retry_pending_refunds(&mut self, now_ms: u64) {
        if self.pending_refunds.is_empty() {
            return;
        }
        let ledger = Arc::clone(&self.ledger);
        self.pending_refunds.retain(|entry| match ledger.credit(entry.clone()) {
            Ok(_) => {
                info!(user = %entry.user, reference = ?entry.reference, now_ms, "queued refund applied");
                false
            }
            Err(_) => true,
        });
    }

    fn archive_round(&mut self, now_ms: u64, voided: bool, events: &mut Vec<EngineEvent>) {
        if self.archived {
            return;
        }
        let bets = match &self.settling {
            Some(settling) => settling
                .settlements
                .iter()
                .map(|settlement| SettledBet {
                    bet: settlement.bet.clone(),
                    match_count: settlement.match_count,
                    payout: if voided { Decimal::ZERO } else { settlement.payout },
                    outcome: if voided {
                        BetOutcome::Refunded
                    } else {
                        settlement.outcome()
                    },
                })
                .collect(),
            None => self
                .book
                .snapshot()
                .into_iter()
                .map(|bet| SettledBet {
                    bet,
                    match_count: 0,
                    payout: Decimal::ZERO,
                    outcome: BetOutcome::Refunded,
                })
                .collect(),
        };
        self.archive.push(ArchivedRound {
            round_id: self.round.id,
            dice: self.round.dice,
            forced: self.round.forced,
            voided,
            completed_at_ms: now_ms,
            bets,
        });
        self.archived = true;
        events.push(EngineEvent::RoundArchived {
            round_id: self.round.id,
            voided,
        });
    }

    /// Stake a bet for `user`. Succeeds only while the betting window is open
    /// by the engine's own clock, even if the tick closing it has not run yet.
    pub fn place_bet(
        &mut self,
        user: &UserId,
        number: u8,
        amount: Decimal,
        now_ms: u64,
    ) -> Result<Vec<Bet>, BetError> {
        self.ensure_betting_open(now_ms)?;
        let bet = self.book.place(
            self.ledger.as_ref(),
            user,
            number,
            amount,
            &self.config.rules,
            now_ms,
        )?;
        info!(
            round_id = bet.round_id,
            user = %user,
            number,
            amount = %bet.amount,
            "bet placed"
        );
        Ok(self.book.user_bets(user))
    }

    /// Withdraw a bet during BETTING, refunding its stake.
    pub fn remove_bet(
        &mut self,
        user: &UserId,
        number: u8,
        now_ms: u64,
    ) -> Result<(Bet, Transaction), BetError> {
        self.ensure_betting_open(now_ms)?;
        let (bet, transaction) = self.book.remove(self.ledger.as_ref(), user, number, now_ms)?;
        info!(
            round_id = bet.round_id,
            user = %user,
            number,
            amount = %bet.amount,
            "bet removed"
        );
        Ok((bet, transaction))
    }

    fn ensure_betting_open(&self, now_ms: u64) -> Result<(), BetError> {
        if self
            .scheduler
            .is_betting_open(self.round.phase, self.round.phase_ends_at_ms, now_ms)
        {
            return Ok(());
        }
        // A BETTING round past its deadline is already closed.
        let phase = match self.round.phase {
            Phase::Betting => Phase::Closed,
            phase => phase,
        };
        Err(BetError::InvalidPhase(phase))
    }

    /// Every bet of the round in play.
    pub fn bets(&self) -> Vec<Bet> {
        self.book.snapshot()
    }

    /// Bets of `user` in `round_id`; `None` means the round in play.
    pub fn list_bets(&self, user: &UserId, round_id: Option<RoundId>) -> Vec<Bet> {
        match round_id {
            None => self.book.user_bets(user),
            Some(id) if id == self.round.id => self.book.user_bets(user),
            Some(id) => self.archive.user_bets(user, id),
        }
    }

    pub fn snapshot(&self, now_ms: u64) -> RoundSnapshot {
        let dice = self.round.dice.filter(|_| self.round.phase.has_dice());
        RoundSnapshot {
            round_id: self.round.id,
            phase: self.round.phase,
            remaining_seconds: self
                .scheduler
                .remaining_seconds(self.round.phase_ends_at_ms, now_ms),
            phase_ends_at_ms: self.round.phase_ends_at_ms,
            dice,
            total: dice.map(|dice| dice.total()),
            errored: self.round.errored,
        }
    }

    pub fn last_result(&self) -> Option<LastRoundResults> {
        self.archive.latest().map(ArchivedRound::last_result)
    }

    pub fn betting_history(&self, user: &UserId, limit: Option<usize>) -> Vec<HistoryEntry> {
        self.archive.betting_history(user, limit)
    }

    pub fn stats(&self) -> GameStats {
        self.archive.stats()
    }

    /// Operator override of the current round's dice. Accepted until the dice
    /// are resolved; a later call replaces an earlier one.
    pub fn set_dice(&mut self, dice: DiceFaces) -> Result<(), BetError> {
        if !self.scheduler.can_override_dice(self.round.phase) || self.settling.is_some() {
            return Err(BetError::InvalidPhase(self.round.phase));
        }
        warn!(
            round_id = self.round.id,
            phase = %self.round.phase,
            dice = ?dice.faces(),
            "operator dice override"
        );
        self.dice_override = Some(dice);
        Ok(())
    }

    pub fn set_dice_mode(&mut self, mode: DiceMode) {
        info!(round_id = self.round.id, ?mode, "dice mode changed");
        self.roller.set_mode(mode);
    }

    /// Abort the round in play, refund its open bets and open a new round in
    /// WAITING. A round already past settlement is archived as it stands.
    pub fn reset(&mut self, now_ms: u64) -> ResetResponse {
        let aborted_round_id = self.round.id;
        let mut refunded_bets = 0;
        let mut events = Vec::new();
        if self.round.phase < Phase::Result {
            refunded_bets = self.refund_open_bets(now_ms);
            self.archive_round(now_ms, true, &mut events);
        } else {
            let voided = self.round.errored;
            self.archive_round(now_ms, voided, &mut events);
        }
        warn!(
            round_id = aborted_round_id,
            phase = %self.round.phase,
            refunded_bets,
            "operator reset"
        );
        let phase_ends_at_ms = self.scheduler.new_round_timing(now_ms);
        self.start_round(now_ms, phase_ends_at_ms, &mut events);
        ResetResponse {
            aborted_round_id,
            refunded_bets,
            round_id: self.round.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SettlementConfig, TableRules};
    use crate::ledger::{HistoryFilter, InMemoryLedger};
    use crate::mocks::FlakyLedger;
    use crate::payout::SixMatchPolicy;
    use crate::round_scheduler::PhaseConfig;
    use rust_decimal_macros::dec;

    // waiting 5s, betting 30s, closed 21s, result 20s, completed 1s
    const BETTING_AT: u64 = 5_000;
    const CLOSED_AT: u64 = 35_000;
    const RESULT_AT: u64 = 56_000;
    const COMPLETED_AT: u64 = 76_000;
    const NEXT_ROUND_AT: u64 = 77_000;

    fn config() -> EngineConfig {
        EngineConfig::new(
            PhaseConfig::default(),
            TableRules::default(),
            SettlementConfig::default(),
        )
    }

    fn fund(ledger: &dyn Ledger, user: &str, amount: Decimal) {
        ledger
            .credit(Entry::new(
                UserId::from(user),
                amount,
                TransactionKind::Deposit,
                "deposit",
                0,
            ))
            .unwrap();
    }

    fn engine_with(ledger: Arc<dyn Ledger>, config: EngineConfig) -> RoundEngine {
        RoundEngine::new(config, ledger, 0).unwrap()
    }

    fn betting_engine() -> (RoundEngine, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::new());
        fund(ledger.as_ref(), "alice", dec!(1000));
        fund(ledger.as_ref(), "bob", dec!(200));
        let mut engine = engine_with(ledger.clone(), config());
        engine.advance(BETTING_AT);
        assert_eq!(engine.round().phase, Phase::Betting);
        (engine, ledger)
    }

    fn alice() -> UserId {
        UserId::from("alice")
    }

    fn bob() -> UserId {
        UserId::from("bob")
    }

    fn dice(faces: [u8; 6]) -> DiceFaces {
        DiceFaces::new(faces).unwrap()
    }

    #[test]
    fn test_starts_waiting_in_round_one() {
        let engine = engine_with(Arc::new(InMemoryLedger::new()), config());
        let snapshot = engine.snapshot(1_000);
        assert_eq!(snapshot.round_id, 1);
        assert_eq!(snapshot.phase, Phase::Waiting);
        assert_eq!(snapshot.remaining_seconds, 4);
        assert!(snapshot.dice.is_none());
        assert!(engine.last_result().is_none());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = config();
        config.phases.closed_ms = 0;
        assert!(RoundEngine::new(config, Arc::new(InMemoryLedger::new()), 0).is_err());
    }

    #[test]
    fn test_advance_is_idempotent() {
        let mut engine = engine_with(Arc::new(InMemoryLedger::new()), config());
        assert!(engine.advance(4_999).is_empty());
        assert_eq!(
            engine.advance(BETTING_AT),
            vec![EngineEvent::PhaseChanged {
                round_id: 1,
                phase: Phase::Betting
            }]
        );
        assert!(engine.advance(BETTING_AT).is_empty());
        assert!(engine.advance(BETTING_AT + 100).is_empty());
        assert_eq!(engine.round().phase, Phase::Betting);
    }

    #[test]
    fn test_full_round_pays_winners_once() {
        let (mut engine, ledger) = betting_engine();
        engine.place_bet(&alice(), 3, dec!(100), 6_000).unwrap();
        engine.place_bet(&bob(), 4, dec!(50), 6_000).unwrap();
        assert_eq!(ledger.balance(&alice()), dec!(900));
        assert_eq!(ledger.balance(&bob()), dec!(150));
        engine.set_dice(dice([3, 3, 3, 1, 2, 5])).unwrap();

        engine.advance(CLOSED_AT);
        assert_eq!(engine.round().phase, Phase::Closed);
        assert!(engine.snapshot(CLOSED_AT).dice.is_none());

        let events = engine.advance(RESULT_AT);
        assert!(events.contains(&EngineEvent::DiceResolved {
            round_id: 1,
            dice: dice([3, 3, 3, 1, 2, 5]),
            forced: true,
        }));
        let snapshot = engine.snapshot(RESULT_AT);
        assert_eq!(snapshot.phase, Phase::Result);
        assert_eq!(snapshot.dice, Some(dice([3, 3, 3, 1, 2, 5])));
        assert_eq!(snapshot.total, Some(17));
        assert_eq!(ledger.balance(&alice()), dec!(1500));
        assert_eq!(ledger.balance(&bob()), dec!(150));

        // A losing bet writes nothing.
        let bob_kinds: Vec<_> = ledger
            .history(&bob(), &HistoryFilter::default())
            .iter()
            .map(|tx| tx.kind)
            .collect();
        assert_eq!(bob_kinds, vec![TransactionKind::Bet, TransactionKind::Deposit]);

        // Repeated ticks never settle again.
        engine.advance(RESULT_AT + 1);
        engine.advance(COMPLETED_AT);
        assert_eq!(ledger.balance(&alice()), dec!(1500));
        let wins = ledger.history(
            &alice(),
            &HistoryFilter {
                kind: Some(TransactionKind::Win),
                ..Default::default()
            },
        );
        assert_eq!(wins.len(), 1);
        assert_eq!(wins[0].amount, dec!(600));
    }

    #[test]
    fn test_round_cycles_into_next_waiting() {
        let (mut engine, _ledger) = betting_engine();
        engine.advance(CLOSED_AT);
        engine.advance(RESULT_AT);
        let events = engine.advance(COMPLETED_AT);
        assert!(events.contains(&EngineEvent::RoundArchived {
            round_id: 1,
            voided: false
        }));
        let last = engine.last_result().unwrap();
        assert_eq!(last.round_id, 1);
        assert!(last.dice.is_some());

        let events = engine.advance(NEXT_ROUND_AT);
        assert_eq!(events, vec![EngineEvent::RoundStarted { round_id: 2 }]);
        let snapshot = engine.snapshot(NEXT_ROUND_AT);
        assert_eq!(snapshot.round_id, 2);
        assert_eq!(snapshot.phase, Phase::Waiting);
        assert!(snapshot.dice.is_none());
    }

    #[test]
    fn test_bets_outside_betting_never_debit() {
        let ledger = Arc::new(InMemoryLedger::new());
        fund(ledger.as_ref(), "alice", dec!(100));
        let mut engine = engine_with(ledger.clone(), config());

        assert_eq!(
            engine.place_bet(&alice(), 1, dec!(10), 100),
            Err(BetError::InvalidPhase(Phase::Waiting))
        );
        engine.advance(BETTING_AT);
        engine.advance(CLOSED_AT);
        assert_eq!(
            engine.place_bet(&alice(), 1, dec!(10), CLOSED_AT + 1),
            Err(BetError::InvalidPhase(Phase::Closed))
        );
        assert_eq!(ledger.balance(&alice()), dec!(100));
    }

    #[test]
    fn test_bet_at_deadline_before_tick_is_rejected() {
        let (mut engine, ledger) = betting_engine();
        engine.place_bet(&alice(), 2, dec!(10), CLOSED_AT - 1).unwrap();
        // The closing tick has not run yet, but the window has elapsed.
        assert_eq!(
            engine.place_bet(&alice(), 3, dec!(10), CLOSED_AT),
            Err(BetError::InvalidPhase(Phase::Closed))
        );
        assert!(matches!(
            engine.remove_bet(&alice(), 2, CLOSED_AT),
            Err(BetError::InvalidPhase(Phase::Closed))
        ));
        assert_eq!(ledger.balance(&alice()), dec!(990));
    }

    #[test]
    fn test_insufficient_funds_leaves_balance() {
        let ledger = Arc::new(InMemoryLedger::new());
        fund(ledger.as_ref(), "carol", dec!(40));
        let mut engine = engine_with(ledger.clone(), config());
        engine.advance(BETTING_AT);

        let carol = UserId::from("carol");
        let err = engine.place_bet(&carol, 5, dec!(50), 6_000).unwrap_err();
        assert_eq!(err.kind(), sixdice_types::ErrorKind::InsufficientFunds);
        assert_eq!(ledger.balance(&carol), dec!(40));
        assert!(engine.list_bets(&carol, None).is_empty());
    }

    #[test]
    fn test_remove_bet_refunds_stake() {
        let (mut engine, ledger) = betting_engine();
        let bets = engine.place_bet(&alice(), 6, dec!(75.50), 6_000).unwrap();
        assert_eq!(bets.len(), 1);

        let (bet, tx) = engine.remove_bet(&alice(), 6, 7_000).unwrap();
        assert_eq!(bet.amount, dec!(75.50));
        assert_eq!(tx.kind, TransactionKind::Refund);
        assert_eq!(ledger.balance(&alice()), dec!(1000));
        assert_eq!(
            engine.remove_bet(&alice(), 6, 7_000),
            Err(BetError::NotFound(6))
        );
    }

    #[test]
    fn test_list_bets_by_round() {
        let (mut engine, _ledger) = betting_engine();
        engine.place_bet(&alice(), 1, dec!(10), 6_000).unwrap();
        engine.place_bet(&alice(), 2, dec!(10), 6_000).unwrap();
        assert_eq!(engine.list_bets(&alice(), Some(1)).len(), 2);
        assert!(engine.list_bets(&bob(), Some(1)).is_empty());

        engine.advance(CLOSED_AT);
        engine.advance(RESULT_AT);
        engine.advance(COMPLETED_AT);
        engine.advance(NEXT_ROUND_AT);
        assert!(engine.list_bets(&alice(), None).is_empty());
        assert_eq!(engine.list_bets(&alice(), Some(1)).len(), 2);
        assert!(engine.list_bets(&alice(), Some(99)).is_empty());
    }

    #[test]
    fn test_set_dice_window() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut engine = engine_with(ledger, config());
        let forced = dice([6, 6, 6, 6, 6, 6]);
        assert_eq!(
            engine.set_dice(forced),
            Err(BetError::InvalidPhase(Phase::Waiting))
        );
        engine.advance(BETTING_AT);
        engine.set_dice(dice([1, 1, 1, 1, 1, 1])).unwrap();
        engine.advance(CLOSED_AT);
        // Still accepted in CLOSED and replaces the earlier override.
        engine.set_dice(forced).unwrap();
        engine.advance(RESULT_AT);
        assert_eq!(engine.round().dice, Some(forced));
        assert!(engine.round().forced);
        assert_eq!(
            engine.set_dice(forced),
            Err(BetError::InvalidPhase(Phase::Result))
        );
    }

    #[test]
    fn test_manual_mode_without_override_still_resolves() {
        let mut engine = engine_with(Arc::new(InMemoryLedger::new()), config());
        engine.set_dice_mode(DiceMode::Manual);
        assert_eq!(engine.dice_mode(), DiceMode::Manual);
        engine.advance(BETTING_AT);
        engine.advance(CLOSED_AT);
        engine.advance(RESULT_AT);
        assert_eq!(engine.round().phase, Phase::Result);
        assert!(engine.round().dice.is_some());
        assert!(!engine.round().forced);
    }

    #[test]
    fn test_seeded_dice_are_reproducible() {
        let mut config = config();
        config.dice_seed = Some(99);
        let mut a = engine_with(Arc::new(InMemoryLedger::new()), config.clone());
        let mut b = engine_with(Arc::new(InMemoryLedger::new()), config);
        for engine in [&mut a, &mut b] {
            engine.advance(BETTING_AT);
            engine.advance(CLOSED_AT);
            engine.advance(RESULT_AT);
        }
        assert_eq!(a.round().dice, b.round().dice);
    }

    #[test]
    fn test_settlement_retries_then_succeeds() {
        let ledger = Arc::new(FlakyLedger::new());
        fund(ledger.as_ref(), "alice", dec!(1000));
        let mut engine = engine_with(ledger.clone(), config());
        engine.advance(BETTING_AT);
        engine.place_bet(&alice(), 3, dec!(100), 6_000).unwrap();
        engine.set_dice(dice([3, 3, 3, 1, 2, 5])).unwrap();
        engine.advance(CLOSED_AT);

        ledger.fail_next_credits(2);
        let events = engine.advance(RESULT_AT);
        assert!(matches!(
            events.last(),
            Some(EngineEvent::SettlementRetry { attempt: 1, .. })
        ));
        assert_eq!(engine.round().phase, Phase::Closed);
        assert!(engine.snapshot(RESULT_AT).dice.is_none());

        engine.advance(RESULT_AT + 250);
        assert_eq!(engine.round().phase, Phase::Closed);
        engine.advance(RESULT_AT + 500);
        assert_eq!(engine.round().phase, Phase::Result);
        assert!(!engine.round().errored);
        assert_eq!(ledger.balance(&alice()), dec!(1500));

        // Dice were resolved once, on the first attempt.
        assert_eq!(engine.round().dice, Some(dice([3, 3, 3, 1, 2, 5])));
    }

    #[test]
    fn test_exhausted_settlement_voids_and_refunds() {
        let ledger = Arc::new(FlakyLedger::new());
        fund(ledger.as_ref(), "alice", dec!(1000));
        fund(ledger.as_ref(), "bob", dec!(200));
        let mut config = config();
        config.settlement = SettlementConfig {
            max_attempts: 3,
            grace_ms: 60_000,
        };
        let mut engine = engine_with(ledger.clone(), config);
        engine.advance(BETTING_AT);
        engine.place_bet(&alice(), 3, dec!(100), 6_000).unwrap();
        engine.place_bet(&bob(), 4, dec!(50), 6_000).unwrap();
        engine.set_dice(dice([3, 3, 3, 1, 2, 5])).unwrap();
        engine.advance(CLOSED_AT);

        ledger.fail_next_credits(3);
        engine.advance(RESULT_AT);
        engine.advance(RESULT_AT + 250);
        let events = engine.advance(RESULT_AT + 500);
        assert!(events.contains(&EngineEvent::RoundVoided {
            round_id: 1,
            refunded: 2
        }));

        let snapshot = engine.snapshot(RESULT_AT + 500);
        assert_eq!(snapshot.phase, Phase::Result);
        assert!(snapshot.errored);
        assert!(snapshot.dice.is_some());
        assert_eq!(ledger.balance(&alice()), dec!(1000));
        assert_eq!(ledger.balance(&bob()), dec!(200));
        assert!(ledger
            .history(
                &alice(),
                &HistoryFilter {
                    kind: Some(TransactionKind::Win),
                    ..Default::default()
                }
            )
            .is_empty());

        engine.advance(COMPLETED_AT + 500);
        let last = engine.last_result().unwrap();
        assert!(last.voided);
        let history = engine.betting_history(&alice(), None);
        assert_eq!(history[0].outcome, BetOutcome::Refunded);
        assert_eq!(history[0].payout, Decimal::ZERO);
        let stats = engine.stats();
        assert_eq!(stats.rounds_voided, 1);
        assert_eq!(stats.total_wagered, Decimal::ZERO);
    }

    #[test]
    fn test_grace_period_bounds_retries() {
        let ledger = Arc::new(FlakyLedger::new());
        fund(ledger.as_ref(), "alice", dec!(1000));
        let mut config = config();
        config.settlement = SettlementConfig {
            max_attempts: 100,
            grace_ms: 1_000,
        };
        let mut engine = engine_with(ledger.clone(), config);
        engine.advance(BETTING_AT);
        engine.place_bet(&alice(), 3, dec!(100), 6_000).unwrap();
        engine.set_dice(dice([3, 3, 3, 1, 2, 5])).unwrap();
        engine.advance(CLOSED_AT);

        ledger.fail_next_credits(u32::MAX);
        engine.advance(RESULT_AT);
        engine.advance(RESULT_AT + 500);
        assert_eq!(engine.round().phase, Phase::Closed);
        engine.advance(RESULT_AT + 1_000);
        assert_eq!(engine.round().phase, Phase::Result);
        assert!(engine.round().errored);

        // The refund could not be written either; it is retried once healed.
        assert_eq!(engine.pending_refunds(), 1);
        assert_eq!(ledger.balance(&alice()), dec!(900));
        ledger.fail_next_credits(0);
        engine.advance(RESULT_AT + 1_250);
        assert_eq!(engine.pending_refunds(), 0);
        assert_eq!(ledger.balance(&alice()), dec!(1000));
        engine.advance(RESULT_AT + 1_500);
        assert_eq!(ledger.balance(&alice()), dec!(1000));
    }

    #[test]
    fn test_voided_round_pays_no_winner() {
        let ledger = Arc::new(FlakyLedger::new());
        fund(ledger.as_ref(), "alice", dec!(100));
        fund(ledger.as_ref(), "bob", dec!(100));
        let mut config = config();
        config.settlement = SettlementConfig {
            max_attempts: 1,
            grace_ms: 60_000,
        };
        let mut engine = engine_with(ledger.clone(), config);
        engine.advance(BETTING_AT);
        engine.place_bet(&alice(), 3, dec!(20), 6_000).unwrap();
        engine.place_bet(&bob(), 3, dec!(30), 6_000).unwrap();
        engine.set_dice(dice([3, 1, 1, 1, 1, 1])).unwrap();
        engine.advance(CLOSED_AT);

        // Alice's wallet is reachable, Bob's is not.
        ledger.refuse_credits_for(bob());
        engine.advance(RESULT_AT);
        assert_eq!(engine.round().phase, Phase::Result);
        assert!(engine.round().errored);
        assert_eq!(ledger.balance(&alice()), dec!(100));
        assert!(ledger
            .history(
                &alice(),
                &HistoryFilter {
                    kind: Some(TransactionKind::Win),
                    ..Default::default()
                }
            )
            .is_empty());

        // Bob's refund waits for his wallet to come back.
        assert_eq!(engine.pending_refunds(), 1);
        assert_eq!(ledger.balance(&bob()), dec!(70));
        ledger.heal();
        engine.advance(RESULT_AT + 250);
        assert_eq!(engine.pending_refunds(), 0);
        assert_eq!(ledger.balance(&bob()), dec!(100));

        engine.advance(COMPLETED_AT);
        for user in [alice(), bob()] {
            let history = engine.betting_history(&user, None);
            assert_eq!(history[0].outcome, BetOutcome::Refunded);
            assert_eq!(history[0].payout, Decimal::ZERO);
        }
    }

    #[test]
    fn test_step_applies_one_transition_at_a_time() {
        let mut config = config();
        config.phases.waiting_ms = 0;
        config.phases.result_ms = 0;
        config.phases.completed_ms = 0;
        let mut engine = engine_with(Arc::new(InMemoryLedger::new()), config);
        engine.advance(0);
        assert_eq!(engine.round().phase, Phase::Betting);
        engine.advance(30_000);
        assert_eq!(engine.round().phase, Phase::Closed);

        let mut events = Vec::new();
        let mut walked = Vec::new();
        while engine.step(51_000, &mut events) {
            walked.push((engine.round().id, engine.round().phase));
        }
        assert_eq!(
            walked,
            vec![
                (1, Phase::Result),
                (1, Phase::Completed),
                (2, Phase::Waiting),
                (2, Phase::Betting),
            ]
        );
        assert!(events.contains(&EngineEvent::RoundArchived {
            round_id: 1,
            voided: false
        }));
        assert!(!engine.step(51_000, &mut events));
    }

    #[test]
    fn test_reset_refunds_and_opens_new_round() {
        let (mut engine, ledger) = betting_engine();
        engine.place_bet(&alice(), 1, dec!(10), 6_000).unwrap();
        engine.place_bet(&alice(), 2, dec!(20), 6_000).unwrap();
        engine.place_bet(&bob(), 2, dec!(30), 6_000).unwrap();

        let reset = engine.reset(10_000);
        assert_eq!(
            reset,
            ResetResponse {
                aborted_round_id: 1,
                refunded_bets: 3,
                round_id: 2
            }
        );
        assert_eq!(ledger.balance(&alice()), dec!(1000));
        assert_eq!(ledger.balance(&bob()), dec!(200));

        let snapshot = engine.snapshot(10_000);
        assert_eq!(snapshot.round_id, 2);
        assert_eq!(snapshot.phase, Phase::Waiting);
        assert_eq!(snapshot.remaining_seconds, 5);
        let last = engine.last_result().unwrap();
        assert_eq!(last.round_id, 1);
        assert!(last.voided);
        assert!(last.dice.is_none());
    }

    #[test]
    fn test_reset_after_result_keeps_payouts() {
        let (mut engine, ledger) = betting_engine();
        engine.place_bet(&alice(), 3, dec!(100), 6_000).unwrap();
        engine.set_dice(dice([3, 3, 3, 1, 2, 5])).unwrap();
        engine.advance(CLOSED_AT);
        engine.advance(RESULT_AT);

        let reset = engine.reset(RESULT_AT + 1_000);
        assert_eq!(reset.refunded_bets, 0);
        assert_eq!(ledger.balance(&alice()), dec!(1500));
        let last = engine.last_result().unwrap();
        assert!(!last.voided);
        assert_eq!(last.total, Some(17));
    }

    #[test]
    fn test_jackpot_policy_applies_to_six_matches() {
        let ledger = Arc::new(InMemoryLedger::new());
        fund(ledger.as_ref(), "alice", dec!(100));
        let mut config = config();
        config.rules.six_match = SixMatchPolicy::Jackpot(100);
        let mut engine = engine_with(ledger.clone(), config);
        engine.advance(BETTING_AT);
        engine.place_bet(&alice(), 6, dec!(10), 6_000).unwrap();
        engine.set_dice(dice([6, 6, 6, 6, 6, 6])).unwrap();
        engine.advance(CLOSED_AT);
        engine.advance(RESULT_AT);
        assert_eq!(ledger.balance(&alice()), dec!(1090));
    }

    #[test]
    fn test_history_and_stats_after_completion() {
        let (mut engine, _ledger) = betting_engine();
        engine.place_bet(&alice(), 3, dec!(100), 6_000).unwrap();
        engine.place_bet(&alice(), 4, dec!(50), 6_000).unwrap();
        engine.set_dice(dice([3, 3, 3, 1, 2, 5])).unwrap();
        engine.advance(CLOSED_AT);
        engine.advance(RESULT_AT);
        engine.advance(COMPLETED_AT);

        let history = engine.betting_history(&alice(), None);
        assert_eq!(history.len(), 2);
        let win = history.iter().find(|entry| entry.number == 3).unwrap();
        assert_eq!(win.match_count, 3);
        assert_eq!(win.payout, dec!(600));
        assert_eq!(win.outcome, BetOutcome::Win);

        let stats = engine.stats();
        assert_eq!(stats.rounds_completed, 1);
        assert_eq!(stats.total_wagered, dec!(150));
        assert_eq!(stats.total_paid, dec!(600));
        assert_eq!(stats.face_counts, [1, 1, 3, 0, 1, 0]);
    }

    #[test]
    fn test_settlement_reference_format() {
        assert_eq!(
            settlement_reference(7, &alice(), 3, TransactionKind::Win),
            "round:7:alice:3:win"
        );
    }
}
