//! The table actor.
//!
//! One task owns the [`RoundEngine`]. Timer ticks and every request that
//! touches the round go through its mailbox and are applied one at a time, so
//! a bet racing the BETTING deadline lands wholly before or wholly after the
//! transition. After each state change, and after each phase transition
//! within one tick, the actor publishes a fresh frame to the [`Broadcaster`]
//! before taking the next message.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use sixdice_execution::{BetError, Ledger, RoundEngine};
use sixdice_types::{
    api::{
        BetsResponse, BetView, DiceMode, GameStats, HistoryEntry, LastRoundResults,
        RemoveBetResponse, ResetResponse,
    },
    Bet, DiceFaces, ErrorKind, RoundId, UserId,
};
use thiserror::Error as ThisError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::broadcast::{Broadcaster, TableState};
use crate::clock::Clock;
use crate::metrics::TableMetrics;

const MAILBOX_CAPACITY: usize = 1_024;

#[derive(Debug, ThisError)]
pub enum TableError {
    #[error(transparent)]
    Bet(#[from] BetError),
    #[error("table is not running")]
    Unavailable,
}

impl TableError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TableError::Bet(err) => err.kind(),
            TableError::Unavailable => ErrorKind::Unavailable,
        }
    }
}

pub enum Message {
    PlaceBet {
        user: UserId,
        number: u8,
        amount: Decimal,
        response: oneshot::Sender<Result<BetsResponse, BetError>>,
    },
    RemoveBet {
        user: UserId,
        number: u8,
        response: oneshot::Sender<Result<RemoveBetResponse, BetError>>,
    },
    ListBets {
        user: UserId,
        round_id: Option<RoundId>,
        response: oneshot::Sender<BetsResponse>,
    },
    LastResult {
        response: oneshot::Sender<Option<LastRoundResults>>,
    },
    BettingHistory {
        user: UserId,
        limit: Option<usize>,
        response: oneshot::Sender<Vec<HistoryEntry>>,
    },
    Stats {
        response: oneshot::Sender<GameStats>,
    },
    SetDice {
        dice: DiceFaces,
        response: oneshot::Sender<Result<(), BetError>>,
    },
    SetDiceMode {
        mode: DiceMode,
        response: oneshot::Sender<DiceMode>,
    },
    Reset {
        response: oneshot::Sender<ResetResponse>,
    },
}

/// Handle for sending requests to the table actor.
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> Message,
    ) -> Result<R, TableError> {
        let (response, receiver) = oneshot::channel();
        self.sender
            .send(build(response))
            .await
            .map_err(|_| TableError::Unavailable)?;
        receiver.await.map_err(|_| TableError::Unavailable)
    }

    pub async fn place_bet(
        &self,
        user: UserId,
        number: u8,
        amount: Decimal,
    ) -> Result<BetsResponse, TableError> {
        Ok(self
            .request(|response| Message::PlaceBet {
                user,
                number,
                amount,
                response,
            })
            .await??)
    }

    pub async fn remove_bet(
        &self,
        user: UserId,
        number: u8,
    ) -> Result<RemoveBetResponse, TableError> {
        Ok(self
            .request(|response| Message::RemoveBet {
                user,
                number,
                response,
            })
            .await??)
    }

    pub async fn list_bets(
        &self,
        user: UserId,
        round_id: Option<RoundId>,
    ) -> Result<BetsResponse, TableError> {
        self.request(|response| Message::ListBets {
            user,
            round_id,
            response,
        })
        .await
    }

    pub async fn last_result(&self) -> Result<Option<LastRoundResults>, TableError> {
        self.request(|response| Message::LastResult { response })
            .await
    }

    pub async fn betting_history(
        &self,
        user: UserId,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryEntry>, TableError> {
        self.request(|response| Message::BettingHistory {
            user,
            limit,
            response,
        })
        .await
    }

    pub async fn stats(&self) -> Result<GameStats, TableError> {
        self.request(|response| Message::Stats { response }).await
    }

    pub async fn set_dice(&self, dice: DiceFaces) -> Result<(), TableError> {
        Ok(self
            .request(|response| Message::SetDice { dice, response })
            .await??)
    }

    pub async fn set_dice_mode(&self, mode: DiceMode) -> Result<DiceMode, TableError> {
        self.request(|response| Message::SetDiceMode { mode, response })
            .await
    }

    pub async fn reset(&self) -> Result<ResetResponse, TableError> {
        self.request(|response| Message::Reset { response }).await
    }
}

pub struct TableActor {
    engine: RoundEngine,
    mailbox: mpsc::Receiver<Message>,
    broadcaster: Arc<Broadcaster>,
    clock: Arc<dyn Clock>,
    metrics: Arc<TableMetrics>,
    tick_interval: Duration,
}

impl TableActor {
    pub fn new(
        engine: RoundEngine,
        broadcaster: Arc<Broadcaster>,
        clock: Arc<dyn Clock>,
        metrics: Arc<TableMetrics>,
        tick: Duration,
    ) -> (Self, Mailbox) {
        let (sender, mailbox) = mpsc::channel(MAILBOX_CAPACITY);
        (
            Self {
                engine,
                mailbox,
                broadcaster,
                clock,
                metrics,
                tick_interval: tick,
            },
            Mailbox { sender },
        )
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        self.publish(self.clock.now_ms());
        let mut interval = time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(),
                message = self.mailbox.recv() => {
                    let Some(message) = message else {
                        info!("mailbox closed, shutting down table");
                        break;
                    };
                    self.handle(message);
                }
            }
        }
    }

    /// Walk every transition due now, publishing a frame after each one so a
    /// phase shorter than the tick still reaches every client.
    fn tick(&mut self) {
        let now = self.clock.now_ms();
        let mut events = Vec::new();
        loop {
            let moved = self.engine.step(now, &mut events);
            if !events.is_empty() {
                debug!(?events, "round advanced");
                self.metrics.record_events(&events);
                events.clear();
            }
            if !moved {
                break;
            }
            self.publish(now);
        }
    }

    fn publish(&self, now_ms: u64) {
        let state = TableState::new(
            self.engine.snapshot(now_ms),
            self.engine.last_result(),
            &self.engine.bets(),
        );
        self.broadcaster.publish(state);
    }

    fn bets_response(&self, user: &UserId, round_id: RoundId, bets: &[Bet]) -> BetsResponse {
        BetsResponse {
            round_id,
            bets: bets.iter().map(BetView::from).collect(),
            balance: self.engine.ledger().balance(user),
        }
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::PlaceBet {
                user,
                number,
                amount,
                response,
            } => {
                let now = self.clock.now_ms();
                let result = self
                    .engine
                    .place_bet(&user, number, amount, now)
                    .map(|bets| self.bets_response(&user, self.engine.round().id, &bets));
                match &result {
                    Ok(_) => {
                        self.metrics.inc_bet_accepted();
                        self.publish(now);
                    }
                    Err(err) => {
                        self.metrics.inc_bet_rejected();
                        debug!(user = %user, number, %amount, kind = %err.kind(), "bet rejected");
                    }
                }
                let _ = response.send(result);
            }
            Message::RemoveBet {
                user,
                number,
                response,
            } => {
                let now = self.clock.now_ms();
                let result = self
                    .engine
                    .remove_bet(&user, number, now)
                    .map(|(bet, transaction)| RemoveBetResponse {
                        round_id: bet.round_id,
                        number: bet.number,
                        refunded: bet.amount,
                        balance: transaction.balance_after,
                    });
                if result.is_ok() {
                    self.metrics.inc_bet_removed();
                    self.publish(now);
                }
                let _ = response.send(result);
            }
            Message::ListBets {
                user,
                round_id,
                response,
            } => {
                let bets = self.engine.list_bets(&user, round_id);
                let round_id = round_id.unwrap_or(self.engine.round().id);
                let _ = response.send(self.bets_response(&user, round_id, &bets));
            }
            Message::LastResult { response } => {
                let _ = response.send(self.engine.last_result());
            }
            Message::BettingHistory {
                user,
                limit,
                response,
            } => {
                let _ = response.send(self.engine.betting_history(&user, limit));
            }
            Message::Stats { response } => {
                let _ = response.send(self.engine.stats());
            }
            Message::SetDice { dice, response } => {
                let _ = response.send(self.engine.set_dice(dice));
            }
            Message::SetDiceMode { mode, response } => {
                self.engine.set_dice_mode(mode);
                let _ = response.send(self.engine.dice_mode());
            }
            Message::Reset { response } => {
                let now = self.clock.now_ms();
                let reset = self.engine.reset(now);
                if reset.refunded_bets > 0 {
                    warn!(
                        round_id = reset.aborted_round_id,
                        refunded = reset.refunded_bets,
                        "round aborted with open bets"
                    );
                }
                self.publish(now);
                let _ = response.send(reset);
            }
        }
    }
}
