//! Live six-dice table service.
//!
//! [`start`] builds the round engine, spawns the [`table::TableActor`] that
//! owns it and returns the shared [`AppState`] the HTTP and streaming API run
//! against.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use sixdice_execution::{ConfigError, Entry, HistoryFilter, Ledger, RoundEngine};
use sixdice_types::{TransactionKind, UserId};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub mod api;
pub mod broadcast;
pub mod clock;
pub mod config;
pub mod metrics;
pub mod table;

#[cfg(test)]
mod testing;

use broadcast::Broadcaster;
use clock::Clock;
use config::ServiceConfig;
use metrics::TableMetrics;
use table::{Mailbox, TableActor};

#[derive(Clone)]
pub struct AppState {
    pub table: Mailbox,
    pub broadcaster: Arc<Broadcaster>,
    pub ledger: Arc<dyn Ledger>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<TableMetrics>,
    pub operator_token: Option<Arc<str>>,
    pub starting_balance: Option<Decimal>,
}

impl AppState {
    /// Credit the configured starting balance the first time `user` shows up.
    pub fn ensure_wallet(&self, user: &UserId) {
        let Some(amount) = self.starting_balance else {
            return;
        };
        let seen = HistoryFilter {
            limit: Some(1),
            ..HistoryFilter::default()
        };
        if !self.ledger.history(user, &seen).is_empty() {
            return;
        }
        let entry = Entry::new(
            user.clone(),
            amount,
            TransactionKind::Deposit,
            "starting balance",
            self.clock.now_ms(),
        )
        .with_reference(format!("signup:{user}"));
        match self.ledger.credit(entry) {
            Ok(transaction) => {
                info!(user = %user, amount = %transaction.amount, "starting balance credited")
            }
            Err(err) => warn!(user = %user, ?err, "failed to credit starting balance"),
        }
    }
}

/// A running table: shared state plus the actor task.
pub struct LiveTable {
    pub state: AppState,
    pub actor: JoinHandle<()>,
}

pub fn start(
    config: &ServiceConfig,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
) -> Result<LiveTable, ConfigError> {
    let metrics = Arc::new(TableMetrics::default());
    let broadcaster = Arc::new(Broadcaster::new(
        config.ws_outbound_capacity,
        metrics.clone(),
    ));
    let engine = RoundEngine::new(config.engine.clone(), ledger.clone(), clock.now_ms())?;
    let (actor, mailbox) = TableActor::new(
        engine,
        broadcaster.clone(),
        clock.clone(),
        metrics.clone(),
        Duration::from_millis(config.tick_ms),
    );
    let actor = actor.start();

    Ok(LiveTable {
        state: AppState {
            table: mailbox,
            broadcaster,
            ledger,
            clock,
            metrics,
            operator_token: config.operator_token.as_deref().map(Arc::from),
            starting_balance: config.starting_balance,
        },
        actor,
    })
}
