use std::sync::Arc;

use rust_decimal::Decimal;
use sixdice_execution::InMemoryLedger;
use sixdice_types::Phase;

use crate::broadcast::TableFrame;
use crate::clock::ManualClock;
use crate::config::ServiceConfig;
use crate::AppState;

pub(crate) struct TestTable {
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<InMemoryLedger>,
}

impl TestTable {
    pub fn new(operator_token: Option<&str>, starting_balance: Option<Decimal>) -> Self {
        let config = ServiceConfig {
            operator_token: operator_token.map(str::to_string),
            starting_balance,
            ..ServiceConfig::default()
        };
        let ledger = Arc::new(InMemoryLedger::new());
        let clock = Arc::new(ManualClock::new(0));
        let table = crate::start(&config, ledger.clone(), clock.clone()).unwrap();
        Self {
            state: table.state,
            clock,
            ledger,
        }
    }

    /// Wait until the table publishes a frame in `phase`.
    pub async fn wait_for_phase(&self, phase: Phase) -> Arc<TableFrame> {
        let mut subscription = self.state.broadcaster.subscribe();
        loop {
            let frame = subscription.recv().await.expect("stream ended");
            if frame.state.round.phase == phase {
                return frame;
            }
        }
    }

    /// Move the clock to `now_ms` and wait for the table to reach `phase`.
    pub async fn step_to(&self, now_ms: u64, phase: Phase) -> Arc<TableFrame> {
        self.clock.set(now_ms);
        self.wait_for_phase(phase).await
    }
}
