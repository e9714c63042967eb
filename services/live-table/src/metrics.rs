use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use sixdice_execution::EngineEvent;

#[derive(Default)]
pub struct TableMetrics {
    sessions_connected: AtomicU64,
    sessions_pruned: AtomicU64,
    frames_published: AtomicU64,
    bets_accepted: AtomicU64,
    bets_rejected: AtomicU64,
    bets_removed: AtomicU64,
    rounds_completed: AtomicU64,
    rounds_voided: AtomicU64,
    settlement_retries: AtomicU64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TableMetricsSnapshot {
    pub sessions_connected: u64,
    pub sessions_pruned: u64,
    pub sessions_active: u64,
    pub frames_published: u64,
    pub bets_accepted: u64,
    pub bets_rejected: u64,
    pub bets_removed: u64,
    pub rounds_completed: u64,
    pub rounds_voided: u64,
    pub settlement_retries: u64,
}

impl TableMetrics {
    pub fn snapshot(&self, sessions_active: usize) -> TableMetricsSnapshot {
        TableMetricsSnapshot {
            sessions_connected: self.sessions_connected.load(Ordering::Relaxed),
            sessions_pruned: self.sessions_pruned.load(Ordering::Relaxed),
            sessions_active: sessions_active as u64,
            frames_published: self.frames_published.load(Ordering::Relaxed),
            bets_accepted: self.bets_accepted.load(Ordering::Relaxed),
            bets_rejected: self.bets_rejected.load(Ordering::Relaxed),
            bets_removed: self.bets_removed.load(Ordering::Relaxed),
            rounds_completed: self.rounds_completed.load(Ordering::Relaxed),
            rounds_voided: self.rounds_voided.load(Ordering::Relaxed),
            settlement_retries: self.settlement_retries.load(Ordering::Relaxed),
        }
    }

    pub fn inc_session_connected(&self) {
        self.sessions_connected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_sessions_pruned(&self, count: u64) {
        self.sessions_pruned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_frame_published(&self) {
        self.frames_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_bet_accepted(&self) {
        self.bets_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_bet_rejected(&self) {
        self.bets_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_bet_removed(&self) {
        self.bets_removed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count the round outcomes reported by one engine advance.
    pub fn record_events(&self, events: &[EngineEvent]) {
        for event in events {
            match event {
                EngineEvent::RoundArchived { voided: true, .. } => {
                    self.rounds_voided.fetch_add(1, Ordering::Relaxed);
                }
                EngineEvent::RoundArchived { voided: false, .. } => {
                    self.rounds_completed.fetch_add(1, Ordering::Relaxed);
                }
                EngineEvent::SettlementRetry { .. } => {
                    self.settlement_retries.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            }
        }
    }
}
