//! Table state fan-out.
//!
//! The broadcaster keeps a registry of streaming sessions and the most recent
//! table frame. Every published frame carries a sequence number one higher
//! than the last. Registration and the initial frame happen under the same
//! lock as publishing, so a new session receives exactly the frames from the
//! current one onwards with no gap and no repeat.
//!
//! Sessions have bounded queues. A session whose queue is full or whose
//! receiver is gone is dropped from the registry on the next publish; closing
//! its sender ends the session's stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use sixdice_types::{
    api::{BetView, LastRoundResults, PlayerView, RoundSnapshot, StreamMessage},
    Bet, UserId,
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::metrics::TableMetrics;

pub type SessionId = u64;

/// Table state ready to be sequenced and published.
#[derive(Clone, Debug)]
pub struct TableState {
    pub round: RoundSnapshot,
    pub last_result: Option<LastRoundResults>,
    pub bets: HashMap<UserId, Vec<BetView>>,
}

impl TableState {
    pub fn new(round: RoundSnapshot, last_result: Option<LastRoundResults>, bets: &[Bet]) -> Self {
        let mut by_user: HashMap<UserId, Vec<BetView>> = HashMap::new();
        for bet in bets {
            by_user.entry(bet.user.clone()).or_default().push(BetView::from(bet));
        }
        Self {
            round,
            last_result,
            bets: by_user,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TableFrame {
    pub seq: u64,
    pub state: TableState,
}

impl TableFrame {
    /// Round snapshot with the countdown re-derived for `now_ms`.
    pub fn round_at(&self, now_ms: u64) -> RoundSnapshot {
        let mut round = self.state.round.clone();
        round.remaining_seconds = round.phase_ends_at_ms.saturating_sub(now_ms).div_ceil(1_000);
        round
    }

    pub fn player_bets(&self, user: &UserId) -> Vec<BetView> {
        self.state.bets.get(user).cloned().unwrap_or_default()
    }

    pub fn message(&self, now_ms: u64, player: Option<PlayerView>) -> StreamMessage {
        StreamMessage::State {
            seq: self.seq,
            round: self.round_at(now_ms),
            last_result: self.state.last_result.clone(),
            player,
        }
    }
}

struct Registry {
    next_session: SessionId,
    seq: u64,
    latest: Option<Arc<TableFrame>>,
    sessions: HashMap<SessionId, mpsc::Sender<Arc<TableFrame>>>,
}

pub struct Broadcaster {
    registry: Mutex<Registry>,
    capacity: usize,
    metrics: Arc<TableMetrics>,
}

/// A registered session. Dropping it unregisters the session.
pub struct Subscription {
    id: SessionId,
    receiver: mpsc::Receiver<Arc<TableFrame>>,
    broadcaster: Arc<Broadcaster>,
}

impl Subscription {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Next frame, or `None` once the session has been pruned.
    pub async fn recv(&mut self) -> Option<Arc<TableFrame>> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.remove(self.id);
    }
}

impl Broadcaster {
    pub fn new(capacity: usize, metrics: Arc<TableMetrics>) -> Self {
        Self {
            registry: Mutex::new(Registry {
                next_session: 1,
                seq: 0,
                latest: None,
                sessions: HashMap::new(),
            }),
            capacity: capacity.max(1),
            metrics,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a session; the latest frame, if any, is already queued.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let mut registry = self.lock();
        let id = registry.next_session;
        registry.next_session += 1;
        if let Some(latest) = registry.latest.clone() {
            // Fresh channel with capacity >= 1.
            let _ = sender.try_send(latest);
        }
        registry.sessions.insert(id, sender);
        drop(registry);

        self.metrics.inc_session_connected();
        debug!(session = id, "session registered");
        Subscription {
            id,
            receiver,
            broadcaster: Arc::clone(self),
        }
    }

    /// Sequence `state` and push it to every session. Returns the new `seq`.
    pub fn publish(&self, state: TableState) -> u64 {
        let mut registry = self.lock();
        registry.seq += 1;
        let frame = Arc::new(TableFrame {
            seq: registry.seq,
            state,
        });
        registry.latest = Some(Arc::clone(&frame));
        self.fan_out(&mut registry, frame)
    }

    /// Re-send the latest state under a new `seq`, for wallet changes made
    /// outside the round.
    pub fn republish(&self) -> Option<u64> {
        let mut registry = self.lock();
        let latest = registry.latest.clone()?;
        registry.seq += 1;
        let frame = Arc::new(TableFrame {
            seq: registry.seq,
            state: latest.state.clone(),
        });
        registry.latest = Some(Arc::clone(&frame));
        Some(self.fan_out(&mut registry, frame))
    }

    fn fan_out(&self, registry: &mut Registry, frame: Arc<TableFrame>) -> u64 {
        let mut pruned = Vec::new();
        for (id, sender) in registry.sessions.iter() {
            match sender.try_send(Arc::clone(&frame)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(session = id, seq = frame.seq, "session queue full, pruning");
                    pruned.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(session = id, "session closed, pruning");
                    pruned.push(*id);
                }
            }
        }
        for id in &pruned {
            registry.sessions.remove(id);
        }
        if !pruned.is_empty() {
            self.metrics.add_sessions_pruned(pruned.len() as u64);
        }
        self.metrics.inc_frame_published();
        frame.seq
    }

    pub fn latest(&self) -> Option<Arc<TableFrame>> {
        self.lock().latest.clone()
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Per-session queue depth; stream writers size their socket queue to match.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn remove(&self, id: SessionId) {
        if self.lock().sessions.remove(&id).is_some() {
            debug!(session = id, "session unregistered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sixdice_types::Phase;

    fn state(round_id: u64, phase: Phase) -> TableState {
        TableState::new(
            RoundSnapshot {
                round_id,
                phase,
                remaining_seconds: 0,
                phase_ends_at_ms: 10_000,
                dice: None,
                total: None,
                errored: false,
            },
            None,
            &[],
        )
    }

    fn broadcaster(capacity: usize) -> Arc<Broadcaster> {
        Arc::new(Broadcaster::new(capacity, Arc::new(TableMetrics::default())))
    }

    #[test]
    fn capacity_is_configured_and_never_zero() {
        assert_eq!(broadcaster(7).capacity(), 7);
        assert_eq!(broadcaster(0).capacity(), 1);
    }

    #[tokio::test]
    async fn new_session_gets_latest_frame_first() {
        let broadcaster = broadcaster(8);
        broadcaster.publish(state(1, Phase::Waiting));
        broadcaster.publish(state(1, Phase::Betting));

        let mut session = broadcaster.subscribe();
        let first = session.recv().await.unwrap();
        assert_eq!(first.seq, 2);
        assert_eq!(first.state.round.phase, Phase::Betting);

        broadcaster.publish(state(1, Phase::Closed));
        let next = session.recv().await.unwrap();
        assert_eq!(next.seq, 3);
        assert_eq!(next.state.round.phase, Phase::Closed);
    }

    #[tokio::test]
    async fn session_before_first_publish_waits() {
        let broadcaster = broadcaster(8);
        let mut session = broadcaster.subscribe();
        broadcaster.publish(state(1, Phase::Waiting));
        assert_eq!(session.recv().await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn every_session_sees_every_frame_in_order() {
        let broadcaster = broadcaster(8);
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();
        for _ in 0..3 {
            broadcaster.publish(state(1, Phase::Betting));
        }
        for session in [&mut a, &mut b] {
            for expected in 1..=3 {
                assert_eq!(session.recv().await.unwrap().seq, expected);
            }
        }
    }

    #[tokio::test]
    async fn dropped_subscription_unregisters() {
        let broadcaster = broadcaster(8);
        let session = broadcaster.subscribe();
        assert_eq!(broadcaster.session_count(), 1);
        drop(session);
        assert_eq!(broadcaster.session_count(), 0);
    }

    #[tokio::test]
    async fn full_session_is_pruned_and_stream_ends() {
        let metrics = Arc::new(TableMetrics::default());
        let broadcaster = Arc::new(Broadcaster::new(2, Arc::clone(&metrics)));
        let mut slow = broadcaster.subscribe();
        let mut fast = broadcaster.subscribe();

        broadcaster.publish(state(1, Phase::Waiting));
        assert_eq!(fast.recv().await.unwrap().seq, 1);
        broadcaster.publish(state(1, Phase::Betting));
        assert_eq!(fast.recv().await.unwrap().seq, 2);
        broadcaster.publish(state(1, Phase::Closed));

        assert_eq!(broadcaster.session_count(), 1);
        assert_eq!(metrics.snapshot(0).sessions_pruned, 1);
        // The slow session drains what it had, then its stream ends.
        assert_eq!(slow.recv().await.unwrap().seq, 1);
        assert_eq!(slow.recv().await.unwrap().seq, 2);
        assert!(slow.recv().await.is_none());
        assert_eq!(fast.recv().await.unwrap().seq, 3);
    }

    #[tokio::test]
    async fn closed_session_is_pruned() {
        let broadcaster = broadcaster(8);
        let mut session = broadcaster.subscribe();
        session.receiver.close();
        broadcaster.publish(state(1, Phase::Waiting));
        assert_eq!(broadcaster.session_count(), 0);
    }

    #[tokio::test]
    async fn republish_bumps_sequence() {
        let broadcaster = broadcaster(8);
        assert!(broadcaster.republish().is_none());
        broadcaster.publish(state(4, Phase::Result));
        let mut session = broadcaster.subscribe();
        assert_eq!(broadcaster.republish(), Some(2));
        assert_eq!(session.recv().await.unwrap().seq, 1);
        let frame = session.recv().await.unwrap();
        assert_eq!(frame.seq, 2);
        assert_eq!(frame.state.round.round_id, 4);
    }

    #[test]
    fn frame_recomputes_countdown_and_player_view() {
        let bet = Bet {
            user: UserId::from("alice"),
            round_id: 1,
            number: 3,
            amount: rust_decimal::Decimal::TEN,
            placed_at_ms: 0,
        };
        let mut state = state(1, Phase::Betting);
        state = TableState::new(state.round, None, &[bet]);
        let frame = TableFrame { seq: 5, state };

        assert_eq!(frame.round_at(1).remaining_seconds, 10);
        assert_eq!(frame.round_at(9_001).remaining_seconds, 1);
        assert_eq!(frame.round_at(20_000).remaining_seconds, 0);
        assert_eq!(frame.player_bets(&UserId::from("alice")).len(), 1);
        assert!(frame.player_bets(&UserId::from("bob")).is_empty());
    }
}
