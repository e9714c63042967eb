//! Test doubles for the execution layer.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use rust_decimal::Decimal;
use sixdice_types::{Transaction, UserId};

use crate::ledger::{Entry, HistoryFilter, InMemoryLedger, Ledger, LedgerError};

/// In-memory ledger that fails a configurable number of upcoming credits with
/// [`LedgerError::Unavailable`], simulating an unreachable wallet store. A
/// failed batch writes nothing, like the ledger it wraps.
#[derive(Debug, Default)]
pub struct FlakyLedger {
    inner: InMemoryLedger,
    failing_credits: AtomicU32,
    refused: Mutex<HashSet<UserId>>,
}

impl FlakyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` credits. Zero heals the ledger.
    pub fn fail_next_credits(&self, count: u32) {
        self.failing_credits.store(count, Ordering::SeqCst);
    }

    /// Fail every credit to `user`, and every batch touching them, until
    /// [`FlakyLedger::heal`].
    pub fn refuse_credits_for(&self, user: UserId) {
        self.refused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user);
    }

    pub fn heal(&self) {
        self.failing_credits.store(0, Ordering::SeqCst);
        self.refused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn inner(&self) -> &InMemoryLedger {
        &self.inner
    }

    fn take_failure(&self) -> bool {
        self.failing_credits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    fn refuses<'a>(&self, mut users: impl Iterator<Item = &'a UserId>) -> bool {
        let refused = self.refused.lock().unwrap_or_else(PoisonError::into_inner);
        users.any(|user| refused.contains(user))
    }
}

impl Ledger for FlakyLedger {
    fn debit(&self, entry: Entry) -> Result<Transaction, LedgerError> {
        self.inner.debit(entry)
    }

    fn credit(&self, entry: Entry) -> Result<Transaction, LedgerError> {
        if self.refuses(std::iter::once(&entry.user)) {
            return Err(LedgerError::Unavailable(format!("wallet {} unreachable", entry.user)));
        }
        if self.take_failure() {
            return Err(LedgerError::Unavailable("injected credit failure".to_string()));
        }
        self.inner.credit(entry)
    }

    fn credit_all(&self, entries: Vec<Entry>) -> Result<Vec<Transaction>, LedgerError> {
        if self.refuses(entries.iter().map(|entry| &entry.user)) {
            return Err(LedgerError::Unavailable("batch touches an unreachable wallet".to_string()));
        }
        if self.take_failure() {
            return Err(LedgerError::Unavailable("injected credit failure".to_string()));
        }
        self.inner.credit_all(entries)
    }

    fn balance(&self, user: &UserId) -> Decimal {
        self.inner.balance(user)
    }

    fn history(&self, user: &UserId, filter: &HistoryFilter) -> Vec<Transaction> {
        self.inner.history(user, filter)
    }
}
