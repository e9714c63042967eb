//! Wallet ledger.
//!
//! The ledger is the only component allowed to change a balance. Callers ask
//! for a debit or credit and receive the written [`Transaction`] (which carries
//! the post-transaction balance) or an error. Every accepted request appends
//! exactly one transaction, so a wallet's balance always equals the sum of its
//! log.
//!
//! Operations on one wallet are serialized by a per-wallet mutex, independent
//! of the round engine: a deposit arriving from the payment service and a
//! stake debit from the table observe each other before checking funds.
//!
//! Requests may carry a `reference`. A reference already applied to a wallet
//! returns the original transaction instead of applying the request again,
//! which makes retried settlement safe. [`Ledger::credit_all`] writes a batch
//! across several wallets as one unit: every wallet in the batch is locked
//! before the first credit lands.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use rust_decimal::Decimal;
use sixdice_types::{ErrorKind, Transaction, TransactionKind, UserId};
use thiserror::Error as ThisError;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum LedgerError {
    #[error("insufficient funds (balance={balance}, requested={requested})")]
    InsufficientFunds { balance: Decimal, requested: Decimal },
    #[error("amount must be positive (got={0})")]
    InvalidAmount(Decimal),
    #[error("{0:?} cannot be applied in this direction")]
    WrongDirection(TransactionKind),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::InvalidAmount(_) | LedgerError::WrongDirection(_) => {
                ErrorKind::InvalidAmount
            }
            LedgerError::Unavailable(_) => ErrorKind::Unavailable,
        }
    }
}

/// A single balance change request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub user: UserId,
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub description: String,
    pub reference: Option<String>,
    pub at_ms: u64,
}

impl Entry {
    pub fn new(
        user: UserId,
        amount: Decimal,
        kind: TransactionKind,
        description: impl Into<String>,
        at_ms: u64,
    ) -> Self {
        Self {
            user,
            amount,
            kind,
            description: description.into(),
            reference: None,
            at_ms,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Read filter for [`Ledger::history`]. Results are newest first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub kind: Option<TransactionKind>,
    pub since_ms: Option<u64>,
    pub limit: Option<usize>,
}

/// Abstract ledger interface. Implementations own durability.
pub trait Ledger: Send + Sync {
    /// Remove `entry.amount` from the wallet. Fails with
    /// [`LedgerError::InsufficientFunds`] when the balance is too small.
    fn debit(&self, entry: Entry) -> Result<Transaction, LedgerError>;

    /// Add `entry.amount` to the wallet, creating it when missing.
    fn credit(&self, entry: Entry) -> Result<Transaction, LedgerError>;

    /// Apply every credit or none of them. On error no wallet has changed, so
    /// the caller may retry the same batch; references already applied are
    /// returned as written.
    fn credit_all(&self, entries: Vec<Entry>) -> Result<Vec<Transaction>, LedgerError>;

    fn balance(&self, user: &UserId) -> Decimal;

    fn history(&self, user: &UserId, filter: &HistoryFilter) -> Vec<Transaction>;
}

#[derive(Debug)]
struct Wallet {
    balance: Decimal,
    log: Vec<Transaction>,
    references: HashMap<String, usize>,
}

impl Wallet {
    fn new() -> Self {
        Self {
            balance: Decimal::ZERO,
            log: Vec::new(),
            references: HashMap::new(),
        }
    }

    fn applied(&self, reference: Option<&String>) -> Option<Transaction> {
        let index = *self.references.get(reference?)?;
        self.log.get(index).cloned()
    }
}

/// Process-local ledger keeping every wallet in memory.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    wallets: RwLock<HashMap<UserId, Arc<Mutex<Wallet>>>>,
    next_id: AtomicU64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn wallet(&self, user: &UserId) -> Option<Arc<Mutex<Wallet>>> {
        let wallets = self.wallets.read().unwrap_or_else(PoisonError::into_inner);
        wallets.get(user).cloned()
    }

    fn wallet_or_create(&self, user: &UserId) -> Arc<Mutex<Wallet>> {
        if let Some(wallet) = self.wallet(user) {
            return wallet;
        }
        let mut wallets = self.wallets.write().unwrap_or_else(PoisonError::into_inner);
        wallets
            .entry(user.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Wallet::new())))
            .clone()
    }

    fn check(entry: &Entry, debit: bool) -> Result<(), LedgerError> {
        if entry.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(entry.amount));
        }
        if entry.kind.is_debit() != debit {
            return Err(LedgerError::WrongDirection(entry.kind));
        }
        Ok(())
    }

    /// Write one checked entry to a locked wallet.
    fn write(&self, wallet: &mut Wallet, entry: Entry, debit: bool) -> Result<Transaction, LedgerError> {
        if let Some(existing) = wallet.applied(entry.reference.as_ref()) {
            debug!(user = %entry.user, reference = ?entry.reference, "ledger reference already applied");
            return Ok(existing);
        }

        let signed = if debit { -entry.amount } else { entry.amount };
        let balance_after = wallet
            .balance
            .checked_add(signed)
            .ok_or(LedgerError::InvalidAmount(entry.amount))?;
        if balance_after < Decimal::ZERO {
            return Err(LedgerError::InsufficientFunds {
                balance: wallet.balance,
                requested: entry.amount,
            });
        }

        let transaction = Transaction {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            user: entry.user,
            kind: entry.kind,
            amount: signed,
            description: entry.description,
            balance_after,
            at_ms: entry.at_ms,
            reference: entry.reference,
        };
        wallet.balance = balance_after;
        if let Some(reference) = transaction.reference.clone() {
            let index = wallet.log.len();
            wallet.references.insert(reference, index);
        }
        wallet.log.push(transaction.clone());
        Ok(transaction)
    }

    fn apply(&self, entry: Entry, debit: bool) -> Result<Transaction, LedgerError> {
        Self::check(&entry, debit)?;
        let wallet = self.wallet_or_create(&entry.user);
        let mut wallet = wallet.lock().unwrap_or_else(PoisonError::into_inner);
        self.write(&mut wallet, entry, debit)
    }
}

impl Ledger for InMemoryLedger {
    fn debit(&self, entry: Entry) -> Result<Transaction, LedgerError> {
        self.apply(entry, true)
    }

    fn credit(&self, entry: Entry) -> Result<Transaction, LedgerError> {
        self.apply(entry, false)
    }

    fn credit_all(&self, entries: Vec<Entry>) -> Result<Vec<Transaction>, LedgerError> {
        for entry in &entries {
            Self::check(entry, false)?;
        }
        let mut users: Vec<UserId> = entries.iter().map(|entry| entry.user.clone()).collect();
        users.sort();
        users.dedup();

        // Locked in user order so two batches cannot deadlock.
        let handles: Vec<_> = users.iter().map(|user| self.wallet_or_create(user)).collect();
        let mut wallets: HashMap<&UserId, MutexGuard<'_, Wallet>> = users
            .iter()
            .zip(&handles)
            .map(|(user, wallet)| (user, wallet.lock().unwrap_or_else(PoisonError::into_inner)))
            .collect();

        // Every credit must fit before the first one is written.
        let mut projected: HashMap<&UserId, Decimal> = wallets
            .iter()
            .map(|(user, wallet)| (*user, wallet.balance))
            .collect();
        for entry in &entries {
            let applied = wallets
                .get(&entry.user)
                .is_some_and(|wallet| wallet.applied(entry.reference.as_ref()).is_some());
            let Some(balance) = projected.get_mut(&entry.user) else {
                continue;
            };
            if applied {
                continue;
            }
            *balance = balance
                .checked_add(entry.amount)
                .ok_or(LedgerError::InvalidAmount(entry.amount))?;
        }

        let mut written = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(wallet) = wallets.get_mut(&entry.user) else {
                continue;
            };
            written.push(self.write(wallet, entry, false)?);
        }
        Ok(written)
    }

    fn balance(&self, user: &UserId) -> Decimal {
        match self.wallet(user) {
            Some(wallet) => wallet.lock().unwrap_or_else(PoisonError::into_inner).balance,
            None => Decimal::ZERO,
        }
    }

    fn history(&self, user: &UserId, filter: &HistoryFilter) -> Vec<Transaction> {
        let Some(wallet) = self.wallet(user) else {
            return Vec::new();
        };
        let wallet = wallet.lock().unwrap_or_else(PoisonError::into_inner);
        wallet
            .log
            .iter()
            .rev()
            .filter(|tx| filter.kind.map_or(true, |kind| tx.kind == kind))
            .filter(|tx| filter.since_ms.map_or(true, |since| tx.at_ms >= since))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}
