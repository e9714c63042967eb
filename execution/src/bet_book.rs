//! Active wagers for the current round.
//!
//! The book keys bets by `(user, number)`, so a user may back several numbers
//! in one round but never the same number twice. Placement validates every
//! rule before asking the ledger for the stake, and only records the bet once
//! the debit has been written; removal refunds first and only then drops the
//! bet. Either step failing leaves the book and the wallet untouched.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use sixdice_types::{
    is_face, normalize_amount, Bet, Phase, RoundId, Transaction, TransactionKind, UserId,
};
use tracing::debug;

use crate::config::TableRules;
use crate::error::BetError;
use crate::ledger::{Entry, Ledger};

#[derive(Clone, Debug)]
pub struct BetBook {
    round_id: RoundId,
    bets: BTreeMap<(UserId, u8), Bet>,
    frozen: bool,
}

impl BetBook {
    pub fn new(round_id: RoundId) -> Self {
        Self {
            round_id,
            bets: BTreeMap::new(),
            frozen: false,
        }
    }

    /// Stop accepting changes for this round.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn len(&self) -> usize {
        self.bets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bets.is_empty()
    }

    /// Rule checks that need no ledger access. Returns the normalized stake.
    pub fn validate(
        &self,
        user: &UserId,
        number: u8,
        amount: Decimal,
        rules: &TableRules,
    ) -> Result<Decimal, BetError> {
        if !is_face(number) {
            return Err(BetError::InvalidNumber(number));
        }
        let amount = normalize_amount(amount).ok_or(BetError::InvalidAmount(amount))?;
        if !rules.within_limits(amount) {
            return Err(BetError::OutsideLimits {
                amount,
                min: rules.min_bet,
                max: rules.max_bet,
            });
        }
        if self.bets.contains_key(&(user.clone(), number)) {
            return Err(BetError::DuplicateBet(number));
        }
        Ok(amount)
    }

    /// Debit the stake and record the bet. The caller has already checked the
    /// round phase; a frozen book is still refused here.
    pub fn place<L: Ledger + ?Sized>(
        &mut self,
        ledger: &L,
        user: &UserId,
        number: u8,
        amount: Decimal,
        rules: &TableRules,
        now_ms: u64,
    ) -> Result<Bet, BetError> {
        if self.frozen {
            return Err(BetError::InvalidPhase(Phase::Closed));
        }
        let amount = self.validate(user, number, amount, rules)?;

        let entry = Entry::new(
            user.clone(),
            amount,
            TransactionKind::Bet,
            format!("Bet on {number} in round {}", self.round_id),
            now_ms,
        );
        let transaction = ledger.debit(entry)?;

        let bet = Bet {
            user: user.clone(),
            round_id: self.round_id,
            number,
            amount,
            placed_at_ms: now_ms,
        };
        self.bets.insert((user.clone(), number), bet.clone());
        debug!(
            round_id = self.round_id,
            user = %user,
            number,
            amount = %amount,
            balance = %transaction.balance_after,
            "bet recorded"
        );
        Ok(bet)
    }

    /// Refund the stake and drop the bet.
    pub fn remove<L: Ledger + ?Sized>(
        &mut self,
        ledger: &L,
        user: &UserId,
        number: u8,
        now_ms: u64,
    ) -> Result<(Bet, Transaction), BetError> {
        if self.frozen {
            return Err(BetError::InvalidPhase(Phase::Closed));
        }
        let key = (user.clone(), number);
        let bet = self.bets.get(&key).ok_or(BetError::NotFound(number))?;

        let entry = Entry::new(
            user.clone(),
            bet.amount,
            TransactionKind::Refund,
            format!("Removed bet on {number} in round {}", self.round_id),
            now_ms,
        );
        let transaction = ledger.credit(entry)?;

        let bet = self.bets.remove(&key).ok_or(BetError::NotFound(number))?;
        Ok((bet, transaction))
    }

    /// The user's bets, ordered by number.
    pub fn user_bets(&self, user: &UserId) -> Vec<Bet> {
        self.bets
            .range((user.clone(), 0)..=(user.clone(), u8::MAX))
            .map(|(_, bet)| bet.clone())
            .collect()
    }

    /// Every bet in the book, as an owned snapshot.
    pub fn snapshot(&self) -> Vec<Bet> {
        self.bets.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{HistoryFilter, InMemoryLedger, LedgerError};
    use rust_decimal_macros::dec;

    fn funded(user: &str, amount: Decimal) -> InMemoryLedger {
        let ledger = InMemoryLedger::new();
        ledger
            .credit(Entry::new(
                UserId::from(user),
                amount,
                TransactionKind::Deposit,
                "deposit",
                0,
            ))
            .unwrap();
        ledger
    }

    #[test]
    fn test_place_debits_and_records() {
        let ledger = funded("alice", dec!(500));
        let alice = UserId::from("alice");
        let mut book = BetBook::new(1);

        let bet = book
            .place(&ledger, &alice, 3, dec!(100), &TableRules::default(), 10)
            .unwrap();
        assert_eq!(bet.amount, dec!(100));
        assert_eq!(bet.round_id, 1);
        assert_eq!(ledger.balance(&alice), dec!(400));
        assert_eq!(book.user_bets(&alice), vec![bet]);
    }

    #[test]
    fn test_multiple_numbers_but_no_duplicates() {
        let ledger = funded("alice", dec!(500));
        let alice = UserId::from("alice");
        let rules = TableRules::default();
        let mut book = BetBook::new(1);

        book.place(&ledger, &alice, 3, dec!(10), &rules, 1).unwrap();
        book.place(&ledger, &alice, 5, dec!(10), &rules, 2).unwrap();
        assert_eq!(
            book.place(&ledger, &alice, 3, dec!(10), &rules, 3),
            Err(BetError::DuplicateBet(3))
        );
        assert_eq!(book.len(), 2);
        assert_eq!(ledger.balance(&alice), dec!(480));
    }

    #[test]
    fn test_insufficient_funds_records_nothing() {
        let ledger = funded("bob", dec!(40));
        let bob = UserId::from("bob");
        let mut book = BetBook::new(1);

        let err = book
            .place(&ledger, &bob, 2, dec!(50), &TableRules::default(), 1)
            .unwrap_err();
        assert!(matches!(
            err,
            BetError::Ledger(LedgerError::InsufficientFunds { .. })
        ));
        assert_eq!(ledger.balance(&bob), dec!(40));
        assert!(book.is_empty());
    }

    #[test]
    fn test_validation_precedes_debit() {
        let ledger = funded("carol", dec!(100));
        let carol = UserId::from("carol");
        let rules = TableRules {
            min_bet: dec!(10),
            max_bet: dec!(50),
            ..TableRules::default()
        };
        let mut book = BetBook::new(1);

        assert_eq!(
            book.place(&ledger, &carol, 0, dec!(10), &rules, 1),
            Err(BetError::InvalidNumber(0))
        );
        assert_eq!(
            book.place(&ledger, &carol, 7, dec!(10), &rules, 1),
            Err(BetError::InvalidNumber(7))
        );
        assert_eq!(
            book.place(&ledger, &carol, 1, dec!(-5), &rules, 1),
            Err(BetError::InvalidAmount(dec!(-5)))
        );
        assert_eq!(
            book.place(&ledger, &carol, 1, dec!(10.005), &rules, 1),
            Err(BetError::InvalidAmount(dec!(10.005)))
        );
        assert!(matches!(
            book.place(&ledger, &carol, 1, dec!(60), &rules, 1),
            Err(BetError::OutsideLimits { .. })
        ));
        assert_eq!(ledger.balance(&carol), dec!(100));
        assert_eq!(
            ledger.history(&carol, &HistoryFilter::default()).len(),
            1,
            "only the deposit"
        );
    }

    #[test]
    fn test_remove_refunds_exact_stake() {
        let ledger = funded("dave", dec!(100));
        let dave = UserId::from("dave");
        let mut book = BetBook::new(4);

        book.place(&ledger, &dave, 6, dec!(33.33), &TableRules::default(), 1)
            .unwrap();
        assert_eq!(ledger.balance(&dave), dec!(66.67));

        let (bet, tx) = book.remove(&ledger, &dave, 6, 2).unwrap();
        assert_eq!(bet.amount, dec!(33.33));
        assert_eq!(tx.kind, TransactionKind::Refund);
        assert_eq!(tx.amount, dec!(33.33));
        assert_eq!(ledger.balance(&dave), dec!(100));
        assert!(book.user_bets(&dave).is_empty());

        assert_eq!(book.remove(&ledger, &dave, 6, 3), Err(BetError::NotFound(6)));
    }

    #[test]
    fn test_remove_then_place_amends() {
        let ledger = funded("erin", dec!(100));
        let erin = UserId::from("erin");
        let rules = TableRules::default();
        let mut book = BetBook::new(1);

        book.place(&ledger, &erin, 2, dec!(10), &rules, 1).unwrap();
        book.remove(&ledger, &erin, 2, 2).unwrap();
        book.place(&ledger, &erin, 2, dec!(25), &rules, 3).unwrap();
        assert_eq!(book.user_bets(&erin)[0].amount, dec!(25));
        assert_eq!(ledger.balance(&erin), dec!(75));
    }

    #[test]
    fn test_frozen_book_rejects_changes() {
        let ledger = funded("frank", dec!(100));
        let frank = UserId::from("frank");
        let rules = TableRules::default();
        let mut book = BetBook::new(1);
        book.place(&ledger, &frank, 1, dec!(10), &rules, 1).unwrap();
        book.freeze();

        assert!(matches!(
            book.place(&ledger, &frank, 2, dec!(10), &rules, 2),
            Err(BetError::InvalidPhase(_))
        ));
        assert!(matches!(
            book.remove(&ledger, &frank, 1, 2),
            Err(BetError::InvalidPhase(_))
        ));
        assert_eq!(ledger.balance(&frank), dec!(90));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_user_bets_are_scoped() {
        let ledger = InMemoryLedger::new();
        for user in ["a", "b"] {
            ledger
                .credit(Entry::new(
                    UserId::from(user),
                    dec!(100),
                    TransactionKind::Deposit,
                    "deposit",
                    0,
                ))
                .unwrap();
        }
        let rules = TableRules::default();
        let mut book = BetBook::new(1);
        book.place(&ledger, &UserId::from("a"), 4, dec!(5), &rules, 1).unwrap();
        book.place(&ledger, &UserId::from("b"), 4, dec!(7), &rules, 1).unwrap();
        book.place(&ledger, &UserId::from("a"), 1, dec!(3), &rules, 1).unwrap();

        let numbers: Vec<u8> = book
            .user_bets(&UserId::from("a"))
            .iter()
            .map(|bet| bet.number)
            .collect();
        assert_eq!(numbers, vec![1, 4]);
        let staked: Decimal = book.snapshot().iter().map(|bet| bet.amount).sum();
        assert_eq!(staked, dec!(15));
        assert!(book.user_bets(&UserId::from("c")).is_empty());
    }
}
