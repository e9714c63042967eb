use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{UserId, AMOUNT_SCALE};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Bet,
    Win,
    Refund,
    Deposit,
    Withdraw,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Bet => "BET",
            TransactionKind::Win => "WIN",
            TransactionKind::Refund => "REFUND",
            TransactionKind::Deposit => "DEPOSIT",
            TransactionKind::Withdraw => "WITHDRAW",
        }
    }

    /// BET and WITHDRAW take money out of the wallet.
    pub fn is_debit(&self) -> bool {
        matches!(self, TransactionKind::Bet | TransactionKind::Withdraw)
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "BET" => Ok(TransactionKind::Bet),
            "WIN" => Ok(TransactionKind::Win),
            "REFUND" => Ok(TransactionKind::Refund),
            "DEPOSIT" => Ok(TransactionKind::Deposit),
            "WITHDRAW" => Ok(TransactionKind::Withdraw),
            other => Err(format!("unknown transaction kind: {other}")),
        }
    }
}

/// One immutable ledger entry.
///
/// `amount` is signed: debits are negative, credits positive, so the running
/// sum of a wallet's entries is its balance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: u64,
    pub user: UserId,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub description: String,
    pub balance_after: Decimal,
    pub at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// Validate a client-supplied amount: strictly positive and representable in
/// minor units. Returns the normalized value.
pub fn normalize_amount(amount: Decimal) -> Option<Decimal> {
    if amount <= Decimal::ZERO {
        return None;
    }
    let normalized = amount.normalize();
    if normalized.scale() > AMOUNT_SCALE {
        return None;
    }
    Some(normalized)
}
