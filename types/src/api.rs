//! Request, response and stream message shapes exposed by the live table.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Bet, BetOutcome, DiceFaces, ErrorKind, Phase, RoundId, UserId, DICE_PER_ROUND};

/// Authoritative view of the current round.
///
/// `remaining_seconds` is recomputed every time a snapshot is rendered; clients
/// must use it to reset any local countdown rather than trusting elapsed time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub round_id: RoundId,
    pub phase: Phase,
    pub remaining_seconds: u64,
    pub phase_ends_at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dice: Option<DiceFaces>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub errored: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetView {
    pub number: u8,
    pub amount: Decimal,
    pub placed_at_ms: u64,
}

impl From<&Bet> for BetView {
    fn from(bet: &Bet) -> Self {
        Self {
            number: bet.number,
            amount: bet.amount,
            placed_at_ms: bet.placed_at_ms,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PlaceBetRequest {
    pub number: u8,
    pub amount: Decimal,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RemoveBetRequest {
    pub number: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetsResponse {
    pub round_id: RoundId,
    pub bets: Vec<BetView>,
    pub balance: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveBetResponse {
    pub round_id: RoundId,
    pub number: u8,
    pub refunded: Decimal,
    pub balance: Decimal,
}

/// Most recently completed round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastRoundResults {
    pub round_id: RoundId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dice: Option<DiceFaces>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub voided: bool,
    pub completed_at_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorKind,
    pub message: String,
}

/// Per-session slice of a stream update: the caller's wallet and open bets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    pub balance: Decimal,
    pub bets: Vec<BetView>,
}

/// Frames pushed over the streaming channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Full table state. `seq` increases by one per state-affecting event.
    State {
        seq: u64,
        round: RoundSnapshot,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_result: Option<LastRoundResults>,
        #[serde(skip_serializing_if = "Option::is_none")]
        player: Option<PlayerView>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub round_id: RoundId,
    pub number: u8,
    pub amount: Decimal,
    pub match_count: u8,
    pub payout: Decimal,
    pub outcome: BetOutcome,
    pub settled_at_ms: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStats {
    pub rounds_completed: u64,
    pub rounds_voided: u64,
    pub total_wagered: Decimal,
    pub total_paid: Decimal,
    /// Times each face (1..=6) was rolled across retained rounds.
    pub face_counts: [u64; DICE_PER_ROUND],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiceMode {
    #[default]
    Random,
    Manual,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SetDiceRequest {
    pub dice: DiceFaces,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DiceModeRequest {
    pub mode: DiceMode,
}

/// Approved deposit or withdrawal forwarded by the payment review service.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WalletAdjustmentRequest {
    pub user: UserId,
    pub amount: Decimal,
    #[serde(default)]
    pub description: Option<String>,
    /// Idempotency key from the upstream approval.
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletView {
    pub user: UserId,
    pub balance: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub aborted_round_id: RoundId,
    pub refunded_bets: usize,
    pub round_id: RoundId,
}
