use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{InvalidDice, DICE_PER_ROUND, MAX_FACE, MIN_FACE};

/// Monotonic round identifier. Round 0 is never issued.
pub type RoundId = u64;

/// Opaque user identifier supplied by the external auth layer.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Waiting = 0,
    Betting = 1,
    Closed = 2,
    Result = 3,
    Completed = 4,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Waiting => "WAITING",
            Phase::Betting => "BETTING",
            Phase::Closed => "CLOSED",
            Phase::Result => "RESULT",
            Phase::Completed => "COMPLETED",
        }
    }

    /// Dice are visible from RESULT onwards.
    pub fn has_dice(&self) -> bool {
        matches!(self, Phase::Result | Phase::Completed)
    }
}

impl TryFrom<u8> for Phase {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Phase::Waiting),
            1 => Ok(Phase::Betting),
            2 => Ok(Phase::Closed),
            3 => Ok(Phase::Result),
            4 => Ok(Phase::Completed),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Six resolved die faces, each in 1..=6.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct DiceFaces([u8; DICE_PER_ROUND]);

impl DiceFaces {
    pub fn new(faces: [u8; DICE_PER_ROUND]) -> Result<Self, InvalidDice> {
        if let Some(face) = faces.iter().find(|face| !is_face(**face)) {
            return Err(InvalidDice::FaceOutOfRange(*face));
        }
        Ok(Self(faces))
    }

    pub fn faces(&self) -> [u8; DICE_PER_ROUND] {
        self.0
    }

    /// Number of dice showing `number`.
    pub fn count(&self, number: u8) -> usize {
        self.0.iter().filter(|face| **face == number).count()
    }

    pub fn total(&self) -> u32 {
        self.0.iter().map(|face| *face as u32).sum()
    }
}

impl TryFrom<Vec<u8>> for DiceFaces {
    type Error = InvalidDice;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        let faces: [u8; DICE_PER_ROUND] =
            value
                .as_slice()
                .try_into()
                .map_err(|_| InvalidDice::WrongCount {
                    expected: DICE_PER_ROUND,
                    got: value.len(),
                })?;
        Self::new(faces)
    }
}

impl From<DiceFaces> for Vec<u8> {
    fn from(value: DiceFaces) -> Self {
        value.0.to_vec()
    }
}

/// Whether `number` is a valid die face / bet target.
pub fn is_face(number: u8) -> bool {
    (MIN_FACE..=MAX_FACE).contains(&number)
}

/// A wager on one number for one round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    pub user: UserId,
    pub round_id: RoundId,
    pub number: u8,
    pub amount: Decimal,
    pub placed_at_ms: u64,
}

/// How a bet left the book.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BetOutcome {
    Win,
    Lose,
    Refunded,
}
