/// Number of dice resolved per round.
pub const DICE_PER_ROUND: usize = 6;

/// Lowest face on a die.
pub const MIN_FACE: u8 = 1;

/// Highest face on a die.
pub const MAX_FACE: u8 = 6;

/// Decimal places kept by the ledger (minor units).
pub const AMOUNT_SCALE: u32 = 2;

/// Multipliers indexed by match count (0..=5). Six matches are policy-driven.
pub const MATCH_MULTIPLIERS: [u32; 6] = [0, 2, 4, 6, 8, 10];
