//! Dice resolution.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sixdice_types::{api::DiceMode, DiceFaces, DICE_PER_ROUND, MAX_FACE, MIN_FACE};

/// How a round's dice were produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub dice: DiceFaces,
    /// Supplied by an operator rather than rolled.
    pub forced: bool,
}

/// Rolls six independent uniform faces, or hands back an operator override.
#[derive(Debug)]
pub struct DiceRoller {
    rng: StdRng,
    mode: DiceMode,
}

impl DiceRoller {
    /// `seed` makes the sequence reproducible; `None` seeds from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            mode: DiceMode::default(),
        }
    }

    pub fn mode(&self) -> DiceMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: DiceMode) {
        self.mode = mode;
    }

    pub fn roll(&mut self) -> DiceFaces {
        let mut faces = [MIN_FACE; DICE_PER_ROUND];
        for face in faces.iter_mut() {
            *face = self.rng.gen_range(MIN_FACE..=MAX_FACE);
        }
        // Every face is drawn from MIN_FACE..=MAX_FACE.
        DiceFaces::new(faces).unwrap_or_else(|_| unreachable!("rolled face out of range"))
    }

    /// Produce the round's dice. An override always wins; in manual mode a
    /// missing override falls back to a roll and the caller is told so.
    pub fn resolve(&mut self, override_dice: Option<DiceFaces>) -> (Resolution, bool) {
        match override_dice {
            Some(dice) => (Resolution { dice, forced: true }, false),
            None => {
                let missing_manual = self.mode == DiceMode::Manual;
                (
                    Resolution {
                        dice: self.roll(),
                        forced: false,
                    },
                    missing_manual,
                )
            }
        }
    }
}
