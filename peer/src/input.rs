//! Scripted input for headless peers.
//!
//! A bot holds a random key combination for a random number of ticks, turning
//! slowly while it does, and fires now and then. Sequencing and prediction are
//! handled by the replica; this only decides what is "pressed".

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::Keys;
use std::f32::consts::TAU;

const MIN_HOLD_TICKS: u32 = 10;
const MAX_HOLD_TICKS: u32 = 45;
const MAX_TURN_PER_TICK: f32 = 0.08;
const FIRE_CHANCE: f64 = 0.1;

const KEY_CHOICES: [Keys; 6] = [
    Keys::empty(),
    Keys::UP,
    Keys::UP.union(Keys::LEFT),
    Keys::UP.union(Keys::RIGHT),
    Keys::UP.union(Keys::BOOST),
    Keys::DOWN,
];

/// What a bot presses on one input tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BotAction {
    pub keys: Keys,
    pub angle: f32,
    pub fire: bool,
}

pub struct BotInput {
    rng: StdRng,
    keys: Keys,
    angle: f32,
    turn_rate: f32,
    hold_ticks: u32,
}

impl BotInput {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Same seed, same script.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut rng: StdRng) -> Self {
        let angle = rng.gen_range(0.0..TAU);
        Self {
            rng,
            keys: Keys::empty(),
            angle,
            turn_rate: 0.0,
            hold_ticks: 0,
        }
    }

    pub fn update(&mut self) -> BotAction {
        if self.hold_ticks == 0 {
            self.keys = KEY_CHOICES[self.rng.gen_range(0..KEY_CHOICES.len())];
            self.turn_rate = self.rng.gen_range(-MAX_TURN_PER_TICK..=MAX_TURN_PER_TICK);
            self.hold_ticks = self.rng.gen_range(MIN_HOLD_TICKS..=MAX_HOLD_TICKS);
        }
        self.hold_ticks -= 1;
        self.angle = (self.angle + self.turn_rate).rem_euclid(TAU);

        BotAction {
            keys: self.keys,
            angle: self.angle,
            fire: self.rng.gen_bool(FIRE_CHANCE),
        }
    }
}

impl Default for BotInput {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_bots_repeat() {
        let mut a = BotInput::seeded(7);
        let mut b = BotInput::seeded(7);

        for _ in 0..200 {
            assert_eq!(a.update(), b.update());
        }
    }

    #[test]
    fn test_keys_are_held_between_changes() {
        let mut bot = BotInput::seeded(42);
        let first = bot.update();

        for _ in 1..MIN_HOLD_TICKS {
            assert_eq!(bot.update().keys, first.keys);
        }
    }

    #[test]
    fn test_angle_stays_normalised() {
        let mut bot = BotInput::seeded(3);
        for _ in 0..1000 {
            let action = bot.update();
            assert!((0.0..=TAU).contains(&action.angle));
        }
    }
}
