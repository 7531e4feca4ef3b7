//! The deterministic ship update.
//!
//! The authority runs this on every input it receives and clients run the
//! exact same code for prediction and replay, so a client whose inputs all
//! arrive ends up bit-for-bit where the authority put it.

use crate::input::{InputSample, Keys};
use crate::{
    EntityId, PeerId, SHIP_ACCELERATION, SHIP_DRAG, SHIP_MAX_HP, SHIP_MAX_SPEED, WORLD_HEIGHT,
    WORLD_WIDTH,
};
use serde::{Deserialize, Serialize};

const BOOST_FACTOR: f32 = 1.5;

/// Replicated fields of a player ship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipState {
    pub id: EntityId,
    pub owner: PeerId,
    pub x: f32,
    pub y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub angle: f32,
    pub hp: i32,
    pub firing: bool,
}

impl ShipState {
    pub fn new(id: EntityId, owner: impl Into<PeerId>, x: f32, y: f32) -> Self {
        Self {
            id,
            owner: owner.into(),
            x,
            y,
            vel_x: 0.0,
            vel_y: 0.0,
            angle: 0.0,
            hp: SHIP_MAX_HP,
            firing: false,
        }
    }

    /// Spawn point spread along the arena by entity id.
    pub fn spawn(id: EntityId, owner: impl Into<PeerId>) -> Self {
        let x = 100.0 + (id as f32 * 160.0) % (WORLD_WIDTH - 200.0);
        let y = WORLD_HEIGHT / 2.0;
        Self::new(id, owner, x, y)
    }

    pub fn speed(&self) -> f32 {
        (self.vel_x * self.vel_x + self.vel_y * self.vel_y).sqrt()
    }
}

/// Advances `ship` by one input step of `dt` seconds.
pub fn apply_input(ship: &mut ShipState, input: &InputSample, dt: f32) {
    ship.angle = input.angle;
    ship.firing = input.fire;

    let (fx, fy) = (input.angle.cos(), input.angle.sin());
    let mut ax = 0.0;
    let mut ay = 0.0;
    if input.keys.contains(Keys::UP) {
        ax += fx;
        ay += fy;
    }
    if input.keys.contains(Keys::DOWN) {
        ax -= fx;
        ay -= fy;
    }
    if input.keys.contains(Keys::LEFT) {
        ax += fy;
        ay -= fx;
    }
    if input.keys.contains(Keys::RIGHT) {
        ax -= fy;
        ay += fx;
    }

    let magnitude = (ax * ax + ay * ay).sqrt();
    if magnitude > 0.0 {
        let mut acceleration = SHIP_ACCELERATION;
        if input.keys.contains(Keys::BOOST) {
            acceleration *= BOOST_FACTOR;
        }
        ship.vel_x += ax / magnitude * acceleration * dt;
        ship.vel_y += ay / magnitude * acceleration * dt;
    } else {
        ship.vel_x *= SHIP_DRAG;
        ship.vel_y *= SHIP_DRAG;
    }

    let speed = ship.speed();
    if speed > SHIP_MAX_SPEED {
        let scale = SHIP_MAX_SPEED / speed;
        ship.vel_x *= scale;
        ship.vel_y *= scale;
    }

    ship.x += ship.vel_x * dt;
    ship.y += ship.vel_y * dt;

    if ship.x < 0.0 || ship.x > WORLD_WIDTH {
        ship.x = ship.x.clamp(0.0, WORLD_WIDTH);
        ship.vel_x = 0.0;
    }
    if ship.y < 0.0 || ship.y > WORLD_HEIGHT {
        ship.y = ship.y.clamp(0.0, WORLD_HEIGHT);
        ship.vel_y = 0.0;
    }
}
