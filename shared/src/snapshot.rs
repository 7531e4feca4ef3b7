use crate::sim::ShipState;
use crate::EntityId;
use serde::{Deserialize, Serialize};

/// Anything that appears in a snapshot under a stable authority-assigned id.
pub trait Replicated: Clone {
    fn entity_id(&self) -> EntityId;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnemyState {
    pub id: EntityId,
    pub kind: u8,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub hp: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectileState {
    pub id: EntityId,
    pub owner_id: EntityId,
    pub x: f32,
    pub y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectState {
    pub id: EntityId,
    pub kind: u8,
    pub x: f32,
    pub y: f32,
    pub ttl: f32,
}

impl Replicated for ShipState {
    fn entity_id(&self) -> EntityId {
        self.id
    }
}

impl Replicated for EnemyState {
    fn entity_id(&self) -> EntityId {
        self.id
    }
}

impl Replicated for ProjectileState {
    fn entity_id(&self) -> EntityId {
        self.id
    }
}

impl Replicated for EffectState {
    fn entity_id(&self) -> EntityId {
        self.id
    }
}

/// Full authoritative world state at one host tick.
///
/// Never a delta: any single snapshot is enough to rebuild every mirror, so
/// losing or reordering one cannot corrupt the next.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldSnapshot {
    pub tick: u32,
    pub ships: Vec<ShipState>,
    pub enemies: Vec<EnemyState>,
    pub projectiles: Vec<ProjectileState>,
    pub effects: Vec<EffectState>,
    /// Highest input sequence the authority has applied from the recipient.
    /// Zero means none yet.
    pub input_ack: u32,
}

impl WorldSnapshot {
    pub fn ship_owned_by(&self, owner: &str) -> Option<&ShipState> {
        self.ships.iter().find(|ship| ship.owner == owner)
    }

    /// Same snapshot addressed to a recipient with its own ack.
    pub fn for_recipient(&self, input_ack: u32) -> WorldSnapshot {
        WorldSnapshot {
            input_ack,
            ..self.clone()
        }
    }
}
