//! The authority's simulation.
//!
//! Ships are owned by peers and moved only by their owner's inputs. Enemies,
//! projectiles and effects are populated by gameplay code outside this crate;
//! the world just carries them into snapshots and applies damage reports.

use log::{debug, info};
use shared::{
    apply_input, DamageReport, EffectState, EnemyState, EntityId, InputSample, PeerId,
    ProjectileState, ShipState, TargetKind, WorldSnapshot, INPUT_DT,
};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
pub struct HostWorld {
    tick: u32,
    next_entity_id: EntityId,
    ships: BTreeMap<PeerId, ShipState>,
    /// Last applied input sequence per owner.
    acks: HashMap<PeerId, u32>,
    pub enemies: Vec<EnemyState>,
    pub projectiles: Vec<ProjectileState>,
    pub effects: Vec<EffectState>,
}

impl HostWorld {
    /// Creates an empty world at tick 0.
    pub fn new() -> Self {
        Self {
            tick: 0,
            next_entity_id: 1,
            ships: BTreeMap::new(),
            acks: HashMap::new(),
            enemies: Vec::new(),
            projectiles: Vec::new(),
            effects: Vec::new(),
        }
    }

    fn allocate_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    /// Gives `owner` a ship unless it already has one.
    pub fn spawn_ship(&mut self, owner: &str) -> EntityId {
        if let Some(ship) = self.ships.get(owner) {
            return ship.id;
        }

        let id = self.allocate_id();
        self.ships
            .insert(owner.to_string(), ShipState::spawn(id, owner));
        self.acks.insert(owner.to_string(), 0);
        info!("Spawned ship {} for {}", id, owner);
        id
    }

    /// Removes the ship owned by `owner` along with its input ack.
    pub fn remove_ship(&mut self, owner: &str) -> Option<ShipState> {
        self.acks.remove(owner);
        let removed = self.ships.remove(owner);
        if let Some(ship) = &removed {
            info!("Removed ship {} of {}", ship.id, owner);
        }
        removed
    }

    /// Spawns an enemy and returns its id.
    ///
    /// Ids come from the same counter as ship ids.
    pub fn spawn_enemy(&mut self, kind: u8, x: f32, y: f32, hp: i32) -> EntityId {
        let id = self.allocate_id();
        self.enemies.push(EnemyState {
            id,
            kind,
            x,
            y,
            angle: 0.0,
            hp,
        });
        id
    }

    /// Applies one input from `owner` with the fixed input step.
    ///
    /// Returns false for unknown owners and for samples that are not newer
    /// than the last one applied.
    pub fn apply_input(&mut self, owner: &str, input: &InputSample) -> bool {
        let Some(ship) = self.ships.get_mut(owner) else {
            debug!("Input from {} who has no ship", owner);
            return false;
        };

        let ack = self.acks.entry(owner.to_string()).or_insert(0);
        if input.sequence <= *ack {
            debug!(
                "Skipping stale input {} from {} (last {})",
                input.sequence, owner, ack
            );
            return false;
        }

        apply_input(ship, input, INPUT_DT);
        *ack = input.sequence;
        true
    }

    /// Highest input sequence applied for `owner`, or 0 if none yet.
    pub fn input_ack(&self, owner: &str) -> u32 {
        self.acks.get(owner).copied().unwrap_or(0)
    }

    /// Hit points saturate at zero. Returns false if the target is unknown.
    pub fn apply_damage(&mut self, report: &DamageReport) -> bool {
        let hp = match report.target_kind {
            TargetKind::Ship => self
                .ships
                .values_mut()
                .find(|ship| ship.id == report.target_id)
                .map(|ship| &mut ship.hp),
            TargetKind::Enemy => self
                .enemies
                .iter_mut()
                .find(|enemy| enemy.id == report.target_id)
                .map(|enemy| &mut enemy.hp),
        };

        match hp {
            Some(hp) => {
                *hp = hp.saturating_sub(report.amount).max(0);
                true
            }
            None => {
                debug!("Damage for unknown {:?} {}", report.target_kind, report.target_id);
                false
            }
        }
    }

    /// Advances the tick and captures the world. `input_ack` is left at zero;
    /// use [`WorldSnapshot::for_recipient`] per client.
    pub fn advance(&mut self) -> WorldSnapshot {
        self.tick = self.tick.wrapping_add(1);
        self.snapshot()
    }

    /// Captures the current world without advancing the tick.
    ///
    /// `input_ack` is left at 0; it is filled in per recipient.
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            tick: self.tick,
            ships: self.ships.values().cloned().collect(),
            enemies: self.enemies.clone(),
            projectiles: self.projectiles.clone(),
            effects: self.effects.clone(),
            input_ack: 0,
        }
    }

    /// The ship owned by `owner`, if it has one.
    pub fn ship(&self, owner: &str) -> Option<&ShipState> {
        self.ships.get(owner)
    }

    pub fn ship_count(&self) -> usize {
        self.ships.len()
    }

    /// Ticks advanced so far.
    pub fn tick(&self) -> u32 {
        self.tick
    }
}

impl Default for HostWorld {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Keys;

    #[test]
    fn test_spawn_is_idempotent() {
        let mut world = HostWorld::new();
        let host = world.spawn_ship("host");
        let guest = world.spawn_ship("guest");

        assert_ne!(host, guest);
        assert_eq!(world.spawn_ship("guest"), guest);
        assert_eq!(world.ship_count(), 2);
    }

    #[test]
    fn test_apply_input_moves_ship_and_acks() {
        let mut world = HostWorld::new();
        world.spawn_ship("guest");
        let start_x = world.ship("guest").unwrap().x;

        assert!(world.apply_input("guest", &InputSample::new(1, Keys::UP, 0.0)));

        assert!(world.ship("guest").unwrap().x > start_x);
        assert_eq!(world.input_ack("guest"), 1);
    }

    #[test]
    fn test_stale_inputs_are_skipped() {
        let mut world = HostWorld::new();
        world.spawn_ship("guest");

        assert!(world.apply_input("guest", &InputSample::new(3, Keys::UP, 0.0)));
        let after = world.ship("guest").cloned();

        assert!(!world.apply_input("guest", &InputSample::new(2, Keys::UP, 0.0)));
        assert!(!world.apply_input("guest", &InputSample::new(3, Keys::UP, 0.0)));
        assert_eq!(world.ship("guest").cloned(), after);
        assert_eq!(world.input_ack("guest"), 3);
    }

    #[test]
    fn test_input_for_unknown_owner() {
        let mut world = HostWorld::new();
        assert!(!world.apply_input("nobody", &InputSample::new(1, Keys::UP, 0.0)));
        assert_eq!(world.input_ack("nobody"), 0);
    }

    #[test]
    fn test_advance_builds_full_snapshot() {
        let mut world = HostWorld::new();
        world.spawn_ship("host");
        world.spawn_ship("guest");
        world.spawn_enemy(2, 10.0, 20.0, 40);

        let first = world.advance();
        let second = world.advance();

        assert_eq!(first.tick, 1);
        assert_eq!(second.tick, 2);
        assert_eq!(second.ships.len(), 2);
        assert_eq!(second.enemies.len(), 1);
        assert_eq!(second.input_ack, 0);
    }

    #[test]
    fn test_damage_saturates_at_zero() {
        let mut world = HostWorld::new();
        let ship = world.spawn_ship("guest");
        let enemy = world.spawn_enemy(1, 0.0, 0.0, 30);

        assert!(world.apply_damage(&DamageReport {
            target_kind: TargetKind::Enemy,
            target_id: enemy,
            amount: 50,
            source_id: ship,
        }));
        assert!(world.apply_damage(&DamageReport {
            target_kind: TargetKind::Ship,
            target_id: ship,
            amount: 25,
            source_id: enemy,
        }));
        assert!(!world.apply_damage(&DamageReport {
            target_kind: TargetKind::Enemy,
            target_id: 999,
            amount: 1,
            source_id: ship,
        }));

        assert_eq!(world.enemies[0].hp, 0);
        assert_eq!(world.ship("guest").unwrap().hp, 75);
    }

    #[test]
    fn test_remove_ship_clears_ack() {
        let mut world = HostWorld::new();
        world.spawn_ship("guest");
        world.apply_input("guest", &InputSample::new(1, Keys::UP, 0.0));

        assert!(world.remove_ship("guest").is_some());
        assert!(world.remove_ship("guest").is_none());
        assert_eq!(world.input_ack("guest"), 0);
    }
}
