//! Client side of replication: prediction, reconciliation and mirrors.
//!
//! A client predicts its own ship by running every input it sends through the
//! shared ship update immediately. When a snapshot arrives it throws away the
//! inputs the authority has already applied, snaps to the authoritative ship
//! and replays the rest. Everything else in the snapshot is mirrored as is.

use log::debug;
use shared::{
    apply_input, EffectState, EnemyState, EntityId, InputSample, Keys, PeerId, ProjectileState,
    Replicated, ShipState, WorldSnapshot, INPUT_DT, NO_TARGET,
};
use std::collections::{BTreeMap, VecDeque};

/// Most unacknowledged inputs kept for replay.
pub const PENDING_INPUT_CAP: usize = 128;

/// Sent but not yet acknowledged inputs, oldest first.
#[derive(Debug, Clone)]
pub struct PendingInputBuffer {
    inputs: VecDeque<InputSample>,
    capacity: usize,
    dropped: u64,
}

impl PendingInputBuffer {
    pub fn new() -> Self {
        Self::with_capacity(PENDING_INPUT_CAP)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inputs: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    /// Appends `input`, dropping the oldest entry when full.
    pub fn push(&mut self, input: InputSample) {
        if self.inputs.len() == self.capacity {
            self.inputs.pop_front();
            self.dropped += 1;
        }
        self.inputs.push_back(input);
    }

    /// Discards everything with a sequence at or below `ack`.
    pub fn acknowledge(&mut self, ack: u32) -> usize {
        let before = self.inputs.len();
        self.inputs.retain(|input| input.sequence > ack);
        before - self.inputs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InputSample> {
        self.inputs.iter()
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn last_sequence(&self) -> Option<u32> {
        self.inputs.back().map(|input| input.sequence)
    }
}

impl Default for PendingInputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorChanges {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Local copies of authority-owned entities, keyed by entity id.
#[derive(Debug, Clone)]
pub struct MirrorSet<T: Replicated> {
    entities: BTreeMap<EntityId, T>,
}

impl<T: Replicated> MirrorSet<T> {
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
        }
    }

    /// Makes the set hold exactly `latest`.
    pub fn sync<I: IntoIterator<Item = T>>(&mut self, latest: I) -> MirrorChanges {
        let mut changes = MirrorChanges::default();
        let mut next = BTreeMap::new();

        for entity in latest {
            let id = entity.entity_id();
            if self.entities.remove(&id).is_some() {
                changes.updated += 1;
            } else {
                changes.created += 1;
            }
            next.insert(id, entity);
        }

        changes.removed = self.entities.len();
        self.entities = next;
        changes
    }

    pub fn get(&self, id: EntityId) -> Option<&T> {
        self.entities.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl<T: Replicated> Default for MirrorSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `inputs` in order over `ship` with the fixed input step.
pub fn replay<'a>(ship: &mut ShipState, inputs: impl IntoIterator<Item = &'a InputSample>) {
    for input in inputs {
        apply_input(ship, input, INPUT_DT);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Applied,
    /// Older than the last applied tick.
    Reordered,
}

/// Everything a client knows about the world.
#[derive(Debug)]
pub struct ClientReplica {
    local: PeerId,
    next_sequence: u32,
    pending: PendingInputBuffer,
    own_ship: Option<ShipState>,
    last_tick: Option<u32>,
    pub ships: MirrorSet<ShipState>,
    pub enemies: MirrorSet<EnemyState>,
    pub projectiles: MirrorSet<ProjectileState>,
    pub effects: MirrorSet<EffectState>,
}

impl ClientReplica {
    pub fn new(local: impl Into<PeerId>) -> Self {
        Self {
            local: local.into(),
            next_sequence: 1,
            pending: PendingInputBuffer::new(),
            own_ship: None,
            last_tick: None,
            ships: MirrorSet::new(),
            enemies: MirrorSet::new(),
            projectiles: MirrorSet::new(),
            effects: MirrorSet::new(),
        }
    }

    /// Builds the next input, buffers it and predicts it on the own ship.
    pub fn next_input(
        &mut self,
        keys: Keys,
        angle: f32,
        fire: bool,
        target: Option<EntityId>,
    ) -> InputSample {
        let sample = InputSample {
            keys,
            angle,
            fire,
            target: target.map_or(NO_TARGET, i64::from),
            sequence: self.next_sequence,
        };
        self.next_sequence = self.next_sequence.wrapping_add(1);

        if let Some(ship) = self.own_ship.as_mut() {
            apply_input(ship, &sample, INPUT_DT);
        }
        self.pending.push(sample.clone());
        sample
    }

    /// Reconciles against an authoritative snapshot.
    ///
    /// Prunes acknowledged inputs, snaps the own ship to the snapshot and
    /// replays what is left, then mirrors every other entity. Applying the
    /// same snapshot twice leaves the same state.
    pub fn apply_snapshot(&mut self, snapshot: &WorldSnapshot) -> SnapshotOutcome {
        if let Some(last) = self.last_tick {
            if snapshot.tick < last {
                debug!(
                    "Discarding reordered snapshot {} (last applied {})",
                    snapshot.tick, last
                );
                return SnapshotOutcome::Reordered;
            }
        }
        self.last_tick = Some(snapshot.tick);

        self.pending.acknowledge(snapshot.input_ack);

        self.own_ship = snapshot.ship_owned_by(&self.local).cloned().map(|mut ship| {
            replay(&mut ship, self.pending.iter());
            ship
        });

        let local = &self.local;
        self.ships.sync(
            snapshot
                .ships
                .iter()
                .filter(|ship| &ship.owner != local)
                .cloned(),
        );
        self.enemies.sync(snapshot.enemies.iter().cloned());
        self.projectiles.sync(snapshot.projectiles.iter().cloned());
        self.effects.sync(snapshot.effects.iter().cloned());

        SnapshotOutcome::Applied
    }

    pub fn own_ship(&self) -> Option<&ShipState> {
        self.own_ship.as_ref()
    }

    pub fn pending(&self) -> &PendingInputBuffer {
        &self.pending
    }

    pub fn last_tick(&self) -> Option<u32> {
        self.last_tick
    }

    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }
}
