//! Ties relay signaling, negotiation, and replication together for one peer.
//!
//! The orchestrator is synchronous. The peer loop feeds it relay events and
//! transport events, calls the tick methods on its timers, and afterwards
//! publishes whatever signals it queued ([`SessionOrchestrator::drain_signals`]).

use crate::negotiation::{NegotiationState, Negotiator};
use crate::replication::ClientReplica;
use crate::transport::{ConnectionState, PeerTransport, TransportHandler};
use crate::world::HostWorld;
use log::{debug, info, warn};
use shared::codec::{decode, encode};
use shared::{
    DamageReport, EntityId, Envelope, GameMessage, IceCandidate, InputSample, Keys, LeaveNotice,
    LeaveReason, PeerId, PeerInfo, PeerList, Signal, SignalEnvelope, WireFormat,
};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Peer list not received yet.
    Undecided,
    Authority,
    Client,
}

/// A signal to publish through the relay; no target means broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundSignal {
    pub target: Option<PeerId>,
    pub signal: Signal,
}

pub struct SessionOrchestrator<T: PeerTransport> {
    local: PeerId,
    display_name: String,
    format: WireFormat,
    transport: T,
    negotiator: Negotiator,
    role: Role,
    authority: Option<PeerId>,
    authority_lost: bool,
    open: BTreeSet<PeerId>,
    peers: HashMap<PeerId, PeerInfo>,
    world: Option<HostWorld>,
    replica: ClientReplica,
    host_sequence: u32,
    outbox: Vec<OutboundSignal>,
    damage: Vec<DamageReport>,
}

impl<T: PeerTransport> SessionOrchestrator<T> {
    pub fn new(
        local: impl Into<PeerId>,
        display_name: impl Into<String>,
        transport: T,
        format: WireFormat,
    ) -> Self {
        let local = local.into();
        Self {
            replica: ClientReplica::new(local.clone()),
            local,
            display_name: display_name.into(),
            format,
            transport,
            negotiator: Negotiator::new(),
            role: Role::Undecided,
            authority: None,
            authority_lost: false,
            open: BTreeSet::new(),
            peers: HashMap::new(),
            world: None,
            host_sequence: 1,
            outbox: Vec::new(),
            damage: Vec::new(),
        }
    }

    /// Handles the first event of the relay stream.
    ///
    /// The role is decided here once: alone in the session means authority.
    /// Every listed peer gets an offer from us.
    pub fn on_peer_list(&mut self, list: &PeerList) {
        if self.role == Role::Undecided {
            if list.peers.is_empty() {
                self.role = Role::Authority;
                self.authority = Some(self.local.clone());
                let mut world = HostWorld::new();
                world.spawn_ship(&self.local);
                self.world = Some(world);
                info!("{} is the authority for {}", self.local, list.session_id);
            } else {
                self.role = Role::Client;
                info!(
                    "{} joined {} as a client ({} peers present)",
                    self.local,
                    list.session_id,
                    list.peers.len()
                );
            }
        }

        for remote in &list.peers {
            if remote == &self.local || self.open.contains(remote) {
                continue;
            }
            self.connect(remote);
        }
    }

    fn connect(&mut self, remote: &str) {
        match self.negotiator.connect(&mut self.transport, remote) {
            Ok(offer) => self.queue_signal(Some(remote.to_string()), offer),
            Err(e) => warn!("Could not start negotiation with {}: {}", remote, e),
        }
    }

    /// Handles one relayed signal envelope.
    pub fn on_signal(&mut self, envelope: &SignalEnvelope) {
        if envelope.peer_id == self.local {
            return;
        }
        if let Some(target) = &envelope.target_id {
            if target != &self.local {
                debug!("Ignoring signal addressed to {}", target);
                return;
            }
        }

        let signal = match envelope.decode() {
            Ok(signal) => signal,
            Err(e) => {
                debug!(
                    "Dropping malformed {} from {}: {}",
                    envelope.kind.as_str(),
                    envelope.peer_id,
                    e
                );
                return;
            }
        };
        let remote = envelope.peer_id.as_str();

        match signal {
            Signal::Join(announcement) => {
                if self.negotiator.contains(remote) || self.open.contains(remote) {
                    info!("{} rejoined, discarding its old channel", remote);
                    self.remove_peer(remote);
                }
                debug!(
                    "{} ({}) joined, waiting for its offer",
                    remote,
                    announcement.display_name.as_deref().unwrap_or("unnamed")
                );
            }
            Signal::Leave(notice) => {
                info!("{} left the session ({:?})", remote, notice.reason);
                self.remove_peer(remote);
            }
            Signal::Heartbeat => {}
            negotiation => match self.negotiator.handle(&mut self.transport, remote, negotiation) {
                Ok(Some(reply)) => self.queue_signal(Some(remote.to_string()), reply),
                Ok(None) => {}
                Err(e) => debug!("Negotiation with {} failed: {}", remote, e),
            },
        }
    }

    /// Samples one input tick. Clients send to the authority once its channel
    /// is open; the authority applies its own input directly.
    pub fn input_tick(
        &mut self,
        keys: Keys,
        angle: f32,
        fire: bool,
        target: Option<EntityId>,
    ) -> Option<InputSample> {
        match self.role {
            Role::Authority => {
                let sample = InputSample {
                    keys,
                    angle,
                    fire,
                    target: target.map_or(shared::NO_TARGET, i64::from),
                    sequence: self.host_sequence,
                };
                self.host_sequence = self.host_sequence.wrapping_add(1);
                let local = self.local.clone();
                if let Some(world) = self.world.as_mut() {
                    world.apply_input(&local, &sample);
                }
                Some(sample)
            }
            Role::Client => {
                let authority = self.authority.clone()?;
                if !self.open.contains(&authority) {
                    return None;
                }
                let sample = self.replica.next_input(keys, angle, fire, target);
                self.send_message(&authority, GameMessage::Input(sample.clone()));
                Some(sample)
            }
            Role::Undecided => None,
        }
    }

    /// Advances the authority's tick and sends a snapshot to every open client.
    pub fn snapshot_tick(&mut self) -> Option<u32> {
        let world = self.world.as_mut()?;
        let snapshot = world.advance();

        let recipients: Vec<(PeerId, u32)> = self
            .open
            .iter()
            .map(|remote| (remote.clone(), world.input_ack(remote)))
            .collect();
        for (remote, ack) in recipients {
            self.send_message(&remote, GameMessage::WorldState(snapshot.for_recipient(ack)));
        }
        Some(snapshot.tick)
    }

    /// Reports damage: applied locally on the authority, sent to it otherwise.
    pub fn report_damage(&mut self, report: DamageReport) {
        if let Some(world) = self.world.as_mut() {
            world.apply_damage(&report);
            return;
        }
        if let Some(authority) = self.authority.clone() {
            self.send_message(&authority, GameMessage::Damage(report));
        }
    }

    /// Drops every trace of `remote`: negotiation, channel, ship, info.
    pub fn remove_peer(&mut self, remote: &str) {
        self.negotiator.remove(&mut self.transport, remote);
        self.open.remove(remote);
        self.peers.remove(remote);

        if let Some(world) = self.world.as_mut() {
            world.remove_ship(remote);
        }

        if self.role == Role::Client
            && self.authority.as_deref() == Some(remote)
            && !self.authority_lost
        {
            self.authority_lost = true;
            warn!(
                "Authority {} is gone; keeping the last snapshot (tick {:?})",
                remote,
                self.replica.last_tick()
            );
        }
    }

    /// Says goodbye over every open channel and the relay, then closes all.
    pub fn leave(&mut self) {
        let info = self.local_info();
        let open: Vec<PeerId> = self.open.iter().cloned().collect();
        for remote in &open {
            self.send_message(remote, GameMessage::Leave(info.clone()));
        }

        self.negotiator.close_all(&mut self.transport);
        self.open.clear();
        self.peers.clear();
        self.queue_signal(
            None,
            Signal::Leave(LeaveNotice {
                reason: LeaveReason::Left,
            }),
        );
        info!("{} left the session", self.local);
    }

    /// Drops negotiations opened by candidates that no offer followed.
    pub fn prune_stalled_negotiations(&mut self, timeout: Duration) -> Vec<PeerId> {
        let dropped = self.negotiator.prune_unanswered(&mut self.transport, timeout);
        for remote in &dropped {
            info!("Gave up on {}: no offer within {:?}", remote, timeout);
            self.peers.remove(remote);
        }
        dropped
    }

    /// Signals queued for the relay since the last call.
    pub fn drain_signals(&mut self) -> Vec<OutboundSignal> {
        std::mem::take(&mut self.outbox)
    }

    /// Damage reports received as a client, for presentation code.
    pub fn drain_damage(&mut self) -> Vec<DamageReport> {
        std::mem::take(&mut self.damage)
    }

    fn queue_signal(&mut self, target: Option<PeerId>, signal: Signal) {
        self.outbox.push(OutboundSignal { target, signal });
    }

    fn local_info(&self) -> PeerInfo {
        PeerInfo {
            peer_id: self.local.clone(),
            display_name: self.display_name.clone(),
            is_authority: self.role == Role::Authority,
        }
    }

    fn send_message(&mut self, remote: &str, message: GameMessage) {
        let envelope = Envelope::new(self.local.clone(), message);
        let frame = match encode(&envelope, self.format) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Failed to encode {}: {}", envelope.message.kind().as_str(), e);
                return;
            }
        };
        if let Err(e) = self.transport.send(remote, &frame) {
            debug!("Send to {} failed: {}", remote, e);
        }
    }

    fn handle_message(&mut self, remote: &str, envelope: Envelope) {
        match envelope.message {
            GameMessage::Input(sample) => match self.world.as_mut() {
                Some(world) => {
                    world.apply_input(remote, &sample);
                }
                None => debug!("Input from {} but not the authority", remote),
            },
            GameMessage::WorldState(snapshot) => {
                if self.role != Role::Client || self.authority.as_deref() != Some(remote) {
                    debug!("Ignoring snapshot from non-authority {}", remote);
                    return;
                }
                self.replica.apply_snapshot(&snapshot);
            }
            GameMessage::Join(info) => {
                if info.is_authority && self.role == Role::Client {
                    if self.authority.as_deref() != Some(remote) {
                        info!("Authority is {} ({})", remote, info.display_name);
                    }
                    self.authority = Some(remote.to_string());
                    self.authority_lost = false;
                }
                self.peers.insert(remote.to_string(), info);
            }
            GameMessage::Leave(_) => {
                info!("{} said goodbye", remote);
                self.remove_peer(remote);
            }
            GameMessage::Damage(report) => match self.world.as_mut() {
                Some(world) => {
                    world.apply_damage(&report);
                }
                None => self.damage.push(report),
            },
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_authority(&self) -> bool {
        self.role == Role::Authority
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    pub fn is_open(&self, remote: &str) -> bool {
        self.open.contains(remote)
    }

    pub fn open_peers(&self) -> impl Iterator<Item = &PeerId> {
        self.open.iter()
    }

    pub fn peer_info(&self, remote: &str) -> Option<&PeerInfo> {
        self.peers.get(remote)
    }

    pub fn negotiation_state(&self, remote: &str) -> Option<NegotiationState> {
        self.negotiator.get(remote).map(|n| n.state())
    }

    pub fn world(&self) -> Option<&HostWorld> {
        self.world.as_ref()
    }

    pub fn world_mut(&mut self) -> Option<&mut HostWorld> {
        self.world.as_mut()
    }

    pub fn replica(&self) -> &ClientReplica {
        &self.replica
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }
}

impl<T: PeerTransport> TransportHandler for SessionOrchestrator<T> {
    fn on_ice_candidate(&mut self, remote: &str, candidate: IceCandidate) {
        self.queue_signal(Some(remote.to_string()), Signal::Candidate(candidate));
    }

    fn on_connection_state_change(&mut self, remote: &str, state: ConnectionState) {
        match state {
            ConnectionState::Connected => {
                if !self.negotiator.mark_open(remote) {
                    debug!("Connected event for unknown peer {}", remote);
                    return;
                }
                self.open.insert(remote.to_string());
                info!("Channel to {} is open", remote);

                if let Some(world) = self.world.as_mut() {
                    world.spawn_ship(remote);
                }
                let info = self.local_info();
                self.send_message(remote, GameMessage::Join(info));
            }
            ConnectionState::Disconnected => {
                warn!("Channel to {} interrupted; waiting for it to recover", remote);
            }
            state if state.is_terminal() => {
                info!("Channel to {} ended ({:?})", remote, state);
                self.remove_peer(remote);
            }
            _ => {}
        }
    }

    fn on_message(&mut self, remote: &str, frame: &[u8]) {
        if !self.open.contains(remote) {
            debug!("Frame from {} before its channel opened", remote);
            return;
        }
        match decode(frame, self.format) {
            Ok(envelope) => self.handle_message(remote, envelope),
            Err(e) => debug!("Dropping undecodable frame from {}: {}", remote, e),
        }
    }
}
