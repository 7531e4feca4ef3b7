//! Session and peer bookkeeping for the relay
//!
//! The registry owns every session, every peer inside it, and the sending half
//! of each peer's outbound queue. It is a plain data structure with no locking
//! of its own: [`crate::service::RelayService`] wraps it in a lock and keeps
//! each critical section to a single method call.
//!
//! Queues are bounded and written with `try_send`. A full queue means the
//! consumer stalled, so the new message is dropped and counted rather than
//! making the sender wait.

use crate::error::RelayError;
use log::{debug, info};
use serde::Serialize;
use shared::{
    LeaveNotice, LeaveReason, PeerAnnouncement, PeerId, PeerList, RelayEvent, SessionSummary,
    Signal, SignalEnvelope, SignalKind,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// A registered peer and the producer side of its event stream
#[derive(Debug)]
pub struct Peer {
    pub id: PeerId,
    pub session_id: String,
    pub display_name: Option<String>,
    /// Last time this peer opened its stream or published anything
    pub last_seen: Instant,
    /// Messages that could not be queued for this peer
    pub dropped: u64,
    sender: mpsc::Sender<RelayEvent>,
}

impl Peer {
    fn new(
        id: &str,
        session_id: &str,
        display_name: Option<String>,
        sender: mpsc::Sender<RelayEvent>,
    ) -> Self {
        Self {
            id: id.to_string(),
            session_id: session_id.to_string(),
            display_name,
            last_seen: Instant::now(),
            dropped: 0,
            sender,
        }
    }

    /// Records activity from this peer.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// True if the peer has been silent for longer than `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    /// Queues `event` without waiting. Returns false when it was dropped.
    fn enqueue(&mut self, event: RelayEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                debug!(
                    "Queue full for peer {} in session {}, dropped message ({} total)",
                    self.id, self.session_id, self.dropped
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped += 1;
                debug!(
                    "Stream closed for peer {} in session {}, dropped message",
                    self.id, self.session_id
                );
                false
            }
        }
    }
}

#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub peers: HashMap<PeerId, Peer>,
    pub created_at: Instant,
}

impl Session {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            peers: HashMap::new(),
            created_at: Instant::now(),
        }
    }

    /// Sorted ids of every peer except `except`
    fn peer_ids_except(&self, except: &str) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self
            .peers
            .keys()
            .filter(|id| id.as_str() != except)
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    fn deliver(&mut self, target: Option<&str>, from: &str, event: RelayEvent) -> Delivery {
        let mut delivery = Delivery::default();
        match target {
            Some(target) => match self.peers.get_mut(target) {
                Some(peer) => delivery.record(peer.enqueue(event)),
                None => {
                    debug!(
                        "Target {} not in session {}, dropping message from {}",
                        target, self.id, from
                    );
                    delivery.dropped += 1;
                }
            },
            None => {
                for peer in self.peers.values_mut().filter(|p| p.id != from) {
                    delivery.record(peer.enqueue(event.clone()));
                }
            }
        }
        delivery
    }
}

/// Outcome of relaying one message
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

impl Delivery {
    fn record(&mut self, queued: bool) {
        if queued {
            self.delivered += 1;
        } else {
            self.dropped += 1;
        }
    }
}

/// Directory of sessions and their peers
pub struct PeerRegistry {
    sessions: HashMap<String, Session>,
    queue_capacity: usize,
}

impl PeerRegistry {
    /// Creates an empty registry whose per-peer queues hold `queue_capacity`
    /// messages.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Registers `peer_id` in `session_id` and returns the other peers plus
    /// the receiving end of the new peer's queue.
    ///
    /// The queue already holds the peer list as its first event. Rejoining
    /// replaces the previous queue, which ends the previous stream. Everyone
    /// else in the session is sent a `join` signal.
    pub fn join(
        &mut self,
        session_id: &str,
        peer_id: &str,
        display_name: Option<String>,
    ) -> (Vec<PeerId>, mpsc::Receiver<RelayEvent>) {
        let session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                info!("Session {} created", session_id);
                Session::new(session_id)
            });

        if session.peers.remove(peer_id).is_some() {
            info!("Peer {} rejoined session {}", peer_id, session_id);
        }

        let existing = session.peer_ids_except(peer_id);
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let mut peer = Peer::new(peer_id, session_id, display_name.clone(), sender);
        peer.enqueue(RelayEvent::Peers(PeerList {
            session_id: session_id.to_string(),
            peers: existing.clone(),
        }));
        session.peers.insert(peer_id.to_string(), peer);

        let announcement = Signal::Join(PeerAnnouncement { display_name });
        match SignalEnvelope::new(session_id, peer_id, None, &announcement) {
            Ok(envelope) => {
                session.deliver(None, peer_id, RelayEvent::Signal(envelope));
            }
            Err(e) => debug!("Failed to build join announcement: {}", e),
        }

        info!(
            "Peer {} joined session {} ({} peers)",
            peer_id,
            session_id,
            session.peers.len()
        );

        (existing, receiver)
    }

    /// Relays a published envelope on behalf of its sender.
    ///
    /// `heartbeat` only refreshes the sender, `leave` unregisters it, every
    /// other kind goes to `target_id` or, when absent, the rest of the session.
    pub fn send(&mut self, envelope: &SignalEnvelope) -> Result<Delivery, RelayError> {
        let session = self
            .sessions
            .get_mut(&envelope.session_id)
            .ok_or_else(|| RelayError::SessionNotFound(envelope.session_id.clone()))?;

        let sender = session
            .peers
            .get_mut(&envelope.peer_id)
            .ok_or_else(|| RelayError::PeerNotFound {
                session: envelope.session_id.clone(),
                peer: envelope.peer_id.clone(),
            })?;
        sender.touch();

        match envelope.kind {
            SignalKind::Heartbeat => Ok(Delivery::default()),
            SignalKind::Leave => Ok(self
                .leave(&envelope.session_id, &envelope.peer_id, LeaveReason::Left)
                .unwrap_or_default()),
            _ => Ok(session.deliver(
                envelope.target_id.as_deref(),
                &envelope.peer_id,
                RelayEvent::Signal(envelope.clone()),
            )),
        }
    }

    /// Unregisters a peer and tells the rest of the session.
    ///
    /// Returns `None` if the peer was not registered. A session left empty is
    /// removed.
    pub fn leave(
        &mut self,
        session_id: &str,
        peer_id: &str,
        reason: LeaveReason,
    ) -> Option<Delivery> {
        let session = self.sessions.get_mut(session_id)?;
        session.peers.remove(peer_id)?;

        info!(
            "Peer {} left session {} ({:?}, {} remaining)",
            peer_id,
            session_id,
            reason,
            session.peers.len()
        );

        let delivery = match SignalEnvelope::new(
            session_id,
            peer_id,
            None,
            &Signal::Leave(LeaveNotice { reason }),
        ) {
            Ok(envelope) => session.deliver(None, peer_id, RelayEvent::Signal(envelope)),
            Err(e) => {
                debug!("Failed to build leave notice: {}", e);
                Delivery::default()
            }
        };

        if session.peers.is_empty() {
            self.sessions.remove(session_id);
            info!("Session {} closed", session_id);
        }

        Some(delivery)
    }

    /// Refreshes a peer's activity timestamp. Returns false if unknown.
    pub fn touch(&mut self, session_id: &str, peer_id: &str) -> bool {
        match self
            .sessions
            .get_mut(session_id)
            .and_then(|session| session.peers.get_mut(peer_id))
        {
            Some(peer) => {
                peer.touch();
                true
            }
            None => false,
        }
    }

    /// Evicts every peer idle for longer than `timeout` and returns
    /// `(session, peer)` for each one removed.
    pub fn sweep(&mut self, timeout: Duration) -> Vec<(String, PeerId)> {
        let idle: Vec<(String, PeerId)> = self
            .sessions
            .values()
            .flat_map(|session| session.peers.values())
            .filter(|peer| peer.is_timed_out(timeout))
            .map(|peer| (peer.session_id.clone(), peer.id.clone()))
            .collect();

        for (session_id, peer_id) in &idle {
            self.leave(session_id, peer_id, LeaveReason::Timeout);
        }

        self.sessions.retain(|_, session| !session.peers.is_empty());
        idle
    }

    /// Lists every live session with its peer count, sorted by session id.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .values()
            .map(|session| SessionSummary {
                session_id: session.id.clone(),
                peer_count: session.peers.len(),
                age_secs: session.created_at.elapsed().as_secs(),
            })
            .collect();
        summaries.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        summaries
    }

    /// Looks up one registered peer.
    pub fn peer(&self, session_id: &str, peer_id: &str) -> Option<&Peer> {
        self.sessions.get(session_id)?.peers.get(peer_id)
    }

    /// Whether `peer_id` is registered in `session_id`.
    pub fn contains(&self, session_id: &str, peer_id: &str) -> bool {
        self.peer(session_id, peer_id).is_some()
    }

    /// Number of sessions with at least one peer.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of peers across all sessions.
    pub fn peer_count(&self) -> usize {
        self.sessions.values().map(|s| s.peers.len()).sum()
    }

    #[cfg(test)]
    fn peer_mut(&mut self, session_id: &str, peer_id: &str) -> Option<&mut Peer> {
        self.sessions.get_mut(session_id)?.peers.get_mut(peer_id)
    }
}
