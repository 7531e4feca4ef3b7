//! In-process transport for tests and headless bots.
//!
//! Every endpoint created from one [`MemoryNetwork`] can reach every other.
//! Negotiation is modelled closely enough to exercise the real ordering
//! hazards: creating an offer or answer emits one local candidate, candidates
//! are rejected until a remote description is set, and a channel opens only
//! once both sides have a remote description and have applied a candidate.
//! Frames can be dropped at random to simulate a lossy link.

use crate::error::TransportError;
use crate::transport::{ConnectionState, PeerTransport, TransportEvent, TransportEventKind};
use log::debug;
use rand::Rng;
use shared::{IceCandidate, PeerId, SessionDescription};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct Link {
    remote_description: bool,
    candidates_applied: usize,
    open: bool,
}

impl Link {
    fn ready(&self) -> bool {
        self.remote_description && self.candidates_applied > 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub delivered: u64,
    pub lost: u64,
}

#[derive(Debug, Default)]
struct Hub {
    endpoints: HashMap<PeerId, mpsc::UnboundedSender<TransportEvent>>,
    /// Keyed by (local, remote); each side of a pair has its own entry.
    links: HashMap<(PeerId, PeerId), Link>,
    loss: f64,
    next_candidate: u64,
    stats: NetworkStats,
}

impl Hub {
    fn emit(&self, to: &str, about: &str, kind: TransportEventKind) {
        if let Some(sender) = self.endpoints.get(to) {
            let _ = sender.send(TransportEvent::new(about, kind));
        }
    }

    fn link_mut(&mut self, local: &str, remote: &str) -> Result<&mut Link, TransportError> {
        self.links
            .get_mut(&(local.to_string(), remote.to_string()))
            .ok_or_else(|| TransportError::UnknownPeer(remote.to_string()))
    }

    fn local_candidate(&mut self, local: &str, remote: &str) {
        self.next_candidate += 1;
        let candidate = IceCandidate::new(format!(
            "candidate:{} 1 udp 2122260223 memory {} {}",
            self.next_candidate, local, remote
        ));
        self.emit(local, remote, TransportEventKind::IceCandidate(candidate));
    }

    fn try_open(&mut self, local: &str, remote: &str) {
        let forward = (local.to_string(), remote.to_string());
        let backward = (remote.to_string(), local.to_string());

        let ready = match (self.links.get(&forward), self.links.get(&backward)) {
            (Some(a), Some(b)) => a.ready() && b.ready() && !(a.open && b.open),
            _ => false,
        };
        if !ready {
            return;
        }

        for key in [&forward, &backward] {
            if let Some(link) = self.links.get_mut(key) {
                link.open = true;
            }
        }
        debug!("Memory channel {} <-> {} open", local, remote);
        let connected = TransportEventKind::ConnectionState(ConnectionState::Connected);
        self.emit(local, remote, connected.clone());
        self.emit(remote, local, connected);
    }
}

/// Shared switchboard for [`MemoryTransport`] endpoints.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops each frame with probability `loss` (clamped to `0.0..=1.0`).
    pub fn with_loss(loss: f64) -> Self {
        let network = Self::new();
        network.set_loss(loss);
        network
    }

    pub fn set_loss(&self, loss: f64) {
        lock(&self.hub).loss = loss.clamp(0.0, 1.0);
    }

    /// Registers `local` and returns its transport plus the event feed the peer
    /// loop should drain. Registering the same id again replaces the feed.
    pub fn endpoint(
        &self,
        local: impl Into<PeerId>,
    ) -> (MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let local = local.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        lock(&self.hub).endpoints.insert(local.clone(), sender);

        let transport = MemoryTransport {
            local,
            hub: Arc::clone(&self.hub),
        };
        (transport, receiver)
    }

    pub fn stats(&self) -> NetworkStats {
        lock(&self.hub).stats
    }
}

fn lock(hub: &Mutex<Hub>) -> MutexGuard<'_, Hub> {
    hub.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
pub struct MemoryTransport {
    local: PeerId,
    hub: Arc<Mutex<Hub>>,
}

impl MemoryTransport {
    pub fn local_id(&self) -> &str {
        &self.local
    }

    fn describe(&self, sdp_type: &str, remote: &str) -> String {
        format!("v=0\r\no=memory {} {} {}\r\n", self.local, remote, sdp_type)
    }
}

impl PeerTransport for MemoryTransport {
    fn create_connection(&mut self, remote: &str) -> Result<(), TransportError> {
        let mut hub = lock(&self.hub);
        hub.links
            .insert((self.local.clone(), remote.to_string()), Link::default());
        Ok(())
    }

    fn create_offer(&mut self, remote: &str) -> Result<SessionDescription, TransportError> {
        let mut hub = lock(&self.hub);
        hub.link_mut(&self.local, remote)?;
        hub.local_candidate(&self.local, remote);
        Ok(SessionDescription::offer(self.describe("offer", remote)))
    }

    fn create_answer(&mut self, remote: &str) -> Result<SessionDescription, TransportError> {
        let mut hub = lock(&self.hub);
        if !hub.link_mut(&self.local, remote)?.remote_description {
            return Err(TransportError::NoRemoteDescription(remote.to_string()));
        }
        hub.local_candidate(&self.local, remote);
        Ok(SessionDescription::answer(self.describe("answer", remote)))
    }

    fn set_remote_description(
        &mut self,
        remote: &str,
        _description: &SessionDescription,
    ) -> Result<(), TransportError> {
        let mut hub = lock(&self.hub);
        hub.link_mut(&self.local, remote)?.remote_description = true;
        hub.try_open(&self.local, remote);
        Ok(())
    }

    fn add_ice_candidate(
        &mut self,
        remote: &str,
        _candidate: &IceCandidate,
    ) -> Result<(), TransportError> {
        let mut hub = lock(&self.hub);
        let link = hub.link_mut(&self.local, remote)?;
        if !link.remote_description {
            return Err(TransportError::NoRemoteDescription(remote.to_string()));
        }
        link.candidates_applied += 1;
        hub.try_open(&self.local, remote);
        Ok(())
    }

    fn send(&mut self, remote: &str, frame: &[u8]) -> Result<(), TransportError> {
        let mut hub = lock(&self.hub);
        let open = hub
            .links
            .get(&(self.local.clone(), remote.to_string()))
            .map_or(false, |link| link.open);
        if !open {
            return Err(TransportError::ChannelClosed(remote.to_string()));
        }

        if hub.loss > 0.0 && rand::thread_rng().gen_bool(hub.loss) {
            hub.stats.lost += 1;
            return Ok(());
        }

        hub.stats.delivered += 1;
        hub.emit(remote, &self.local, TransportEventKind::Message(frame.to_vec()));
        Ok(())
    }

    fn close(&mut self, remote: &str) {
        let mut hub = lock(&self.hub);
        hub.links.remove(&(self.local.clone(), remote.to_string()));

        let notify = match hub.links.get_mut(&(remote.to_string(), self.local.clone())) {
            Some(link) if link.open => {
                link.open = false;
                true
            }
            _ => false,
        };
        if notify {
            hub.emit(
                remote,
                &self.local,
                TransportEventKind::ConnectionState(ConnectionState::Closed),
            );
        }
    }
}
