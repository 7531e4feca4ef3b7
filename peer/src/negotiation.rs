//! Per-pair connection negotiation.
//!
//! Signals for one pair travel through the relay in order, but candidates are
//! produced by the remote transport as soon as it creates its description and
//! may overtake that description on the way. A transport rejects candidates
//! until it has a remote description, so early candidates are buffered here and
//! applied in arrival order the moment the description lands.

use crate::error::TransportError;
use crate::transport::PeerTransport;
use log::{debug, info};
use shared::{IceCandidate, PeerId, SessionDescription, Signal};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// How long a responder may wait for an offer before it is dropped.
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    NoRemoteDescription,
    RemoteDescriptionSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    /// Created the channel and sent the offer.
    Initiator,
    /// Answers the remote offer.
    Responder,
}

#[derive(Debug)]
pub struct Negotiation {
    remote: PeerId,
    role: NegotiationRole,
    state: NegotiationState,
    pending: Vec<IceCandidate>,
    open: bool,
    started: Instant,
}

impl Negotiation {
    /// Creates the connection and the offer to send to `remote`.
    pub fn initiate<T: PeerTransport + ?Sized>(
        transport: &mut T,
        remote: &str,
    ) -> Result<(Self, SessionDescription), TransportError> {
        transport.create_connection(remote)?;
        let offer = transport.create_offer(remote)?;
        Ok((Self::new(remote, NegotiationRole::Initiator), offer))
    }

    /// Creates the connection for `remote` and waits for its offer.
    pub fn respond<T: PeerTransport + ?Sized>(
        transport: &mut T,
        remote: &str,
    ) -> Result<Self, TransportError> {
        transport.create_connection(remote)?;
        Ok(Self::new(remote, NegotiationRole::Responder))
    }

    fn new(remote: &str, role: NegotiationRole) -> Self {
        Self {
            remote: remote.to_string(),
            role,
            state: NegotiationState::NoRemoteDescription,
            pending: Vec::new(),
            open: false,
            started: Instant::now(),
        }
    }

    /// Applies the remote offer or answer, then every buffered candidate.
    ///
    /// Returns the answer to send back when this side is answering an offer.
    pub fn on_remote_description<T: PeerTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        description: &SessionDescription,
    ) -> Result<Option<SessionDescription>, TransportError> {
        transport.set_remote_description(&self.remote, description)?;
        self.state = NegotiationState::RemoteDescriptionSet;

        for candidate in std::mem::take(&mut self.pending) {
            if let Err(e) = transport.add_ice_candidate(&self.remote, &candidate) {
                debug!("Dropping buffered candidate for {}: {}", self.remote, e);
            }
        }

        if self.role == NegotiationRole::Responder && description.sdp_type == "offer" {
            return transport.create_answer(&self.remote).map(Some);
        }
        Ok(None)
    }

    /// Applies a remote candidate, or buffers it until a description arrives.
    pub fn on_candidate<T: PeerTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        candidate: IceCandidate,
    ) -> Result<(), TransportError> {
        match self.state {
            NegotiationState::NoRemoteDescription => {
                self.pending.push(candidate);
                Ok(())
            }
            NegotiationState::RemoteDescriptionSet => {
                transport.add_ice_candidate(&self.remote, &candidate)
            }
        }
    }

    /// The remote peer this negotiation is with.
    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    /// Whether the remote description has been applied yet.
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Candidates waiting for the remote description.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Whether the transport reported the channel open.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Time since the pair was created.
    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }
}

/// All negotiations of the local peer, keyed by remote peer.
#[derive(Debug, Default)]
pub struct Negotiator {
    pairs: HashMap<PeerId, Negotiation>,
}

impl Negotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts over with `remote` as initiator and returns the offer signal.
    pub fn connect<T: PeerTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        remote: &str,
    ) -> Result<Signal, TransportError> {
        self.remove(transport, remote);
        let (negotiation, offer) = Negotiation::initiate(transport, remote)?;
        self.pairs.insert(remote.to_string(), negotiation);
        info!("Offering connection to {}", remote);
        Ok(Signal::Offer(offer))
    }

    /// Feeds one negotiation signal from `remote` and returns the reply, if any.
    ///
    /// Offers and candidates from unknown peers open a responder negotiation.
    /// Answers from unknown peers are ignored.
    pub fn handle<T: PeerTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        remote: &str,
        signal: Signal,
    ) -> Result<Option<Signal>, TransportError> {
        match signal {
            Signal::Offer(offer) => {
                let stale = self.pairs.get(remote).map_or(false, |n| {
                    n.role == NegotiationRole::Initiator
                        || n.state == NegotiationState::RemoteDescriptionSet
                });
                if stale {
                    debug!("Fresh offer from {}, restarting negotiation", remote);
                    self.remove(transport, remote);
                }

                let negotiation = self.responder(transport, remote)?;
                let answer = negotiation.on_remote_description(transport, &offer)?;
                Ok(answer.map(Signal::Answer))
            }
            Signal::Answer(answer) => match self.pairs.get_mut(remote) {
                Some(negotiation) if negotiation.role == NegotiationRole::Initiator => {
                    negotiation.on_remote_description(transport, &answer)?;
                    Ok(None)
                }
                _ => {
                    debug!("Ignoring answer from {} with no pending offer", remote);
                    Ok(None)
                }
            },
            Signal::Candidate(candidate) => {
                let negotiation = self.responder(transport, remote)?;
                negotiation.on_candidate(transport, candidate)?;
                Ok(None)
            }
            Signal::Join(_) | Signal::Leave(_) | Signal::Heartbeat => Ok(None),
        }
    }

    fn responder<T: PeerTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        remote: &str,
    ) -> Result<&mut Negotiation, TransportError> {
        if !self.pairs.contains_key(remote) {
            let negotiation = Negotiation::respond(transport, remote)?;
            self.pairs.insert(remote.to_string(), negotiation);
        }
        self.pairs
            .get_mut(remote)
            .ok_or_else(|| TransportError::UnknownPeer(remote.to_string()))
    }

    /// Marks the channel to `remote` open. Returns false for unknown peers.
    pub fn mark_open(&mut self, remote: &str) -> bool {
        match self.pairs.get_mut(remote) {
            Some(negotiation) => {
                negotiation.open = true;
                true
            }
            None => false,
        }
    }

    /// Forgets `remote` and closes its channel. Returns whether it was known.
    pub fn remove<T: PeerTransport + ?Sized>(&mut self, transport: &mut T, remote: &str) -> bool {
        if self.pairs.remove(remote).is_some() {
            transport.close(remote);
            true
        } else {
            false
        }
    }

    /// Drops responder pairs still waiting for an offer after `timeout`.
    ///
    /// Such pairs are opened by candidates alone, e.g. ones that trail a
    /// peer's departure. Returns the dropped peers.
    pub fn prune_unanswered<T: PeerTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        timeout: Duration,
    ) -> Vec<PeerId> {
        let stalled: Vec<PeerId> = self
            .pairs
            .values()
            .filter(|n| {
                n.role == NegotiationRole::Responder
                    && n.state == NegotiationState::NoRemoteDescription
                    && n.age() >= timeout
            })
            .map(|n| n.remote.clone())
            .collect();

        for remote in &stalled {
            debug!("No offer from {} after {:?}, dropping", remote, timeout);
            self.remove(transport, remote);
        }
        stalled
    }

    /// Closes every channel and forgets all pairs.
    pub fn close_all<T: PeerTransport + ?Sized>(&mut self, transport: &mut T) {
        for (remote, _) in self.pairs.drain() {
            transport.close(&remote);
        }
    }

    /// The negotiation with `remote`, if any.
    pub fn get(&self, remote: &str) -> Option<&Negotiation> {
        self.pairs.get(remote)
    }

    /// Whether a negotiation with `remote` exists.
    pub fn contains(&self, remote: &str) -> bool {
        self.pairs.contains_key(remote)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
