//! The direct peer-to-peer channel, seen as a black box.
//!
//! A transport owns one connection per remote peer. Methods are called from
//! the peer loop; everything the transport wants to report (local candidates,
//! state changes, inbound frames) comes back as [`TransportEvent`]s, which the
//! loop hands to a [`TransportHandler`].

use crate::error::TransportError;
use shared::{IceCandidate, PeerId, SessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// The channel is gone and will not come back on its own.
    ///
    /// `Disconnected` is not terminal: connectivity checks may still recover
    /// the channel, and a real loss escalates to `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

pub trait PeerTransport {
    fn create_connection(&mut self, remote: &str) -> Result<(), TransportError>;

    fn create_offer(&mut self, remote: &str) -> Result<SessionDescription, TransportError>;

    /// Only valid once the remote offer has been set.
    fn create_answer(&mut self, remote: &str) -> Result<SessionDescription, TransportError>;

    fn set_remote_description(
        &mut self,
        remote: &str,
        description: &SessionDescription,
    ) -> Result<(), TransportError>;

    /// Fails with [`TransportError::NoRemoteDescription`] until
    /// [`PeerTransport::set_remote_description`] succeeded for `remote`.
    fn add_ice_candidate(
        &mut self,
        remote: &str,
        candidate: &IceCandidate,
    ) -> Result<(), TransportError>;

    /// Best effort: no ordering or delivery guarantee.
    fn send(&mut self, remote: &str, frame: &[u8]) -> Result<(), TransportError>;

    fn close(&mut self, remote: &str);
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    IceCandidate(IceCandidate),
    ConnectionState(ConnectionState),
    Message(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub remote: PeerId,
    pub kind: TransportEventKind,
}

impl TransportEvent {
    pub fn new(remote: impl Into<PeerId>, kind: TransportEventKind) -> Self {
        Self {
            remote: remote.into(),
            kind,
        }
    }

    pub fn dispatch<H: TransportHandler + ?Sized>(self, handler: &mut H) {
        match self.kind {
            TransportEventKind::IceCandidate(candidate) => {
                handler.on_ice_candidate(&self.remote, candidate)
            }
            TransportEventKind::ConnectionState(state) => {
                handler.on_connection_state_change(&self.remote, state)
            }
            TransportEventKind::Message(frame) => handler.on_message(&self.remote, &frame),
        }
    }
}

/// Receives transport callbacks, one method per event kind.
pub trait TransportHandler {
    fn on_ice_candidate(&mut self, remote: &str, candidate: IceCandidate);

    fn on_connection_state_change(&mut self, remote: &str, state: ConnectionState);

    fn on_message(&mut self, remote: &str, frame: &[u8]);
}
