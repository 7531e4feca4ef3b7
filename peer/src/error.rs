use shared::{PeerId, ProtocolError};
use thiserror::Error;

/// Failures reported by a [`crate::transport::PeerTransport`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("no remote description set for `{0}`")]
    NoRemoteDescription(PeerId),

    #[error("no connection to `{0}`")]
    UnknownPeer(PeerId),

    #[error("channel to `{0}` is not open")]
    ChannelClosed(PeerId),
}

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("relay request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("relay answered {status}: {body}")]
    RelayStatus { status: u16, body: String },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
