//! Signaling messages carried by the relay.
//!
//! On the wire a signal is a flat JSON envelope whose `payload` shape depends
//! on `type`. The relay forwards envelopes without looking inside the payload;
//! peers call [`SignalEnvelope::decode`] once at the boundary and work with the
//! typed [`Signal`] from then on.

use crate::error::ProtocolError;
use crate::PeerId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
    Join,
    Leave,
    Heartbeat,
}

impl SignalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
            SignalKind::Join => "join",
            SignalKind::Leave => "leave",
            SignalKind::Heartbeat => "heartbeat",
        }
    }
}

/// `{type, sessionId, peerId, targetId?, payload, timestamp}`
///
/// `target_id` absent means broadcast to the whole session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEnvelope {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub session_id: String,
    pub peer_id: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<PeerId>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub timestamp: u64,
}

/// Session description as produced by the direct transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: "offer".to_string(),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: "answer".to_string(),
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerAnnouncement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaveReason {
    #[default]
    Left,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LeaveNotice {
    #[serde(default)]
    pub reason: LeaveReason,
}

/// A decoded signal; one variant per envelope `type`.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(IceCandidate),
    Join(PeerAnnouncement),
    Leave(LeaveNotice),
    Heartbeat,
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Offer(_) => SignalKind::Offer,
            Signal::Answer(_) => SignalKind::Answer,
            Signal::Candidate(_) => SignalKind::Candidate,
            Signal::Join(_) => SignalKind::Join,
            Signal::Leave(_) => SignalKind::Leave,
            Signal::Heartbeat => SignalKind::Heartbeat,
        }
    }

    fn payload(&self) -> Result<Value, ProtocolError> {
        let value = match self {
            Signal::Offer(desc) | Signal::Answer(desc) => serde_json::to_value(desc)?,
            Signal::Candidate(candidate) => serde_json::to_value(candidate)?,
            Signal::Join(announcement) => serde_json::to_value(announcement)?,
            Signal::Leave(notice) => serde_json::to_value(notice)?,
            Signal::Heartbeat => Value::Null,
        };
        Ok(value)
    }
}

impl SignalEnvelope {
    pub fn new(
        session_id: impl Into<String>,
        peer_id: impl Into<PeerId>,
        target_id: Option<PeerId>,
        signal: &Signal,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            kind: signal.kind(),
            session_id: session_id.into(),
            peer_id: peer_id.into(),
            target_id,
            payload: signal.payload()?,
            timestamp: crate::timestamp_ms(),
        })
    }

    pub fn is_broadcast(&self) -> bool {
        self.target_id.is_none()
    }

    /// Interprets `payload` according to `type`.
    pub fn decode(&self) -> Result<Signal, ProtocolError> {
        let kind = self.kind.as_str();
        let signal = match self.kind {
            SignalKind::Offer => Signal::Offer(required(kind, &self.payload)?),
            SignalKind::Answer => Signal::Answer(required(kind, &self.payload)?),
            SignalKind::Candidate => Signal::Candidate(required(kind, &self.payload)?),
            SignalKind::Join => Signal::Join(optional(kind, &self.payload)?),
            SignalKind::Leave => Signal::Leave(optional(kind, &self.payload)?),
            SignalKind::Heartbeat => Signal::Heartbeat,
        };
        Ok(signal)
    }
}

fn required<T: DeserializeOwned>(kind: &'static str, payload: &Value) -> Result<T, ProtocolError> {
    T::deserialize(payload).map_err(|source| ProtocolError::Payload { kind, source })
}

fn optional<T: DeserializeOwned + Default>(
    kind: &'static str,
    payload: &Value,
) -> Result<T, ProtocolError> {
    if payload.is_null() {
        return Ok(T::default());
    }
    required(kind, payload)
}

/// First event on every stream: who else is already in the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerList {
    pub session_id: String,
    pub peers: Vec<PeerId>,
}

/// One item on a peer's relay event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Peers(PeerList),
    Signal(SignalEnvelope),
}

impl RelayEvent {
    pub const PEERS: &'static str = "peers";
    pub const SIGNAL: &'static str = "signal";

    pub fn event_name(&self) -> &'static str {
        match self {
            RelayEvent::Peers(_) => Self::PEERS,
            RelayEvent::Signal(_) => Self::SIGNAL,
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        let json = match self {
            RelayEvent::Peers(list) => serde_json::to_string(list)?,
            RelayEvent::Signal(envelope) => serde_json::to_string(envelope)?,
        };
        Ok(json)
    }

    /// Rebuilds an event from an SSE `event:` name and its `data:` body.
    pub fn parse(event: &str, data: &str) -> Result<Self, ProtocolError> {
        match event {
            Self::PEERS => Ok(RelayEvent::Peers(serde_json::from_str(data)?)),
            Self::SIGNAL | "" | "message" => Ok(RelayEvent::Signal(serde_json::from_str(data)?)),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub peer_count: usize,
    pub age_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionList {
    pub sessions: Vec<SessionSummary>,
}

/// One STUN/TURN entry in the shape browsers accept for `iceServers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Parameters needed to reach the fallback relay transport.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub ice_servers: Vec<IceServer>,
}
