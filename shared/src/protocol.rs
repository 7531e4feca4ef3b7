//! Replication messages exchanged over direct peer channels.

use crate::error::ProtocolError;
use crate::input::InputSample;
use crate::snapshot::WorldSnapshot;
use crate::{EntityId, PeerId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sent by each side once a direct channel opens, and again on a graceful
/// leave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub peer_id: PeerId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub is_authority: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Ship,
    Enemy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DamageReport {
    pub target_kind: TargetKind,
    pub target_id: EntityId,
    pub amount: i32,
    pub source_id: EntityId,
}

/// Exactly one message kind per envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GameMessage {
    Input(InputSample),
    WorldState(WorldSnapshot),
    Join(PeerInfo),
    Leave(PeerInfo),
    Damage(DamageReport),
}

impl GameMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            GameMessage::Input(_) => MessageKind::Input,
            GameMessage::WorldState(_) => MessageKind::WorldState,
            GameMessage::Join(_) => MessageKind::Join,
            GameMessage::Leave(_) => MessageKind::Leave,
            GameMessage::Damage(_) => MessageKind::Damage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Input,
    WorldState,
    Join,
    Leave,
    Damage,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Input => "input",
            MessageKind::WorldState => "world-state",
            MessageKind::Join => "join",
            MessageKind::Leave => "leave",
            MessageKind::Damage => "damage",
        }
    }
}

/// A typed replication message plus who sent it and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub peer_id: PeerId,
    pub timestamp: u64,
    pub message: GameMessage,
}

impl Envelope {
    pub fn new(peer_id: impl Into<PeerId>, message: GameMessage) -> Self {
        Self {
            peer_id: peer_id.into(),
            timestamp: crate::timestamp_ms(),
            message,
        }
    }
}

/// Flat JSON form `{type, peerId, timestamp, data}`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireEnvelope {
    #[serde(rename = "type")]
    kind: MessageKind,
    peer_id: PeerId,
    #[serde(default)]
    timestamp: u64,
    #[serde(default)]
    data: Value,
}

impl WireEnvelope {
    pub(crate) fn from_envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        let data = match &envelope.message {
            GameMessage::Input(sample) => serde_json::to_value(sample)?,
            GameMessage::WorldState(snapshot) => serde_json::to_value(snapshot)?,
            GameMessage::Join(info) | GameMessage::Leave(info) => serde_json::to_value(info)?,
            GameMessage::Damage(report) => serde_json::to_value(report)?,
        };
        Ok(Self {
            kind: envelope.message.kind(),
            peer_id: envelope.peer_id.clone(),
            timestamp: envelope.timestamp,
            data,
        })
    }

    pub(crate) fn into_envelope(self) -> Result<Envelope, ProtocolError> {
        let kind = self.kind.as_str();
        let message = match self.kind {
            MessageKind::Input => GameMessage::Input(data_as(kind, self.data)?),
            MessageKind::WorldState => GameMessage::WorldState(data_as(kind, self.data)?),
            MessageKind::Join => GameMessage::Join(data_as(kind, self.data)?),
            MessageKind::Leave => GameMessage::Leave(data_as(kind, self.data)?),
            MessageKind::Damage => GameMessage::Damage(data_as(kind, self.data)?),
        };
        Ok(Envelope {
            peer_id: self.peer_id,
            timestamp: self.timestamp,
            message,
        })
    }
}

fn data_as<T: DeserializeOwned>(kind: &'static str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|source| ProtocolError::Payload { kind, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Keys;

    #[test]
    fn test_wire_envelope_shape() {
        let envelope = Envelope::new(
            "bob",
            GameMessage::Input(InputSample::new(5, Keys::UP, 0.25)),
        );
        let wire = WireEnvelope::from_envelope(&envelope).unwrap();
        let json = serde_json::to_value(&wire).unwrap();

        assert_eq!(json["type"], "input");
        assert_eq!(json["peerId"], "bob");
        assert_eq!(json["data"]["seq"], 5);
        assert_eq!(json["data"]["keys"], 1);
    }

    #[test]
    fn test_world_state_kind_name() {
        assert_eq!(
            serde_json::to_value(MessageKind::WorldState).unwrap(),
            "world-state"
        );
        assert_eq!(MessageKind::WorldState.as_str(), "world-state");
    }

    #[test]
    fn test_browser_damage_message() {
        let raw = r#"{"type":"damage","peerId":"host","timestamp":12,
                      "data":{"targetKind":"enemy","targetId":4,"amount":25,"sourceId":1}}"#;
        let wire: WireEnvelope = serde_json::from_str(raw).unwrap();
        let envelope = wire.into_envelope().unwrap();

        assert_eq!(envelope.peer_id, "host");
        assert_eq!(envelope.timestamp, 12);
        match envelope.message {
            GameMessage::Damage(report) => {
                assert_eq!(report.target_kind, TargetKind::Enemy);
                assert_eq!(report.target_id, 4);
                assert_eq!(report.amount, 25);
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_join_defaults() {
        let raw = r#"{"type":"join","peerId":"bob","data":{"peerId":"bob"}}"#;
        let wire: WireEnvelope = serde_json::from_str(raw).unwrap();

        match wire.into_envelope().unwrap().message {
            GameMessage::Join(info) => {
                assert_eq!(info.peer_id, "bob");
                assert!(info.display_name.is_empty());
                assert!(!info.is_authority);
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_payload_mismatch() {
        let raw = r#"{"type":"input","peerId":"bob","data":{"keys":"up"}}"#;
        let wire: WireEnvelope = serde_json::from_str(raw).unwrap();

        assert!(matches!(
            wire.into_envelope(),
            Err(ProtocolError::Payload { kind: "input", .. })
        ));
    }
}
