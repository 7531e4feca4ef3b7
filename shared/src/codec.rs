//! Frame encoding for the direct channel.
//!
//! `Json` is the interoperable form browsers speak. `Binary` is a compact
//! bincode framing of the same typed envelope for native peers. Every peer in
//! a session must use the same format.

use crate::error::ProtocolError;
use crate::protocol::{Envelope, WireEnvelope};
use bincode::Options;
use std::fmt;
use std::str::FromStr;

/// Upper bound on a single binary frame; larger frames fail to decode.
pub const MAX_FRAME_BYTES: u64 = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    #[default]
    Json,
    Binary,
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(WireFormat::Json),
            "binary" | "bincode" => Ok(WireFormat::Binary),
            other => Err(format!("unknown wire format `{}`", other)),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Json => write!(f, "json"),
            WireFormat::Binary => write!(f, "binary"),
        }
    }
}

fn binary_options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_FRAME_BYTES)
}

pub fn encode(envelope: &Envelope, format: WireFormat) -> Result<Vec<u8>, ProtocolError> {
    match format {
        WireFormat::Json => {
            let wire = WireEnvelope::from_envelope(envelope)?;
            Ok(serde_json::to_vec(&wire)?)
        }
        WireFormat::Binary => Ok(binary_options().serialize(envelope)?),
    }
}

pub fn decode(frame: &[u8], format: WireFormat) -> Result<Envelope, ProtocolError> {
    match format {
        WireFormat::Json => {
            let wire: WireEnvelope = serde_json::from_slice(frame)?;
            wire.into_envelope()
        }
        WireFormat::Binary => Ok(binary_options().deserialize(frame)?),
    }
}
