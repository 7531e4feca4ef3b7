//! Wire types and simulation rules shared by the relay and every peer.
//!
//! The relay only understands the signaling half ([`signal`]); peers use both
//! halves. Everything that crosses a process boundary is defined here so the
//! two sides cannot drift apart.

pub mod codec;
pub mod error;
pub mod input;
pub mod protocol;
pub mod signal;
pub mod sim;
pub mod snapshot;

pub use codec::WireFormat;
pub use error::ProtocolError;
pub use input::{InputSample, Keys, NO_TARGET};
pub use protocol::{DamageReport, Envelope, GameMessage, MessageKind, PeerInfo, TargetKind};
pub use signal::{
    ConnectionConfig, IceCandidate, IceServer, LeaveNotice, LeaveReason, PeerAnnouncement,
    PeerList, RelayEvent, SessionDescription, SessionList, SessionSummary, Signal, SignalEnvelope,
    SignalKind,
};
pub use sim::{apply_input, ShipState};
pub use snapshot::{EffectState, EnemyState, ProjectileState, Replicated, WorldSnapshot};

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Identity of one participant inside a session.
pub type PeerId = String;

/// Stable numeric id the authority assigns to every simulated entity.
pub type EntityId = u32;

pub const WORLD_WIDTH: f32 = 1600.0;
pub const WORLD_HEIGHT: f32 = 1200.0;

pub const SHIP_ACCELERATION: f32 = 600.0;
pub const SHIP_MAX_SPEED: f32 = 320.0;
pub const SHIP_DRAG: f32 = 0.92;
pub const SHIP_MAX_HP: i32 = 100;

/// Clients sample and send input at this rate. Prediction and the authority
/// both advance a ship by exactly one [`INPUT_DT`] per input sample.
pub const INPUT_RATE_HZ: u32 = 30;
pub const INPUT_DT: f32 = 1.0 / INPUT_RATE_HZ as f32;

/// Default rate at which the authority broadcasts full snapshots.
pub const SNAPSHOT_RATE_HZ: u32 = 10;

/// Current wall clock in milliseconds since the epoch.
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
