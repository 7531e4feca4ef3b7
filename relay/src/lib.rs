//! Signaling relay for peer-to-peer game sessions
//!
//! Peers register with a session over a server-sent event stream and publish
//! offers, answers and ICE candidates with plain POSTs. The relay never looks
//! inside SDP or candidates, it only routes envelopes between registered peers
//! and evicts the ones that go quiet.

pub mod config;
pub mod error;
pub mod registry;
pub mod service;

pub use config::{Args, RelayConfig};
pub use error::RelayError;
pub use registry::{Delivery, PeerRegistry};
pub use service::{run, RelayService};
