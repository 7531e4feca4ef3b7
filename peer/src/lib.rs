//! Peer side of a netplay session
//!
//! A peer subscribes to the relay, negotiates a direct channel with every
//! other peer in the session and then replicates over those channels. The
//! first peer in a session is the authority: it owns the simulation, applies
//! every client's inputs and broadcasts full snapshots. Clients predict their
//! own ship and reconcile against each snapshot.
//!
//! The direct channel is abstracted by [`transport::PeerTransport`];
//! [`memory::MemoryNetwork`] provides an in-process implementation used by
//! tests and by the bundled headless bots.

pub mod config;
pub mod error;
pub mod input;
pub mod memory;
pub mod negotiation;
pub mod network;
pub mod relay_client;
pub mod replication;
pub mod session;
pub mod transport;
pub mod world;

pub use config::{Args, PeerConfig};
pub use error::{PeerError, TransportError};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use network::{generate_peer_id, PeerClient};
pub use relay_client::RelayClient;
pub use session::{OutboundSignal, Role, SessionOrchestrator};
pub use transport::{ConnectionState, PeerTransport, TransportEvent, TransportHandler};
