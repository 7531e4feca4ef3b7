use clap::Parser;
use shared::{WireFormat, SNAPSHOT_RATE_HZ};
use std::time::Duration;

/// Command line arguments for the peer binary
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Headless peers that join a session and play with scripted input")]
pub struct Args {
    /// Relay base URL
    #[arg(short, long, env = "NETPLAY_RELAY_URL", default_value = "http://127.0.0.1:8080")]
    pub relay: String,

    /// Session to join
    #[arg(short, long, default_value = "lobby")]
    pub session: String,

    /// Display name prefix; bots are numbered after it
    #[arg(short, long, default_value = "bot")]
    pub name: String,

    /// Number of peers to run in this process
    #[arg(short, long, default_value = "2")]
    pub bots: usize,

    /// Snapshots per second when acting as authority
    #[arg(long, default_value_t = SNAPSHOT_RATE_HZ)]
    pub snapshot_rate: u32,

    /// Seconds between liveness heartbeats to the relay
    #[arg(long, default_value = "10")]
    pub heartbeat: u64,

    /// Frame format on direct channels (json or binary)
    #[arg(short, long, default_value = "json")]
    pub format: WireFormat,

    /// Fraction of direct-channel frames to drop
    #[arg(long, default_value = "0.0")]
    pub loss: f64,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(short, long)]
    pub duration: Option<u64>,
}

impl Args {
    /// Config for the `index`-th bot started by this process.
    pub fn peer_config(&self, peer_id: &str, index: usize) -> PeerConfig {
        PeerConfig {
            relay_url: self.relay.clone(),
            session: self.session.clone(),
            peer_id: peer_id.to_string(),
            display_name: format!("{}-{}", self.name, index + 1),
            format: self.format,
            snapshot_interval: Duration::from_micros(1_000_000 / self.snapshot_rate.max(1) as u64),
            heartbeat_interval: Duration::from_secs(self.heartbeat.max(1)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub relay_url: String,
    pub session: String,
    pub peer_id: String,
    pub display_name: String,
    pub format: WireFormat,
    pub snapshot_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            relay_url: "http://127.0.0.1:8080".to_string(),
            session: "lobby".to_string(),
            peer_id: "peer".to_string(),
            display_name: "peer".to_string(),
            format: WireFormat::Json,
            snapshot_interval: Duration::from_millis(1000 / SNAPSHOT_RATE_HZ as u64),
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}
