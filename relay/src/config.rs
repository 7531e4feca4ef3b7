use clap::Parser;
use shared::{ConnectionConfig, IceServer};
use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// Command line arguments for the relay binary
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Signaling relay for peer-to-peer game sessions")]
pub struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    pub port: u16,

    /// Outbound messages buffered per peer before new ones are dropped
    #[arg(long, default_value = "64")]
    pub queue_capacity: usize,

    /// Seconds without activity before a peer is evicted
    #[arg(long, default_value = "30")]
    pub peer_timeout: u64,

    /// Seconds between eviction sweeps
    #[arg(long, default_value = "10")]
    pub sweep_interval: u64,

    /// STUN server handed to peers (repeatable)
    #[arg(long = "stun-url", env = "NETPLAY_STUN_URL", default_value = DEFAULT_STUN_URL)]
    pub stun_urls: Vec<String>,

    /// Fallback TURN relay handed to peers
    #[arg(long, env = "NETPLAY_TURN_URL")]
    pub turn_url: Option<String>,

    #[arg(long, env = "NETPLAY_TURN_USERNAME")]
    pub turn_username: Option<String>,

    #[arg(long, env = "NETPLAY_TURN_CREDENTIAL", hide_env_values = true)]
    pub turn_credential: Option<String>,
}

impl Args {
    pub fn into_config(self) -> Result<RelayConfig, AddrParseError> {
        let bind_addr: SocketAddr = format!("{}:{}", self.host, self.port).parse()?;

        let mut ice_servers = Vec::new();
        let stun_urls: Vec<String> = self
            .stun_urls
            .into_iter()
            .filter(|url| !url.is_empty())
            .collect();
        if !stun_urls.is_empty() {
            ice_servers.push(IceServer {
                urls: stun_urls,
                username: None,
                credential: None,
            });
        }
        if let Some(turn_url) = self.turn_url {
            ice_servers.push(IceServer {
                urls: vec![turn_url],
                username: self.turn_username,
                credential: self.turn_credential,
            });
        }

        Ok(RelayConfig {
            bind_addr,
            queue_capacity: self.queue_capacity,
            peer_timeout: Duration::from_secs(self.peer_timeout),
            sweep_interval: Duration::from_secs(self.sweep_interval.max(1)),
            keep_alive: Duration::from_secs(15),
            ice_servers,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    pub queue_capacity: usize,
    pub peer_timeout: Duration,
    pub sweep_interval: Duration,
    /// Interval between SSE keep-alive comments
    pub keep_alive: Duration,
    pub ice_servers: Vec<IceServer>,
}

impl RelayConfig {
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            ice_servers: self.ice_servers.clone(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            queue_capacity: 64,
            peer_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(10),
            keep_alive: Duration::from_secs(15),
            ice_servers: vec![IceServer {
                urls: vec![DEFAULT_STUN_URL.to_string()],
                username: None,
                credential: None,
            }],
        }
    }
}
