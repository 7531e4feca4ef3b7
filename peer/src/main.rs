use clap::Parser;
use log::{error, info, warn};
use peer::input::BotInput;
use peer::{generate_peer_id, Args, MemoryNetwork, PeerClient, RelayClient};
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

/// Delay between bot joins so the first one finds the session empty.
const JOIN_STAGGER: Duration = Duration::from_millis(250);

/// Runs several bots against one relay. Their direct channels go through an
/// in-process memory network, so all peers of a session must share a process.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    info!(
        "Starting {} bots in session {} via {}",
        args.bots, args.session, args.relay
    );
    if args.loss > 0.0 {
        info!("Simulating {:.0}% frame loss", args.loss * 100.0);
    }

    let probe = RelayClient::new(&args.relay, args.session.clone(), "probe", None);
    match probe.connection_config().await {
        Ok(config) => {
            for server in &config.ice_servers {
                info!("Relay advertises ICE server {:?}", server.urls);
            }
        }
        Err(e) => warn!("Could not fetch connection config: {}", e),
    }

    let network = MemoryNetwork::with_loss(args.loss);
    let (stop_sender, stop_receiver) = watch::channel(false);
    let mut handles = Vec::new();

    for index in 0..args.bots {
        let peer_id = generate_peer_id(&args.name);
        let config = args.peer_config(&peer_id, index);
        let (transport, events) = network.endpoint(peer_id.clone());
        let mut client = PeerClient::new(config, transport, events, BotInput::new());
        let mut stop = stop_receiver.clone();

        handles.push(tokio::spawn(async move {
            let shutdown = async move {
                let _ = stop.changed().await;
            };
            if let Err(e) = client.run(shutdown).await {
                error!("Peer {} stopped: {}", peer_id, e);
            }
        }));

        sleep(JOIN_STAGGER).await;
    }

    match args.duration {
        Some(secs) => sleep(Duration::from_secs(secs)).await,
        None => tokio::signal::ctrl_c().await?,
    }

    info!("Shutting down...");
    let _ = stop_sender.send(true);
    for handle in handles {
        let _ = handle.await;
    }

    let stats = network.stats();
    info!(
        "Direct frames delivered {}, lost {}",
        stats.delivered, stats.lost
    );

    Ok(())
}
