use clap::Parser;
use log::info;
use relay::{run, Args, RelayService};
use tokio::net::TcpListener;

/// Parses arguments, binds the listener and serves until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config()?;
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!("Relay listening on http://{}", listener.local_addr()?);

    let service = RelayService::new(config);
    run(listener, service, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    })
    .await?;

    Ok(())
}
