use crate::config::PeerConfig;
use crate::error::PeerError;
use crate::input::BotInput;
use crate::negotiation::NEGOTIATION_TIMEOUT;
use crate::relay_client::RelayClient;
use crate::session::SessionOrchestrator;
use crate::transport::{PeerTransport, TransportEvent};
use log::{debug, info, warn};
use shared::{RelayEvent, Signal, INPUT_RATE_HZ};
use std::future::Future;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Random id with a readable prefix, e.g. `bot-1f3a9c02`.
pub fn generate_peer_id(prefix: &str) -> String {
    format!("{}-{:08x}", prefix, rand::random::<u32>())
}

/// One peer: relay subscription, direct transport and scripted input, all
/// driven from a single loop.
pub struct PeerClient<T: PeerTransport> {
    config: PeerConfig,
    relay: RelayClient,
    session: SessionOrchestrator<T>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    bot: BotInput,
}

impl<T: PeerTransport> PeerClient<T> {
    pub fn new(
        config: PeerConfig,
        transport: T,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        bot: BotInput,
    ) -> Self {
        let relay = RelayClient::new(
            &config.relay_url,
            config.session.clone(),
            config.peer_id.clone(),
            Some(config.display_name.clone()),
        );
        let session = SessionOrchestrator::new(
            config.peer_id.clone(),
            config.display_name.clone(),
            transport,
            config.format,
        );

        Self {
            config,
            relay,
            session,
            transport_events,
            bot,
        }
    }

    pub fn session(&self) -> &SessionOrchestrator<T> {
        &self.session
    }

    async fn flush_signals(&mut self) {
        for outbound in self.session.drain_signals() {
            let kind = outbound.signal.kind();
            if let Err(e) = self.relay.publish(outbound.target, &outbound.signal).await {
                warn!("Failed to publish {}: {}", kind.as_str(), e);
            }
        }
    }

    fn log_status(&self) {
        let open: Vec<&str> = self.session.open_peers().map(|p| p.as_str()).collect();
        match self.session.world() {
            Some(world) => info!(
                "[{}] authority tick {} ships {} open {:?}",
                self.config.peer_id,
                world.tick(),
                world.ship_count(),
                open
            ),
            None => {
                let replica = self.session.replica();
                info!(
                    "[{}] client tick {:?} pending {} mirrors {} open {:?}",
                    self.config.peer_id,
                    replica.last_tick(),
                    replica.pending().len(),
                    replica.ships.len(),
                    open
                );
            }
        }
    }

    /// Joins the session and plays until `shutdown` resolves, then leaves.
    pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F) -> Result<(), PeerError> {
        let mut relay_events = self.relay.subscribe().await?;
        let mut relay_open = true;
        info!(
            "{} ({}) subscribed to session {}",
            self.config.peer_id, self.config.display_name, self.config.session
        );

        let mut input_interval = interval(Duration::from_secs(1) / INPUT_RATE_HZ);
        let mut snapshot_interval = interval(self.config.snapshot_interval);
        let mut heartbeat_interval = interval(self.config.heartbeat_interval);
        let mut status_interval = interval(STATUS_INTERVAL);
        for timer in [
            &mut input_interval,
            &mut snapshot_interval,
            &mut heartbeat_interval,
            &mut status_interval,
        ] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                event = relay_events.recv(), if relay_open => {
                    match event {
                        Some(RelayEvent::Peers(list)) => self.session.on_peer_list(&list),
                        Some(RelayEvent::Signal(envelope)) => self.session.on_signal(&envelope),
                        None => {
                            warn!("Relay stream closed; open channels keep running");
                            relay_open = false;
                        }
                    }
                },

                Some(event) = self.transport_events.recv() => {
                    event.dispatch(&mut self.session);
                },

                _ = input_interval.tick() => {
                    let action = self.bot.update();
                    self.session.input_tick(action.keys, action.angle, action.fire, None);
                },

                _ = snapshot_interval.tick() => {
                    self.session.snapshot_tick();
                },

                _ = heartbeat_interval.tick() => {
                    if let Err(e) = self.relay.publish(None, &Signal::Heartbeat).await {
                        warn!("Heartbeat failed: {}", e);
                    }
                    self.session.prune_stalled_negotiations(NEGOTIATION_TIMEOUT);
                },

                _ = status_interval.tick() => {
                    self.log_status();
                },

                _ = &mut shutdown => {
                    debug!("{} shutting down", self.config.peer_id);
                    break;
                },
            }

            self.flush_signals().await;
        }

        self.session.leave();
        self.flush_signals().await;
        Ok(())
    }
}
