//! Integration tests across relay, peers and the shared wire format
//!
//! These tests wire real components together: the relay registry routing
//! signals between orchestrators, the HTTP relay on a real socket, and full
//! peer loops talking through both.

use assert_approx_eq::assert_approx_eq;
use peer::input::BotInput;
use peer::{
    MemoryNetwork, MemoryTransport, PeerClient, PeerConfig, PeerError, RelayClient, Role,
    SessionOrchestrator, TransportEvent,
};
use relay::{PeerRegistry, RelayConfig, RelayService};
use shared::{
    Keys, LeaveReason, RelayEvent, SessionDescription, Signal, SignalEnvelope, WireFormat,
    INPUT_DT, SHIP_ACCELERATION,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};

/// REGISTRY-ROUTED SESSION TESTS
mod session_tests {
    use super::*;

    /// A peer whose signals travel through a real registry.
    struct RoutedPeer {
        session: SessionOrchestrator<MemoryTransport>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        relay_events: mpsc::Receiver<RelayEvent>,
    }

    impl RoutedPeer {
        fn join(
            registry: &mut PeerRegistry,
            network: &MemoryNetwork,
            id: &str,
            format: WireFormat,
        ) -> Self {
            let (transport, transport_events) = network.endpoint(id);
            let (_, relay_events) = registry.join("room1", id, Some(id.to_uppercase()));
            Self {
                session: SessionOrchestrator::new(id, id.to_uppercase(), transport, format),
                transport_events,
                relay_events,
            }
        }

        /// Handles everything queued for this peer; returns whether anything was.
        fn step(&mut self, registry: &mut PeerRegistry) -> bool {
            let mut progressed = false;

            while let Ok(event) = self.relay_events.try_recv() {
                match event {
                    RelayEvent::Peers(list) => self.session.on_peer_list(&list),
                    RelayEvent::Signal(envelope) => self.session.on_signal(&envelope),
                }
                progressed = true;
            }

            while let Ok(event) = self.transport_events.try_recv() {
                event.dispatch(&mut self.session);
                progressed = true;
            }

            for outbound in self.session.drain_signals() {
                let envelope = SignalEnvelope::new(
                    "room1",
                    self.session.local_id(),
                    outbound.target,
                    &outbound.signal,
                )
                .unwrap();
                // The sender may already have been unregistered by its own leave.
                let _ = registry.send(&envelope);
                progressed = true;
            }

            progressed
        }
    }

    fn settle(registry: &mut PeerRegistry, peers: &mut [&mut RoutedPeer]) {
        for _ in 0..100 {
            let mut progressed = false;
            for peer in peers.iter_mut() {
                progressed |= peer.step(registry);
            }
            if !progressed {
                return;
            }
        }
        panic!("Session did not settle");
    }

    fn room(format: WireFormat) -> (PeerRegistry, MemoryNetwork, RoutedPeer, RoutedPeer) {
        let mut registry = PeerRegistry::new(64);
        let network = MemoryNetwork::new();

        let mut alice = RoutedPeer::join(&mut registry, &network, "alice", format);
        settle(&mut registry, &mut [&mut alice]);
        let mut bob = RoutedPeer::join(&mut registry, &network, "bob", format);
        settle(&mut registry, &mut [&mut alice, &mut bob]);

        (registry, network, alice, bob)
    }

    /// Join, negotiate, send one input and reconcile against the snapshot.
    #[test]
    fn authority_acknowledges_first_input() {
        let (mut registry, _network, mut alice, mut bob) = room(WireFormat::Json);

        assert_eq!(alice.session.role(), Role::Authority);
        assert_eq!(bob.session.role(), Role::Client);
        assert!(alice.session.is_open("bob"));
        assert!(bob.session.is_open("alice"));
        assert_eq!(bob.session.authority(), Some("alice"));

        let start_x = alice.session.world().unwrap().ship("bob").unwrap().x;
        let sample = bob.session.input_tick(Keys::UP, 0.0, false, None).unwrap();
        assert_eq!(sample.sequence, 1);
        settle(&mut registry, &mut [&mut alice, &mut bob]);

        let world = alice.session.world().unwrap();
        let authoritative = world.ship("bob").cloned().unwrap();
        assert!(authoritative.x > start_x);
        assert_approx_eq!(authoritative.vel_x, SHIP_ACCELERATION * INPUT_DT, 1e-3);
        assert_eq!(world.input_ack("bob"), 1);

        alice.session.snapshot_tick();
        settle(&mut registry, &mut [&mut alice, &mut bob]);

        let replica = bob.session.replica();
        assert_eq!(replica.pending().len(), 0);
        assert_eq!(replica.own_ship(), Some(&authoritative));
        assert_eq!(replica.last_tick(), Some(1));
    }

    #[test]
    fn binary_frames_replicate_the_same_way() {
        let (mut registry, _network, mut alice, mut bob) = room(WireFormat::Binary);

        for _ in 0..5 {
            bob.session.input_tick(Keys::UP | Keys::RIGHT, 0.5, false, None);
        }
        settle(&mut registry, &mut [&mut alice, &mut bob]);
        alice.session.snapshot_tick();
        settle(&mut registry, &mut [&mut alice, &mut bob]);

        assert_eq!(alice.session.world().unwrap().input_ack("bob"), 5);
        assert!(bob.session.replica().pending().is_empty());
        assert_eq!(
            bob.session.replica().own_ship(),
            alice.session.world().unwrap().ship("bob")
        );
    }

    /// Inputs sent after the snapshot was built stay pending and are replayed.
    #[test]
    fn unacknowledged_inputs_survive_reconciliation() {
        let (mut registry, _network, mut alice, mut bob) = room(WireFormat::Json);

        bob.session.input_tick(Keys::UP, 0.0, false, None);
        settle(&mut registry, &mut [&mut alice, &mut bob]);
        alice.session.snapshot_tick();

        // Sent before bob sees the snapshot acking seq 1.
        bob.session.input_tick(Keys::UP, 0.0, false, None);
        bob.session.input_tick(Keys::UP, 0.0, false, None);
        assert_eq!(bob.session.replica().pending().len(), 3);

        // Deliver the snapshot to bob without letting alice see the new inputs.
        while let Ok(event) = bob.transport_events.try_recv() {
            event.dispatch(&mut bob.session);
        }

        let pending: Vec<u32> = bob
            .session
            .replica()
            .pending()
            .iter()
            .map(|input| input.sequence)
            .collect();
        assert_eq!(pending, vec![2, 3]);

        settle(&mut registry, &mut [&mut alice, &mut bob]);
        alice.session.snapshot_tick();
        settle(&mut registry, &mut [&mut alice, &mut bob]);

        assert!(bob.session.replica().pending().is_empty());
        assert_eq!(
            bob.session.replica().own_ship(),
            alice.session.world().unwrap().ship("bob")
        );
    }

    /// A lost input and a lost snapshot are both superseded by the next ones.
    #[test]
    fn lost_input_and_snapshot_are_superseded() {
        let (mut registry, network, mut alice, mut bob) = room(WireFormat::Json);

        network.set_loss(1.0);
        bob.session.input_tick(Keys::UP, 0.0, false, None);
        settle(&mut registry, &mut [&mut alice, &mut bob]);
        alice.session.snapshot_tick();
        settle(&mut registry, &mut [&mut alice, &mut bob]);

        assert_eq!(network.stats().lost, 2);
        assert_eq!(alice.session.world().unwrap().input_ack("bob"), 0);
        assert_eq!(bob.session.replica().last_tick(), None);
        assert_eq!(bob.session.replica().pending().len(), 1);

        network.set_loss(0.0);
        bob.session.input_tick(Keys::UP | Keys::LEFT, 0.3, false, None);
        settle(&mut registry, &mut [&mut alice, &mut bob]);
        alice.session.snapshot_tick();
        settle(&mut registry, &mut [&mut alice, &mut bob]);

        let world = alice.session.world().unwrap();
        assert_eq!(world.input_ack("bob"), 2);
        assert!(bob.session.replica().pending().is_empty());
        assert_eq!(bob.session.replica().last_tick(), Some(2));
        assert_eq!(bob.session.replica().own_ship(), world.ship("bob"));
    }

    #[test]
    fn third_peer_connects_to_both() {
        let (mut registry, network, mut alice, mut bob) = room(WireFormat::Json);
        let mut carol = RoutedPeer::join(&mut registry, &network, "carol", WireFormat::Json);
        settle(&mut registry, &mut [&mut alice, &mut bob, &mut carol]);

        assert_eq!(carol.session.role(), Role::Client);
        assert!(carol.session.is_open("alice"));
        assert!(carol.session.is_open("bob"));
        assert_eq!(carol.session.authority(), Some("alice"));
        assert_eq!(alice.session.world().unwrap().ship_count(), 3);

        alice.session.snapshot_tick();
        settle(&mut registry, &mut [&mut alice, &mut bob, &mut carol]);
        assert_eq!(carol.session.replica().ships.len(), 2);
        assert_eq!(bob.session.replica().ships.len(), 2);
        assert!(carol.session.replica().own_ship().is_some());
    }

    #[test]
    fn leaving_client_is_removed_everywhere() {
        let (mut registry, _network, mut alice, mut bob) = room(WireFormat::Json);

        bob.session.leave();
        settle(&mut registry, &mut [&mut alice, &mut bob]);

        assert!(!alice.session.is_open("bob"));
        assert_eq!(alice.session.world().unwrap().ship_count(), 1);
        assert!(!registry.contains("room1", "bob"));
        assert!(registry.contains("room1", "alice"));
    }

    #[test]
    fn evicted_authority_leaves_clients_with_last_snapshot() {
        let (mut registry, _network, mut alice, mut bob) = room(WireFormat::Json);
        alice.session.snapshot_tick();
        settle(&mut registry, &mut [&mut alice, &mut bob]);

        // Only the relay sees alice go; the direct channel is torn down by bob
        // when the timeout leave arrives.
        std::thread::sleep(Duration::from_millis(20));
        registry.touch("room1", "bob");
        let evicted = registry.sweep(Duration::from_millis(10));
        assert_eq!(evicted, vec![("room1".to_string(), "alice".to_string())]);

        match bob.relay_events.try_recv().unwrap() {
            RelayEvent::Signal(envelope) => match envelope.decode().unwrap() {
                Signal::Leave(notice) => {
                    assert_eq!(notice.reason, LeaveReason::Timeout);
                    bob.session.on_signal(&envelope);
                }
                other => panic!("Unexpected signal: {:?}", other),
            },
            other => panic!("Unexpected event: {:?}", other),
        }

        assert!(!bob.session.is_open("alice"));
        assert_eq!(bob.session.replica().last_tick(), Some(1));
        assert_eq!(bob.session.replica().ships.len(), 1);
        assert!(bob.session.input_tick(Keys::UP, 0.0, false, None).is_none());
    }
}

/// HTTP RELAY TESTS
mod relay_http_tests {
    use super::*;

    async fn start_relay(config: RelayConfig) -> (SocketAddr, oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();

        tokio::spawn(relay::run(listener, RelayService::new(config), async move {
            let _ = stopped.await;
        }));

        (addr, stop)
    }

    async fn next_event(events: &mut mpsc::Receiver<RelayEvent>) -> RelayEvent {
        timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for relay event")
            .expect("relay stream closed")
    }

    #[tokio::test]
    async fn sse_stream_delivers_peer_list_and_signals() {
        let (addr, _stop) = start_relay(RelayConfig::default()).await;
        let base = format!("http://{}", addr);

        let alice = RelayClient::new(&base, "room1", "alice", Some("Alice".to_string()));
        let mut alice_events = alice.subscribe().await.unwrap();
        match next_event(&mut alice_events).await {
            RelayEvent::Peers(list) => assert!(list.peers.is_empty()),
            other => panic!("Unexpected event: {:?}", other),
        }

        let bob = RelayClient::new(&base, "room1", "bob", None);
        let mut bob_events = bob.subscribe().await.unwrap();
        match next_event(&mut bob_events).await {
            RelayEvent::Peers(list) => assert_eq!(list.peers, vec!["alice"]),
            other => panic!("Unexpected event: {:?}", other),
        }
        match next_event(&mut alice_events).await {
            RelayEvent::Signal(envelope) => {
                assert_eq!(envelope.peer_id, "bob");
                assert!(matches!(envelope.decode().unwrap(), Signal::Join(_)));
            }
            other => panic!("Unexpected event: {:?}", other),
        }

        let offer = Signal::Offer(SessionDescription::offer("v=0"));
        let receipt = bob
            .publish(Some("alice".to_string()), &offer)
            .await
            .unwrap();
        assert_eq!(receipt.delivered, 1);
        assert_eq!(receipt.dropped, 0);

        match next_event(&mut alice_events).await {
            RelayEvent::Signal(envelope) => {
                assert_eq!(envelope.target_id.as_deref(), Some("alice"));
                assert_eq!(envelope.decode().unwrap(), offer);
            }
            other => panic!("Unexpected event: {:?}", other),
        }

        let heartbeat = bob.publish(None, &Signal::Heartbeat).await.unwrap();
        assert_eq!(heartbeat.delivered, 0);

        let sessions = alice.sessions().await.unwrap();
        assert_eq!(sessions.sessions.len(), 1);
        assert_eq!(sessions.sessions[0].peer_count, 2);

        let config = alice.connection_config().await.unwrap();
        assert!(!config.ice_servers.is_empty());
    }

    #[tokio::test]
    async fn unregistered_publisher_is_rejected() {
        let (addr, _stop) = start_relay(RelayConfig::default()).await;
        let base = format!("http://{}", addr);

        let alice = RelayClient::new(&base, "room1", "alice", None);
        let _events = alice.subscribe().await.unwrap();

        let ghost = RelayClient::new(&base, "room1", "ghost", None);
        match ghost.publish(None, &Signal::Heartbeat).await {
            Err(PeerError::RelayStatus { status, .. }) => assert_eq!(status, 404),
            other => panic!("Unexpected result: {:?}", other),
        }

        let invalid = RelayClient::new(&base, "room 1", "alice", None);
        match invalid.subscribe().await {
            Err(PeerError::RelayStatus { status, .. }) => assert_eq!(status, 400),
            Err(e) => panic!("Unexpected error: {}", e),
            Ok(_) => panic!("Invalid session id was accepted"),
        }
    }

    #[tokio::test]
    async fn leave_broadcasts_and_unregisters() {
        let (addr, _stop) = start_relay(RelayConfig::default()).await;
        let base = format!("http://{}", addr);

        let alice = RelayClient::new(&base, "room1", "alice", None);
        let mut alice_events = alice.subscribe().await.unwrap();
        next_event(&mut alice_events).await;

        let bob = RelayClient::new(&base, "room1", "bob", None);
        let _bob_events = bob.subscribe().await.unwrap();
        next_event(&mut alice_events).await;

        bob.publish(None, &Signal::Leave(Default::default()))
            .await
            .unwrap();

        match next_event(&mut alice_events).await {
            RelayEvent::Signal(envelope) => {
                assert_eq!(envelope.peer_id, "bob");
                match envelope.decode().unwrap() {
                    Signal::Leave(notice) => assert_eq!(notice.reason, LeaveReason::Left),
                    other => panic!("Unexpected signal: {:?}", other),
                }
            }
            other => panic!("Unexpected event: {:?}", other),
        }

        let sessions = alice.sessions().await.unwrap();
        assert_eq!(sessions.sessions[0].peer_count, 1);
    }
}

/// FULL PEER LOOP TESTS
mod peer_loop_tests {
    use super::*;

    #[tokio::test]
    async fn two_bots_replicate_through_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (stop_relay, relay_stopped) = oneshot::channel::<()>();
        tokio::spawn(relay::run(
            listener,
            RelayService::new(RelayConfig::default()),
            async move {
                let _ = relay_stopped.await;
            },
        ));

        let network = MemoryNetwork::new();
        let mut stops = Vec::new();
        let mut handles = Vec::new();

        for (index, id) in ["host", "guest"].iter().enumerate() {
            let config = PeerConfig {
                relay_url: base.clone(),
                session: "arena".to_string(),
                peer_id: id.to_string(),
                display_name: format!("bot-{}", index + 1),
                snapshot_interval: Duration::from_millis(50),
                ..PeerConfig::default()
            };
            let (transport, events) = network.endpoint(*id);
            let bot = BotInput::seeded(index as u64);
            let mut client = PeerClient::new(config, transport, events, bot);
            let (stop, stopped) = oneshot::channel::<()>();
            stops.push(stop);

            handles.push(tokio::spawn(async move {
                client
                    .run(async move {
                        let _ = stopped.await;
                    })
                    .await
                    .unwrap();
                client
            }));

            sleep(Duration::from_millis(200)).await;
        }

        sleep(Duration::from_millis(1500)).await;
        for stop in stops {
            let _ = stop.send(());
        }

        let mut clients = Vec::new();
        for handle in handles {
            clients.push(handle.await.unwrap());
        }
        let _ = stop_relay.send(());

        let host = clients[0].session();
        let guest = clients[1].session();

        assert_eq!(host.role(), Role::Authority);
        assert_eq!(guest.role(), Role::Client);
        assert_eq!(guest.authority(), Some("host"));
        assert!(host.world().unwrap().tick() > 0);
        assert!(guest.replica().last_tick().is_some());
        assert!(guest.replica().next_sequence() > 1);
        assert!(network.stats().delivered > 0);
    }
}
