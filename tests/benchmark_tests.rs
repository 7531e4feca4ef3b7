//! Performance benchmarks for the replication hot paths

use peer::replication::ClientReplica;
use relay::PeerRegistry;
use shared::codec::{decode, encode};
use shared::{
    apply_input, EnemyState, Envelope, GameMessage, InputSample, Keys, ShipState, Signal,
    SignalEnvelope, WireFormat, WorldSnapshot, INPUT_DT,
};
use std::time::Instant;

fn busy_snapshot(tick: u32) -> WorldSnapshot {
    WorldSnapshot {
        tick,
        ships: (1..=8)
            .map(|id| ShipState::spawn(id, format!("peer-{}", id)))
            .collect(),
        enemies: (100..164)
            .map(|id| EnemyState {
                id,
                kind: (id % 4) as u8,
                x: id as f32 * 3.0,
                y: id as f32 * 2.0,
                angle: 0.0,
                hp: 50,
            })
            .collect(),
        input_ack: tick * 3,
        ..Default::default()
    }
}

/// Benchmarks the shared ship update
#[test]
fn benchmark_ship_update() {
    let mut ship = ShipState::spawn(1, "peer-1");
    let input = InputSample::new(1, Keys::UP | Keys::LEFT, 0.7);

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        apply_input(&mut ship, &input, INPUT_DT);
    }

    let duration = start.elapsed();
    println!(
        "Ship update: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 500);
}

/// Benchmarks reconciliation with a full pending buffer to replay
#[test]
fn benchmark_reconcile_with_full_buffer() {
    let mut replica = ClientReplica::new("peer-2");
    replica.apply_snapshot(&busy_snapshot(0));
    for _ in 0..200 {
        replica.next_input(Keys::UP, 0.3, false, None);
    }

    let iterations = 1_000;
    let start = Instant::now();

    for tick in 1..=iterations {
        // Ack nothing new so every pass replays the whole buffer.
        let mut snapshot = busy_snapshot(tick);
        snapshot.input_ack = 0;
        replica.apply_snapshot(&snapshot);
    }

    let duration = start.elapsed();
    println!(
        "Reconcile (128 pending): {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(replica.pending().len(), 128);
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks snapshot encoding in both wire formats
#[test]
fn benchmark_snapshot_codec() {
    let envelope = Envelope::new("host", GameMessage::WorldState(busy_snapshot(42)));
    let iterations = 2_000;

    for format in [WireFormat::Json, WireFormat::Binary] {
        let start = Instant::now();
        let mut bytes = 0;

        for _ in 0..iterations {
            let frame = encode(&envelope, format).unwrap();
            bytes = frame.len();
            let decoded = decode(&frame, format).unwrap();
            assert_eq!(decoded.peer_id, "host");
        }

        let duration = start.elapsed();
        println!(
            "Snapshot codec ({}): {} round trips of {} bytes in {:?} ({:.2} μs/iter)",
            format,
            iterations,
            bytes,
            duration,
            duration.as_micros() as f64 / iterations as f64
        );

        assert!(duration.as_millis() < 5000);
    }

    let json = encode(&envelope, WireFormat::Json).unwrap();
    let binary = encode(&envelope, WireFormat::Binary).unwrap();
    assert!(binary.len() < json.len());
}

/// Benchmarks broadcast fan-out through the registry
#[tokio::test]
async fn benchmark_registry_broadcast() {
    let mut registry = PeerRegistry::new(1024);
    let mut receivers = Vec::new();
    for i in 0..8 {
        let (_, receiver) = registry.join("room1", &format!("peer-{}", i), None);
        receivers.push(receiver);
    }

    let envelope = SignalEnvelope::new("room1", "peer-0", None, &Signal::Heartbeat).unwrap();
    let candidate = SignalEnvelope {
        kind: shared::SignalKind::Candidate,
        payload: serde_json::json!({"candidate": "candidate:1 1 udp 1 host"}),
        ..envelope
    };

    let iterations = 500;
    let start = Instant::now();

    for _ in 0..iterations {
        tokio_test::assert_ok!(registry.send(&candidate));
        for receiver in receivers.iter_mut() {
            while receiver.try_recv().is_ok() {}
        }
    }

    let duration = start.elapsed();
    println!(
        "Registry broadcast to 7 peers: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}
