//! HTTP surface of the relay
//!
//! `GET /signal` registers a peer and turns its queue into a server-sent event
//! stream, `POST /signal` publishes a signal on a peer's behalf. The service is
//! a cheap handle around the shared registry; axum clones it into every
//! handler.

use crate::config::RelayConfig;
use crate::error::{validate_id, RelayError};
use crate::registry::{Delivery, PeerRegistry};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::{self, Stream};
use log::{debug, info};
use serde::Deserialize;
use shared::{ConnectionConfig, PeerId, RelayEvent, SessionList, SignalEnvelope};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::cors::{Any, CorsLayer};

#[derive(Debug, Deserialize)]
pub struct SignalQuery {
    pub session: String,
    pub peer: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl SignalQuery {
    fn validate(&self) -> Result<(), RelayError> {
        validate_id("session", &self.session)?;
        validate_id("peer", &self.peer)
    }
}

#[derive(Clone)]
pub struct RelayService {
    registry: Arc<RwLock<PeerRegistry>>,
    config: Arc<RelayConfig>,
}

impl RelayService {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            registry: Arc::new(RwLock::new(PeerRegistry::new(config.queue_capacity))),
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> Arc<RwLock<PeerRegistry>> {
        Arc::clone(&self.registry)
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/signal", get(open_stream).post(publish))
            .route("/sessions", get(list_sessions))
            .route("/connection-config", get(connection_config))
            .route("/health", get(|| async { "ok" }))
            .layer(cors)
            .with_state(self.clone())
    }

    /// Evicts idle peers once.
    pub async fn sweep_once(&self) -> Vec<(String, PeerId)> {
        let evicted = {
            let mut registry = self.registry.write().await;
            registry.sweep(self.config.peer_timeout)
        };

        for (session_id, peer_id) in &evicted {
            info!(
                "Evicted peer {} from session {} after {:?} of inactivity",
                peer_id, session_id, self.config.peer_timeout
            );
        }
        evicted
    }

    /// Spawns the periodic eviction sweep.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let service = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(service.config.sweep_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            // The first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                service.sweep_once().await;
            }
        })
    }
}

/// Serves the relay on `listener` until `shutdown` resolves.
pub async fn run(
    listener: TcpListener,
    service: RelayService,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let sweeper = service.spawn_sweeper();
    let result = axum::serve(listener, service.router())
        .with_graceful_shutdown(shutdown)
        .await;
    sweeper.abort();
    result
}

async fn open_stream(
    State(service): State<RelayService>,
    Query(query): Query<SignalQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, RelayError> {
    query.validate()?;

    let (existing, receiver) = {
        let mut registry = service.registry.write().await;
        registry.join(&query.session, &query.peer, query.name.clone())
    };
    debug!(
        "Stream opened for {} in {} with {} existing peers",
        query.peer,
        query.session,
        existing.len()
    );

    let events = stream::unfold(receiver, |mut receiver| async move {
        let event = receiver.recv().await?;
        Some((Ok::<Event, Infallible>(to_sse(&event)), receiver))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(service.config.keep_alive)))
}

fn to_sse(event: &RelayEvent) -> Event {
    match event.to_json() {
        Ok(data) => Event::default().event(event.event_name()).data(data),
        Err(e) => {
            debug!("Failed to encode relay event: {}", e);
            Event::default().comment("encode error")
        }
    }
}

async fn publish(
    State(service): State<RelayService>,
    Query(query): Query<SignalQuery>,
    body: Bytes,
) -> Result<Json<Delivery>, RelayError> {
    query.validate()?;

    let envelope: SignalEnvelope = serde_json::from_slice(&body).map_err(|e| {
        debug!("Malformed signal from {} in {}: {}", query.peer, query.session, e);
        RelayError::BadRequest(format!("malformed signal: {}", e))
    })?;

    if envelope.session_id != query.session || envelope.peer_id != query.peer {
        return Err(RelayError::BadRequest(
            "envelope sessionId/peerId do not match the query".to_string(),
        ));
    }
    if let Some(target) = &envelope.target_id {
        validate_id("target", target)?;
    }

    let delivery = {
        let mut registry = service.registry.write().await;
        registry.send(&envelope)?
    };

    if delivery.dropped > 0 {
        debug!(
            "{} from {} in {}: {} delivered, {} dropped",
            envelope.kind.as_str(),
            envelope.peer_id,
            envelope.session_id,
            delivery.delivered,
            delivery.dropped
        );
    }

    Ok(Json(delivery))
}

async fn list_sessions(State(service): State<RelayService>) -> Json<SessionList> {
    let sessions = service.registry.read().await.summaries();
    Json(SessionList { sessions })
}

async fn connection_config(State(service): State<RelayService>) -> Json<ConnectionConfig> {
    Json(service.config.connection_config())
}
