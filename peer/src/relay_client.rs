//! HTTP client for the signaling relay.

use crate::error::PeerError;
use futures::StreamExt;
use log::{debug, warn};
use serde::Deserialize;
use shared::{ConnectionConfig, PeerId, RelayEvent, SessionList, Signal, SignalEnvelope};
use tokio::sync::mpsc;

/// Relay's answer to a publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Receipt {
    pub delivered: usize,
    pub dropped: usize,
}

/// Incremental parser for a `text/event-stream` body.
///
/// Only the `event` and `data` fields matter here; comments and other fields
/// are skipped. An event is complete at the first blank line after it.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: String,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every `(event, data)` pair it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<(String, String)> {
        self.buffer.extend_from_slice(chunk);
        let mut complete = Vec::new();

        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');

            if line.is_empty() {
                if !self.data.is_empty() {
                    complete.push((std::mem::take(&mut self.event), self.data.join("\n")));
                    self.data.clear();
                }
                self.event.clear();
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = value.to_string(),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        complete
    }
}

#[derive(Debug, Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    base_url: String,
    session: String,
    peer: PeerId,
    display_name: Option<String>,
}

impl RelayClient {
    pub fn new(
        base_url: &str,
        session: impl Into<String>,
        peer: impl Into<PeerId>,
        display_name: Option<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            session: session.into(),
            peer: peer.into(),
            display_name,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn query(&self) -> Vec<(&'static str, &str)> {
        let mut query = vec![("session", self.session.as_str()), ("peer", self.peer.as_str())];
        if let Some(name) = &self.display_name {
            query.push(("name", name.as_str()));
        }
        query
    }

    /// Opens the event stream and forwards decoded events into the returned
    /// channel until the relay closes the stream.
    pub async fn subscribe(&self) -> Result<mpsc::Receiver<RelayEvent>, PeerError> {
        let response = self
            .http
            .get(self.url("/signal"))
            .query(&self.query())
            .header("accept", "text/event-stream")
            .send()
            .await?;
        let response = check_status(response).await?;

        let (sender, receiver) = mpsc::channel(64);
        let peer = self.peer.clone();
        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!("Relay stream for {} failed: {}", peer, e);
                        break;
                    }
                };

                for (event, data) in decoder.push(&chunk) {
                    match RelayEvent::parse(&event, &data) {
                        Ok(event) => {
                            if sender.send(event).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => debug!("Dropping relay event `{}`: {}", event, e),
                    }
                }
            }
            debug!("Relay stream for {} ended", peer);
        });

        Ok(receiver)
    }

    /// Publishes `signal` to `target`, or to the whole session.
    pub async fn publish(
        &self,
        target: Option<PeerId>,
        signal: &Signal,
    ) -> Result<Receipt, PeerError> {
        let envelope = SignalEnvelope::new(&self.session, &self.peer, target, signal)?;
        let response = self
            .http
            .post(self.url("/signal"))
            .query(&[("session", &self.session), ("peer", &self.peer)])
            .json(&envelope)
            .send()
            .await?;
        let receipt = check_status(response).await?.json::<Receipt>().await?;

        if receipt.dropped > 0 {
            debug!(
                "{} from {}: {} delivered, {} dropped",
                signal.kind().as_str(),
                self.peer,
                receipt.delivered,
                receipt.dropped
            );
        }
        Ok(receipt)
    }

    pub async fn connection_config(&self) -> Result<ConnectionConfig, PeerError> {
        let response = self.http.get(self.url("/connection-config")).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    pub async fn sessions(&self) -> Result<SessionList, PeerError> {
        let response = self.http.get(self.url("/sessions")).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    pub fn peer_id(&self) -> &str {
        &self.peer
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, PeerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PeerError::RelayStatus {
        status: status.as_u16(),
        body,
    })
}
