use thiserror::Error;

/// Failure to turn bytes from the wire into a typed message.
///
/// Every variant is a decode-class error: callers at the boundary log it and
/// drop the message, nothing downstream ever sees one.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed binary frame: {0}")]
    Binary(#[from] bincode::Error),

    #[error("payload for `{kind}` does not match its shape: {source}")]
    Payload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown relay event `{0}`")]
    UnknownEvent(String),
}
