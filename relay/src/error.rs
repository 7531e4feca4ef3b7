use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::debug;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid {field} id: {reason}")]
    InvalidId {
        field: &'static str,
        reason: &'static str,
    },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("session `{0}` not found")]
    SessionNotFound(String),

    #[error("peer `{peer}` is not registered in session `{session}`")]
    PeerNotFound { session: String, peer: String },
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::InvalidId { .. } | RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::SessionNotFound(_) | RelayError::PeerNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        debug!("Rejecting request: {}", self);
        let body = Json(json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

const MAX_ID_LEN: usize = 64;

/// Session and peer ids are short ASCII tokens.
pub fn validate_id(field: &'static str, id: &str) -> Result<(), RelayError> {
    if id.is_empty() {
        return Err(RelayError::InvalidId {
            field,
            reason: "must not be empty",
        });
    }
    if id.len() > MAX_ID_LEN {
        return Err(RelayError::InvalidId {
            field,
            reason: "longer than 64 characters",
        });
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(RelayError::InvalidId {
            field,
            reason: "only ascii letters, digits, '-' and '_' are allowed",
        });
    }
    Ok(())
}
