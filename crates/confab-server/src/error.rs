use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use confab_shared::error::ProtocolError;
use confab_store::StoreError;

/// Why a client event was rejected. Sent back to the originating connection
/// as the payload of an `error` event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Validation failed: {0}")]
    ValidationFailure(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Invalid membership: {0}")]
    InvalidMembership(String),

    #[error("Too many events, retry in {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    #[error(transparent)]
    Protocol(ProtocolError),
}

impl ChatError {
    /// Errors after which the connection is closed.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::AuthenticationFailed => true,
            Self::Protocol(e) => e.is_fatal(),
            _ => false,
        }
    }
}

impl From<ProtocolError> for ChatError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidId { .. } => ChatError::InvalidReference(err.to_string()),
            other => ChatError::Protocol(other),
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ChatError::NotFound(what.to_string()),
            StoreError::Unauthorized(reason) => ChatError::Unauthorized(reason),
            StoreError::InvalidReference(reason) => ChatError::InvalidReference(reason),
            StoreError::InvalidMembership(reason) => ChatError::InvalidMembership(reason),
            StoreError::Validation(reason) => ChatError::ValidationFailure(reason),
            other => {
                tracing::error!(error = %other, "store operation failed");
                ChatError::PersistenceFailure(other.to_string())
            }
        }
    }
}

/// Errors surfaced on the HTTP side (upgrade requests and plain routes).
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Server is at capacity")]
    AtCapacity,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ChatError> for ServerError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::AuthenticationFailed | ChatError::Unauthorized(_) => {
                ServerError::Unauthorized(err.to_string())
            }
            ChatError::PersistenceFailure(reason) => ServerError::Internal(reason),
            other => ServerError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::AtCapacity => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
