//! Error handling for the relay

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Registry is at its configured session limit
    #[error("Server is full ({0} sessions)")]
    CapacityExceeded(usize),

    /// Operation on a session id that is no longer registered
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    /// Duplicate live session / stream
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Client transport read/write/close failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// No control message within the idle timeout
    #[error("Session idle for {0:?}")]
    IdleTimeout(std::time::Duration),

    /// Metrics collection switched off
    #[error("Metrics collection is not enabled")]
    MetricsDisabled,

    /// Metrics enabled but nothing collected yet
    #[error("No metrics data available for {0}")]
    NoMetrics(Uuid),

    /// Malformed client input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Inference engine boundary failure
    #[error("Engine error: {0}")]
    Engine(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors that end a session (as opposed to being reported and skipped)
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::IdleTimeout(_))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            Error::CapacityExceeded(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVER_FULL"),
            Error::SessionNotFound(_) => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND"),
            Error::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Error::Transport(_) => (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR"),
            Error::IdleTimeout(_) => (StatusCode::REQUEST_TIMEOUT, "IDLE_TIMEOUT"),
            Error::MetricsDisabled => (StatusCode::BAD_REQUEST, "METRICS_DISABLED"),
            Error::NoMetrics(_) => (StatusCode::NOT_FOUND, "NO_METRICS"),
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Error::Engine(_) => (StatusCode::BAD_GATEWAY, "ENGINE_ERROR"),
            Error::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SERIALIZATION_ERROR"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        let message = self.to_string();

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
