//! Error types for the relay and the device-control endpoints.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Why a connection upgrade was refused.
///
/// Only ever logged. Clients see the same bare rejection for every variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("unexpected path: {0}")]
    WrongPath(String),

    #[error("origin not allowed: {0}")]
    OriginNotAllowed(String),

    #[error("missing token")]
    MissingToken,

    #[error("token mismatch")]
    TokenMismatch,
}

/// Why a single message could not be queued for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("outbound queue full")]
    Full,

    #[error("connection closed")]
    Closed,

    #[error("failed to encode message")]
    Encode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("no device connected")]
    DeviceNotConnected,
}

/// Failures of the device-control HTTP actions.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid ip")]
    InvalidIp,

    #[error("invalid port")]
    InvalidPort,

    #[error("{step} failed: {message}")]
    StepFailed { step: &'static str, message: String },
}

impl IntoResponse for ActionError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ActionError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "ok": false, "error": "unauthorized" }),
            ),
            ActionError::InvalidIp | ActionError::InvalidPort => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "ok": false, "error": self.to_string() }),
            ),
            ActionError::StepFailed { step, message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "ok": false, "step": step, "error": message }),
            ),
        };
        (status, Json(body)).into_response()
    }
}
