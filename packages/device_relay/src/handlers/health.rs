use axum::{Json, extract::State, response::IntoResponse};

use crate::AppState;
use crate::metrics::{HealthStatus, RelayStatus};

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthStatus {
        ok: true,
        ts: chrono::Utc::now().timestamp_millis(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Metrics endpoint - relay counters plus current membership
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let membership = state.relay.registry().membership().await;
    Json(RelayStatus {
        device_connected: membership.device_connected,
        observers: membership.observers,
        metrics: state.metrics.snapshot(),
    })
}
