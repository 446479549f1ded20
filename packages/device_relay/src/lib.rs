//! Device Relay
//!
//! A WebSocket gateway that pairs one remote device with any number of
//! control panels, plus the small HTTP surface around it: health and
//! metrics, device-control actions, and the static panel page.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod relay;
pub mod tools;

#[cfg(test)]
mod test_helpers;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{any, get, post},
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::{MakeSpan, TraceLayer};
use uuid::Uuid;

use crate::config::{AllowedOrigin, AppConfig};
use crate::metrics::RelayMetrics;
use crate::relay::Relay;

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub config: Arc<AppConfig>,
    pub metrics: Arc<RelayMetrics>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let metrics = Arc::new(RelayMetrics::new());
        let relay = Arc::new(Relay::new(&config.relay, metrics.clone()));
        Self {
            relay,
            config: Arc::new(config),
            metrics,
        }
    }
}

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri().path(),
            request_id = %request_id,
        )
    }
}

/// CORS for the HTTP endpoints, following the relay's origin restriction.
fn cors_layer(allowed: &AllowedOrigin) -> CorsLayer {
    match allowed {
        AllowedOrigin::Any => CorsLayer::permissive(),
        AllowedOrigin::Prefix(_) => {
            let allowed = allowed.clone();
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(
                    move |origin: &HeaderValue, _parts| {
                        origin.to_str().is_ok_and(|o| allowed.allows(o))
                    },
                ))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        }
    }
}

/// Build the full HTTP application.
pub fn app(state: AppState) -> Router {
    let config = state.config.clone();

    Router::new()
        .route(
            state.relay.policy().path(),
            any(handlers::relay_websocket_handler),
        )
        .route("/healthz", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        // Device control
        .route("/conectar-wifi", post(handlers::connect_wifi_handler))
        .route("/api/device/wifi", post(handlers::connect_wifi_handler))
        .route("/conectar-usb", post(handlers::connect_usb_handler))
        .route("/api/device/usb", post(handlers::connect_usb_handler))
        // Panel page and static assets
        .route_service("/", ServeFile::new(&config.http.panel_path))
        .fallback_service(ServeDir::new(&config.http.static_dir))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(cors_layer(&config.relay.allowed_origin))
        .with_state(state)
}
