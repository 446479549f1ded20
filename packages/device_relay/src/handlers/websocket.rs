use axum::{
    extract::{
        OriginalUri, Query, State, WebSocketUpgrade,
        rejection::QueryRejection,
        ws::rejection::WebSocketUpgradeRejection,
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::AppState;
use crate::relay::{CredentialParams, HandshakeRequest, run_connection};

/// Relay WebSocket endpoint
///
/// Credentials are checked before the upgrade completes. Every refusal gets
/// the same bare response so callers cannot tell which check failed.
pub async fn relay_websocket_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    params: Result<Query<CredentialParams>, QueryRejection>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let params = params.map(|Query(p)| p).unwrap_or_default();
    let request = HandshakeRequest::new(uri.path(), &headers, params);

    let accepted = match state.relay.policy().authenticate(&request) {
        Ok(accepted) => accepted,
        Err(e) => {
            debug!(path = %request.path, origin = ?request.origin, "Rejected relay handshake: {}", e);
            state.metrics.handshake_rejected();
            return rejection();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(e) => return e.into_response(),
    };

    let role = accepted.role;
    let relay = state.relay.clone();
    let ws = match accepted.subprotocol {
        Some(protocol) => ws.protocols([protocol]),
        None => ws,
    };

    ws.on_failed_upgrade(|e| debug!("Relay upgrade failed: {}", e))
        .on_upgrade(move |socket| run_connection(socket, role, relay))
}

fn rejection() -> Response {
    (StatusCode::FORBIDDEN, [(header::CONNECTION, "close")]).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, routing::any};
    use tower::ServiceExt;

    use crate::test_helpers::{TEST_TOKEN, test_app_state};

    fn upgrade_request(uri: &str, protocol: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .uri(uri)
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==");
        if let Some(protocol) = protocol {
            builder = builder.header(header::SEC_WEBSOCKET_PROTOCOL, protocol);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn router() -> (Router, AppState) {
        let state = test_app_state();
        let app = Router::new()
            .route("/ws", any(relay_websocket_handler))
            .with_state(state.clone());
        (app, state)
    }

    #[tokio::test]
    async fn wrong_token_gets_uniform_rejection() {
        let (app, state) = router();
        let resp = app
            .clone()
            .oneshot(upgrade_request("/ws?role=device&token=nope", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let wrong = resp.headers().clone();

        let resp = app
            .oneshot(upgrade_request("/ws?role=device", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(resp.headers(), &wrong);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());

        assert_eq!(state.metrics.snapshot().connections.handshakes_rejected, 2);
        assert!(!state.relay.registry().device_present().await);
    }

    #[tokio::test]
    async fn subprotocol_rejection_is_identical() {
        let (app, _state) = router();
        let resp = app
            .oneshot(upgrade_request("/ws", Some("device:nope")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn malformed_query_falls_back_to_subprotocol() {
        let (app, state) = router();
        // A repeated field makes the query unparseable.
        let resp = app
            .oneshot(upgrade_request(
                "/ws?role=panel&role=panel",
                Some(&format!("device:{TEST_TOKEN}")),
            ))
            .await
            .unwrap();
        // Accepted credentials reach the upgrade step, which needs a real
        // connection; oneshot requests have none.
        assert_eq!(resp.status(), StatusCode::UPGRADE_REQUIRED);
        assert_eq!(state.metrics.snapshot().connections.handshakes_rejected, 0);
    }
}
