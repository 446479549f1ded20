use crate::AppState;
use crate::config::{AppConfig, FileConfig};
use crate::metrics::RelayMetrics;
use crate::relay::Relay;
use std::sync::Arc;

pub const TEST_TOKEN: &str = "test-secret";

/// Defaults with a known token, bound to an ephemeral loopback port.
pub fn test_config() -> AppConfig {
    let mut fc = FileConfig::default();
    fc.server.host = "127.0.0.1".into();
    fc.server.port = 0;
    fc.relay.token = TEST_TOKEN.into();
    AppConfig::from_file(&fc).expect("test config")
}

pub fn test_app_state() -> AppState {
    AppState::new(test_config())
}

/// Like `test_app_state`, with the resolved config adjusted first.
pub fn test_app_state_with(adjust: impl FnOnce(&mut AppConfig)) -> AppState {
    let mut config = test_config();
    adjust(&mut config);
    AppState::new(config)
}

pub fn test_relay() -> Relay {
    Relay::new(&test_config().relay, Arc::new(RelayMetrics::new()))
}
