//! Device Relay
//!
//! One device connection, any number of observer connections:
//! - handshake resolves role + token before anything is registered
//! - observers get device presence pushes and can command the device
//! - everything the device sends is fanned out to every observer
//! - a periodic ping sweep evicts connections that stop answering

mod connection;
mod handshake;
mod liveness;
mod peer;
mod protocol;
mod registry;
mod router;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::RelayConfig;
use crate::metrics::RelayMetrics;

pub use connection::run_connection;
pub use handshake::{Accepted, CredentialParams, HandshakePolicy, HandshakeRequest};
pub use liveness::{SweepReport, spawn_liveness_monitor, sweep};
pub use peer::{ConnectionId, Outbound, Peer, PeerChannels, Role, Shutdown};
pub use protocol::{DeviceState, ErrorCode, Notification, ObserverMessage};
pub use registry::{Membership, Registry};
pub use router::Routed;

/// Shared relay state handed to every connection task.
pub struct Relay {
    registry: Arc<Registry>,
    policy: HandshakePolicy,
    metrics: Arc<RelayMetrics>,
    send_buffer: usize,
    heartbeat_interval: Duration,
}

impl Relay {
    pub fn new(config: &RelayConfig, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            registry: Arc::new(Registry::new(metrics.clone())),
            policy: HandshakePolicy::from_config(config),
            metrics,
            send_buffer: config.send_buffer,
            heartbeat_interval: config.heartbeat_interval,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn policy(&self) -> &HandshakePolicy {
        &self.policy
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    pub fn send_buffer(&self) -> usize {
        self.send_buffer
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Start the periodic liveness sweep for this relay.
    pub fn spawn_liveness(&self) -> JoinHandle<()> {
        spawn_liveness_monitor(
            self.registry.clone(),
            self.metrics.clone(),
            self.heartbeat_interval,
        )
    }
}
