//! Relay metrics for observability
//!
//! Lock-free counters bumped from connection tasks and the liveness sweep.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Relay-wide metrics
#[derive(Debug, Default)]
pub struct RelayMetrics {
    // Connection metrics
    /// Currently open relay connections
    pub active_connections: AtomicU64,
    /// Total accepted connections since start
    pub total_connections: AtomicU64,
    /// Upgrade requests refused during the handshake
    pub handshakes_rejected: AtomicU64,
    /// Device connections pre-empted by a newer device
    pub device_replacements: AtomicU64,
    /// Connections terminated for missing a heartbeat
    pub liveness_evictions: AtomicU64,

    // Message metrics
    /// Text/binary frames received from peers
    pub messages_received: AtomicU64,
    /// Frames queued for delivery to peers (forwards, replies, broadcasts)
    pub messages_sent: AtomicU64,
    /// Frames dropped because a peer's queue was full or closed
    pub messages_dropped: AtomicU64,
    /// Device text frames that were not JSON objects
    pub malformed_device_messages: AtomicU64,

    start_time: Option<Instant>,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    // Connection tracking
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn handshake_rejected(&self) {
        self.handshakes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn device_replaced(&self) {
        self.device_replacements.fetch_add(1, Ordering::Relaxed);
    }

    pub fn liveness_eviction(&self) {
        self.liveness_evictions.fetch_add(1, Ordering::Relaxed);
    }

    // Message tracking
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_device_message(&self) {
        self.malformed_device_messages
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
                handshakes_rejected: self.handshakes_rejected.load(Ordering::Relaxed),
                device_replacements: self.device_replacements.load(Ordering::Relaxed),
                liveness_evictions: self.liveness_evictions.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                received: self.messages_received.load(Ordering::Relaxed),
                sent: self.messages_sent.load(Ordering::Relaxed),
                dropped: self.messages_dropped.load(Ordering::Relaxed),
                malformed: self.malformed_device_messages.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub messages: MessageMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
    pub handshakes_rejected: u64,
    pub device_replacements: u64,
    pub liveness_evictions: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub sent: u64,
    pub dropped: u64,
    pub malformed: u64,
}

/// Body of `GET /healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub ok: bool,
    pub ts: i64,
    pub version: String,
}

/// Body of `GET /metrics`: counters plus current membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayStatus {
    pub device_connected: bool,
    pub observers: usize,
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
}
