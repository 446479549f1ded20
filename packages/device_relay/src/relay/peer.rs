//! Per-connection handle shared between the registry and the connection task.

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};
use tracing::error;
use uuid::Uuid;

use super::protocol::Notification;
use crate::error::DeliveryError;

/// Which side of the relay a connection speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Device,
    Observer,
}

impl Role {
    /// Normalize a claimed role. `device` and `app` select the device slot;
    /// anything else, including unknown or empty values, is an observer.
    pub fn parse(claimed: &str) -> Self {
        match claimed.trim().to_ascii_lowercase().as_str() {
            "device" | "app" => Role::Device,
            _ => Role::Observer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Device => "device",
            Role::Observer => "observer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A frame queued for one connection's writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(Utf8Bytes),
    Binary(Bytes),
    /// Heartbeat ping
    Ping,
}

impl Outbound {
    pub fn into_message(self) -> Message {
        match self {
            Outbound::Text(text) => Message::Text(text),
            Outbound::Binary(bytes) => Message::Binary(bytes),
            Outbound::Ping => Message::Ping(Bytes::new()),
        }
    }
}

/// How a connection is being ended from the relay side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// A newer device took the slot; close with 1012 "replaced".
    Replaced,
    /// Missed a heartbeat; drop the transport without a close handshake.
    Terminated,
}

/// Receiving ends owned by the connection task.
pub struct PeerChannels {
    pub outbound: mpsc::Receiver<Outbound>,
    pub shutdown: watch::Receiver<Option<Shutdown>>,
}

/// Cheap, cloneable handle to one live connection.
#[derive(Clone)]
pub struct Peer {
    id: ConnectionId,
    role: Role,
    outbound: mpsc::Sender<Outbound>,
    alive: Arc<AtomicBool>,
    shutdown: Arc<watch::Sender<Option<Shutdown>>>,
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("role", &self.role)
            .finish()
    }
}

impl Peer {
    pub fn new(role: Role, capacity: usize) -> (Self, PeerChannels) {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(None);
        let peer = Self {
            id: ConnectionId::new(),
            role,
            outbound: outbound_tx,
            alive: Arc::new(AtomicBool::new(true)),
            shutdown: Arc::new(shutdown_tx),
        };
        let channels = PeerChannels {
            outbound: outbound_rx,
            shutdown: shutdown_rx,
        };
        (peer, channels)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Queue a frame without waiting.
    pub fn try_deliver(&self, frame: Outbound) -> Result<(), DeliveryError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Queue a gateway notification.
    pub fn notify(&self, notification: &Notification) -> Result<(), DeliveryError> {
        self.send_json(notification)
    }

    /// Serialize `value` and queue it as a text frame. Nothing is queued when
    /// encoding fails.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), DeliveryError> {
        match serde_json::to_string(value) {
            Ok(json) => self.try_deliver(Outbound::Text(json.into())),
            Err(e) => {
                error!(conn_id = %self.id, "Failed to serialize message: {}", e);
                Err(DeliveryError::Encode)
            }
        }
    }

    /// The connection task is gone or ending.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed() || self.shutdown.borrow().is_some()
    }

    /// Record a heartbeat acknowledgement.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Clear the liveness flag, returning whether it was set.
    pub fn take_liveness(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    /// Ask the connection task to end. Only the first request counts;
    /// returns whether this call was it.
    pub fn shutdown(&self, reason: Shutdown) -> bool {
        self.shutdown.send_if_modified(|current| {
            if current.is_some() {
                false
            } else {
                *current = Some(reason);
                true
            }
        })
    }
}
