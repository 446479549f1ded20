//! Membership Registry
//!
//! Tracks the single device connection and the set of observers. Every
//! admission, removal and fan-out runs under one mutex and never awaits I/O
//! while holding it: frames are only enqueued with `try_send`.

use axum::body::Bytes;
use axum::extract::ws::Utf8Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::peer::{ConnectionId, Outbound, Peer, Role, Shutdown};
use super::protocol::Notification;
use crate::error::{DeliveryError, RelayError};
use crate::metrics::RelayMetrics;

#[derive(Default)]
struct Members {
    device: Option<Peer>,
    observers: HashMap<ConnectionId, Peer>,
}

/// Point-in-time view of who is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    pub device_connected: bool,
    pub observers: usize,
}

pub struct Registry {
    members: Mutex<Members>,
    metrics: Arc<RelayMetrics>,
}

impl Registry {
    pub fn new(metrics: Arc<RelayMetrics>) -> Self {
        Self {
            members: Mutex::new(Members::default()),
            metrics,
        }
    }

    /// Admit a freshly accepted connection according to its role.
    pub async fn admit(&self, peer: Peer) {
        match peer.role() {
            Role::Device => self.admit_device(peer).await,
            Role::Observer => self.admit_observer(peer).await,
        }
    }

    /// Remove a connection according to its role. Safe to call repeatedly.
    pub async fn remove(&self, peer: &Peer) -> bool {
        match peer.role() {
            Role::Device => self.remove_device(peer.id()).await,
            Role::Observer => self.remove_observer(peer.id()).await,
        }
    }

    /// Add an observer and tell it whether a device is present.
    pub async fn admit_observer(&self, peer: Peer) {
        let mut members = self.members.lock().await;
        let connected = members.device.is_some();
        deliver_notification(&peer, &Notification::app_status(connected), &self.metrics);
        debug!(conn_id = %peer.id(), "Observer admitted");
        members.observers.insert(peer.id(), peer);
    }

    /// Install a device, closing any previous one with "replaced".
    pub async fn admit_device(&self, peer: Peer) {
        let mut members = self.members.lock().await;
        if let Some(previous) = members.device.take() {
            if previous.id() != peer.id() {
                info!(
                    old_conn = %previous.id(),
                    new_conn = %peer.id(),
                    "Device replaced by a newer connection"
                );
                previous.shutdown(Shutdown::Replaced);
                self.metrics.device_replaced();
            }
        }
        info!(conn_id = %peer.id(), "Device connected");
        members.device = Some(peer);
        fan_out_notification(
            &members.observers,
            &Notification::app_status(true),
            &self.metrics,
        );
    }

    /// Drop an observer. Other observers are not told.
    pub async fn remove_observer(&self, id: ConnectionId) -> bool {
        let removed = self.members.lock().await.observers.remove(&id).is_some();
        if removed {
            debug!(conn_id = %id, "Observer removed");
        }
        removed
    }

    /// Clear the device slot if `id` still holds it and announce the absence.
    /// A superseded device is a no-op.
    pub async fn remove_device(&self, id: ConnectionId) -> bool {
        let mut members = self.members.lock().await;
        match &members.device {
            Some(current) if current.id() == id => {
                members.device = None;
                info!(conn_id = %id, "Device disconnected");
                fan_out_notification(
                    &members.observers,
                    &Notification::app_status(false),
                    &self.metrics,
                );
                true
            }
            _ => false,
        }
    }

    /// Device presence and observer count read under a single lock.
    pub async fn membership(&self) -> Membership {
        let members = self.members.lock().await;
        Membership {
            device_connected: members.device.is_some(),
            observers: members.observers.len(),
        }
    }

    pub async fn device_present(&self) -> bool {
        self.members.lock().await.device.is_some()
    }

    pub async fn observer_count(&self) -> usize {
        self.members.lock().await.observers.len()
    }

    /// Queue a frame for the device. Fails only when there is no open device;
    /// a full device queue drops the frame.
    pub async fn forward_to_device(&self, frame: Outbound) -> Result<(), RelayError> {
        let members = self.members.lock().await;
        let device = members
            .device
            .as_ref()
            .filter(|d| !d.is_closed())
            .ok_or(RelayError::DeviceNotConnected)?;
        match device.try_deliver(frame) {
            Ok(()) => self.metrics.message_sent(),
            Err(DeliveryError::Closed) => return Err(RelayError::DeviceNotConnected),
            Err(e) => {
                debug!(conn_id = %device.id(), "Dropping command: {}", e);
                self.metrics.message_dropped();
            }
        }
        Ok(())
    }

    /// Fan a text frame out to every observer. Returns how many accepted it.
    pub async fn broadcast_text(&self, text: Utf8Bytes) -> usize {
        let members = self.members.lock().await;
        fan_out(&members.observers, &Outbound::Text(text), &self.metrics)
    }

    /// Fan raw bytes out to every observer. Returns how many accepted them.
    pub async fn broadcast_binary(&self, bytes: Bytes) -> usize {
        let members = self.members.lock().await;
        fan_out(&members.observers, &Outbound::Binary(bytes), &self.metrics)
    }

    /// Snapshot of every registered connection, device first.
    pub async fn peers(&self) -> Vec<Peer> {
        let members = self.members.lock().await;
        members
            .device
            .iter()
            .chain(members.observers.values())
            .cloned()
            .collect()
    }
}

fn deliver(peer: &Peer, frame: Outbound, metrics: &RelayMetrics) -> bool {
    match peer.try_deliver(frame) {
        Ok(()) => {
            metrics.message_sent();
            true
        }
        Err(e) => {
            debug!(conn_id = %peer.id(), "Dropping frame: {}", e);
            metrics.message_dropped();
            false
        }
    }
}

fn deliver_notification(peer: &Peer, notification: &Notification, metrics: &RelayMetrics) {
    match peer.notify(notification) {
        Ok(()) => metrics.message_sent(),
        Err(e) => {
            debug!(conn_id = %peer.id(), "Dropping notification: {}", e);
            metrics.message_dropped();
        }
    }
}

fn fan_out(
    observers: &HashMap<ConnectionId, Peer>,
    frame: &Outbound,
    metrics: &RelayMetrics,
) -> usize {
    observers
        .values()
        .filter(|peer| deliver(peer, frame.clone(), metrics))
        .count()
}

fn fan_out_notification(
    observers: &HashMap<ConnectionId, Peer>,
    notification: &Notification,
    metrics: &RelayMetrics,
) {
    for peer in observers.values() {
        deliver_notification(peer, notification, metrics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::peer::PeerChannels;
    use serde_json::{Value, json};

    fn registry() -> Registry {
        Registry::new(Arc::new(RelayMetrics::new()))
    }

    fn peer(role: Role) -> (Peer, PeerChannels) {
        Peer::new(role, 16)
    }

    fn drain_json(channels: &mut PeerChannels) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = channels.outbound.try_recv() {
            if let Outbound::Text(text) = frame {
                out.push(serde_json::from_str(text.as_str()).unwrap());
            }
        }
        out
    }

    #[tokio::test]
    async fn observer_admission_reports_absent_device() {
        let registry = registry();
        let (obs, mut obs_rx) = peer(Role::Observer);
        registry.admit(obs).await;

        assert_eq!(
            drain_json(&mut obs_rx),
            vec![json!({"type": "app_status", "payload": {"connected": false}})]
        );
        assert_eq!(registry.observer_count().await, 1);
    }

    #[tokio::test]
    async fn device_admission_broadcasts_presence() {
        let registry = registry();
        let (obs_a, mut rx_a) = peer(Role::Observer);
        let (obs_b, mut rx_b) = peer(Role::Observer);
        registry.admit(obs_a).await;
        registry.admit(obs_b).await;
        drain_json(&mut rx_a);
        drain_json(&mut rx_b);

        let (device, _device_rx) = peer(Role::Device);
        registry.admit(device).await;

        let expected = vec![json!({"type": "app_status", "payload": {"connected": true}})];
        assert_eq!(drain_json(&mut rx_a), expected);
        assert_eq!(drain_json(&mut rx_b), expected);
        assert!(registry.device_present().await);

        // A late observer learns the device is there.
        let (late, mut late_rx) = peer(Role::Observer);
        registry.admit(late).await;
        assert_eq!(drain_json(&mut late_rx), expected);
    }

    #[tokio::test]
    async fn second_device_replaces_first_exactly_once() {
        let registry = registry();
        let (first, first_rx) = peer(Role::Device);
        let (second, second_rx) = peer(Role::Device);
        let first_id = first.id();
        let second_id = second.id();

        registry.admit(first).await;
        assert_eq!(*first_rx.shutdown.borrow(), None);

        registry.admit(second).await;
        assert_eq!(*first_rx.shutdown.borrow(), Some(Shutdown::Replaced));
        assert_eq!(*second_rx.shutdown.borrow(), None);
        assert_eq!(
            registry
                .metrics
                .device_replacements
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );

        let peers = registry.peers().await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id(), second_id);
        assert_ne!(first_id, second_id);
    }

    #[tokio::test]
    async fn superseded_device_removal_is_noop() {
        let registry = registry();
        let (obs, mut obs_rx) = peer(Role::Observer);
        registry.admit(obs).await;

        let (first, _first_rx) = peer(Role::Device);
        let (second, _second_rx) = peer(Role::Device);
        registry.admit(first.clone()).await;
        registry.admit(second.clone()).await;
        drain_json(&mut obs_rx);

        assert!(!registry.remove(&first).await);
        assert!(registry.device_present().await);
        assert!(drain_json(&mut obs_rx).is_empty());

        assert!(registry.remove(&second).await);
        assert!(!registry.device_present().await);
        assert_eq!(
            drain_json(&mut obs_rx),
            vec![json!({"type": "app_status", "payload": {"connected": false}})]
        );

        // Idempotent
        assert!(!registry.remove(&second).await);
        assert!(drain_json(&mut obs_rx).is_empty());
    }

    #[tokio::test]
    async fn observer_removal_is_silent() {
        let registry = registry();
        let (a, _a_rx) = peer(Role::Observer);
        let (b, mut b_rx) = peer(Role::Observer);
        registry.admit(a.clone()).await;
        registry.admit(b).await;
        drain_json(&mut b_rx);

        assert!(registry.remove(&a).await);
        assert!(!registry.remove(&a).await);
        assert_eq!(registry.observer_count().await, 1);
        assert!(drain_json(&mut b_rx).is_empty());
    }

    #[tokio::test]
    async fn membership_tracks_both_roles() {
        let registry = registry();
        assert_eq!(
            registry.membership().await,
            Membership {
                device_connected: false,
                observers: 0
            }
        );

        let (device, _device_rx) = peer(Role::Device);
        let (a, _a_rx) = peer(Role::Observer);
        let (b, _b_rx) = peer(Role::Observer);
        registry.admit(device.clone()).await;
        registry.admit(a).await;
        registry.admit(b.clone()).await;
        registry.remove(&b).await;
        assert_eq!(
            registry.membership().await,
            Membership {
                device_connected: true,
                observers: 1
            }
        );

        registry.remove(&device).await;
        assert!(!registry.membership().await.device_connected);
    }

    #[tokio::test]
    async fn forward_without_device_fails() {
        let registry = registry();
        assert_eq!(
            registry
                .forward_to_device(Outbound::Text("{}".into()))
                .await,
            Err(RelayError::DeviceNotConnected)
        );
    }

    #[tokio::test]
    async fn forward_reaches_device() {
        let registry = registry();
        let (device, mut device_rx) = peer(Role::Device);
        registry.admit(device).await;

        registry
            .forward_to_device(Outbound::Text(r#"{"type":"cmd"}"#.into()))
            .await
            .unwrap();
        assert_eq!(
            device_rx.outbound.try_recv().unwrap(),
            Outbound::Text(r#"{"type":"cmd"}"#.into())
        );
    }

    #[tokio::test]
    async fn forward_to_closed_device_fails() {
        let registry = registry();
        let (device, device_rx) = peer(Role::Device);
        registry.admit(device).await;
        drop(device_rx);

        assert_eq!(
            registry.forward_to_device(Outbound::Ping).await,
            Err(RelayError::DeviceNotConnected)
        );
    }

    #[tokio::test]
    async fn broadcast_skips_failed_recipients() {
        let registry = registry();
        let (full, mut full_rx) = Peer::new(Role::Observer, 1);
        let (closed, closed_rx) = peer(Role::Observer);
        let (healthy, mut healthy_rx) = peer(Role::Observer);
        registry.admit(full).await; // app_status fills the one slot
        registry.admit(closed).await;
        registry.admit(healthy).await;
        drop(closed_rx);
        drain_json(&mut healthy_rx);

        let delivered = registry
            .broadcast_binary(Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF]))
            .await;
        assert_eq!(delivered, 1);
        assert_eq!(
            healthy_rx.outbound.try_recv().unwrap(),
            Outbound::Binary(Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF]))
        );

        // The full queue still only holds its original notification.
        assert_eq!(drain_json(&mut full_rx).len(), 1);
    }

    #[tokio::test]
    async fn broadcast_preserves_order() {
        let registry = registry();
        let (obs, mut obs_rx) = peer(Role::Observer);
        registry.admit(obs).await;
        drain_json(&mut obs_rx);

        for i in 0..5 {
            registry
                .broadcast_text(format!(r#"{{"seq":{i}}}"#).into())
                .await;
        }
        let seqs: Vec<i64> = drain_json(&mut obs_rx)
            .iter()
            .map(|v| v["seq"].as_i64().unwrap())
            .collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }
}
