//! Liveness Monitor
//!
//! Every period, each registered connection must have answered the previous
//! ping. Silent connections are terminated without a close handshake; the
//! rest get their flag cleared and a fresh ping.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::peer::{Outbound, Shutdown};
use super::registry::Registry;
use crate::metrics::RelayMetrics;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pinged: usize,
    pub evicted: usize,
}

/// Run one liveness pass over every registered connection.
pub async fn sweep(registry: &Registry, metrics: &RelayMetrics) -> SweepReport {
    let mut report = SweepReport::default();

    for peer in registry.peers().await {
        if !peer.take_liveness() {
            if peer.shutdown(Shutdown::Terminated) {
                info!(conn_id = %peer.id(), role = %peer.role(), "Terminating unresponsive connection");
                metrics.liveness_eviction();
                report.evicted += 1;
            }
            continue;
        }

        // A full queue just means this ping is lost; the next sweep evicts.
        if let Err(e) = peer.try_deliver(Outbound::Ping) {
            debug!(conn_id = %peer.id(), "Heartbeat ping not queued: {}", e);
        }
        report.pinged += 1;
    }

    report
}

/// Start the periodic sweep. The first pass runs one full period after start.
pub fn spawn_liveness_monitor(
    registry: Arc<Registry>,
    metrics: Arc<RelayMetrics>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let report = sweep(&registry, &metrics).await;
            if report.evicted > 0 || report.pinged > 0 {
                debug!(
                    pinged = report.pinged,
                    evicted = report.evicted,
                    "Liveness sweep"
                );
            }
        }
    })
}
