//! Connection task
//!
//! Owns one upgraded socket: a writer draining the peer's queue and a reader
//! routing inbound frames. Whichever finishes first ends the connection.

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::stream::{SplitSink, SplitStream};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info};

use super::Relay;
use super::peer::{Peer, PeerChannels, Role, Shutdown};

const REPLACED_REASON: &str = "replaced";
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Register the socket under `role` and serve it until it closes.
pub async fn run_connection(socket: WebSocket, role: Role, relay: Arc<Relay>) {
    let (peer, channels) = Peer::new(role, relay.send_buffer());
    let conn_id = peer.id();
    relay.metrics().connection_opened();
    info!(%conn_id, %role, "Relay connection opened");

    let (ws_sender, ws_receiver) = socket.split();
    relay.registry().admit(peer.clone()).await;

    let reason = tokio::select! {
        reason = write_loop(ws_sender, channels) => reason,
        _ = read_loop(ws_receiver, &peer, &relay) => None,
    };

    relay.registry().remove(&peer).await;
    relay.metrics().connection_closed();

    match reason {
        Some(Shutdown::Replaced) => info!(%conn_id, %role, "Relay connection replaced"),
        Some(Shutdown::Terminated) => info!(%conn_id, %role, "Relay connection timed out"),
        None => info!(%conn_id, %role, "Relay connection closed"),
    }
}

/// Drain the outbound queue until the socket fails or a shutdown arrives.
///
/// Every send races the shutdown signal, so a peer that stopped reading
/// cannot hold the writer past its eviction.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut channels: PeerChannels,
) -> Option<Shutdown> {
    loop {
        tokio::select! {
            biased;

            reason = wait_for_shutdown(&mut channels.shutdown) => {
                return close(&mut sink, reason).await;
            }

            frame = channels.outbound.recv() => {
                let Some(frame) = frame else {
                    return None;
                };
                tokio::select! {
                    biased;

                    reason = wait_for_shutdown(&mut channels.shutdown) => {
                        return close(&mut sink, reason).await;
                    }

                    sent = sink.send(frame.into_message()) => {
                        if let Err(e) = sent {
                            debug!("WebSocket send error: {}", e);
                            return None;
                        }
                    }
                }
            }
        }
    }
}

/// Resolves with the shutdown reason once one is set.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<Option<Shutdown>>) -> Option<Shutdown> {
    match shutdown.wait_for(Option::is_some).await {
        Ok(reason) => *reason,
        Err(_) => None,
    }
}

/// End the writer for `reason`. A replaced peer gets a bounded attempt at a
/// 1012 close frame; a terminated one just has its transport dropped.
async fn close(
    sink: &mut SplitSink<WebSocket, Message>,
    reason: Option<Shutdown>,
) -> Option<Shutdown> {
    if reason == Some(Shutdown::Replaced) {
        let frame = CloseFrame {
            code: close_code::RESTART,
            reason: REPLACED_REASON.into(),
        };
        match timeout(CLOSE_TIMEOUT, sink.send(Message::Close(Some(frame)))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Failed to send close frame: {}", e),
            Err(_) => debug!("Timed out sending close frame"),
        }
    }
    reason
}

/// Route inbound frames until the peer closes or errors.
async fn read_loop(mut stream: SplitStream<WebSocket>, peer: &Peer, relay: &Relay) {
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!(conn_id = %peer.id(), "WebSocket receive error: {}", e);
                break;
            }
        };

        match msg {
            Message::Pong(_) => peer.mark_alive(),
            Message::Close(_) => break,
            Message::Ping(_) => {}
            Message::Text(text) => {
                relay.metrics().message_received();
                match peer.role() {
                    Role::Observer => {
                        relay.route_observer(peer, text).await;
                    }
                    Role::Device => {
                        relay.route_device(Message::Text(text)).await;
                    }
                }
            }
            Message::Binary(bytes) => {
                relay.metrics().message_received();
                match peer.role() {
                    Role::Device => {
                        relay.route_device(Message::Binary(bytes)).await;
                    }
                    // Panels may send their JSON commands as binary frames.
                    Role::Observer => match std::str::from_utf8(&bytes) {
                        Ok(text) => {
                            relay.route_observer(peer, text.into()).await;
                        }
                        Err(_) => {
                            debug!(conn_id = %peer.id(), len = bytes.len(), "Ignoring non-UTF-8 observer frame");
                        }
                    },
                }
            }
        }
    }
}
