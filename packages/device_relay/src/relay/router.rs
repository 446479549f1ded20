//! Relay Router
//!
//! Decides where each inbound frame goes based on the sender's role.

use axum::extract::ws::{Message, Utf8Bytes};
use tracing::{debug, warn};

use super::Relay;
use super::peer::{Outbound, Peer};
use super::protocol::{Notification, ObserverMessage, is_structured};
use crate::error::RelayError;

/// What the router did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Answered directly to the sender
    Replied,
    /// Queued for the device
    Forwarded,
    /// Fanned out to this many observers
    Broadcast(usize),
    /// Dropped without reply
    Ignored,
}

impl Relay {
    /// Handle a text frame sent by an observer.
    pub async fn route_observer(&self, sender: &Peer, text: Utf8Bytes) -> Routed {
        match ObserverMessage::parse(text.as_str()) {
            ObserverMessage::Command { action } => match action.as_str() {
                "status" => {
                    let present = self.registry().device_present().await;
                    self.reply(sender, &Notification::status(present))
                }
                "ping" => self.reply(sender, &Notification::pong_now()),
                _ => match self
                    .registry()
                    .forward_to_device(Outbound::Text(text))
                    .await
                {
                    Ok(()) => Routed::Forwarded,
                    Err(RelayError::DeviceNotConnected) => {
                        debug!(conn_id = %sender.id(), %action, "Command with no device connected");
                        self.reply(sender, &Notification::app_not_connected())
                    }
                },
            },
            ObserverMessage::Ping => self.reply(sender, &Notification::pong_now()),
            ObserverMessage::Other | ObserverMessage::Malformed => Routed::Ignored,
        }
    }

    /// Handle a data frame sent by the device.
    pub async fn route_device(&self, message: Message) -> Routed {
        match message {
            Message::Binary(bytes) => Routed::Broadcast(self.registry().broadcast_binary(bytes).await),
            Message::Text(text) => {
                if is_structured(text.as_str()) {
                    Routed::Broadcast(self.registry().broadcast_text(text).await)
                } else {
                    warn!(len = text.len(), "Dropping device frame that is not a JSON object");
                    self.metrics().malformed_device_message();
                    Routed::Ignored
                }
            }
            _ => Routed::Ignored,
        }
    }

    fn reply(&self, sender: &Peer, notification: &Notification) -> Routed {
        match sender.notify(notification) {
            Ok(()) => self.metrics().message_sent(),
            Err(e) => {
                debug!(conn_id = %sender.id(), "Dropping reply: {}", e);
                self.metrics().message_dropped();
            }
        }
        Routed::Replied
    }
}
