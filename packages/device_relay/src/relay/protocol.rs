//! Relay Protocol Types
//!
//! Gateway-originated notifications and the decoding of observer messages.
//! Device payloads are never decoded beyond "is it a JSON object".

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages the gateway itself sends, encoded as `{"type": ..., "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Notification {
    /// Device presence, pushed on observer admission and on device changes
    AppStatus { connected: bool },
    /// Reply to `cmd/status`
    Status { online: bool, state: DeviceState },
    /// Reply to `ping` and `cmd/ping`; epoch millis
    Pong { ts: i64 },
    Error { code: ErrorCode },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Ready,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AppNotConnected,
}

impl Notification {
    pub fn app_status(connected: bool) -> Self {
        Notification::AppStatus { connected }
    }

    pub fn status(device_present: bool) -> Self {
        Notification::Status {
            online: device_present,
            state: if device_present {
                DeviceState::Ready
            } else {
                DeviceState::Idle
            },
        }
    }

    pub fn pong_now() -> Self {
        Notification::Pong {
            ts: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn app_not_connected() -> Self {
        Notification::Error {
            code: ErrorCode::AppNotConnected,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A text frame from an observer, classified for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverMessage {
    /// `{"type":"cmd","payload":{"action":...}}`; action lowercased, empty when absent
    Command { action: String },
    /// Bare `{"type":"ping"}`
    Ping,
    /// Valid JSON of any other shape
    Other,
    /// Not JSON at all
    Malformed,
}

impl ObserverMessage {
    pub fn parse(text: &str) -> Self {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => return ObserverMessage::Malformed,
        };

        match value.get("type").and_then(Value::as_str) {
            Some("cmd") => {
                let action = value
                    .get("payload")
                    .and_then(|p| p.get("action"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_lowercase();
                ObserverMessage::Command { action }
            }
            Some("ping") => ObserverMessage::Ping,
            _ => ObserverMessage::Other,
        }
    }
}

/// Whether a device text frame may be broadcast: it must be a JSON object.
pub fn is_structured(text: &str) -> bool {
    serde_json::from_str::<serde_json::Map<String, Value>>(text).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notification_wire_format() {
        let json: Value =
            serde_json::from_str(&Notification::app_status(true).to_json().unwrap()).unwrap();
        assert_eq!(json, json!({"type": "app_status", "payload": {"connected": true}}));

        let json: Value =
            serde_json::from_str(&Notification::status(false).to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            json!({"type": "status", "payload": {"online": false, "state": "idle"}})
        );

        let json: Value =
            serde_json::from_str(&Notification::app_not_connected().to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            json!({"type": "error", "payload": {"code": "app_not_connected"}})
        );
    }

    #[test]
    fn status_reflects_presence() {
        assert_eq!(
            Notification::status(true),
            Notification::Status {
                online: true,
                state: DeviceState::Ready
            }
        );
    }

    #[test]
    fn pong_carries_epoch_millis() {
        let before = chrono::Utc::now().timestamp_millis();
        let Notification::Pong { ts } = Notification::pong_now() else {
            panic!("expected pong");
        };
        assert!(ts >= before);
    }

    #[test]
    fn parse_commands() {
        assert_eq!(
            ObserverMessage::parse(r#"{"type":"cmd","payload":{"action":"STATUS"}}"#),
            ObserverMessage::Command {
                action: "status".into()
            }
        );
        assert_eq!(
            ObserverMessage::parse(r#"{"type":"cmd","payload":{"action":"tap","x":10}}"#),
            ObserverMessage::Command {
                action: "tap".into()
            }
        );
        assert_eq!(
            ObserverMessage::parse(r#"{"type":"cmd"}"#),
            ObserverMessage::Command {
                action: String::new()
            }
        );
    }

    #[test]
    fn parse_other_shapes() {
        assert_eq!(ObserverMessage::parse(r#"{"type":"ping"}"#), ObserverMessage::Ping);
        assert_eq!(
            ObserverMessage::parse(r#"{"type":"hello"}"#),
            ObserverMessage::Other
        );
        assert_eq!(ObserverMessage::parse("42"), ObserverMessage::Other);
        assert_eq!(ObserverMessage::parse("null"), ObserverMessage::Other);
        assert_eq!(ObserverMessage::parse("{not json"), ObserverMessage::Malformed);
    }

    #[test]
    fn structured_device_frames() {
        assert!(is_structured(r#"{"type":"battery","payload":{"level":80}}"#));
        assert!(is_structured("{}"));
        assert!(!is_structured("[1,2,3]"));
        assert!(!is_structured("frame-data"));
    }
}
