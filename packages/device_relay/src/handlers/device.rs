//! Device-control endpoints: attach a screen mirror over Wi-Fi or USB.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, header},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::Ipv4Addr;
use tracing::{error, info};

use crate::AppState;
use crate::error::ActionError;
use crate::tools;

pub const DEFAULT_ADB_PORT: u16 = 5555;

#[derive(Debug, Default, Deserialize)]
pub struct WifiRequest {
    #[serde(default)]
    pub ip: Option<String>,
    /// Number or numeric string; missing, null or zero means the default
    #[serde(default)]
    pub port: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResponse {
    pub ok: bool,
    pub message: String,
}

/// Require `Authorization: Bearer <token>` matching the relay secret.
fn authorize(headers: &HeaderMap, token: &str) -> Result<(), ActionError> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(t) if t == token => Ok(()),
        _ => Err(ActionError::Unauthorized),
    }
}

fn parse_ip(ip: Option<&str>) -> Result<Ipv4Addr, ActionError> {
    ip.map(str::trim)
        .filter(|ip| !ip.is_empty())
        .and_then(|ip| ip.parse().ok())
        .ok_or(ActionError::InvalidIp)
}

fn parse_port(port: Option<&Value>) -> Result<u16, ActionError> {
    let number = match port {
        None | Some(Value::Null) | Some(Value::Bool(false)) => return Ok(DEFAULT_ADB_PORT),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if s.is_empty() => return Ok(DEFAULT_ADB_PORT),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    }
    .ok_or(ActionError::InvalidPort)?;

    if number == 0.0 {
        return Ok(DEFAULT_ADB_PORT);
    }
    if number.fract() != 0.0 || !(1.0..=65535.0).contains(&number) {
        return Err(ActionError::InvalidPort);
    }
    Ok(number as u16)
}

/// Connect to a device over TCP with adb, then mirror it with scrcpy.
pub async fn connect_wifi_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<WifiRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ActionError> {
    authorize(&headers, &state.config.relay.token)?;

    let request = body.map(|Json(r)| r).unwrap_or_default();
    let ip = parse_ip(request.ip.as_deref())?;
    let port = parse_port(request.port.as_ref())?;
    let target = format!("{}:{}", ip, port);
    let http = &state.config.http;

    let adb = tools::run(&http.adb, &["connect", &target]).await;
    if !adb.ok && !adb.output().to_lowercase().contains("already connected") {
        error!(%target, code = adb.code, "adb connect failed: {}", adb.failure_message());
        return Err(ActionError::StepFailed {
            step: "adb_connect",
            message: adb.failure_message(),
        });
    }

    let pid = tools::spawn_detached(&http.scrcpy, &["-s", &target]).map_err(|e| {
        error!(%target, "Failed to start scrcpy: {}", e);
        ActionError::StepFailed {
            step: "scrcpy_spawn",
            message: e.to_string(),
        }
    })?;
    info!(%target, pid = ?pid, "Started scrcpy over Wi-Fi");

    Ok(Json(ActionResponse {
        ok: true,
        message: format!("Connecting to {} and launching scrcpy", target),
    }))
}

/// Mirror the USB-attached device with scrcpy.
pub async fn connect_usb_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ActionError> {
    authorize(&headers, &state.config.relay.token)?;

    let pid = tools::spawn_detached(&state.config.http.scrcpy, &[]).map_err(|e| {
        error!("Failed to start scrcpy: {}", e);
        ActionError::StepFailed {
            step: "scrcpy_spawn",
            message: e.to_string(),
        }
    })?;
    info!(pid = ?pid, "Started scrcpy over USB");

    Ok(Json(ActionResponse {
        ok: true,
        message: "scrcpy (USB) started".to_string(),
    }))
}
