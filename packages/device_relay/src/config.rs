use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Equivalent ways to set the shared secret:
//
//   config.toml:     [relay]
//                    token = "..."
//
//   env var:         RELAY_RELAY__TOKEN=...   (double underscore = nesting)
//
//   legacy env var:  TOKEN=...   (also PORT and CORS_ORIGIN)

/// Shared secret used when nothing else is configured. Startup warns about it.
pub const DEFAULT_TOKEN: &str = "CHANGE_THIS_SUPER_SECURE_TOKEN";

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub relay: RelayFileConfig,
    #[serde(default)]
    pub http: HttpFileConfig,
    #[serde(default)]
    pub tools: ToolsFileConfig,
}

/// Listener settings (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Relay tunables (lives under `[relay]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayFileConfig {
    /// Path that accepts WebSocket upgrades.
    #[serde(default = "default_relay_path")]
    pub path: String,
    /// Shared secret every connection must present.
    #[serde(default = "default_token")]
    pub token: String,
    /// `*` allows any origin; anything else is an origin prefix.
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Outbound queue depth per connection before messages are dropped.
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
}

impl Default for RelayFileConfig {
    fn default() -> Self {
        Self {
            path: default_relay_path(),
            token: default_token(),
            allowed_origin: default_allowed_origin(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            send_buffer: default_send_buffer(),
        }
    }
}

/// Static asset settings (lives under `[http]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpFileConfig {
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    #[serde(default = "default_panel_file")]
    pub panel_file: String,
}

impl Default for HttpFileConfig {
    fn default() -> Self {
        Self {
            static_dir: default_static_dir(),
            panel_file: default_panel_file(),
        }
    }
}

/// External command-line tools driven by the device-control endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsFileConfig {
    #[serde(default = "default_adb")]
    pub adb: String,
    #[serde(default = "default_scrcpy")]
    pub scrcpy: String,
}

impl Default for ToolsFileConfig {
    fn default() -> Self {
        Self {
            adb: default_adb(),
            scrcpy: default_scrcpy(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5501
}
fn default_relay_path() -> String {
    "/ws".to_string()
}
fn default_token() -> String {
    DEFAULT_TOKEN.to_string()
}
fn default_allowed_origin() -> String {
    "*".to_string()
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_send_buffer() -> usize {
    256
}
fn default_static_dir() -> PathBuf {
    PathBuf::from("public")
}
fn default_panel_file() -> String {
    "scrcpy-panel.html".to_string()
}
fn default_adb() -> String {
    "adb".to_string()
}
fn default_scrcpy() -> String {
    "scrcpy".to_string()
}

/// Build a figment that layers: defaults → config.toml → RELAY_* env vars → legacy env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `RELAY_RELAY__TOKEN=secret`  →  `relay.token = "secret"`
///   `RELAY_SERVER__PORT=8080`    →  `server.port = 8080`
///
/// The flat `PORT`, `TOKEN` and `CORS_ORIGIN` variables are honoured last so
/// existing deployments keep working.
pub fn load_config(config_path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(FileConfig::default()));
    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }

    figment
        .merge(Env::prefixed("RELAY_").split("__"))
        .merge(
            Env::raw()
                .only(&["PORT", "TOKEN", "CORS_ORIGIN"])
                .map(|key| legacy_env_key(key.as_str()).into()),
        )
}

fn legacy_env_key(key: &str) -> String {
    match key.to_ascii_lowercase().as_str() {
        "port" => "server.port".to_string(),
        "token" => "relay.token".to_string(),
        "cors_origin" => "relay.allowed_origin".to_string(),
        other => other.to_string(),
    }
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

/// Which `Origin` headers may open relay connections.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllowedOrigin {
    Any,
    /// Origins must start with this value.
    Prefix(String),
}

impl AllowedOrigin {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value == "*" {
            Self::Any
        } else {
            Self::Prefix(value.to_string())
        }
    }

    pub fn allows(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Prefix(prefix) => origin.starts_with(prefix.as_str()),
        }
    }
}

/// Relay configuration (runtime view).
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub path: String,
    pub token: String,
    pub allowed_origin: AllowedOrigin,
    /// Period of the liveness sweep
    pub heartbeat_interval: Duration,
    pub send_buffer: usize,
}

impl RelayConfig {
    pub fn from_file(fc: &RelayFileConfig) -> Self {
        Self {
            path: fc.path.clone(),
            token: fc.token.clone(),
            allowed_origin: AllowedOrigin::parse(&fc.allowed_origin),
            heartbeat_interval: Duration::from_secs(fc.heartbeat_interval_secs.max(1)),
            send_buffer: fc.send_buffer.max(1),
        }
    }

    pub fn uses_default_token(&self) -> bool {
        self.token == DEFAULT_TOKEN
    }
}

/// Everything the HTTP side needs beyond the relay itself.
#[derive(Clone, Debug)]
pub struct HttpConfig {
    pub static_dir: PathBuf,
    pub panel_path: PathBuf,
    pub adb: String,
    pub scrcpy: String,
}

impl HttpConfig {
    pub fn from_file(http: &HttpFileConfig, tools: &ToolsFileConfig) -> Self {
        Self {
            static_dir: http.static_dir.clone(),
            panel_path: http.static_dir.join(&http.panel_file),
            adb: tools.adb.clone(),
            scrcpy: tools.scrcpy.clone(),
        }
    }
}

/// Fully resolved configuration.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub relay: RelayConfig,
    pub http: HttpConfig,
}

impl AppConfig {
    pub fn from_file(fc: &FileConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let listen_addr = format!("{}:{}", fc.server.host, fc.server.port)
            .parse::<SocketAddr>()
            .with_context(|| {
                format!(
                    "Invalid listen address {}:{}",
                    fc.server.host, fc.server.port
                )
            })?;
        anyhow::ensure!(
            fc.relay.path.starts_with('/'),
            "relay.path must start with '/', got {:?}",
            fc.relay.path
        );

        Ok(Self {
            listen_addr,
            relay: RelayConfig::from_file(&fc.relay),
            http: HttpConfig::from_file(&fc.http, &fc.tools),
        })
    }
}
