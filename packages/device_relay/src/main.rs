use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use device_relay::config::{AppConfig, FileConfig, load_config};
use device_relay::{AppState, app};

#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(about = "WebSocket relay between a remote device and its control panels")]
struct Args {
    /// Path to a config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Shared secret for relay connections and device-control endpoints
    #[arg(long)]
    token: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn apply(&self, fc: &mut FileConfig) {
        if let Some(host) = &self.host {
            fc.server.host = host.clone();
        }
        if let Some(port) = self.port {
            fc.server.port = port;
        }
        if let Some(token) = &self.token {
            fc.relay.token = token.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let default_directive = if args.debug {
        "device_relay=debug,relay=debug,tower_http=debug,info"
    } else {
        "device_relay=info,relay=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let mut file_config: FileConfig = load_config(args.config.as_deref())
        .extract()
        .context("Failed to load configuration")?;
    args.apply(&mut file_config);
    let config = AppConfig::from_file(&file_config)?;

    if config.relay.uses_default_token() {
        warn!("Using the built-in default token; set TOKEN or relay.token before exposing this server");
    }

    let state = AppState::new(config);
    let liveness = state.relay.spawn_liveness();

    let listener = tokio::net::TcpListener::bind(state.config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", state.config.listen_addr))?;
    let actual_addr = listener.local_addr()?;

    info!("Device relay listening on http://{}", actual_addr);
    info!("Endpoints:");
    info!("  WS     {}                 - Relay (device + panels)", state.config.relay.path);
    info!("  GET    /healthz            - Health check");
    info!("  GET    /metrics            - Relay metrics");
    info!("  POST   /conectar-wifi      - adb connect + scrcpy over Wi-Fi");
    info!("  POST   /conectar-usb       - scrcpy over USB");
    info!(
        "Static files from {} (panel: {})",
        state.config.http.static_dir.display(),
        state.config.http.panel_path.display()
    );

    // Create shutdown signal handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, stopping relay...");
    };

    let server_result = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    liveness.abort();
    info!("Shutdown complete");
    server_result
}
