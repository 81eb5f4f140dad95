//! # roomcast
//!
//! Realtime gateway binary: loads settings, installs logging and metrics,
//! and serves the WebSocket endpoint until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use roomcast_server::config::ServerConfig;
use roomcast_server::server::{RoomcastServer, ServerDeps};
use roomcast_settings::RoomcastSettings;

/// Upper bound on the whole shutdown sequence.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// roomcast realtime gateway.
#[derive(Parser, Debug)]
#[command(name = "roomcast", about = "roomcast realtime gateway")]
struct Cli {
    /// Settings file (defaults to `~/.roomcast/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log filter, e.g. `debug` or `roomcast_server=trace` (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn load_settings(&self) -> Result<RoomcastSettings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(roomcast_settings::settings_path);
        roomcast_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))
    }

    fn server_config(&self, settings: &RoomcastSettings) -> ServerConfig {
        let mut config = ServerConfig::from_settings(&settings.server);
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;

    let level = args.log_level.as_deref().unwrap_or(&settings.logging.level);
    roomcast_logging::init(level, args.json_logs || settings.logging.json);

    let metrics = roomcast_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let config = args.server_config(&settings);
    let server = Arc::new(RoomcastServer::new(config, ServerDeps::default()).with_metrics(metrics));

    let listener = server.bind().await.context("Failed to bind server")?;
    let serving = Arc::clone(&server);
    let handle = tokio::spawn(async move {
        if let Err(e) = serving.serve(listener).await {
            tracing::error!(error = %e, "server error");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    server.shutdown().begin("ctrl-c");
    let outcome = server
        .shutdown()
        .drain(vec![handle], Some(SHUTDOWN_TIMEOUT))
        .await;
    tracing::info!(abandoned = outcome.abandoned, "shutdown complete");
    Ok(())
}
