//! # dsvp-server
//!
//! Coordinator binary: loads settings, connects to the credential store,
//! and serves the worker socket plus the guarded HTTP routes.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dsvp_server::{DsvpServer, ServerConfig};
use dsvp_settings::{load_settings, load_settings_from_path};
use dsvp_store::RedisStore;

/// dSVP coordinator.
#[derive(Parser, Debug)]
#[command(name = "dsvp-server", about = "dSVP coordinator server")]
struct Cli {
    /// Settings file (defaults to `~/.dsvp/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings and `PORT`).
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => load_settings().context("Failed to load settings")?,
    };
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }

    dsvp_logging::init_subscriber(&settings.server.log_level, settings.server.log_format);

    let redis_url = settings
        .server
        .require_redis_url()
        .context("No credential store configured")?;
    let store = RedisStore::connect(redis_url)
        .await
        .context("Failed to connect to the credential store")?;

    let metrics = dsvp_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let config = ServerConfig::from(&settings.server);
    let server = DsvpServer::new(config, Arc::new(store)).with_metrics(metrics);
    let (addr, server_task) = server
        .listen()
        .await
        .with_context(|| format!("Failed to bind {}", server.config().bind_addr()))?;
    tracing::info!(%addr, "dsvp coordinator ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server
        .shutdown()
        .graceful_shutdown(vec![server_task], Some(Duration::from_secs(10)))
        .await;
    Ok(())
}
