//! # dsvp-worker
//!
//! Worker binary: connects to the coordinator, authenticates, and keeps
//! the link up until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use dsvp_settings::{DsvpSettings, load_settings, load_settings_from_path};
use tokio_util::sync::CancellationToken;

/// dSVP worker.
#[derive(Parser, Debug)]
#[command(name = "dsvp-worker", about = "dSVP worker client")]
struct Cli {
    /// Coordinator socket URL, used when `DSVP_SERVER_URL` is not set.
    url: Option<String>,

    /// Base64 credential token, used when `DSVP_CLIENT_AUTH_TOKEN` is not set.
    token: Option<String>,

    /// Settings file (defaults to `~/.dsvp/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn settings(&self) -> Result<DsvpSettings> {
        let mut settings = match &self.config {
            Some(path) => load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => load_settings().context("Failed to load settings")?,
        };
        let worker = &mut settings.worker;
        if worker.server_url.is_none() {
            worker.server_url.clone_from(&self.url);
        }
        if worker.auth_token.is_none() {
            worker.auth_token.clone_from(&self.token);
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings()?;
    dsvp_logging::init_subscriber(&settings.worker.log_level, settings.worker.log_format);

    let (url, token) = settings
        .worker
        .require_credentials()
        .context("Usage: dsvp-worker <url> <token>")?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let _signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down...");
        }
        signal.cancel();
    });

    tracing::info!(url, "dsvp worker starting");
    dsvp_worker::run(url, token, shutdown)
        .await
        .context("Worker failed")?;
    Ok(())
}
