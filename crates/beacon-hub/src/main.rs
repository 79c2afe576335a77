//! # beacon
//!
//! Hub binary. `serve` runs the broadcast server until Ctrl-C or SIGTERM;
//! `connect` attaches an interactive line client to a running hub.

#![deny(unsafe_code)]

mod repl;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use beacon_logging::LoggingConfig;
use beacon_server::{BeaconServer, ServerConfig};
use beacon_settings::BeaconSettings;
use clap::{Parser, Subcommand};

/// Realtime WebSocket broadcast hub.
#[derive(Parser, Debug)]
#[command(name = "beacon", version = beacon_core::constants::VERSION, about = "Realtime WebSocket broadcast hub")]
struct Cli {
    /// Settings file (defaults to `~/.beacon/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the hub.
    Serve {
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,

        /// Port to bind, 0 for auto-assign (overrides settings).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Connect to a hub and relay stdin lines.
    Connect {
        /// Hub WebSocket URL (overrides settings).
        #[arg(long)]
        url: Option<String>,
    },
}

impl Cli {
    fn load_settings(&self) -> Result<BeaconSettings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(beacon_settings::loader::settings_path);
        beacon_settings::loader::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))
    }
}

/// Fold CLI overrides into the loaded settings.
fn apply_cli(settings: &mut BeaconSettings, command: &Command) {
    match command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                settings.server.host.clone_from(host);
            }
            if let Some(port) = port {
                settings.server.port = *port;
            }
        }
        Command::Connect { url } => {
            if let Some(url) = url {
                settings.client.url.clone_from(url);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = cli.load_settings()?;
    apply_cli(&mut settings, &cli.command);

    beacon_logging::init(&LoggingConfig::from(&settings.logging))
        .context("Failed to initialize logging")?;

    match cli.command {
        Command::Serve { .. } => serve(&settings).await,
        Command::Connect { .. } => repl::run(&settings).await,
    }
}

async fn serve(settings: &BeaconSettings) -> Result<()> {
    let metrics = beacon_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let server = Arc::new(BeaconServer::new(ServerConfig::from(&settings.server), metrics));

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("Beacon hub listening on ws://{addr}{}", beacon_core::constants::WS_PATH);

    shutdown_signal().await?;

    tracing::info!("Shutting down...");
    let report = server.shutdown().await;
    tracing::info!(
        notified = report.notified,
        closed = report.closed,
        forced = report.forced,
        "sessions drained"
    );
    let _ = handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for ctrl-c")
    }
}
