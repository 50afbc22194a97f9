//! `agentbridged`: the agent bridge server binary.
//!
//! Config layering follows spec §6's documented override order, highest
//! wins: CLI flag > config file > environment variable > built-in default.
//! Grounded on the teacher's `api/src/bin/acp-server.rs` clap-derive shape.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};

use agentbridge_common::config::ServerConfig;

#[derive(Parser)]
#[command(name = "agentbridged")]
#[command(version)]
#[command(about = "WebSocket bridge server for a project-scoped AI coding assistant")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the data directory projects and logs are stored under.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, env = "RUST_LOG")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    }
    .apply_env();

    if let Some(host) = cli.host.clone() {
        config.network.host = host;
    }
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(data_dir) = cli.data_dir.clone() {
        config.data_dir = data_dir;
    }
    if let Some(log_level) = cli.log_level.clone() {
        config.log_level = log_level;
    }

    let tracing_handle = agentbridge_common::tracing_setup::init_tracing_with_level(&config.log_level)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "agentbridged starting");

    let state = agentbridge_server::build_state(config).await?;
    let shutdown = state.shutdown.clone();
    let governor = state.governor.clone();
    let config_path = cli.config.clone();

    tokio::spawn(handle_signals(shutdown, governor, config_path, tracing_handle));

    let result = agentbridge_server::serve(state).await;
    tracing::info!("agentbridged stopped");
    result
}

/// Listens for `SIGTERM`/`SIGINT` (graceful shutdown, cancels `shutdown` so
/// `serve` drains in-flight connections and returns) and `SIGHUP` (reload:
/// re-reads the config file and applies the fields that can change without
/// restarting listeners — log level and the governor's soft memory limit).
/// Connection/rate limits are fixed for the process lifetime; a limit change
/// requires a restart.
async fn handle_signals(
    shutdown: tokio_util::sync::CancellationToken,
    governor: agentbridge_engine::SharedGovernor,
    config_path: Option<PathBuf>,
    tracing_handle: agentbridge_common::TracingHandle,
) {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(err) => {
            tracing::error!(error = %err, "failed to install SIGTERM handler");
            return;
        }
    };
    let mut interrupt = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(err) => {
            tracing::error!(error = %err, "failed to install SIGINT handler");
            return;
        }
    };
    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(err) => {
            tracing::error!(error = %err, "failed to install SIGHUP handler");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = terminate.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                shutdown.cancel();
                break;
            }
            _ = interrupt.recv() => {
                tracing::info!("received SIGINT, shutting down");
                shutdown.cancel();
                break;
            }
            _ = hangup.recv() => {
                tracing::info!("received SIGHUP, reloading configuration");
                reload(&config_path, &governor, &tracing_handle);
            }
        }
    }
}

fn reload(
    config_path: &Option<PathBuf>,
    governor: &agentbridge_engine::SharedGovernor,
    tracing_handle: &agentbridge_common::TracingHandle,
) {
    let Some(path) = config_path else {
        tracing::warn!("SIGHUP received but no config file was given at startup; nothing to reload");
        return;
    };
    let config = match ServerConfig::load(path) {
        Ok(config) => config.apply_env(),
        Err(err) => {
            tracing::error!(error = %err, "SIGHUP reload: failed to re-read config file, keeping current settings");
            return;
        }
    };
    if let Err(err) = tracing_handle.set_level(&config.log_level) {
        tracing::error!(error = %err, "SIGHUP reload: failed to apply new log level");
    }
    governor.set_soft_memory_bytes(config.governor.soft_memory_bytes);
    tracing::info!(log_level = %config.log_level, soft_memory_bytes = config.governor.soft_memory_bytes, "configuration reloaded");
}
