// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! whiplink CLI
//!
//! Loads the stream configuration and runs one session per stream until
//! Ctrl+C or SIGTERM.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use whiplink::{AppConfig, RtspSource, SessionBackends, Supervisor, WebRtcEngine, WhipClient};

#[derive(Parser, Debug)]
#[command(name = "whiplink")]
#[command(author, version, about = "Push RTSP camera feeds to WHIP endpoints", long_about = None)]
struct Args {
    /// Configuration file (YAML, or JSON)
    #[arg(value_name = "CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = setup_logging(args.log_file.as_deref())?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
    let config = AppConfig::load(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;

    for stream in &config.streams {
        tracing::info!(
            stream = %stream.name,
            whip_url = %stream.whip_url,
            "Configured stream"
        );
    }

    if args.check {
        tracing::info!(
            streams = config.streams.len(),
            "Configuration OK: {}",
            args.config.display()
        );
        return Ok(());
    }

    let timeouts = config.timeouts();
    let signaling = WhipClient::new(timeouts.signaling, timeouts.terminate)
        .context("Failed to create WHIP client")?;
    let backends = SessionBackends::new(RtspSource::new(), WebRtcEngine::new(), signaling);

    let cancel = CancellationToken::new();
    let supervisor = Supervisor::spawn(Arc::new(config), backends, &cancel);

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping sessions");
    supervisor.shutdown();

    // A second signal while sessions drain aborts the wait
    let report = tokio::select! {
        report = supervisor.wait() => report,
        () = shutdown_signal() => {
            tracing::warn!("Second shutdown signal, exiting without waiting for sessions");
            return Ok(());
        }
    };

    for session in &report.sessions {
        tracing::info!(
            stream = %session.name,
            connections = session.connections,
            failures = session.failures,
            "Session summary"
        );
    }

    if !report.crashed.is_empty() {
        anyhow::bail!("Session task(s) crashed: {}", report.crashed.join(", "));
    }

    Ok(())
}

/// stdout plus an optional non-blocking file layer. `RUST_LOG` overrides
/// the default `info` filter.
fn setup_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("Invalid log file path {}", path.display()))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
