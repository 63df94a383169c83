// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keyward Daemon (kwd)
//!
//! Background process that owns the device fleet and keeps door codes in
//! step with reservations.

use std::path::PathBuf;

use kw_daemon::lifecycle::{self, Config, LifecycleError};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

/// Environment variable naming the configuration file
const CONFIG_ENV: &str = "KEYWARD_CONFIG";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("keyward.toml")),
    };

    // Load configuration
    let config = Config::load(&config_path)?;

    // Write startup marker to log (before tracing setup, so operators can find it)
    write_startup_marker(&config)?;

    // Set up logging
    let log_guard = setup_logging(&config)?;

    info!("Starting kwd with config: {}", config_path.display());

    // Start daemon
    let mut daemon = match lifecycle::startup(&config).await {
        Ok(d) => d,
        Err(e) => {
            write_startup_error(&config, &e);
            error!("Failed to start daemon: {}", e);
            drop(log_guard);
            return Err(e.into());
        }
    };

    // Set up signal handlers
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!(
        "Daemon ready, state in {}",
        config.state_dir.display()
    );

    // Signal ready for parent process (e.g., systemd)
    println!("READY");

    // Main event loop
    loop {
        tokio::select! {
            // Slots that exhausted their retries
            Some(failure) = daemon.failures.recv() => {
                daemon.handle_failure(failure).await;
            }

            // Graceful shutdown on SIGTERM
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                daemon.shutdown().await?;
                break;
            }

            // Graceful shutdown on SIGINT
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down...");
                daemon.shutdown().await?;
                break;
            }
        }
    }

    info!("Daemon stopped");
    Ok(())
}

/// Startup marker prefix written to log before anything else.
/// Full format: "--- kwd: starting (pid: 12345) ---"
pub const STARTUP_MARKER_PREFIX: &str = "--- kwd: starting (pid: ";

/// Append one line to the daemon log, bypassing tracing
fn append_to_log(config: &Config, line: &str) -> std::io::Result<()> {
    use std::io::Write;

    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)?;
    writeln!(file, "{line}")
}

fn write_startup_marker(config: &Config) -> Result<(), LifecycleError> {
    let marker = format!("{}{}) ---", STARTUP_MARKER_PREFIX, std::process::id());
    append_to_log(config, &marker)?;
    Ok(())
}

/// Startup errors are written synchronously; the non-blocking writer may
/// not flush before the process exits
fn write_startup_error(config: &Config, error: &LifecycleError) {
    let _ = append_to_log(config, &format!("ERROR Failed to start daemon: {error}"));
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let (Some(dir), Some(file_name)) = (config.log_path.parent(), config.log_path.file_name())
    else {
        return Err(LifecycleError::NoStateDir);
    };
    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // RUST_LOG overrides the default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}
