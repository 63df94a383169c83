// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: configuration, startup, shutdown.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use fs2::FileExt;
use kw_adapters::{
    DryRunDeviceAdapter, JsonFileSource, LogNotifyAdapter, TracedDeviceAdapter,
    TracedReservationSource,
};
use kw_core::{ConfigError, Disposition, Settings, SystemClock};
use kw_engine::{Runtime, RuntimeDeps, SyncFailure};
use kw_storage::Store;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Daemon runtime with concrete adapter types (wrapped with tracing)
pub type DaemonRuntime = Runtime<
    TracedDeviceAdapter<DryRunDeviceAdapter>,
    TracedReservationSource<JsonFileSource>,
    LogNotifyAdapter,
    SystemClock,
>;

/// Environment variable overriding the state directory
pub const STATE_DIR_ENV: &str = "KEYWARD_STATE_DIR";

/// `[daemon]` table of the configuration file
#[derive(Debug, Clone, Default, Deserialize)]
struct DaemonSection {
    state_dir: Option<PathBuf>,
    source_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct DaemonFile {
    #[serde(default)]
    daemon: DaemonSection,
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the WAL, lock and log
    pub state_dir: PathBuf,
    /// Directory of `<source>.json` reservation exports
    pub source_dir: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to daemon log file
    pub log_path: PathBuf,
    /// Path to the write-ahead log
    pub wal_path: PathBuf,
    /// Engine tuning and the device fleet
    pub settings: Settings,
}

impl Config {
    /// Load from a TOML file; relative paths resolve against its directory
    pub fn load(path: &Path) -> Result<Self, LifecycleError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| LifecycleError::ConfigNotFound {
                path: path.to_path_buf(),
                source,
            })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let state_override = std::env::var_os(STATE_DIR_ENV).map(PathBuf::from);
        Self::from_toml(&content, base, state_override)
    }

    /// Parse configuration text
    ///
    /// The state directory comes from `state_override`, then `[daemon]
    /// state_dir`, then the XDG state location.
    pub fn from_toml(
        content: &str,
        base: &Path,
        state_override: Option<PathBuf>,
    ) -> Result<Self, LifecycleError> {
        let settings = Settings::from_toml_str(content)?;
        let file: DaemonFile = toml::from_str(content).map_err(ConfigError::from)?;

        let state_dir = match state_override.or(file.daemon.state_dir) {
            Some(dir) => base.join(dir),
            None => default_state_dir()?,
        };
        let source_dir = base.join(
            file.daemon
                .source_dir
                .unwrap_or_else(|| PathBuf::from("reservations")),
        );

        Ok(Self {
            lock_path: state_dir.join("kwd.lock"),
            log_path: state_dir.join("kwd.log"),
            wal_path: state_dir.join("wal").join("state.wal"),
            state_dir,
            source_dir,
            settings,
        })
    }
}

/// Daemon state during operation
pub struct DaemonState {
    /// Configuration
    pub config: Config,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    /// Engine runtime
    pub runtime: Arc<DaemonRuntime>,
    /// Slots that exhausted their retries
    pub failures: mpsc::UnboundedReceiver<SyncFailure>,
    tasks: Vec<JoinHandle<()>>,
    /// When daemon started
    pub start_time: Instant,
}

impl DaemonState {
    /// Record and announce a permanent sync failure
    pub async fn handle_failure(&self, failure: SyncFailure) {
        self.runtime.handle_sync_failure(failure).await;
    }

    /// Shutdown the daemon gracefully
    pub async fn shutdown(&mut self) -> Result<(), LifecycleError> {
        info!("shutting down daemon");

        // 1. Stop the job loops and the sweeper
        for task in self.tasks.drain(..) {
            task.abort();
        }

        // 2. Remove PID file; the lock itself is released when lock_file drops
        if self.config.lock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.lock_path) {
                warn!(error = %e, "failed to remove PID file");
            }
        }

        info!(
            uptime_secs = self.start_time.elapsed().as_secs(),
            "daemon shutdown complete"
        );
        Ok(())
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Config not found at {}: {source}", path.display())]
    ConfigNotFound {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("WAL error: {0}")]
    Wal(#[from] kw_storage::WalError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Start the daemon
pub async fn startup(config: &Config) -> Result<DaemonState, LifecycleError> {
    match startup_inner(config).await {
        Ok(state) => Ok(state),
        // Another daemon owns the lock and its PID file
        Err(e @ LifecycleError::LockFailed(_)) => Err(e),
        Err(e) => {
            cleanup_on_failure(config);
            Err(e)
        }
    }
}

/// Inner startup logic - cleanup_on_failure called if this fails
async fn startup_inner(config: &Config) -> Result<DaemonState, LifecycleError> {
    // 1. Create state directory
    std::fs::create_dir_all(&config.state_dir)?;

    // 2. Acquire lock file FIRST - prevents two daemons driving one fleet
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&config.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;

    // Write PID to lock file
    use std::io::Write;
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file;

    // 3. Validate the fleet before touching state
    let catalog = config.settings.catalog()?;

    // 4. Load state from WAL
    if let Some(parent) = config.wal_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Store::open(&config.wal_path)?;
    info!(sequence = store.sequence(), "loaded state");

    // 5. Set up adapters (wrapped with tracing for observability)
    let devices = TracedDeviceAdapter::new(DryRunDeviceAdapter::new());
    let source = TracedReservationSource::new(JsonFileSource::new(config.source_dir.clone()));
    let notify = LogNotifyAdapter::new();

    // 6. Create runtime
    let (runtime, failures) = Runtime::new(
        RuntimeDeps {
            devices,
            source,
            notify,
            store,
        },
        catalog,
        config.settings.engine.clone(),
        SystemClock,
    );
    let runtime = Arc::new(runtime);

    // 7. Rebuild timers from stored assignments, then start the loops
    let plan = runtime.rehydrate();
    let missed_activation = plan.count(Disposition::MissedActivation);
    let missed_deactivation = plan.count(Disposition::MissedDeactivation);
    if missed_activation + missed_deactivation > 0 {
        warn!(
            missed_activation,
            missed_deactivation, "catching up on work missed while stopped"
        );
    }
    let tasks = runtime.start();

    info!(
        devices = config.settings.devices.len(),
        groups = config.settings.groups.len(),
        state_dir = %config.state_dir.display(),
        "daemon started"
    );

    Ok(DaemonState {
        config: config.clone(),
        lock_file,
        runtime,
        failures,
        tasks,
        start_time: Instant::now(),
    })
}

/// Clean up resources on startup failure
fn cleanup_on_failure(config: &Config) {
    if config.lock_path.exists() {
        let _ = std::fs::remove_file(&config.lock_path);
    }
}

/// Get the state directory for keyward
fn default_state_dir() -> Result<PathBuf, LifecycleError> {
    // Use XDG_STATE_HOME or default to ~/.local/state
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("keyward"));
    }

    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/keyward"))
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
