// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, shutdown, carryover adoption.

use std::fs::File;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::sync::Arc;

use fs2::FileExt;
use thiserror::Error;
use tracing::info;

use cvd_storage::{DbSnapshot, InstanceDatabase, InstanceLockManager};

use crate::env;
use crate::instance_manager::InstanceManager;
use crate::self_exec::{read_carryover_database, CarryoverFds};
use crate::server::ServerShared;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root runtime directory (e.g. ~/.local/state/cvd)
    pub runtime_dir: PathBuf,
    /// Path to Unix socket
    pub socket_path: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to version file
    pub version_path: PathBuf,
    /// Path to daemon log file
    pub log_path: PathBuf,
    /// Path to the instance database snapshot
    pub db_snapshot_path: PathBuf,
    /// Directory holding the numbered instance lock files
    pub instance_locks_dir: PathBuf,
}

impl Config {
    /// Load configuration for the user-level daemon.
    ///
    /// Uses fixed paths under `$XDG_STATE_HOME/cvd/`, overridable with
    /// `CVD_RUNTIME_DIR` (tests sandbox the daemon through it). One daemon
    /// serves all device groups for a user.
    pub fn load() -> Result<Self, LifecycleError> {
        let runtime_dir = match env::runtime_dir_override() {
            Some(dir) => dir,
            None => dirs::state_dir()
                .ok_or(LifecycleError::NoStateDir)?
                .join("cvd"),
        };
        Ok(Self {
            socket_path: runtime_dir.join("cvd_server.sock"),
            lock_path: runtime_dir.join("cvd_server.pid"),
            version_path: runtime_dir.join("cvd_server.version"),
            log_path: runtime_dir.join("cvd_server.log"),
            db_snapshot_path: runtime_dir.join("instance_db.json"),
            instance_locks_dir: runtime_dir.join("instance_locks"),
            runtime_dir,
        })
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] cvd_storage::persist::SnapshotError),

    #[error("Carryover error: {0}")]
    Carryover(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of daemon startup.
pub struct StartupResult {
    pub shared: Arc<ServerShared>,
    pub listener: tokio::net::UnixListener,
    /// The client whose `restart-server` request crossed the exec.
    pub carryover_client: Option<tokio::net::UnixStream>,
    // NOTE(lifetime): held to maintain the exclusive daemon lock
    pub lock_file: File,
}

/// Bring the daemon up: singleton lock, socket (fresh or carried over),
/// database (snapshot or carryover memfd).
pub fn startup(config: &Config, carryover: CarryoverFds) -> Result<StartupResult, LifecycleError> {
    std::fs::create_dir_all(&config.runtime_dir)?;

    let lock_file = File::create(&config.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;
    // The lock holds; the pid content is informational.
    let mut pid_writer = &lock_file;
    let _ = writeln!(pid_writer, "{}", std::process::id());
    std::fs::write(&config.version_path, crate::SERVER_VERSION)?;

    let std_listener = match carryover.server {
        Some(fd) => {
            info!(fd = fd.as_raw_fd(), "re-registering carried-over listener");
            std::os::unix::net::UnixListener::from(fd)
        }
        None => {
            if config.socket_path.exists() {
                std::fs::remove_file(&config.socket_path)?;
            }
            std::os::unix::net::UnixListener::bind(&config.socket_path)
                .map_err(|e| LifecycleError::BindFailed(config.socket_path.clone(), e))?
        }
    };
    std_listener.set_nonblocking(true)?;
    let listener = tokio::net::UnixListener::from_std(std_listener)?;

    let db = match carryover.memory {
        Some(memory) => {
            let json = read_carryover_database(memory)
                .map_err(|e| LifecycleError::Carryover(e.message.clone()))?;
            InstanceDatabase::load_from_json(json)
                .map_err(|e| LifecycleError::Carryover(e.message))?
        }
        None => DbSnapshot::load(&config.db_snapshot_path)?
            .map(|snapshot| snapshot.db)
            .unwrap_or_default(),
    };
    info!(groups = db.len(), "instance database loaded");

    let instance_manager = Arc::new(InstanceManager::new(
        db,
        InstanceLockManager::new(&config.instance_locks_dir),
        config.db_snapshot_path.clone(),
    ));

    let listener_fd = listener.as_raw_fd();
    let shared = Arc::new(ServerShared::new(
        config.clone(),
        instance_manager,
        listener_fd,
    ));

    let carryover_client = match carryover.client {
        Some(fd) => {
            let std_stream = std::os::unix::net::UnixStream::from(fd);
            std_stream.set_nonblocking(true)?;
            Some(tokio::net::UnixStream::from_std(std_stream)?)
        }
        None => None,
    };

    Ok(StartupResult {
        shared,
        listener,
        carryover_client,
        lock_file,
    })
}

/// Remove the runtime files on orderly exit. The lock releases when the
/// lock file handle drops.
pub fn cleanup(config: &Config) {
    for path in [
        &config.socket_path,
        &config.lock_path,
        &config.version_path,
    ] {
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
