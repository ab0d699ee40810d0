// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cuttlefish control-plane daemon (cvdd)
//!
//! Background process that owns the listening socket and dispatches `cvd`
//! verbs to command handlers.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use cvd_daemon::lifecycle::{self, Config, LifecycleError, StartupResult};
use cvd_daemon::self_exec::{
    parse_carryover_fds, CARRYOVER_CLIENT_FD_FLAG, MEMORY_CARRYOVER_FD_FLAG, SERVER_FD_FLAG,
};
use cvd_daemon::server::CvdServer;
use cvd_daemon::SERVER_VERSION;

fn is_internal_flag(arg: &str) -> bool {
    [SERVER_FD_FLAG, CARRYOVER_CLIENT_FD_FLAG, MEMORY_CARRYOVER_FD_FLAG]
        .iter()
        .any(|flag| arg.starts_with(&format!("{flag}=")))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    // Handle info flags before any config/lock acquisition
    for arg in &args[1..] {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("cvdd {SERVER_VERSION}");
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("cvdd {SERVER_VERSION}");
                println!("Cuttlefish control-plane daemon.");
                println!();
                println!("USAGE:");
                println!("    cvdd");
                println!();
                println!("The daemon is typically started by the `cvd` CLI and should not");
                println!("be invoked directly. It listens on a Unix socket for commands");
                println!("from `cvd`.");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            other if is_internal_flag(other) => {}
            other => {
                eprintln!("error: unexpected argument '{other}'");
                eprintln!("Usage: cvdd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let carryover = parse_carryover_fds(&args);
    let is_carryover = carryover.server.is_some();

    let config = Config::load()?;
    rotate_log_if_needed(&config.log_path);
    write_startup_marker(&config)?;
    let log_guard = setup_logging(&config)?;

    info!(version = SERVER_VERSION, "starting cvd server");

    let StartupResult {
        shared,
        listener,
        carryover_client,
        lock_file: _lock_file,
    } = match lifecycle::startup(&config, carryover) {
        Ok(result) => result,
        Err(LifecycleError::LockFailed(_)) => {
            let pid = std::fs::read_to_string(&config.lock_path)
                .unwrap_or_default()
                .trim()
                .to_string();
            eprintln!("cvdd is already running");
            if !pid.is_empty() {
                eprintln!("  pid: {pid}");
            }
            std::process::exit(1);
        }
        Err(e) => {
            write_startup_error(&config, &e);
            error!("Failed to start daemon: {}", e);
            drop(log_guard);
            return Err(e.into());
        }
    };

    let server = CvdServer::new(Arc::clone(&shared), listener);

    // The client that asked for the restart is answered by this (new)
    // process, then served like any other connection.
    if let Some(client) = carryover_client {
        info!("answering carryover client");
        server.accept_carryover_client(client);
    }

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    {
        let shared = Arc::clone(&shared);
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                _ = sigint.recv() => info!("Received SIGINT, shutting down..."),
            }
            shared.stop();
        });
    }

    info!(socket = %config.socket_path.display(), "daemon ready");
    if !is_carryover {
        // Signal ready for the process that spawned us (the CLI).
        println!("READY");
    }

    server.serve().await;

    lifecycle::cleanup(&config);
    info!("Daemon stopped");
    Ok(())
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep.
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate the daemon log file if it exceeds [`MAX_LOG_SIZE`].
///
/// Shifts `cvd_server.log` → `.1` → `.2` → `.3`, deleting the oldest.
/// Best-effort: rotation failures are silently ignored so the daemon
/// still starts.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }
    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let _ = std::fs::rename(format!("{log_str}.{i}"), format!("{log_str}.{}", i + 1));
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

/// Startup marker prefix written to the log before anything else; the CLI
/// uses it to find where the current startup attempt begins.
const STARTUP_MARKER_PREFIX: &str = "--- cvdd: starting (pid: ";

fn write_startup_marker(config: &Config) -> Result<(), LifecycleError> {
    use std::io::Write;

    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)?;
    writeln!(file, "{}{}) ---\n", STARTUP_MARKER_PREFIX, std::process::id())?;
    Ok(())
}

/// Write startup errors synchronously so they are visible to the CLI even
/// if the process exits before the tracing appender flushes.
fn write_startup_error(config: &Config, error: &LifecycleError) {
    use std::io::Write;

    let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)
    else {
        return;
    };
    let _ = writeln!(file, "ERROR Failed to start daemon: {}", error);
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_appender = tracing_appender::rolling::never(
        config.log_path.parent().ok_or(LifecycleError::NoStateDir)?,
        config
            .log_path
            .file_name()
            .ok_or(LifecycleError::NoStateDir)?,
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();
    Ok(guard)
}
