// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Locating and spawning the daemon process.

use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use cvd_daemon::Config;

use crate::client::ClientError;

/// The daemon's socket path, shared with the server's own config logic.
pub fn daemon_socket() -> Result<PathBuf, ClientError> {
    let config = Config::load()
        .map_err(|e| ClientError::DaemonStartFailed(e.to_string()))?;
    Ok(config.socket_path)
}

/// Whether something is actually accepting on the socket (the file may be
/// a leftover from a crashed daemon).
pub fn probe_socket(socket_path: &Path) -> bool {
    std::os::unix::net::UnixStream::connect(socket_path).is_ok()
}

/// The `cvdd` binary ships next to `cvd`.
fn daemon_binary() -> Result<PathBuf, ClientError> {
    let current = std::env::current_exe()?;
    let sibling = current
        .parent()
        .map(|dir| dir.join("cvdd"))
        .filter(|p| p.exists());
    match sibling {
        Some(path) => Ok(path),
        // Fall back to PATH resolution.
        None => Ok(PathBuf::from("cvdd")),
    }
}

/// Spawn the daemon detached from this CLI invocation.
pub fn start_daemon_background() -> Result<Child, ClientError> {
    let binary = daemon_binary()?;
    Command::new(&binary)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .map_err(|e| {
            ClientError::DaemonStartFailed(format!("{}: {e}", binary.display()))
        })
}
