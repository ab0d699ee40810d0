// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon client.

use std::path::PathBuf;
use std::time::Instant;

use cvd_daemon::protocol_wire::{self as wire, ProtocolError};
use cvd_daemon::{env, Request, Response, WireStatus};
use thiserror::Error;
use tokio::net::UnixStream;

use crate::daemon_process::{daemon_socket, probe_socket, start_daemon_background};

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Failed to start daemon: {0}")]
    DaemonStartFailed(String),

    #[error("Connection timeout waiting for daemon to start")]
    DaemonStartTimeout,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Unexpected response from daemon")]
    UnexpectedResponse,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Daemon client
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    /// Connect to an existing daemon (no auto-start).
    pub fn connect() -> Result<Self, ClientError> {
        let socket_path = daemon_socket()?;
        if !socket_path.exists() {
            return Err(ClientError::DaemonNotRunning);
        }
        Ok(Self { socket_path })
    }

    /// Connect to the daemon, starting one if none is listening.
    pub fn connect_or_start() -> Result<Self, ClientError> {
        match Self::connect() {
            Ok(client) => {
                if probe_socket(&client.socket_path) {
                    return Ok(client);
                }
                // Stale socket file: replace the daemon behind it.
                let _ = std::fs::remove_file(&client.socket_path);
                let child = start_daemon_background()?;
                Self::connect_with_retry(child)
            }
            Err(ClientError::DaemonNotRunning) => {
                let child = start_daemon_background()?;
                Self::connect_with_retry(child)
            }
            Err(e) => Err(e),
        }
    }

    fn connect_with_retry(mut child: std::process::Child) -> Result<Self, ClientError> {
        let start = Instant::now();
        while start.elapsed() < env::timeout_connect() {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(ClientError::DaemonStartFailed(format!(
                    "exited with {status}"
                )));
            }
            match Self::connect() {
                Ok(client) if probe_socket(&client.socket_path) => return Ok(client),
                _ => std::thread::sleep(env::poll_interval()),
            }
        }
        Err(ClientError::DaemonStartTimeout)
    }

    /// Run a command verb, lending this process's stdio to the server.
    pub async fn send_command(&self, request: &Request) -> Result<WireStatus, ClientError> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        wire::send_request(&stream, request, &[0, 1, 2]).await?;
        match wire::read_response(&stream).await? {
            Response::Command { status } => Ok(status),
            Response::Shutdown { .. } => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Ask the daemon to terminate.
    pub async fn send_shutdown(&self, clear: bool) -> Result<WireStatus, ClientError> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        wire::send_request(&stream, &Request::Shutdown { clear }, &[]).await?;
        match wire::read_response(&stream).await? {
            Response::Shutdown { status } => Ok(status),
            Response::Command { .. } => Err(ClientError::UnexpectedResponse),
        }
    }
}
