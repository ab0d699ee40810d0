// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon environment knobs.

use std::path::PathBuf;
use std::time::Duration;

/// Overrides the runtime directory; used by tests to sandbox the daemon.
pub const RUNTIME_DIR_ENV: &str = "CVD_RUNTIME_DIR";

pub fn runtime_dir_override() -> Option<PathBuf> {
    std::env::var_os(RUNTIME_DIR_ENV).map(PathBuf::from)
}

fn parse_duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Timeout for IPC requests that carry no subprocess work.
pub fn timeout_ipc() -> Duration {
    parse_duration_ms("CVD_TIMEOUT_IPC_MS").unwrap_or(Duration::from_secs(5))
}

/// Timeout for waiting for the daemon to start.
pub fn timeout_connect() -> Duration {
    parse_duration_ms("CVD_TIMEOUT_CONNECT_MS").unwrap_or(Duration::from_secs(5))
}

/// Polling interval for connection retries.
pub fn poll_interval() -> Duration {
    parse_duration_ms("CVD_CONNECT_POLL_MS").unwrap_or(Duration::from_millis(50))
}
