// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC protocol for daemon communication.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload. The
//! first frame of a command request additionally carries the client's
//! stdio descriptors as SCM_RIGHTS ancillary data.

use std::collections::HashMap;
use std::path::PathBuf;

use cvd_core::{Status, StatusCode};
use serde::{Deserialize, Serialize};

/// Whether the server waits for the spawned tool or detaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitBehavior {
    #[default]
    Wait,
    Start,
}

/// Request from CLI to daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    /// Run a `cvd` verb with the given argv and environment.
    Command {
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        working_directory: PathBuf,
        #[serde(default)]
        selector_args: Vec<String>,
        #[serde(default)]
        wait_behavior: WaitBehavior,
    },

    /// Terminate the daemon.
    Shutdown {
        /// Stop and clear all device groups first.
        #[serde(default)]
        clear: bool,
    },
}

/// Status carried on every response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireStatus {
    pub code: StatusCode,
    #[serde(default)]
    pub message: String,
}

impl WireStatus {
    pub fn ok() -> Self {
        Self {
            code: StatusCode::Ok,
            message: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }
}

impl From<Status> for WireStatus {
    fn from(status: Status) -> Self {
        Self {
            code: status.code(),
            message: status.message,
        }
    }
}

/// Response from daemon to CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Response {
    /// Outcome of a command request.
    Command { status: WireStatus },

    /// Acknowledgement of a shutdown request.
    Shutdown { status: WireStatus },
}

impl Response {
    pub fn command_ok() -> Self {
        Response::Command {
            status: WireStatus::ok(),
        }
    }

    pub fn command_error(status: Status) -> Self {
        Response::Command {
            status: status.into(),
        }
    }

    pub fn status(&self) -> &WireStatus {
        match self {
            Response::Command { status } | Response::Shutdown { status } => status,
        }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
