// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kind-typed request error carrier.
//!
//! Every failure a handler can produce is classified by what went wrong
//! (`StatusKind`), not where it happened. The wire code sent back to the
//! client is derived from the kind.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire-level status code, mirrored into responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    Internal,
    FailedPrecondition,
}

/// Classification of a request failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusKind {
    /// Environment missing or wrong state for the operation
    Precondition,
    /// Selector matched nothing, or a required file is absent
    NotFound,
    /// Selector matched several groups with no terminal to disambiguate
    Ambiguous,
    /// An external tool exited non-zero or was signaled
    Subprocess,
    /// Client hang-up or server stop cancelled the request
    Interrupted,
    /// Filesystem read/write/rename failed
    Filesystem,
    /// An internal invariant was violated
    Invariant,
}

impl StatusKind {
    /// Wire code for this kind.
    pub fn code(self) -> StatusCode {
        match self {
            StatusKind::Precondition | StatusKind::NotFound | StatusKind::Ambiguous => {
                StatusCode::FailedPrecondition
            }
            StatusKind::Subprocess
            | StatusKind::Interrupted
            | StatusKind::Filesystem
            | StatusKind::Invariant => StatusCode::Internal,
        }
    }
}

/// A request failure: a kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct Status {
    pub kind: StatusKind,
    pub message: String,
}

impl Status {
    pub fn new(kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Precondition, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusKind::NotFound, message)
    }

    pub fn ambiguous(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Ambiguous, message)
    }

    pub fn subprocess(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Subprocess, message)
    }

    pub fn interrupted() -> Self {
        Self::new(StatusKind::Interrupted, "Interrupted")
    }

    pub fn filesystem(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Filesystem, message)
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Invariant, message)
    }

    /// Wire code derived from the kind.
    pub fn code(&self) -> StatusCode {
        self.kind.code()
    }

    pub fn is_interrupted(&self) -> bool {
        self.kind == StatusKind::Interrupted
    }
}

impl From<std::io::Error> for Status {
    fn from(e: std::io::Error) -> Self {
        Status::filesystem(e.to_string())
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
