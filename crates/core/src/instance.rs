// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A single virtual device within a group.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Instance ids are positive and fit in an i32 (the launcher's flag space).
pub type InstanceId = u32;

/// Largest valid instance id (exclusive).
pub const MAX_INSTANCE_ID: InstanceId = i32::MAX as InstanceId;

/// Lifecycle state of one device instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    Preparing,
    Starting,
    Running,
    Stopped,
    Unreachable,
    Cancelled,
    Failed,
}

impl InstanceState {
    /// States transition monotonically except the RUNNING/STARTING pair.
    pub fn can_transition_to(self, next: InstanceState) -> bool {
        use InstanceState::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Preparing, Starting | Running | Cancelled | Failed) => true,
            (Starting, Running | Unreachable | Stopped | Cancelled | Failed) => true,
            (Running, Starting | Unreachable | Stopped | Failed) => true,
            (Unreachable, Running | Stopped | Failed) => true,
            _ => false,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            InstanceState::Preparing
                | InstanceState::Starting
                | InstanceState::Running
                | InstanceState::Unreachable
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceState::Preparing => "PREPARING",
            InstanceState::Starting => "STARTING",
            InstanceState::Running => "RUNNING",
            InstanceState::Stopped => "STOPPED",
            InstanceState::Unreachable => "UNREACHABLE",
            InstanceState::Cancelled => "CANCELLED",
            InstanceState::Failed => "FAILED",
        };
        write!(f, "{name}")
    }
}

/// One numbered virtual device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    /// Per-group device name; defaults to `cvd-<id>`.
    pub name: String,
    pub state: InstanceState,
}

impl Instance {
    pub fn new(id: InstanceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            state: InstanceState::Preparing,
        }
    }

    /// Device name with the default `cvd-<id>` naming.
    pub fn with_default_name(id: InstanceId) -> Self {
        Self::new(id, format!("cvd-{id}"))
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
