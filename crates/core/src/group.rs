// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! An instance group: a set of devices co-hosted from one home directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::instance::{Instance, InstanceId};

/// File name of the authoritative runtime config inside a group home.
pub const CONFIG_FILE_NAME: &str = "cuttlefish_config.json";

/// Status sentinel file inside a group home.
pub const RUNTIME_SENTINEL_NAME: &str = "cuttlefish_runtime";

/// A group of instances sharing a home directory and host artifacts tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceGroup {
    /// Unique group name; auto-generated `cvd-<lowest id>` when unset.
    pub name: String,
    /// Unique absolute home directory.
    pub home_dir: PathBuf,
    /// Directory containing the hypervisor-side binaries (`bin/launch_cvd`, ...).
    pub host_artifacts_path: PathBuf,
    /// Product output directory holding the guest images.
    pub product_out_path: PathBuf,
    /// Creation time, seconds since the epoch.
    pub start_time_sec: i64,
    /// Ordered by instance id.
    pub instances: Vec<Instance>,
}

impl InstanceGroup {
    /// Default group name for a set of instance ids.
    pub fn default_name(ids: &[InstanceId]) -> String {
        let lowest = ids.iter().min().copied().unwrap_or(1);
        format!("cvd-{lowest}")
    }

    /// Path of the group's runtime config JSON.
    pub fn config_path(&self) -> PathBuf {
        self.home_dir.join(CONFIG_FILE_NAME)
    }

    /// Path of the group's status sentinel.
    pub fn runtime_sentinel_path(&self) -> PathBuf {
        self.home_dir.join(RUNTIME_SENTINEL_NAME)
    }

    /// Per-instance artifact directory under the group home.
    pub fn instance_dir(&self, id: InstanceId) -> PathBuf {
        self.home_dir.join(format!("cvd-{id}"))
    }

    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.instances.iter().map(|i| i.id).collect()
    }

    pub fn has_active_instances(&self) -> bool {
        self.instances.iter().any(|i| i.state.is_active())
    }

    /// Path of the config JSON for an arbitrary home directory.
    pub fn config_path_for_home(home: &Path) -> PathBuf {
        home.join(CONFIG_FILE_NAME)
    }
}

#[cfg(test)]
#[path = "group_tests.rs"]
mod tests;
