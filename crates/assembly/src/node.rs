// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The image-node abstraction.
//!
//! Pipeline dependencies are data: every node declares a stable name and
//! the names of its predecessors, and the runner sorts them. A node is
//! either *configured-not-created* or *configured-and-created*; `generate`
//! is idempotent with respect to the latter.

use std::path::PathBuf;

use async_trait::async_trait;
use cvd_core::{GroupConfig, InstanceConfig, Status};

use crate::avb::Avb;

/// Everything a node may need for one instance of one group.
pub struct PipelineContext {
    pub config: GroupConfig,
    pub instance: InstanceConfig,
    pub avb: Avb,
    /// Vendor target-files zip, when the request provided one.
    pub default_target_zip: Option<PathBuf>,
    /// System target-files zip, when the request provided one.
    pub system_target_zip: Option<PathBuf>,
}

impl PipelineContext {
    pub fn new(config: GroupConfig, instance: InstanceConfig) -> Result<Self, Status> {
        let avb = Avb::default_signer(&config.host_artifacts_path)?;
        Ok(Self {
            config,
            instance,
            avb,
            default_target_zip: None,
            system_target_zip: None,
        })
    }

    pub fn artifacts_dir(&self) -> &std::path::Path {
        &self.config.host_artifacts_path
    }

    pub fn crosvm_path(&self) -> PathBuf {
        self.config.host_artifacts_path.join("bin/crosvm")
    }
}

/// One image-producing step of the assembly pipeline.
#[async_trait]
pub trait ImageNode: Send + Sync {
    /// Stable name: filename stem, GPT label, and dependency key.
    fn name(&self) -> &'static str;

    /// Names of nodes that must generate before this one.
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    /// Produce (or refresh) the node's artifact.
    async fn generate(&self, ctx: &PipelineContext) -> Result<(), Status>;
}
