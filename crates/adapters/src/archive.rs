// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Archive extraction via `bsdtar`.
//!
//! Target-files zips are only ever read member-wise; `bsdtar` handles both
//! zip and tar inputs with the same argv shape.

use std::path::{Path, PathBuf};

use cvd_core::Status;

use crate::subprocess::HostCommand;

/// A readable archive on disk.
pub struct Archive {
    path: PathBuf,
}

impl Archive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Member names, one per line of `bsdtar -tf`.
    pub async fn contents(&self) -> Result<Vec<String>, Status> {
        let out = HostCommand::new("bsdtar")
            .arg("-tf")
            .arg(self.path.display().to_string())
            .run_and_capture_stdout()
            .await
            .map_err(|e| {
                Status::subprocess(format!("bsdtar -tf {}: {e}", self.path.display()))
            })?;
        Ok(out.lines().map(str::to_owned).collect())
    }

    /// Extract the named members into `target_dir`, preserving member paths.
    pub async fn extract_files(
        &self,
        members: &[String],
        target_dir: &Path,
    ) -> Result<(), Status> {
        if members.is_empty() {
            return Ok(());
        }
        let cmd = HostCommand::new("bsdtar")
            .arg("-x")
            .arg("-C")
            .arg(target_dir.display().to_string())
            .arg("-f")
            .arg(self.path.display().to_string())
            .args(members.iter().cloned());
        cmd.run_ok().await.map_err(|e| {
            Status::subprocess(format!(
                "extracting from {} failed: {e}",
                self.path.display()
            ))
        })
    }

    /// Extract everything into `target_dir`.
    pub async fn extract_all(&self, target_dir: &Path) -> Result<(), Status> {
        HostCommand::new("bsdtar")
            .arg("-x")
            .arg("-C")
            .arg(target_dir.display().to_string())
            .arg("-f")
            .arg(self.path.display().to_string())
            .run_ok()
            .await
            .map_err(|e| {
                Status::subprocess(format!(
                    "extracting {} failed: {e}",
                    self.path.display()
                ))
            })
    }
}

#[cfg(test)]
#[path = "archive_tests.rs"]
mod tests;
