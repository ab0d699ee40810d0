// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! AVB signing via `avbtool`.
//!
//! The pipeline never touches the cryptography itself; it builds `avbtool`
//! invocations against the fixed test keys shipped with the host artifacts.

use std::path::{Path, PathBuf};

use cvd_adapters::HostCommand;
use cvd_core::Status;

/// Largest AVB metadata blob the reader will load.
pub const MAX_AVB_METADATA_SIZE: u64 = 64 * 1024;

/// Every vbmeta image is padded to exactly this size; the AVB reader reads
/// the maximum unconditionally.
pub const VBMETA_MAX_SIZE: u64 = 64 * 1024;

pub const RSA_4096_ALGORITHM: &str = "SHA256_RSA4096";
pub const RSA_2048_ALGORITHM: &str = "SHA256_RSA2048";

/// Private test key for the given algorithm, under the host artifacts tree.
pub fn test_key_path(artifacts_dir: &Path, algorithm: &str) -> Result<PathBuf, Status> {
    match algorithm {
        RSA_4096_ALGORITHM => Ok(artifacts_dir.join("etc/cvd_avb/cvd_rsa4096.pem")),
        RSA_2048_ALGORITHM => Ok(artifacts_dir.join("etc/cvd_avb/cvd_rsa2048.pem")),
        other => Err(Status::precondition(format!(
            "no test key for algorithm {other}"
        ))),
    }
}

/// Public test key for the given algorithm.
pub fn test_pub_key_path(artifacts_dir: &Path, algorithm: &str) -> Result<PathBuf, Status> {
    match algorithm {
        RSA_4096_ALGORITHM => Ok(artifacts_dir.join("etc/cvd_avb/cvd_rsa4096.avbpubkey")),
        RSA_2048_ALGORITHM => Ok(artifacts_dir.join("etc/cvd_avb/cvd_rsa2048.avbpubkey")),
        other => Err(Status::precondition(format!(
            "no test public key for algorithm {other}"
        ))),
    }
}

/// A partition whose descriptor is chained from another vbmeta image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainPartition {
    pub name: String,
    pub rollback_index: String,
    pub key_path: PathBuf,
}

/// `avbtool` driver bound to one signing identity.
#[derive(Debug, Clone)]
pub struct Avb {
    avbtool_path: PathBuf,
    algorithm: String,
    key: PathBuf,
}

impl Avb {
    pub fn new(
        avbtool_path: impl Into<PathBuf>,
        algorithm: impl Into<String>,
        key: impl Into<PathBuf>,
    ) -> Self {
        Self {
            avbtool_path: avbtool_path.into(),
            algorithm: algorithm.into(),
            key: key.into(),
        }
    }

    /// The default signer: RSA-4096 test key from the host artifacts tree.
    pub fn default_signer(artifacts_dir: &Path) -> Result<Self, Status> {
        Ok(Self::new(
            artifacts_dir.join("bin/avbtool"),
            RSA_4096_ALGORITHM,
            test_key_path(artifacts_dir, RSA_4096_ALGORITHM)?,
        ))
    }

    fn add_hash_footer_command(
        &self,
        image_path: &Path,
        partition_name: &str,
        partition_size_bytes: u64,
    ) -> HostCommand {
        HostCommand::new(&self.avbtool_path)
            .arg("add_hash_footer")
            .arg("--algorithm")
            .arg(&self.algorithm)
            .arg("--key")
            .arg(self.key.display().to_string())
            .arg("--image")
            .arg(image_path.display().to_string())
            .arg("--partition_name")
            .arg(partition_name)
            .arg("--partition_size")
            .arg(partition_size_bytes.to_string())
    }

    /// Append a hash footer sized to `partition_size_bytes` (0 lets avbtool
    /// size the footer to the image itself).
    pub async fn add_hash_footer(
        &self,
        image_path: &Path,
        partition_name: &str,
        partition_size_bytes: u64,
    ) -> Result<(), Status> {
        self.add_hash_footer_command(image_path, partition_name, partition_size_bytes)
            .run_ok()
            .await
    }

    /// Build a vbmeta image from chained and included descriptors.
    pub async fn make_vbmeta_image(
        &self,
        output: &Path,
        chained_partitions: &[ChainPartition],
        included_images: &[PathBuf],
        extra_arguments: &[String],
    ) -> Result<(), Status> {
        let mut cmd = HostCommand::new(&self.avbtool_path)
            .arg("make_vbmeta_image")
            .arg("--algorithm")
            .arg(&self.algorithm)
            .arg("--key")
            .arg(self.key.display().to_string());
        for chain in chained_partitions {
            cmd = cmd.arg("--chain_partition").arg(format!(
                "{}:{}:{}",
                chain.name,
                chain.rollback_index,
                chain.key_path.display()
            ));
        }
        for image in included_images {
            cmd = cmd
                .arg("--include_descriptors_from_image")
                .arg(image.display().to_string());
        }
        cmd = cmd.args(extra_arguments.iter().cloned());
        cmd = cmd.arg("--output").arg(output.display().to_string());
        cmd.run_ok().await?;

        // The reader loads the maximum size unconditionally; pad up.
        cvd_adapters::files::truncate_file(output, VBMETA_MAX_SIZE)
    }

    /// Dump image metadata (`avbtool info_image`) into `output`.
    pub async fn write_info_image(&self, image_path: &Path, output: &Path) -> Result<(), Status> {
        let info = HostCommand::new(&self.avbtool_path)
            .arg("info_image")
            .arg("--image")
            .arg(image_path.display().to_string())
            .run_and_capture_stdout()
            .await?;
        std::fs::write(output, info)
            .map_err(|e| Status::filesystem(format!("write {}: {e}", output.display())))?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "avb_tests.rs"]
mod tests;
