// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent vbmeta generation and size enforcement.

use std::path::Path;

use cvd_adapters::files::{file_size, truncate_file};
use cvd_core::{ApBootFlow, InstanceConfig, Status};
use tracing::info;

use crate::avb::{test_pub_key_path, Avb, ChainPartition, RSA_4096_ALGORITHM, VBMETA_MAX_SIZE};

/// Build the vbmeta image chaining the bootloader-environment partitions.
///
/// `uboot_env` is always chained at rollback index 1; `bootconfig` joins at
/// index 2 when the guest kernel supports it.
pub async fn prepare_vbmeta_image(
    avb: &Avb,
    artifacts_dir: &Path,
    path: &Path,
    has_boot_config: bool,
) -> Result<(), Status> {
    let pub_key = test_pub_key_path(artifacts_dir, RSA_4096_ALGORITHM)?;
    let mut chained_partitions = vec![ChainPartition {
        name: "uboot_env".to_string(),
        rollback_index: "1".to_string(),
        key_path: pub_key.clone(),
    }];
    if has_boot_config {
        chained_partitions.push(ChainPartition {
            name: "bootconfig".to_string(),
            rollback_index: "2".to_string(),
            key_path: pub_key,
        });
    }
    avb.make_vbmeta_image(path, &chained_partitions, &[], &[])
        .await
}

/// Generate the per-instance persistent vbmeta, plus the AP variant when
/// the AP VM boots through Grub.
pub async fn generate_persistent_vbmeta(
    avb: &Avb,
    artifacts_dir: &Path,
    instance: &InstanceConfig,
    ap_boot_flow: ApBootFlow,
) -> Result<(), Status> {
    prepare_vbmeta_image(
        avb,
        artifacts_dir,
        &instance.persistent_vbmeta_path(),
        instance.bootconfig_supported,
    )
    .await?;
    if ap_boot_flow == ApBootFlow::Grub {
        prepare_vbmeta_image(avb, artifacts_dir, &instance.ap_vbmeta_path(), false).await?;
    }
    Ok(())
}

/// Pad every existing vbmeta image in `paths` to the fixed maximum size.
///
/// The AVB reader loads the maximum unconditionally, so a short file would
/// read as corrupt metadata.
pub fn enforce_minimum_vbmeta_size(paths: &[&Path]) -> Result<(), Status> {
    for path in paths {
        if !path.exists() {
            continue;
        }
        let size = file_size(path);
        if size > VBMETA_MAX_SIZE {
            return Err(Status::precondition(format!(
                "vbmeta image {} is {size} bytes, larger than the maximum {VBMETA_MAX_SIZE}",
                path.display()
            )));
        }
        if size < VBMETA_MAX_SIZE {
            info!(path = %path.display(), size, "padding vbmeta image to maximum size");
            truncate_file(path, VBMETA_MAX_SIZE)?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "vbmeta_tests.rs"]
mod tests;
