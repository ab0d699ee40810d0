// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Boot image unpacking for gem5.
//!
//! gem5 cannot drive a bootloader, so the pipeline pre-chews what the
//! bootloader would produce: unpacked kernel/ramdisks in a shared
//! directory, the bootloader binaries in a `binaries/` subtree, and a
//! synthesized initrd with the bootconfig framing appended.

use std::path::Path;

use cvd_adapters::files::{copy_file, ensure_directory_exists, file_has_content};
use cvd_core::{GroupConfig, InstanceConfig, Status, VmmMode};
use tracing::warn;

use crate::boot_image::{
    repack_gem5_boot_image, unpack_boot_image, unpack_vendor_boot_image_if_not_unpacked,
};

/// Unpack boot artifacts for gem5. A no-op for other hypervisors.
pub async fn gem5_image_unpacker(
    config: &GroupConfig,
    instance: &InstanceConfig,
) -> Result<(), Status> {
    if config.vm_manager != VmmMode::Gem5 {
        return Ok(());
    }
    let artifacts_dir = &config.host_artifacts_path;
    let unpack_dir = config.assembly_dir();
    ensure_directory_exists(&unpack_dir)?;

    if !file_has_content(&instance.boot_image) {
        return Err(Status::precondition(format!(
            "boot image \"{}\" is missing or empty",
            instance.boot_image.display()
        )));
    }

    // init_boot is optional, for testing boot.img with the ramdisk inside.
    match &instance.init_boot_image {
        Some(init_boot) if file_has_content(init_boot) => {
            unpack_boot_image(artifacts_dir, init_boot, &unpack_dir).await?;
        }
        _ => warn!("init_boot image not found"),
    }
    unpack_boot_image(artifacts_dir, &instance.boot_image, &unpack_dir).await?;

    if !file_has_content(&instance.vendor_boot_image) {
        return Err(Status::precondition(format!(
            "vendor boot image \"{}\" is missing or empty",
            instance.vendor_boot_image.display()
        )));
    }
    unpack_vendor_boot_image_if_not_unpacked(
        artifacts_dir,
        &instance.vendor_boot_image,
        &unpack_dir,
    )
    .await?;

    // gem5 only boots a raw vmlinux, which the user supplied directly.
    let kernel = instance.kernel_path.as_ref().ok_or_else(|| {
        Status::precondition("gem5 requires an explicit --kernel_path (raw vmlinux)")
    })?;
    copy_file(kernel, &unpack_dir.join("kernel"))?;

    // gem5 wants the bootloader under a binaries/ directory, and also opens
    // an ARM sibling named boot.arm to check it is a valid ELF.
    let bootloader = instance.bootloader.as_ref().ok_or_else(|| {
        Status::precondition("gem5 requires an explicit --bootloader path")
    })?;
    let binaries_dir = unpack_dir.join("binaries");
    ensure_directory_exists(&binaries_dir)?;
    let bootloader_name = bootloader
        .file_name()
        .ok_or_else(|| Status::precondition("bootloader path has no file name"))?;
    copy_file(bootloader, &binaries_dir.join(bootloader_name))?;
    let boot_arm = bootloader
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("boot.arm");
    copy_file(&boot_arm, &binaries_dir.join("boot.arm"))?;

    // Synthesize the initrd the gem5 loader consumes.
    repack_gem5_boot_image(
        artifacts_dir,
        &instance.gem5_initrd_path(),
        &instance.persistent_bootconfig_path(),
        &unpack_dir,
        instance.initramfs_path.as_deref(),
    )
    .await
}

#[cfg(test)]
#[path = "gem5_tests.rs"]
mod tests;
