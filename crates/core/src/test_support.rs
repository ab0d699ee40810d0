// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builders for other crates' tests. Compiled only with the
//! `test-support` feature.

use std::collections::BTreeMap;
use std::path::Path;

use crate::arch::Arch;
use crate::boot_flow::{ApBootFlow, BootFlow, VmmMode};
use crate::config::{DataImagePolicy, GroupConfig, InstanceConfig};
use crate::instance::InstanceId;

/// A minimal Android-flow instance config rooted under `dir`.
pub fn instance_config(dir: &Path, id: InstanceId) -> InstanceConfig {
    InstanceConfig {
        id,
        instance_dir: dir.join(format!("cvd-{id}")),
        bootconfig_supported: true,
        pause_in_bootloader: false,
        boot_slot: None,
        kernel_cmdline: Vec::new(),
        bootconfig_args: BTreeMap::new(),
        kernel_path: None,
        initramfs_path: None,
        bootloader: None,
        boot_image: dir.join("boot.img"),
        vendor_boot_image: dir.join("vendor_boot.img"),
        init_boot_image: None,
        super_image: dir.join("super.img"),
        data_image: dir.join("userdata.img"),
        vbmeta_image: dir.join("vbmeta.img"),
        vbmeta_system_image: dir.join("vbmeta_system.img"),
        vbmeta_vendor_dlkm_image: None,
        vbmeta_system_dlkm_image: None,
        data_policy: DataImagePolicy::CreateIfMissing,
        blank_data_image_mb: 2048,
        userdata_format: "ext4".to_string(),
        blank_misc_image_mb: 1,
        blank_metadata_image_mb: 64,
        blank_sdcard_image_mb: 0,
        linux_kernel_path: None,
        linux_initramfs_path: None,
        linux_root_image: None,
        chromeos_kernel_path: None,
        chromeos_state_image: None,
        chromeos_root_image: None,
        fuchsia_root_image: None,
        android_efi_loader: None,
        fuchsia_zedboot_path: None,
        fuchsia_multiboot_bin_path: None,
        custom_partition_paths: Vec::new(),
        vvmtruststore_path: None,
        hibernation_image: None,
        ap_rootfs_image: None,
        use_overlay: false,
        resume: false,
    }
}

/// A single-instance Android group config rooted under `home`.
pub fn group_config(home: &Path) -> GroupConfig {
    GroupConfig {
        group_name: "cvd-1".to_string(),
        home_dir: home.to_path_buf(),
        host_artifacts_path: home.join("host"),
        product_out_path: home.join("product"),
        vm_manager: VmmMode::Crosvm,
        boot_flow: BootFlow::Android,
        ap_boot_flow: ApBootFlow::None,
        target_arch: Arch::X86_64,
        ap_kernel_image: None,
        instances: vec![instance_config(home, 1)],
    }
}
