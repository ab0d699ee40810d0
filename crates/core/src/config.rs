// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The authoritative runtime config written to `cuttlefish_config.json`.
//!
//! Parsed once from the start request into an immutable struct and threaded
//! through the pipeline; children receive its path via the config env var.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::arch::Arch;
use crate::boot_flow::{ApBootFlow, BootFlow, VmmMode};
use crate::instance::InstanceId;
use crate::status::Status;

/// What to do about the userdata image before boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataImagePolicy {
    UseExisting,
    AlwaysCreate,
    #[default]
    CreateIfMissing,
    ResizeUpTo,
}

/// Group-wide runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub group_name: String,
    pub home_dir: PathBuf,
    pub host_artifacts_path: PathBuf,
    pub product_out_path: PathBuf,
    pub vm_manager: VmmMode,
    pub boot_flow: BootFlow,
    #[serde(default)]
    pub ap_boot_flow: ApBootFlow,
    pub target_arch: Arch,
    /// Kernel for the access point VM, when one is configured.
    #[serde(default)]
    pub ap_kernel_image: Option<PathBuf>,
    pub instances: Vec<InstanceConfig>,
}

impl GroupConfig {
    /// Shared scratch directory for instance-agnostic assembly work.
    pub fn assembly_dir(&self) -> PathBuf {
        self.home_dir.join("assembly")
    }

    pub fn instance(&self, id: InstanceId) -> Option<&InstanceConfig> {
        self.instances.iter().find(|i| i.id == id)
    }

    pub fn save(&self, path: &Path) -> Result<(), Status> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| Status::invariant(format!("config serialization failed: {e}")))?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, Status> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Status::precondition(format!("bad config at {}: {e}", path.display())))
    }
}

/// Per-instance configuration and on-disk layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub id: InstanceId,
    /// Per-instance artifact directory (`<home>/cvd-<id>`).
    pub instance_dir: PathBuf,

    // Boot knobs
    #[serde(default)]
    pub bootconfig_supported: bool,
    #[serde(default)]
    pub pause_in_bootloader: bool,
    #[serde(default)]
    pub boot_slot: Option<String>,
    /// Extra kernel cmdline tokens from the request.
    #[serde(default)]
    pub kernel_cmdline: Vec<String>,
    /// Bootconfig key/value pairs, sorted for determinism.
    #[serde(default)]
    pub bootconfig_args: BTreeMap<String, String>,

    // Replacement inputs
    #[serde(default)]
    pub kernel_path: Option<PathBuf>,
    #[serde(default)]
    pub initramfs_path: Option<PathBuf>,
    #[serde(default)]
    pub bootloader: Option<PathBuf>,

    // Source images (under the product out tree)
    pub boot_image: PathBuf,
    pub vendor_boot_image: PathBuf,
    #[serde(default)]
    pub init_boot_image: Option<PathBuf>,
    pub super_image: PathBuf,
    pub data_image: PathBuf,
    pub vbmeta_image: PathBuf,
    pub vbmeta_system_image: PathBuf,
    #[serde(default)]
    pub vbmeta_vendor_dlkm_image: Option<PathBuf>,
    #[serde(default)]
    pub vbmeta_system_dlkm_image: Option<PathBuf>,

    // Data image shaping
    #[serde(default)]
    pub data_policy: DataImagePolicy,
    #[serde(default)]
    pub blank_data_image_mb: u64,
    /// `ext4`, `f2fs`, `sdcard` or `none`.
    #[serde(default = "default_userdata_format")]
    pub userdata_format: String,

    // Blank image sizes (MiB)
    #[serde(default = "default_misc_image_mb")]
    pub blank_misc_image_mb: u64,
    #[serde(default = "default_metadata_image_mb")]
    pub blank_metadata_image_mb: u64,
    #[serde(default)]
    pub blank_sdcard_image_mb: u64,

    // Non-Android boot flows
    #[serde(default)]
    pub linux_kernel_path: Option<PathBuf>,
    #[serde(default)]
    pub linux_initramfs_path: Option<PathBuf>,
    #[serde(default)]
    pub linux_root_image: Option<PathBuf>,
    #[serde(default)]
    pub chromeos_kernel_path: Option<PathBuf>,
    #[serde(default)]
    pub chromeos_state_image: Option<PathBuf>,
    #[serde(default)]
    pub chromeos_root_image: Option<PathBuf>,
    #[serde(default)]
    pub fuchsia_root_image: Option<PathBuf>,
    #[serde(default)]
    pub android_efi_loader: Option<PathBuf>,
    #[serde(default)]
    pub fuchsia_zedboot_path: Option<PathBuf>,
    #[serde(default)]
    pub fuchsia_multiboot_bin_path: Option<PathBuf>,

    // Extra composite members
    #[serde(default)]
    pub custom_partition_paths: Vec<PathBuf>,
    #[serde(default)]
    pub vvmtruststore_path: Option<PathBuf>,
    #[serde(default)]
    pub hibernation_image: Option<PathBuf>,
    #[serde(default)]
    pub ap_rootfs_image: Option<PathBuf>,

    // Disk behavior
    #[serde(default)]
    pub use_overlay: bool,
    #[serde(default)]
    pub resume: bool,
}

fn default_userdata_format() -> String {
    "ext4".to_string()
}

fn default_misc_image_mb() -> u64 {
    1
}

fn default_metadata_image_mb() -> u64 {
    64
}

impl InstanceConfig {
    fn path(&self, name: &str) -> PathBuf {
        self.instance_dir.join(name)
    }

    pub fn new_boot_image(&self) -> PathBuf {
        self.path("boot_repacked.img")
    }

    pub fn new_vendor_boot_image(&self) -> PathBuf {
        self.path("vendor_boot_repacked.img")
    }

    pub fn new_super_image(&self) -> PathBuf {
        self.path("super.img")
    }

    pub fn new_data_image(&self) -> PathBuf {
        self.path("userdata.img")
    }

    pub fn new_vbmeta_image(&self) -> PathBuf {
        self.path("vbmeta_repacked.img")
    }

    pub fn uboot_env_image_path(&self) -> PathBuf {
        self.path("uboot_env.img")
    }

    pub fn mkenvimg_input_path(&self) -> PathBuf {
        self.path("mkenvimg_input")
    }

    /// Persistent vbmeta chaining the bootloader-env partitions.
    pub fn persistent_vbmeta_path(&self) -> PathBuf {
        self.path("vbmeta.img")
    }

    pub fn persistent_bootconfig_path(&self) -> PathBuf {
        self.path("persistent_bootconfig.img")
    }

    pub fn factory_reset_protected_path(&self) -> PathBuf {
        self.path("factory_reset_protected.img")
    }

    pub fn misc_image_path(&self) -> PathBuf {
        self.path("misc.img")
    }

    pub fn metadata_image_path(&self) -> PathBuf {
        self.path("metadata.img")
    }

    pub fn pstore_path(&self) -> PathBuf {
        self.path("pstore.img")
    }

    pub fn access_kregistry_path(&self) -> PathBuf {
        self.path("access-kregistry.img")
    }

    pub fn hwcomposer_pmem_path(&self) -> PathBuf {
        self.path("hwcomposer-pmem.img")
    }

    pub fn sdcard_path(&self) -> PathBuf {
        self.path("sdcard.img")
    }

    pub fn esp_image_path(&self) -> PathBuf {
        self.path("esp.img")
    }

    pub fn ap_esp_image_path(&self) -> PathBuf {
        self.path("ap_esp.img")
    }

    pub fn ap_uboot_env_image_path(&self) -> PathBuf {
        self.path("ap_uboot_env.img")
    }

    pub fn ap_vbmeta_path(&self) -> PathBuf {
        self.path("ap_vbmeta.img")
    }

    pub fn os_composite_disk_path(&self) -> PathBuf {
        self.path("os_composite.img")
    }

    pub fn persistent_composite_disk_path(&self) -> PathBuf {
        self.path("persistent_composite.img")
    }

    pub fn ap_composite_disk_path(&self) -> PathBuf {
        self.path("ap_composite.img")
    }

    pub fn overlay_path(&self) -> PathBuf {
        self.path("overlay.img")
    }

    pub fn gem5_binaries_dir(&self) -> PathBuf {
        self.path("binaries")
    }

    pub fn gem5_initrd_path(&self) -> PathBuf {
        self.path("initrd.img")
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
