// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composite GPT disks.
//!
//! A composite disk is an ordered list of labelled partition images plus a
//! generated GPT header/footer, described by a serialized config file. The
//! config file doubles as the rebuild fingerprint: when it is byte-identical
//! to the previous run and the composite is newer than every component, the
//! build is skipped, preserving userdata across reboots.

use std::fs;
use std::path::{Path, PathBuf};

use cvd_adapters::files::{file_has_content, mtime};
use cvd_adapters::HostCommand;
use cvd_core::{GroupConfig, InstanceConfig, Status, VmmMode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// GPT partition type of a composite member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionType {
    #[default]
    LinuxFilesystem,
    EfiSystemPartition,
}

/// One labelled member of a composite disk. The label is the bit-exact GPT
/// entry name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePartition {
    pub label: String,
    pub image_file_path: PathBuf,
    #[serde(default)]
    pub partition_type: PartitionType,
}

impl ImagePartition {
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            image_file_path: path.into(),
            partition_type: PartitionType::LinuxFilesystem,
        }
    }

    pub fn efi(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            image_file_path: path.into(),
            partition_type: PartitionType::EfiSystemPartition,
        }
    }
}

/// Serialized composite description; this is what lands in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeDiskSpec {
    pub read_only: bool,
    pub partitions: Vec<ImagePartition>,
}

/// Prefer the repacked/generated artifact, falling back to the source tree.
fn new_or_existing(new_path: PathBuf, existing: &Path) -> PathBuf {
    if new_path.exists() {
        new_path
    } else {
        existing.to_path_buf()
    }
}

/// The Android flow's OS disk layout.
pub fn android_composite_disk_config(instance: &InstanceConfig) -> Vec<ImagePartition> {
    let mut partitions = Vec::new();

    partitions.push(ImagePartition::new("misc", instance.misc_image_path()));
    let boot = new_or_existing(instance.new_boot_image(), &instance.boot_image);
    for slot in ["boot_a", "boot_b"] {
        partitions.push(ImagePartition::new(slot, boot.clone()));
    }
    if let Some(init_boot) = &instance.init_boot_image {
        if init_boot.exists() {
            for slot in ["init_boot_a", "init_boot_b"] {
                partitions.push(ImagePartition::new(slot, init_boot.clone()));
            }
        }
    }
    let vendor_boot = new_or_existing(instance.new_vendor_boot_image(), &instance.vendor_boot_image);
    for slot in ["vendor_boot_a", "vendor_boot_b"] {
        partitions.push(ImagePartition::new(slot, vendor_boot.clone()));
    }
    let vbmeta = new_or_existing(instance.new_vbmeta_image(), &instance.vbmeta_image);
    for slot in ["vbmeta_a", "vbmeta_b"] {
        partitions.push(ImagePartition::new(slot, vbmeta.clone()));
    }
    for slot in ["vbmeta_system_a", "vbmeta_system_b"] {
        partitions.push(ImagePartition::new(slot, instance.vbmeta_system_image.clone()));
    }
    if let Some(vendor_dlkm) = &instance.vbmeta_vendor_dlkm_image {
        if vendor_dlkm.exists() {
            for slot in ["vbmeta_vendor_dlkm_a", "vbmeta_vendor_dlkm_b"] {
                partitions.push(ImagePartition::new(slot, vendor_dlkm.clone()));
            }
        }
    }
    if let Some(system_dlkm) = &instance.vbmeta_system_dlkm_image {
        if system_dlkm.exists() {
            for slot in ["vbmeta_system_dlkm_a", "vbmeta_system_dlkm_b"] {
                partitions.push(ImagePartition::new(slot, system_dlkm.clone()));
            }
        }
    }
    partitions.push(ImagePartition::new(
        "super",
        new_or_existing(instance.new_super_image(), &instance.super_image),
    ));
    partitions.push(ImagePartition::new(
        "userdata",
        new_or_existing(instance.new_data_image(), &instance.data_image),
    ));
    partitions.push(ImagePartition::new(
        "metadata",
        instance.metadata_image_path(),
    ));
    if let Some(hibernation) = &instance.hibernation_image {
        if hibernation.exists() {
            partitions.push(ImagePartition::new("hibernation", hibernation.clone()));
        }
    }
    if let Some(truststore) = &instance.vvmtruststore_path {
        partitions.push(ImagePartition::new("vvmtruststore", truststore.clone()));
    }
    for (i, custom) in instance.custom_partition_paths.iter().enumerate() {
        let label = if i > 0 {
            format!("custom_{i}")
        } else {
            "custom".to_string()
        };
        partitions.push(ImagePartition::new(label, custom.clone()));
    }
    partitions
}

/// Android behind an EFI loader: the loader ESP is prepended.
pub fn android_efi_loader_composite_disk_config(
    instance: &InstanceConfig,
) -> Vec<ImagePartition> {
    let mut partitions = vec![ImagePartition::efi(
        "android_esp",
        instance.esp_image_path(),
    )];
    partitions.extend(android_composite_disk_config(instance));
    partitions
}

/// ChromeOS: the root lives in the third GPT slot, matching the hard-coded
/// `/dev/vda3` on its kernel cmdline.
pub fn chrome_os_composite_disk_config(instance: &InstanceConfig) -> Vec<ImagePartition> {
    let mut partitions = vec![ImagePartition::efi(
        "chromeos_esp",
        instance.esp_image_path(),
    )];
    if let Some(state) = &instance.chromeos_state_image {
        partitions.push(ImagePartition::new("chromeos_state", state.clone()));
    }
    if let Some(root) = &instance.chromeos_root_image {
        partitions.push(ImagePartition::new("chromeos_root", root.clone()));
    }
    partitions
}

/// Linux: ESP then root, so the root is `/dev/vda2`.
pub fn linux_composite_disk_config(instance: &InstanceConfig) -> Vec<ImagePartition> {
    let mut partitions = vec![ImagePartition::efi("linux_esp", instance.esp_image_path())];
    if let Some(root) = &instance.linux_root_image {
        partitions.push(ImagePartition::new("linux_root", root.clone()));
    }
    partitions
}

pub fn fuchsia_composite_disk_config(instance: &InstanceConfig) -> Vec<ImagePartition> {
    let mut partitions = vec![ImagePartition::efi(
        "fuchsia_esp",
        instance.esp_image_path(),
    )];
    if let Some(root) = &instance.fuchsia_root_image {
        partitions.push(ImagePartition::new("fuchsia_root", root.clone()));
    }
    partitions
}

/// OS disk layout for the configured boot flow.
pub fn os_composite_disk_config(
    config: &GroupConfig,
    instance: &InstanceConfig,
) -> Vec<ImagePartition> {
    use cvd_core::BootFlow::*;
    match config.boot_flow {
        Android => android_composite_disk_config(instance),
        AndroidEfiLoader => android_efi_loader_composite_disk_config(instance),
        ChromeOs => chrome_os_composite_disk_config(instance),
        ChromeOsDisk => Vec::new(),
        Linux => linux_composite_disk_config(instance),
        Fuchsia => fuchsia_composite_disk_config(instance),
    }
}

/// The per-instance persistent composite.
///
/// The position of `uboot_env` is load-bearing: the u-boot environment
/// fragment addresses it by partition index.
pub fn persistent_composite_disk_config(instance: &InstanceConfig) -> Vec<ImagePartition> {
    let mut partitions = vec![
        ImagePartition::new("uboot_env", instance.uboot_env_image_path()),
        ImagePartition::new("vbmeta", instance.persistent_vbmeta_path()),
        ImagePartition::new("frp", instance.factory_reset_protected_path()),
    ];
    if instance.bootconfig_supported {
        partitions.push(ImagePartition::new(
            "bootconfig",
            instance.persistent_bootconfig_path(),
        ));
    }
    partitions
}

/// The AP VM's persistent composite.
pub fn persistent_ap_composite_disk_config(instance: &InstanceConfig) -> Vec<ImagePartition> {
    vec![
        ImagePartition::new("uboot_env", instance.ap_uboot_env_image_path()),
        ImagePartition::new("vbmeta", instance.ap_vbmeta_path()),
    ]
}

/// Builds one composite disk (and optionally its qcow2 overlay).
#[derive(Debug, Clone)]
pub struct DiskBuilder {
    read_only: bool,
    partitions: Vec<ImagePartition>,
    vm_manager: VmmMode,
    crosvm_path: PathBuf,
    config_path: PathBuf,
    header_path: PathBuf,
    footer_path: PathBuf,
    composite_disk_path: PathBuf,
    overlay_path: Option<PathBuf>,
    resume_if_possible: bool,
}

impl DiskBuilder {
    pub fn new(
        vm_manager: VmmMode,
        crosvm_path: impl Into<PathBuf>,
        composite_disk_path: impl Into<PathBuf>,
    ) -> Self {
        let composite_disk_path: PathBuf = composite_disk_path.into();
        let stem = composite_disk_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "composite".to_string());
        let sibling = |suffix: &str| {
            composite_disk_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(format!("{stem}{suffix}"))
        };
        Self {
            read_only: false,
            partitions: Vec::new(),
            vm_manager,
            crosvm_path: crosvm_path.into(),
            config_path: sibling("_disk_config.json"),
            header_path: sibling("_gpt_header.img"),
            footer_path: sibling("_gpt_footer.img"),
            composite_disk_path,
            overlay_path: None,
            resume_if_possible: false,
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn partitions(mut self, partitions: Vec<ImagePartition>) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    pub fn overlay_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.overlay_path = Some(path.into());
        self
    }

    pub fn resume_if_possible(mut self, resume: bool) -> Self {
        self.resume_if_possible = resume;
        self
    }

    pub fn composite_disk_path(&self) -> &Path {
        &self.composite_disk_path
    }

    fn spec(&self) -> CompositeDiskSpec {
        CompositeDiskSpec {
            read_only: self.read_only,
            partitions: self.partitions.clone(),
        }
    }

    /// Deterministic serialized form of the spec (the rebuild fingerprint).
    pub fn spec_text(&self) -> Result<String, Status> {
        serde_json::to_string_pretty(&self.spec())
            .map_err(|e| Status::invariant(format!("composite spec serialization failed: {e}")))
    }

    /// Whether the existing composite can be reused as-is.
    fn can_skip_build(&self, spec_text: &str) -> bool {
        if !file_has_content(&self.composite_disk_path) {
            return false;
        }
        let previous = fs::read_to_string(&self.config_path).unwrap_or_default();
        if previous != spec_text {
            debug!(config = %self.config_path.display(), "composite config changed");
            return false;
        }
        let composite_mtime = mtime(&self.composite_disk_path);
        self.partitions
            .iter()
            .all(|p| mtime(&p.image_file_path) <= composite_mtime)
    }

    /// Build the composite unless it is already up to date. Returns whether
    /// a build ran.
    pub async fn build_composite_disk_if_necessary(&self) -> Result<bool, Status> {
        if self.partitions.is_empty() {
            return Ok(false);
        }
        let spec_text = self.spec_text()?;
        if self.can_skip_build(&spec_text) {
            debug!(disk = %self.composite_disk_path.display(), "composite up to date");
            return Ok(false);
        }

        info!(disk = %self.composite_disk_path.display(), "building composite disk");
        fs::write(&self.config_path, &spec_text)
            .map_err(|e| Status::filesystem(format!("write {}: {e}", self.config_path.display())))?;

        let mut cmd = HostCommand::new(&self.crosvm_path)
            .arg("create_composite")
            .arg("--header-path")
            .arg(self.header_path.display().to_string())
            .arg("--footer-path")
            .arg(self.footer_path.display().to_string())
            .arg(self.composite_disk_path.display().to_string());
        for partition in &self.partitions {
            let access = if self.read_only { "ro" } else { "rw" };
            cmd = cmd.arg(format!(
                "{}:{}:{access}",
                partition.label,
                partition.image_file_path.display()
            ));
        }
        cmd.run_ok().await?;
        Ok(true)
    }

    /// Build the qcow2 overlay when the hypervisor (or the user) wants one.
    /// Returns whether a build ran.
    pub async fn build_overlay_if_necessary(&self, force_overlay: bool) -> Result<bool, Status> {
        let Some(overlay_path) = &self.overlay_path else {
            return Ok(false);
        };
        if !self.vm_manager.requires_overlay() && !force_overlay {
            return Ok(false);
        }
        // Resuming keeps the overlay (and with it the guest's disk state).
        if self.resume_if_possible
            && file_has_content(overlay_path)
            && mtime(&self.composite_disk_path) <= mtime(overlay_path)
        {
            debug!(overlay = %overlay_path.display(), "reusing overlay for resume");
            return Ok(false);
        }
        info!(overlay = %overlay_path.display(), "building overlay");
        HostCommand::new(&self.crosvm_path)
            .arg("create_qcow2")
            .arg("--backing-file")
            .arg(self.composite_disk_path.display().to_string())
            .arg(overlay_path.display().to_string())
            .run_ok()
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
#[path = "composite_tests.rs"]
mod tests;
