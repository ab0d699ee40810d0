// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Blank image creation and userdata shaping.
//!
//! Blank images are truncated to size and formatted per filesystem. The
//! SD-card format wraps a FAT filesystem in an MBR that reserves the first
//! MiB; the MBR is written after formatting because the formatting tools do
//! not preserve prior contents.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use cvd_adapters::files::{copy_file, file_has_content, file_size, truncate_file};
use cvd_adapters::HostCommand;
use cvd_core::{DataImagePolicy, InstanceConfig, Status};
use tracing::{info, warn};

pub const SECTOR_SIZE: u64 = 512;

/// The first MiB of an sdcard image is reserved for the MBR and padding,
/// matching what other OSes do when partitioning a drive.
const SDCARD_RESERVED_BYTES: u64 = 1 << 20;

const F2FS_BLOCKSIZE: &str = "4096";

// fsck exit bits that still mean the filesystem is usable.
const FSCK_ERROR_CORRECTED: i32 = 1;
const FSCK_ERROR_CORRECTED_REQUIRES_REBOOT: i32 = 2;

/// A classic MBR with a single partition entry and the 0x55AA signature.
pub fn mbr_bytes(partition_type: u8, first_lba: u32, num_sectors: u32) -> [u8; 512] {
    let mut mbr = [0u8; 512];
    // First partition entry lives at offset 446.
    let entry = &mut mbr[446..462];
    entry[4] = partition_type;
    entry[8..12].copy_from_slice(&first_lba.to_le_bytes());
    entry[12..16].copy_from_slice(&num_sectors.to_le_bytes());
    mbr[510] = 0x55;
    mbr[511] = 0xAA;
    mbr
}

async fn make_fat_image(
    artifacts_dir: &Path,
    image: &Path,
    image_size_bytes: u64,
    offset_bytes: u64,
) -> Result<(), Status> {
    let data_sectors = (image_size_bytes - offset_bytes) / SECTOR_SIZE;
    HostCommand::host_binary(artifacts_dir, "newfs_msdos")
        .args(["-F", "32", "-m", "0xf8", "-o", "0", "-c", "8", "-A"])
        .arg("-s")
        .arg(data_sectors.to_string())
        .arg("-@")
        .arg(offset_bytes.to_string())
        .arg(image.display().to_string())
        .run_ok()
        .await
}

/// Create a blank image of `num_mb` MiB formatted as `image_fmt`
/// (`ext4`, `f2fs`, `sdcard` or `none`).
pub async fn create_blank_image(
    artifacts_dir: &Path,
    image: &Path,
    num_mb: u64,
    image_fmt: &str,
) -> Result<(), Status> {
    info!(image = %image.display(), num_mb, image_fmt, "creating blank image");

    let image_size_bytes = num_mb << 20;
    // The FAT formatter zeroes the file itself.
    if image_fmt != "sdcard" {
        truncate_file(image, image_size_bytes)?;
    }

    match image_fmt {
        "ext4" => {
            HostCommand::new("/sbin/mkfs.ext4")
                .arg(image.display().to_string())
                .run_ok()
                .await?;
        }
        "f2fs" => {
            HostCommand::host_binary(artifacts_dir, "make_f2fs")
                .args(["-l", "data"])
                .arg(image.display().to_string())
                .args(["-C", "utf8"])
                .args(["-O", "compression,extra_attr,project_quota,casefold"])
                .args(["-g", "android"])
                .args(["-b", F2FS_BLOCKSIZE])
                .args(["-w", F2FS_BLOCKSIZE])
                .run_ok()
                .await?;
        }
        "sdcard" => {
            make_fat_image(artifacts_dir, image, image_size_bytes, SDCARD_RESERVED_BYTES)
                .await?;
            // The MBR goes in last; the formatter would have clobbered it.
            let mbr = mbr_bytes(
                0x0C,
                (SDCARD_RESERVED_BYTES / SECTOR_SIZE) as u32,
                ((image_size_bytes - SDCARD_RESERVED_BYTES) / SECTOR_SIZE) as u32,
            );
            let mut file = OpenOptions::new()
                .write(true)
                .open(image)
                .map_err(|e| Status::filesystem(format!("open {}: {e}", image.display())))?;
            file.write_all(&mbr)
                .map_err(|e| Status::filesystem(format!("write MBR to {}: {e}", image.display())))?;
        }
        "none" => {}
        other => {
            warn!(image = %image.display(), "unknown image format '{other}', treating as 'none'");
        }
    }
    Ok(())
}

/// Filesystem type reported by `blkid`, or empty when undetectable.
async fn fs_type(path: &Path) -> String {
    let out = match HostCommand::new("/usr/sbin/blkid")
        .arg(path.display().to_string())
        .run_and_capture_stdout()
        .await
    {
        Ok(out) => out,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "blkid failed");
            return String::new();
        }
    };
    let Some(begin) = out.find("TYPE=\"") else {
        return String::new();
    };
    let rest = &out[begin + "TYPE=\"".len()..];
    match rest.find('"') {
        Some(end) => rest[..end].to_string(),
        None => String::new(),
    }
}

/// fsck/resize tool pair for a filesystem format, when one exists.
fn resize_tools(format: &str) -> Option<(&'static str, &'static str)> {
    match format {
        "ext4" => Some(("e2fsck", "resize2fs")),
        "f2fs" => Some(("fsck.f2fs", "resize.f2fs")),
        _ => None,
    }
}

async fn force_fsck(
    artifacts_dir: &Path,
    data_image: &Path,
    fsck_tool: &str,
) -> Result<(), Status> {
    let fsck = HostCommand::host_binary(artifacts_dir, fsck_tool);
    let tool = fsck.tool_name();
    let outcome = fsck
        .args(["-y", "-f"])
        .arg(data_image.display().to_string())
        .run()
        .await?;
    let code = match outcome {
        cvd_adapters::ExitOutcome::Exited(code) => code,
        other => return Err(Status::subprocess(other.describe(&tool))),
    };
    if code & !(FSCK_ERROR_CORRECTED | FSCK_ERROR_CORRECTED_REQUIRES_REBOOT) != 0 {
        return Err(Status::subprocess(format!(
            "`{tool} -y -f {}` failed with code {code}",
            data_image.display()
        )));
    }
    Ok(())
}

/// Grow a data image to `data_image_mb`, fsck'ing before and after the
/// filesystem-level resize. Downsizing is refused.
pub async fn resize_image(
    artifacts_dir: &Path,
    data_image: &Path,
    data_image_mb: u64,
    format: &str,
) -> Result<(), Status> {
    let file_mb = file_size(data_image) >> 20;
    if data_image_mb < file_mb {
        return Err(Status::precondition(format!(
            "'{}' is already {file_mb} MB, won't downsize",
            data_image.display()
        )));
    }
    if file_mb == data_image_mb {
        info!(image = %data_image.display(), "already the right size");
        return Ok(());
    }
    truncate_file(data_image, data_image_mb << 20)?;
    if let Some((fsck_tool, resize_tool)) = resize_tools(format) {
        force_fsck(artifacts_dir, data_image, fsck_tool).await?;
        HostCommand::host_binary(artifacts_dir, resize_tool)
            .arg(data_image.display().to_string())
            .run_ok()
            .await?;
        force_fsck(artifacts_dir, data_image, fsck_tool).await?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataImageAction {
    NoAction,
    ResizeImage,
    CreateBlankImage,
}

async fn choose_data_image_action(instance: &InstanceConfig) -> Result<DataImageAction, Status> {
    if instance.data_policy == DataImagePolicy::AlwaysCreate {
        return Ok(DataImageAction::CreateBlankImage);
    }
    if !file_has_content(&instance.data_image) {
        if instance.data_policy == DataImagePolicy::UseExisting {
            return Err(Status::precondition(format!(
                "data image \"{}\" does not exist and policy is use_existing",
                instance.data_image.display()
            )));
        }
        return Ok(DataImageAction::CreateBlankImage);
    }
    if instance.data_policy == DataImagePolicy::UseExisting {
        return Ok(DataImageAction::NoAction);
    }
    let current_fs_type = fs_type(&instance.data_image).await;
    if current_fs_type != instance.userdata_format {
        if instance.data_policy == DataImagePolicy::ResizeUpTo {
            return Err(Status::precondition(format!(
                "changing the fs format is incompatible with --data_policy=resize_up_to \
                 (\"{current_fs_type}\" != \"{}\")",
                instance.userdata_format
            )));
        }
        return Ok(DataImageAction::CreateBlankImage);
    }
    if instance.data_policy == DataImagePolicy::ResizeUpTo {
        return Ok(DataImageAction::ResizeImage);
    }
    Ok(DataImageAction::NoAction)
}

/// Shape the userdata image per the configured policy.
///
/// The canonical source image is never modified; creation and resizing
/// target the per-instance `userdata.img` copy.
pub async fn initialize_data_image(
    artifacts_dir: &Path,
    instance: &InstanceConfig,
) -> Result<(), Status> {
    match choose_data_image_action(instance).await? {
        DataImageAction::NoAction => {
            info!(image = %instance.data_image.display(), "exists, not creating");
            Ok(())
        }
        DataImageAction::CreateBlankImage => {
            let new_image = instance.new_data_image();
            if new_image.exists() {
                fs::remove_file(&new_image).map_err(|e| {
                    Status::filesystem(format!("remove {}: {e}", new_image.display()))
                })?;
            }
            if instance.blank_data_image_mb == 0 {
                return Err(Status::precondition(
                    "expected `--blank_data_image_mb` to be set for image creation",
                ));
            }
            create_blank_image(artifacts_dir, &new_image, instance.blank_data_image_mb, "none")
                .await
        }
        DataImageAction::ResizeImage => {
            if instance.blank_data_image_mb == 0 {
                return Err(Status::precondition(
                    "expected `--blank_data_image_mb` to be set for image resizing",
                ));
            }
            let new_image = instance.new_data_image();
            copy_file(&instance.data_image, &new_image)?;
            resize_image(
                artifacts_dir,
                &new_image,
                instance.blank_data_image_mb,
                &instance.userdata_format,
            )
            .await
        }
    }
}

/// Reuse an existing image or create a blank one of `num_mb` MiB.
pub async fn initialize_blank_image_if_missing(
    artifacts_dir: &Path,
    path: &Path,
    num_mb: u64,
) -> Result<(), Status> {
    if file_has_content(path) {
        return Ok(());
    }
    create_blank_image(artifacts_dir, path, num_mb, "none").await
}

#[cfg(test)]
#[path = "blank_image_tests.rs"]
mod tests;
