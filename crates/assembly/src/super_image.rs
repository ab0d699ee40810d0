// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Super image rebuild from a vendor/system target-files pair.
//!
//! Vendor-owned partitions come out of the default (vendor) target-files
//! zip, everything else out of the system zip. The two `META/misc_info.txt`
//! files are merged, vbmeta is regenerated from the merged info, and
//! `build_super_image` assembles the result.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use cvd_adapters::files::{discard_tmp, ensure_directory_exists, install_if_changed};
use cvd_adapters::{Archive, HostCommand};
use cvd_core::Status;
use tracing::info;

use crate::avb::Avb;
use crate::misc_info::{
    combined_dynamic_partitions, merge_misc_infos, parse_misc_info, vbmeta_args, write_misc_info,
};

const MISC_INFO_PATH: &str = "META/misc_info.txt";
const DYNAMIC_PARTITIONS_PATH: &str = "META/dynamic_partitions_info.txt";

/// Images the default (vendor) target-files zip contributes.
const DEFAULT_TARGET_IMAGES: [&str; 13] = [
    "IMAGES/boot.img",
    "IMAGES/init_boot.img",
    "IMAGES/odm.img",
    "IMAGES/odm_dlkm.img",
    "IMAGES/recovery.img",
    "IMAGES/userdata.img",
    "IMAGES/vbmeta.img",
    "IMAGES/vbmeta_vendor_dlkm.img",
    "IMAGES/vendor.img",
    "IMAGES/vendor_boot.img",
    "IMAGES/vendor_dlkm.img",
    "IMAGES/vendor_kernel_boot.img",
    "IMAGES/vbmeta_system_dlkm.img",
];

/// Whether the request provides both target-files zips.
pub fn should_rebuild_super_image(
    default_target_zip: Option<&Path>,
    system_target_zip: Option<&Path>,
) -> bool {
    matches!(
        (default_target_zip, system_target_zip),
        (Some(default), Some(system)) if default.exists() && system.exists()
    )
}

fn partition_name(member: &str) -> Option<&str> {
    member
        .strip_prefix("IMAGES/")
        .and_then(|rest| rest.strip_suffix(".img"))
}

/// Members of `contents` the default target-files zip should contribute:
/// its whole `META/` tree plus the vendor image set.
fn default_members(contents: &[String]) -> Vec<String> {
    contents
        .iter()
        .filter(|m| m.starts_with("META/") || DEFAULT_TARGET_IMAGES.contains(&m.as_str()))
        .cloned()
        .collect()
}

/// Members the system target-files zip contributes: its misc info, its
/// dynamic-partitions info, and every image the vendor side does not own.
fn system_members(contents: &[String]) -> Vec<String> {
    contents
        .iter()
        .filter(|m| {
            *m == MISC_INFO_PATH
                || *m == DYNAMIC_PARTITIONS_PATH
                || (partition_name(m).is_some() && !DEFAULT_TARGET_IMAGES.contains(&m.as_str()))
        })
        .cloned()
        .collect()
}

/// Rebuild the super image into `output_path`.
#[allow(clippy::too_many_arguments)]
pub async fn rebuild_super_image(
    artifacts_dir: &Path,
    default_target_zip: &Path,
    system_target_zip: &Path,
    output_path: &Path,
    vbmeta_output_path: &Path,
    work_dir: &Path,
) -> Result<(), Status> {
    let combined_dir = work_dir.join("target_combined");
    let system_meta_dir = work_dir.join("system_meta");
    ensure_directory_exists(&combined_dir)?;
    ensure_directory_exists(&system_meta_dir)?;

    // Vendor side: META tree plus its image set.
    let default_zip = Archive::new(default_target_zip);
    let default_contents = default_zip.contents().await?;
    let default_extracted = default_members(&default_contents);
    default_zip
        .extract_files(&default_extracted, &combined_dir)
        .await?;

    // System side: misc info apart, images into the combined tree.
    let system_zip = Archive::new(system_target_zip);
    let system_contents = system_zip.contents().await?;
    let system_extracted = system_members(&system_contents);
    let system_meta: Vec<String> = system_extracted
        .iter()
        .filter(|m| m.starts_with("META/"))
        .cloned()
        .collect();
    let system_images: Vec<String> = system_extracted
        .iter()
        .filter(|m| partition_name(m).is_some())
        .cloned()
        .collect();
    system_zip
        .extract_files(&system_meta, &system_meta_dir)
        .await?;
    system_zip
        .extract_files(&system_images, &combined_dir)
        .await?;

    let extracted_images: BTreeSet<String> = default_extracted
        .iter()
        .chain(system_images.iter())
        .filter_map(|m| partition_name(m))
        .map(str::to_owned)
        .collect();
    let system_partitions: Vec<String> = system_images
        .iter()
        .filter_map(|m| partition_name(m))
        .map(str::to_owned)
        .collect();

    // Merge the misc infos, vendor values as defaults.
    let vendor_info = parse_misc_info(&read(&combined_dir.join(MISC_INFO_PATH))?)?;
    let system_info = parse_misc_info(&read(&system_meta_dir.join(MISC_INFO_PATH))?)?;
    let combined_dp = combined_dynamic_partitions(&vendor_info, &system_info, &extracted_images)?;
    let merged = merge_misc_infos(&vendor_info, &system_info, &combined_dp, &system_partitions)?;

    let merged_misc_info_path = combined_dir.join(MISC_INFO_PATH);
    std::fs::write(&merged_misc_info_path, write_misc_info(&merged)).map_err(|e| {
        Status::filesystem(format!("write {}: {e}", merged_misc_info_path.display()))
    })?;

    // Regenerate vbmeta from the merged info.
    let vbmeta = vbmeta_args(&merged, artifacts_dir, &combined_dir)?;
    let avb = Avb::new(
        artifacts_dir.join("bin/avbtool"),
        vbmeta.algorithm.clone(),
        vbmeta.key_path.clone(),
    );
    let existing_included: Vec<PathBuf> = vbmeta
        .included_partitions
        .iter()
        .filter(|p| p.exists())
        .cloned()
        .collect();
    avb.make_vbmeta_image(
        vbmeta_output_path,
        &vbmeta.chained_partitions,
        &existing_included,
        &vbmeta.extra_arguments,
    )
    .await?;

    // Assemble the super image through a temp file so an unchanged result
    // keeps its mtime.
    let tmp_path = work_dir.join("super.img.tmp");
    let result = async {
        info!(output = %output_path.display(), "rebuilding super image");
        HostCommand::host_binary(artifacts_dir, "build_super_image")
            .arg(merged_misc_info_path.display().to_string())
            .arg(tmp_path.display().to_string())
            .run_ok()
            .await?;
        install_if_changed(&tmp_path, output_path)?;
        Ok(())
    }
    .await;
    if result.is_err() {
        discard_tmp(&tmp_path);
    }
    result
}

fn read(path: &Path) -> Result<String, Status> {
    std::fs::read_to_string(path)
        .map_err(|e| Status::filesystem(format!("read {}: {e}", path.display())))
}

#[cfg(test)]
#[path = "super_image_tests.rs"]
mod tests;
