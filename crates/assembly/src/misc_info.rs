// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `META/misc_info.txt` parsing and the vendor/system merge.
//!
//! The merge rules follow the platform's merge_target_files tooling: vendor
//! values are the defaults, system contributes its per-partition AVB and
//! filesystem keys, and the combined dynamic-partition block is recomputed
//! from the intersection of both partition lists with the images that were
//! actually extracted.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use cvd_core::Status;
use indexmap::IndexMap;
use tracing::warn;

use crate::avb::{test_key_path, test_pub_key_path, ChainPartition};

/// Key/value contents of a misc_info.txt, insertion-ordered.
pub type MiscInfo = IndexMap<String, String>;

const DYNAMIC_PARTITIONS: &str = "dynamic_partition_list";
const SUPER_BLOCK_DEVICES: &str = "super_block_devices";
const SUPER_PARTITION_GROUPS: &str = "super_partition_groups";
const USE_DYNAMIC_PARTITIONS: &str = "use_dynamic_partitions";
const ROLLBACK_INDEX_SUFFIX: &str = "_rollback_index_location";
const AVB_VBMETA_ALGORITHM: &str = "avb_vbmeta_algorithm";
const AVB_VBMETA_ARGS: &str = "avb_vbmeta_args";
const AVB_VBMETA_KEY_PATH: &str = "avb_vbmeta_key_path";

const NON_PARTITION_KEYS_TO_MERGE: [&str; 2] = ["ab_update", "default_system_dev_certificate"];

// based on build/make/tools/releasetools/common.py:AVB_PARTITIONS
const VBMETA_PARTITIONS: [&str; 9] = [
    "boot",
    "init_boot",
    "odm",
    "odm_dlkm",
    "vbmeta_system",
    "vbmeta_system_dlkm",
    "vbmeta_vendor_dlkm",
    "vendor",
    "vendor_boot",
];

/// Parse misc_info.txt contents. A key repeated with a different value is a
/// corrupt input.
pub fn parse_misc_info(contents: &str) -> Result<MiscInfo, Status> {
    let mut info = MiscInfo::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            warn!(line, "misc_info line in unknown format");
            continue;
        };
        let key = key.trim().to_string();
        let value = value.trim().to_string();
        if let Some(previous) = info.get(&key) {
            if previous != &value {
                return Err(Status::precondition(format!(
                    "duplicate key with different value. key:\"{key}\", previous \
                     value:\"{previous}\", this value:\"{value}\""
                )));
            }
        }
        info.insert(key, value);
    }
    Ok(info)
}

/// Serialize a misc info map back to `key=value` lines.
pub fn write_misc_info(info: &MiscInfo) -> String {
    let mut out = String::new();
    for (key, value) in info {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out
}

fn expected(info: &MiscInfo, key: &str) -> Result<String, Status> {
    info.get(key).cloned().ok_or_else(|| {
        Status::precondition(format!("unable to retrieve expected value from key: {key}"))
    })
}

/// Deduplicated, sorted intersection of both space-separated lists with the
/// extracted image set.
fn merge_partition_lists(
    vendor: &str,
    system: &str,
    extracted_images: &BTreeSet<String>,
) -> String {
    let full: BTreeSet<&str> = vendor
        .split_whitespace()
        .chain(system.split_whitespace())
        .collect();
    let filtered: Vec<&str> = full
        .into_iter()
        .filter(|p| extracted_images.contains(*p))
        .collect();
    filtered.join(" ")
}

fn partition_list(
    vendor_info: &MiscInfo,
    system_info: &MiscInfo,
    key: &str,
    extracted_images: &BTreeSet<String>,
) -> String {
    let vendor_list = vendor_info.get(key).cloned().unwrap_or_default();
    let system_list = system_info.get(key).cloned().unwrap_or_default();
    merge_partition_lists(&vendor_list, &system_list, extracted_images)
}

/// The misc_info keys a partition contributes from the system build.
fn partition_keys(name: &str) -> Vec<String> {
    let mut keys = vec![
        format!("avb_{name}"),
        format!("avb_{name}_algorithm"),
        format!("avb_{name}_key_path"),
        format!("avb_{name}{ROLLBACK_INDEX_SUFFIX}"),
        format!("avb_{name}_hashtree_enable"),
        format!("avb_{name}_add_hashtree_footer_args"),
        format!("{name}_disable_sparse"),
        format!("building_{name}_image"),
    ];
    if name == "system" {
        keys.push("fs_type".to_string());
    } else {
        keys.push(format!("{name}_fs_type"));
    }
    keys
}

/// Bump a rollback index location past any already-used value.
fn resolve_rollback_index_conflicts(
    index_string: &str,
    used_indices: &HashSet<i64>,
) -> Result<i64, Status> {
    let mut index: i64 = index_string.parse().map_err(|_| {
        Status::precondition(format!(
            "unable to parse rollback index location \"{index_string}\""
        ))
    })?;
    while used_indices.contains(&index) {
        index += 1;
    }
    Ok(index)
}

/// Recompute the dynamic-partition block of the merged misc info.
pub fn combined_dynamic_partitions(
    vendor_info: &MiscInfo,
    system_info: &MiscInfo,
    extracted_images: &BTreeSet<String>,
) -> Result<MiscInfo, Status> {
    for (label, info) in [("vendor", vendor_info), ("system", system_info)] {
        let use_dp = expected(info, USE_DYNAMIC_PARTITIONS)?;
        if use_dp != "true" {
            return Err(Status::precondition(format!(
                "{label} build must have {USE_DYNAMIC_PARTITIONS}=true"
            )));
        }
    }

    let mut result = MiscInfo::new();
    // copy where both files agree
    for (key, value) in vendor_info {
        if system_info.get(key) == Some(value) {
            result.insert(key.clone(), value.clone());
        }
    }

    result.insert(
        DYNAMIC_PARTITIONS.to_string(),
        partition_list(vendor_info, system_info, DYNAMIC_PARTITIONS, extracted_images),
    );

    if let Some(block_devices) = vendor_info.get(SUPER_BLOCK_DEVICES) {
        result.insert(SUPER_BLOCK_DEVICES.to_string(), block_devices.clone());
        for device in block_devices.split_whitespace() {
            let key = format!("super_{device}_device_size");
            result.insert(key.clone(), expected(vendor_info, &key)?);
        }
    }

    let groups = expected(vendor_info, SUPER_PARTITION_GROUPS)?;
    result.insert(SUPER_PARTITION_GROUPS.to_string(), groups.clone());
    for group in groups.split_whitespace() {
        let size_key = format!("super_{group}_group_size");
        result.insert(size_key.clone(), expected(vendor_info, &size_key)?);

        let list_key = format!("super_{group}_partition_list");
        result.insert(
            list_key.clone(),
            partition_list(vendor_info, system_info, &list_key, extracted_images),
        );
    }

    for key in [
        "virtual_ab",
        "virtual_ab_retrofit",
        "lpmake",
        "super_metadata_device",
        "super_partition_error_limit",
        "super_partition_size",
    ] {
        if let Some(value) = vendor_info.get(key) {
            result.insert(key.to_string(), value.clone());
        }
    }
    Ok(result)
}

/// Merge the two misc infos, vendor values as defaults.
pub fn merge_misc_infos(
    vendor_info: &MiscInfo,
    system_info: &MiscInfo,
    combined_dp_info: &MiscInfo,
    system_partitions: &[String],
) -> Result<MiscInfo, Status> {
    let mut result = vendor_info.clone();
    let mut used_indices = HashSet::new();
    for partition in system_partitions {
        for key in partition_keys(partition) {
            let Some(system_value) = system_info.get(&key) else {
                continue;
            };
            let mut system_value = system_value.clone();
            // rollback index locations can conflict across builds
            if key.ends_with(ROLLBACK_INDEX_SUFFIX) {
                let index = resolve_rollback_index_conflicts(&system_value, &used_indices)?;
                used_indices.insert(index);
                system_value = index.to_string();
            }
            result.insert(key, system_value);
        }
    }
    for key in NON_PARTITION_KEYS_TO_MERGE {
        if let Some(value) = system_info.get(key) {
            result.insert(key.to_string(), value.clone());
        }
    }
    for (key, value) in combined_dp_info {
        result.insert(key.clone(), value.clone());
    }
    Ok(result)
}

/// Everything `make_vbmeta_image` needs, derived from a merged misc info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VbmetaArgs {
    pub algorithm: String,
    pub key_path: PathBuf,
    pub chained_partitions: Vec<ChainPartition>,
    pub included_partitions: Vec<PathBuf>,
    pub extra_arguments: Vec<String>,
}

/// Build vbmeta arguments from the merged misc info.
///
/// Partitions with their own signing key chain; the rest contribute their
/// descriptors directly from the extracted image tree.
pub fn vbmeta_args(
    misc_info: &MiscInfo,
    artifacts_dir: &Path,
    image_dir: &Path,
) -> Result<VbmetaArgs, Status> {
    // The build-system key path is unusable on the host; substitute the
    // host-artifacts test key for the declared algorithm.
    expected(misc_info, AVB_VBMETA_KEY_PATH)?;
    let algorithm = expected(misc_info, AVB_VBMETA_ALGORITHM)?;
    let mut result = VbmetaArgs {
        key_path: test_key_path(artifacts_dir, &algorithm)?,
        algorithm,
        chained_partitions: Vec::new(),
        included_partitions: Vec::new(),
        extra_arguments: Vec::new(),
    };
    if let Some(extra) = misc_info.get(AVB_VBMETA_ARGS) {
        result
            .extra_arguments
            .extend(extra.split_whitespace().map(str::to_owned));
    }

    for partition in VBMETA_PARTITIONS {
        if misc_info.contains_key(&format!("avb_{partition}_key_path")) {
            let partition_algorithm = expected(misc_info, &format!("avb_{partition}_algorithm"))?;
            result.chained_partitions.push(ChainPartition {
                name: partition.to_string(),
                rollback_index: expected(
                    misc_info,
                    &format!("avb_{partition}{ROLLBACK_INDEX_SUFFIX}"),
                )?,
                key_path: test_pub_key_path(artifacts_dir, &partition_algorithm)?,
            });
        } else {
            result
                .included_partitions
                .push(image_dir.join(format!("IMAGES/{partition}.img")));
        }
    }
    Ok(result)
}

#[cfg(test)]
#[path = "misc_info_tests.rs"]
mod tests;
