// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use similar_asserts::assert_eq;

fn info(pairs: &[(&str, &str)]) -> MiscInfo {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn images(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

// ── Parse / write round-trip ─────────────────────────────────────────────────

#[test]
fn parse_trims_and_skips_blank_lines() {
    let parsed = parse_misc_info("a=1\n\n  b = 2 \nmalformed line\n").unwrap();
    assert_eq!(parsed, info(&[("a", "1"), ("b", "2")]));
}

#[test]
fn parse_keeps_first_equals_only() {
    let parsed = parse_misc_info("avb_vbmeta_args=--flag=1\n").unwrap();
    assert_eq!(parsed["avb_vbmeta_args"], "--flag=1");
}

#[test]
fn parse_rejects_conflicting_duplicate() {
    assert!(parse_misc_info("a=1\na=2\n").is_err());
    // Identical duplicates are fine.
    assert!(parse_misc_info("a=1\na=1\n").is_ok());
}

#[test]
fn write_then_parse_is_identity() {
    let original = info(&[("use_dynamic_partitions", "true"), ("ab_update", "true")]);
    let round_trip = parse_misc_info(&write_misc_info(&original)).unwrap();
    assert_eq!(round_trip, original);
}

// ── Combined dynamic partitions ──────────────────────────────────────────────

fn vendor_info() -> MiscInfo {
    info(&[
        ("use_dynamic_partitions", "true"),
        ("dynamic_partition_list", "vendor odm"),
        ("super_partition_groups", "google_dynamic_partitions"),
        ("super_google_dynamic_partitions_group_size", "1000"),
        (
            "super_google_dynamic_partitions_partition_list",
            "vendor odm",
        ),
        ("super_partition_size", "2000"),
        ("ab_update", "true"),
    ])
}

fn system_info() -> MiscInfo {
    info(&[
        ("use_dynamic_partitions", "true"),
        ("dynamic_partition_list", "system product"),
        ("super_partition_groups", "google_dynamic_partitions"),
        (
            "super_google_dynamic_partitions_partition_list",
            "system product",
        ),
        ("ab_update", "true"),
    ])
}

#[test]
fn combined_list_is_intersection_with_extracted() {
    let combined = combined_dynamic_partitions(
        &vendor_info(),
        &system_info(),
        &images(&["odm", "system", "vendor"]),
    )
    .unwrap();
    assert_eq!(combined["dynamic_partition_list"], "odm system vendor");
    assert_eq!(
        combined["super_google_dynamic_partitions_partition_list"],
        "odm system vendor"
    );
    assert_eq!(combined["super_partition_size"], "2000");
    assert_eq!(
        combined["super_google_dynamic_partitions_group_size"],
        "1000"
    );
}

#[test]
fn combined_requires_dynamic_partitions_on_both_sides() {
    let mut bad = vendor_info();
    bad.insert("use_dynamic_partitions".to_string(), "false".to_string());
    assert!(combined_dynamic_partitions(&bad, &system_info(), &images(&[])).is_err());
}

#[test]
fn combined_copies_only_agreeing_keys() {
    let combined =
        combined_dynamic_partitions(&vendor_info(), &system_info(), &images(&["vendor"]))
            .unwrap();
    // ab_update agrees; dynamic_partition_list disagreed and was recomputed.
    assert_eq!(combined["ab_update"], "true");
    assert_eq!(combined["dynamic_partition_list"], "vendor");
}

// ── Merge ────────────────────────────────────────────────────────────────────

#[test]
fn merge_prefers_vendor_defaults_and_copies_system_partition_keys() {
    let vendor = info(&[("avb_vbmeta_algorithm", "SHA256_RSA4096"), ("x", "vendor")]);
    let system = info(&[
        ("avb_system_algorithm", "SHA256_RSA2048"),
        ("fs_type", "ext4"),
        ("x", "system"),
    ]);
    let merged = merge_misc_infos(
        &vendor,
        &system,
        &MiscInfo::new(),
        &["system".to_string()],
    )
    .unwrap();
    assert_eq!(merged["x"], "vendor");
    assert_eq!(merged["avb_system_algorithm"], "SHA256_RSA2048");
    assert_eq!(merged["fs_type"], "ext4");
}

#[test]
fn merge_renumbers_rollback_index_collisions() {
    let vendor = MiscInfo::new();
    let system = info(&[
        ("avb_system_rollback_index_location", "2"),
        ("avb_product_rollback_index_location", "2"),
    ]);
    let merged = merge_misc_infos(
        &vendor,
        &system,
        &MiscInfo::new(),
        &["system".to_string(), "product".to_string()],
    )
    .unwrap();
    let mut locations: Vec<_> = vec![
        merged["avb_system_rollback_index_location"].clone(),
        merged["avb_product_rollback_index_location"].clone(),
    ];
    locations.sort();
    assert_eq!(locations, vec!["2".to_string(), "3".to_string()]);
}

#[test]
fn merge_overlays_combined_dynamic_partition_block_last() {
    let vendor = info(&[("dynamic_partition_list", "vendor")]);
    let combined = info(&[("dynamic_partition_list", "system vendor")]);
    let merged = merge_misc_infos(&vendor, &MiscInfo::new(), &combined, &[]).unwrap();
    assert_eq!(merged["dynamic_partition_list"], "system vendor");
}

// ── Vbmeta args ──────────────────────────────────────────────────────────────

#[test]
fn vbmeta_args_split_chained_and_included() {
    let misc = info(&[
        ("avb_vbmeta_key_path", "/build/side/path.pem"),
        ("avb_vbmeta_algorithm", "SHA256_RSA4096"),
        ("avb_vbmeta_args", "--padding_size 4096"),
        ("avb_vendor_key_path", "external/avb/test/data/testkey.pem"),
        ("avb_vendor_algorithm", "SHA256_RSA2048"),
        ("avb_vendor_rollback_index_location", "3"),
    ]);
    let args = vbmeta_args(&misc, Path::new("/host"), Path::new("/extracted")).unwrap();

    assert_eq!(args.algorithm, "SHA256_RSA4096");
    assert_eq!(
        args.key_path,
        PathBuf::from("/host/etc/cvd_avb/cvd_rsa4096.pem")
    );
    assert_eq!(
        args.extra_arguments,
        vec!["--padding_size".to_string(), "4096".to_string()]
    );

    let chained: Vec<_> = args
        .chained_partitions
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(chained, vec!["vendor"]);
    assert_eq!(args.chained_partitions[0].rollback_index, "3");
    assert_eq!(
        args.chained_partitions[0].key_path,
        PathBuf::from("/host/etc/cvd_avb/cvd_rsa2048.avbpubkey")
    );

    // Everything else is included by image path.
    assert!(args
        .included_partitions
        .contains(&PathBuf::from("/extracted/IMAGES/boot.img")));
    assert_eq!(args.included_partitions.len(), 8);
}

#[test]
fn vbmeta_args_require_key_path_marker() {
    let misc = info(&[("avb_vbmeta_algorithm", "SHA256_RSA4096")]);
    assert!(vbmeta_args(&misc, Path::new("/host"), Path::new("/x")).is_err());
}
