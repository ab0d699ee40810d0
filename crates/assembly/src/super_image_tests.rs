// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn contents(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn rebuild_needs_both_zips_present() {
    let dir = tempfile::tempdir().unwrap();
    let default_zip = dir.path().join("default.zip");
    let system_zip = dir.path().join("system.zip");
    std::fs::write(&default_zip, b"zip").unwrap();

    assert!(!should_rebuild_super_image(Some(&default_zip), None));
    assert!(!should_rebuild_super_image(
        Some(&default_zip),
        Some(&system_zip)
    ));
    std::fs::write(&system_zip, b"zip").unwrap();
    assert!(should_rebuild_super_image(
        Some(&default_zip),
        Some(&system_zip)
    ));
}

#[test]
fn partition_names_come_from_images_members() {
    assert_eq!(partition_name("IMAGES/system.img"), Some("system"));
    assert_eq!(partition_name("META/misc_info.txt"), None);
    assert_eq!(partition_name("IMAGES/readme.txt"), None);
}

#[test]
fn default_zip_contributes_meta_and_vendor_images() {
    let members = default_members(&contents(&[
        "IMAGES/vendor.img",
        "IMAGES/system.img",
        "META/misc_info.txt",
        "META/dynamic_partitions_info.txt",
        "OTA/payload.bin",
    ]));
    assert_eq!(
        members,
        contents(&[
            "IMAGES/vendor.img",
            "META/misc_info.txt",
            "META/dynamic_partitions_info.txt",
        ])
    );
}

#[test]
fn system_zip_contributes_everything_else() {
    let members = system_members(&contents(&[
        "IMAGES/vendor.img",
        "IMAGES/system.img",
        "IMAGES/product.img",
        "META/misc_info.txt",
        "META/ab_partitions.txt",
    ]));
    assert_eq!(
        members,
        contents(&[
            "IMAGES/system.img",
            "IMAGES/product.img",
            "META/misc_info.txt",
        ])
    );
}
