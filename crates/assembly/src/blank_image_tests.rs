// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cvd_core::StatusKind;

fn instance(dir: &Path) -> InstanceConfig {
    let mut inst = cvd_core::test_support::instance_config(dir, 1);
    inst.instance_dir = dir.to_path_buf();
    inst.data_image = dir.join("source_userdata.img");
    inst.blank_data_image_mb = 2;
    inst
}

// ── MBR ──────────────────────────────────────────────────────────────────────

#[test]
fn mbr_layout() {
    let mbr = mbr_bytes(0x0C, 2048, 4096);
    assert_eq!(mbr.len(), 512);
    // Bootstrap area untouched.
    assert!(mbr[..446].iter().all(|&b| b == 0));
    // Partition entry: type at +4, LBA and sector count little-endian.
    assert_eq!(mbr[450], 0x0C);
    assert_eq!(&mbr[454..458], &2048u32.to_le_bytes());
    assert_eq!(&mbr[458..462], &4096u32.to_le_bytes());
    // Boot signature.
    assert_eq!(mbr[510], 0x55);
    assert_eq!(mbr[511], 0xAA);
}

#[test]
fn sdcard_geometry_reserves_first_mib() {
    let first_lba = (SDCARD_RESERVED_BYTES / SECTOR_SIZE) as u32;
    assert_eq!(first_lba, 2048);
}

// ── Blank creation ───────────────────────────────────────────────────────────

#[tokio::test]
async fn none_format_truncates_only() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("pstore.img");
    create_blank_image(dir.path(), &image, 2, "none").await.unwrap();
    assert_eq!(file_size(&image), 2 << 20);
}

#[tokio::test]
async fn unknown_format_behaves_as_none() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("weird.img");
    create_blank_image(dir.path(), &image, 1, "zfs").await.unwrap();
    assert_eq!(file_size(&image), 1 << 20);
}

#[tokio::test]
async fn blank_if_missing_keeps_existing_contents() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("misc.img");
    fs::write(&image, b"keep me").unwrap();
    initialize_blank_image_if_missing(dir.path(), &image, 1)
        .await
        .unwrap();
    assert_eq!(fs::read(&image).unwrap(), b"keep me");
}

// ── Data policies ────────────────────────────────────────────────────────────

#[tokio::test]
async fn use_existing_with_missing_image_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut inst = instance(dir.path());
    inst.data_policy = DataImagePolicy::UseExisting;
    let err = initialize_data_image(dir.path(), &inst).await.unwrap_err();
    assert_eq!(err.kind, StatusKind::Precondition);
}

#[tokio::test]
async fn create_if_missing_creates_new_image() {
    let dir = tempfile::tempdir().unwrap();
    let inst = instance(dir.path());
    initialize_data_image(dir.path(), &inst).await.unwrap();
    assert_eq!(file_size(&inst.new_data_image()), 2 << 20);
    // The canonical source image is untouched.
    assert!(!inst.data_image.exists());
}

#[tokio::test]
async fn use_existing_leaves_image_alone() {
    let dir = tempfile::tempdir().unwrap();
    let mut inst = instance(dir.path());
    inst.data_policy = DataImagePolicy::UseExisting;
    fs::write(&inst.data_image, b"payload").unwrap();
    initialize_data_image(dir.path(), &inst).await.unwrap();
    assert_eq!(fs::read(&inst.data_image).unwrap(), b"payload");
    assert!(!inst.new_data_image().exists());
}

#[tokio::test]
async fn creation_requires_a_size() {
    let dir = tempfile::tempdir().unwrap();
    let mut inst = instance(dir.path());
    inst.blank_data_image_mb = 0;
    let err = initialize_data_image(dir.path(), &inst).await.unwrap_err();
    assert_eq!(err.kind, StatusKind::Precondition);
    assert!(err.message.contains("blank_data_image_mb"));
}

// ── Resize ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn resize_refuses_downsizing_and_leaves_file_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("userdata.img");
    truncate_file(&image, 8 << 20).unwrap();

    let err = resize_image(dir.path(), &image, 4, "none").await.unwrap_err();
    assert_eq!(err.kind, StatusKind::Precondition);
    assert!(err.message.contains("won't downsize"));
    assert_eq!(file_size(&image), 8 << 20);
}

#[tokio::test]
async fn resize_to_same_size_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("userdata.img");
    truncate_file(&image, 4 << 20).unwrap();
    resize_image(dir.path(), &image, 4, "none").await.unwrap();
    assert_eq!(file_size(&image), 4 << 20);
}

#[tokio::test]
async fn resize_grows_unformatted_images_via_truncate() {
    // Format "none" has no fsck/resize tools, exercising the truncate path.
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("userdata.img");
    truncate_file(&image, 2 << 20).unwrap();
    resize_image(dir.path(), &image, 6, "none").await.unwrap();
    assert_eq!(file_size(&image), 6 << 20);
}
