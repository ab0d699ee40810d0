// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

use std::time::Duration;

#[test]
fn file_has_content_checks_size() {
    let dir = tempfile::tempdir().unwrap();
    let empty = dir.path().join("empty");
    let full = dir.path().join("full");
    fs::write(&empty, b"").unwrap();
    fs::write(&full, b"data").unwrap();
    assert!(!file_has_content(&empty));
    assert!(file_has_content(&full));
    assert!(!file_has_content(&dir.path().join("missing")));
}

#[test]
fn install_replaces_when_different() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.img");
    let tmp = dir.path().join("out.img.tmp");
    fs::write(&target, b"old").unwrap();
    fs::write(&tmp, b"new").unwrap();

    assert!(install_if_changed(&tmp, &target).unwrap());
    assert_eq!(fs::read(&target).unwrap(), b"new");
    assert!(!tmp.exists());
}

#[test]
fn install_keeps_mtime_when_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.img");
    let tmp = dir.path().join("out.img.tmp");
    fs::write(&target, b"same").unwrap();
    let before = mtime(&target);

    std::thread::sleep(Duration::from_millis(20));
    fs::write(&tmp, b"same").unwrap();

    assert!(!install_if_changed(&tmp, &target).unwrap());
    assert_eq!(mtime(&target), before);
    assert!(!tmp.exists());
}

#[test]
fn install_creates_missing_target() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.img");
    let tmp = dir.path().join("out.img.tmp");
    fs::write(&tmp, b"fresh").unwrap();

    assert!(install_if_changed(&tmp, &target).unwrap());
    assert_eq!(fs::read(&target).unwrap(), b"fresh");
}

#[test]
fn truncate_grows_and_shrinks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blank.img");
    truncate_file(&path, 4096).unwrap();
    assert_eq!(file_size(&path), 4096);
    truncate_file(&path, 1024).unwrap();
    assert_eq!(file_size(&path), 1024);
}

#[test]
fn available_space_is_nonzero_for_tempdir() {
    let dir = tempfile::tempdir().unwrap();
    assert!(available_space(dir.path()).unwrap() > 0);
}

#[test]
fn sparse_usage_less_than_apparent_size() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sparse.img");
    truncate_file(&path, 8 << 20).unwrap();
    assert_eq!(file_size(&path), 8 << 20);
    assert!(disk_usage(&path) < 8 << 20);
}
