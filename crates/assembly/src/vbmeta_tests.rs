// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::fs;

#[test]
fn enforce_pads_short_images() {
    let dir = tempfile::tempdir().unwrap();
    let short = dir.path().join("vbmeta.img");
    fs::write(&short, b"vbmeta").unwrap();

    enforce_minimum_vbmeta_size(&[&short]).unwrap();
    assert_eq!(file_size(&short), VBMETA_MAX_SIZE);
}

#[test]
fn enforce_skips_missing_and_keeps_exact() {
    let dir = tempfile::tempdir().unwrap();
    let exact = dir.path().join("vbmeta_system.img");
    fs::write(&exact, vec![0u8; VBMETA_MAX_SIZE as usize]).unwrap();
    let missing = dir.path().join("missing.img");

    enforce_minimum_vbmeta_size(&[&exact, &missing]).unwrap();
    assert_eq!(file_size(&exact), VBMETA_MAX_SIZE);
    assert!(!missing.exists());
}

#[test]
fn enforce_rejects_oversized_images() {
    let dir = tempfile::tempdir().unwrap();
    let big = dir.path().join("vbmeta.img");
    fs::write(&big, vec![0u8; (VBMETA_MAX_SIZE + 1) as usize]).unwrap();

    let err = enforce_minimum_vbmeta_size(&[&big]).unwrap_err();
    assert_eq!(err.kind, cvd_core::StatusKind::Precondition);
}
