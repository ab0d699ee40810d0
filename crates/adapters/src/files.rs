// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File utilities shared by the image builders.

use std::fs;
use std::path::Path;

use cvd_core::Status;
use tracing::debug;

/// Whether `path` exists with a non-zero size.
pub fn file_has_content(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

/// Apparent size in bytes, or 0 when missing.
pub fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Bytes actually allocated on disk (sparse-aware).
pub fn disk_usage(path: &Path) -> u64 {
    use std::os::unix::fs::MetadataExt;
    fs::metadata(path).map(|m| m.blocks() * 512).unwrap_or(0)
}

/// Free bytes available to unprivileged writers on the filesystem at `path`.
pub fn available_space(path: &Path) -> Result<u64, Status> {
    let stat = nix::sys::statvfs::statvfs(path)
        .map_err(|e| Status::filesystem(format!("statvfs {}: {e}", path.display())))?;
    Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

pub fn ensure_directory_exists(path: &Path) -> Result<(), Status> {
    fs::create_dir_all(path)
        .map_err(|e| Status::filesystem(format!("mkdir -p {}: {e}", path.display())))
}

/// Grow or shrink `path` to exactly `len` bytes.
pub fn truncate_file(path: &Path, len: u64) -> Result<(), Status> {
    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| Status::filesystem(format!("open {}: {e}", path.display())))?;
    file.set_len(len)
        .map_err(|e| Status::filesystem(format!("truncate {}: {e}", path.display())))
}

fn same_contents(a: &Path, b: &Path) -> Result<bool, Status> {
    if file_size(a) != file_size(b) {
        return Ok(false);
    }
    let left = fs::read(a)?;
    let right = fs::read(b)?;
    Ok(left == right)
}

/// Content-equivalence install of a freshly built artifact.
///
/// Downstream rebuild decisions key off mtimes, so an unchanged output must
/// keep its timestamp: when `tmp` byte-equals `target` the temp file is
/// deleted and the existing file (and its mtime) survives. Otherwise `tmp`
/// is renamed over `target`. Returns whether the target was replaced.
pub fn install_if_changed(tmp: &Path, target: &Path) -> Result<bool, Status> {
    if target.exists() && same_contents(tmp, target)? {
        fs::remove_file(tmp)
            .map_err(|e| Status::filesystem(format!("remove {}: {e}", tmp.display())))?;
        debug!(target = %target.display(), "unchanged, keeping existing file");
        return Ok(false);
    }
    fs::rename(tmp, target).map_err(|e| {
        Status::filesystem(format!(
            "rename {} -> {}: {e}",
            tmp.display(),
            target.display()
        ))
    })?;
    debug!(target = %target.display(), "updated");
    Ok(true)
}

/// Remove a temp artifact on the failure path, leaving the canonical output
/// untouched.
pub fn discard_tmp(tmp: &Path) {
    if tmp.exists() {
        let _ = fs::remove_file(tmp);
    }
}

/// Copy preserving nothing but bytes.
pub fn copy_file(from: &Path, to: &Path) -> Result<(), Status> {
    fs::copy(from, to).map_err(|e| {
        Status::filesystem(format!("cp {} {}: {e}", from.display(), to.display()))
    })?;
    Ok(())
}

/// Modification time, or the epoch when missing.
pub fn mtime(path: &Path) -> std::time::SystemTime {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
}

#[cfg(test)]
#[path = "files_tests.rs"]
mod tests;
