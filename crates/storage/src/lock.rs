// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Instance lock files.
//!
//! Each instance id maps to a sentinel file under a per-user runtime
//! directory. Reserving an id means holding the OS advisory lock on that
//! file; the file's contents carry a state token that only the lock holder
//! may read or write.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use cvd_core::{InstanceId, Status};
use fs2::FileExt;
use tracing::debug;

/// State token stored inside a lock file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InUseState {
    /// Free for any candidate group.
    #[default]
    NotInUse,
    /// Reserved by a candidate group that has not launched yet.
    Acquired,
    /// Backing an active device.
    InUse,
}

impl InUseState {
    fn token(self) -> &'static str {
        match self {
            InUseState::NotInUse => "not_in_use",
            InUseState::Acquired => "acquired",
            InUseState::InUse => "in_use",
        }
    }

    fn from_token(token: &str) -> Self {
        match token.trim() {
            "acquired" => InUseState::Acquired,
            "in_use" => InUseState::InUse,
            // Empty or unknown tokens mean the id was never claimed.
            _ => InUseState::NotInUse,
        }
    }
}

/// A held advisory lock on one instance id.
///
/// The lock is released when this value is dropped (the file descriptor
/// closes, releasing the OS lock).
#[derive(Debug)]
pub struct InstanceLockFile {
    file: File,
    id: InstanceId,
    path: PathBuf,
}

impl InstanceLockFile {
    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state token. Only the holder may call this.
    pub fn status(&mut self) -> Result<InUseState, Status> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| Status::filesystem(format!("seek {}: {e}", self.path.display())))?;
        let mut token = String::new();
        self.file
            .read_to_string(&mut token)
            .map_err(|e| Status::filesystem(format!("read {}: {e}", self.path.display())))?;
        Ok(InUseState::from_token(&token))
    }

    /// Overwrite the state token while holding the lock.
    pub fn set_status(&mut self, state: InUseState) -> Result<(), Status> {
        self.file
            .set_len(0)
            .map_err(|e| Status::filesystem(format!("truncate {}: {e}", self.path.display())))?;
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| Status::filesystem(format!("seek {}: {e}", self.path.display())))?;
        self.file
            .write_all(state.token().as_bytes())
            .map_err(|e| Status::filesystem(format!("write {}: {e}", self.path.display())))?;
        self.file
            .sync_data()
            .map_err(|e| Status::filesystem(format!("fsync {}: {e}", self.path.display())))?;
        Ok(())
    }
}

/// Allocates instance ids through numbered advisory locks.
pub struct InstanceLockManager {
    lock_dir: PathBuf,
}

impl InstanceLockManager {
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
        }
    }

    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    fn lock_path(&self, id: InstanceId) -> PathBuf {
        self.lock_dir.join(format!("local-instance-{id}.lock"))
    }

    /// Non-blocking acquire of the lock for `id`.
    ///
    /// Returns `Ok(None)` when another process holds the lock.
    pub fn try_acquire_lock(&self, id: InstanceId) -> Result<Option<InstanceLockFile>, Status> {
        fs::create_dir_all(&self.lock_dir)
            .map_err(|e| Status::filesystem(format!("mkdir {}: {e}", self.lock_dir.display())))?;
        let path = self.lock_path(id);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Status::filesystem(format!("open {}: {e}", path.display())))?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(id, path = %path.display(), "acquired instance lock");
                Ok(Some(InstanceLockFile { file, id, path }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(Status::filesystem(format!(
                "flock {}: {e}",
                path.display()
            ))),
        }
    }

    /// Scan ids lowest-first for one that is lockable and not in use.
    ///
    /// Ids whose lock is held elsewhere, or whose token says they back a
    /// device, are skipped. Terminates at the first never-claimed id, since
    /// a fresh lock file always reads as `not_in_use`.
    pub fn try_acquire_unused_lock(&self) -> Result<InstanceLockFile, Status> {
        for id in 1.. {
            let Some(mut lock) = self.try_acquire_lock(id)? else {
                continue;
            };
            if lock.status()? == InUseState::NotInUse {
                return Ok(lock);
            }
            // Held token says in-use or reserved; release and keep scanning.
        }
        Err(Status::invariant("instance id space exhausted"))
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
