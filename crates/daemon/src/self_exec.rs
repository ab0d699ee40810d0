// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exec-based self-replacement.
//!
//! The database is serialized into a memfd, the listening socket and the
//! requesting client's connection are duplicated into inheritable
//! descriptors, and the process image is replaced. The new server picks
//! the descriptors back up from `--INTERNAL_*` flags, reloads the
//! database, and answers the carried-over client.

use std::ffi::CString;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;

use cvd_core::Status;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use tracing::info;

pub const SERVER_FD_FLAG: &str = "--INTERNAL_server_fd";
pub const CARRYOVER_CLIENT_FD_FLAG: &str = "--INTERNAL_carryover_client_fd";
pub const MEMORY_CARRYOVER_FD_FLAG: &str = "--INTERNAL_memory_carryover_fd";

/// Extract `--flag=N` from argv.
pub fn parse_internal_flag(args: &[String], flag: &str) -> Option<RawFd> {
    args.iter()
        .find_map(|arg| arg.strip_prefix(&format!("{flag}=")))
        .and_then(|raw| raw.parse::<RawFd>().ok())
}

/// Serialize the database into an in-memory file, rewound to the start.
pub fn database_to_memfd(db_json: &serde_json::Value) -> Result<OwnedFd, Status> {
    let name = CString::new("cvd_server_state")
        .map_err(|e| Status::invariant(format!("memfd name: {e}")))?;
    let memfd = memfd_create(&name, MemFdCreateFlag::empty())
        .map_err(|e| Status::filesystem(format!("memfd_create: {e}")))?;
    let dup = memfd
        .try_clone()
        .map_err(|e| Status::filesystem(format!("dup memfd: {e}")))?;
    let mut file = File::from(dup);
    let rendered = serde_json::to_vec(db_json)
        .map_err(|e| Status::invariant(format!("database serialization failed: {e}")))?;
    file.write_all(&rendered)
        .map_err(|e| Status::filesystem(format!("write memfd: {e}")))?;
    file.seek(SeekFrom::Start(0))
        .map_err(|e| Status::filesystem(format!("rewind memfd: {e}")))?;
    Ok(memfd)
}

/// Duplicate `fd` into a descriptor that survives exec.
fn dup_inheritable(fd: RawFd) -> Result<OwnedFd, Status> {
    // SAFETY: the caller guarantees `fd` is open for the duration of this
    // call; the clone produces an independently owned descriptor.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let owned = borrowed
        .try_clone_to_owned()
        .map_err(|e| Status::filesystem(format!("dup fd {fd}: {e}")))?;
    // std dups with close-on-exec set; this descriptor must be inherited.
    fcntl(owned.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::empty()))
        .map_err(|e| Status::filesystem(format!("clear FD_CLOEXEC on {fd}: {e}")))?;
    Ok(owned)
}

/// Replace the process image with `new_exe` (or the current executable),
/// handing over the listener, the requesting client, and the database.
///
/// Returns only on failure; the caller still owns the error report to the
/// carryover client.
pub fn exec_handoff(
    listener_fd: RawFd,
    client_fd: RawFd,
    db_json: &serde_json::Value,
    new_exe: Option<PathBuf>,
) -> Result<std::convert::Infallible, Status> {
    let exe = match new_exe {
        Some(exe) => exe,
        None => std::env::current_exe()
            .map_err(|e| Status::filesystem(format!("current_exe: {e}")))?,
    };

    let memfd = database_to_memfd(db_json)?;
    fcntl(memfd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::empty()))
        .map_err(|e| Status::filesystem(format!("clear FD_CLOEXEC on memfd: {e}")))?;
    let server_dup = dup_inheritable(listener_fd)?;
    let client_dup = dup_inheritable(client_fd)?;

    let argv_strings = [
        "cvdd".to_string(),
        format!("{SERVER_FD_FLAG}={}", server_dup.as_raw_fd()),
        format!("{CARRYOVER_CLIENT_FD_FLAG}={}", client_dup.as_raw_fd()),
        format!("{MEMORY_CARRYOVER_FD_FLAG}={}", memfd.as_raw_fd()),
    ];
    let mut argv = Vec::new();
    for arg in &argv_strings {
        argv.push(
            CString::new(arg.as_str())
                .map_err(|e| Status::invariant(format!("argv: {e}")))?,
        );
    }
    let exe_c = CString::new(exe.display().to_string())
        .map_err(|e| Status::invariant(format!("exe path: {e}")))?;

    info!(exe = %exe.display(), "replacing server executable");
    // On success this never returns and the duplicated descriptors are the
    // new process's problem.
    nix::unistd::execv(&exe_c, &argv)
        .map_err(|e| Status::subprocess(format!("execv {}: {e}", exe.display())))
}

/// Descriptors recovered from `--INTERNAL_*` flags at startup.
pub struct CarryoverFds {
    pub server: Option<OwnedFd>,
    pub client: Option<OwnedFd>,
    pub memory: Option<OwnedFd>,
}

/// Adopt the descriptors named by the handoff flags.
pub fn parse_carryover_fds(args: &[String]) -> CarryoverFds {
    let adopt = |flag: &str| {
        parse_internal_flag(args, flag).map(|fd| {
            // SAFETY: the previous server process arranged for this exact
            // descriptor number to be open and inherited; we adopt it.
            unsafe { OwnedFd::from_raw_fd(fd) }
        })
    };
    CarryoverFds {
        server: adopt(SERVER_FD_FLAG),
        client: adopt(CARRYOVER_CLIENT_FD_FLAG),
        memory: adopt(MEMORY_CARRYOVER_FD_FLAG),
    }
}

/// Load the database JSON out of the carryover memfd.
pub fn read_carryover_database(memory: OwnedFd) -> Result<serde_json::Value, Status> {
    let mut file = File::from(memory);
    file.seek(SeekFrom::Start(0))
        .map_err(|e| Status::filesystem(format!("rewind carryover fd: {e}")))?;
    serde_json::from_reader(&mut file)
        .map_err(|e| Status::invariant(format!("carryover database is corrupt: {e}")))
}

#[cfg(test)]
#[path = "self_exec_tests.rs"]
mod tests;
