// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    precondition = { StatusKind::Precondition, StatusCode::FailedPrecondition },
    not_found = { StatusKind::NotFound, StatusCode::FailedPrecondition },
    ambiguous = { StatusKind::Ambiguous, StatusCode::FailedPrecondition },
    subprocess = { StatusKind::Subprocess, StatusCode::Internal },
    interrupted = { StatusKind::Interrupted, StatusCode::Internal },
    filesystem = { StatusKind::Filesystem, StatusCode::Internal },
    invariant = { StatusKind::Invariant, StatusCode::Internal },
)]
fn kind_maps_to_wire_code(kind: StatusKind, code: StatusCode) {
    assert_eq!(kind.code(), code);
}

#[test]
fn interrupted_has_fixed_message() {
    let status = Status::interrupted();
    assert!(status.is_interrupted());
    assert_eq!(status.message, "Interrupted");
    assert_eq!(status.code(), StatusCode::Internal);
}

#[test]
fn io_error_converts_to_filesystem() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let status = Status::from(io);
    assert_eq!(status.kind, StatusKind::Filesystem);
    assert!(status.message.contains("denied"));
}

#[test]
fn round_trips_through_json() {
    let status = Status::precondition("no host artifacts");
    let json = serde_json::to_string(&status).unwrap();
    let back: Status = serde_json::from_str(&json).unwrap();
    assert_eq!(back, status);
}
