// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn outcome_classification() {
    assert!(ExitOutcome::Exited(0).success());
    assert!(!ExitOutcome::Exited(1).success());
    assert!(!ExitOutcome::Killed(9).success());
    assert_eq!(
        ExitOutcome::Exited(3).describe("avbtool"),
        "avbtool exited with code 3"
    );
    assert_eq!(
        ExitOutcome::Killed(15).describe("lz4"),
        "lz4 was killed by signal 15"
    );
}

#[test]
fn host_binary_path_shape() {
    let cmd = HostCommand::host_binary(Path::new("/opt/host"), "stop_cvd");
    assert_eq!(cmd.program(), Path::new("/opt/host/bin/stop_cvd"));
    assert_eq!(cmd.tool_name(), "stop_cvd");
}

#[tokio::test]
async fn run_reports_exit_code() {
    let outcome = HostCommand::new("/bin/sh")
        .arg("-c")
        .arg("exit 7")
        .null_stdio()
        .run()
        .await
        .unwrap();
    assert_eq!(outcome, ExitOutcome::Exited(7));
}

#[tokio::test]
async fn run_ok_converts_failure_to_subprocess_status() {
    let err = HostCommand::new("/bin/sh")
        .arg("-c")
        .arg("exit 2")
        .null_stdio()
        .run_ok()
        .await
        .unwrap_err();
    assert_eq!(err.kind, cvd_core::StatusKind::Subprocess);
    assert!(err.message.contains("sh"));
}

#[tokio::test]
async fn capture_stdout() {
    let out = HostCommand::new("/bin/sh")
        .arg("-c")
        .arg("echo hello")
        .run_and_capture_stdout()
        .await
        .unwrap();
    assert_eq!(out.trim(), "hello");
}

#[tokio::test]
async fn spawn_failure_is_subprocess_status() {
    let err = HostCommand::new("/no/such/tool").run().await.unwrap_err();
    assert_eq!(err.kind, cvd_core::StatusKind::Subprocess);
}

#[tokio::test]
async fn waiter_runs_to_completion() {
    let waiter = SubprocessWaiter::new();
    let outcome = waiter
        .run(HostCommand::new("/bin/sh").arg("-c").arg("exit 0").null_stdio())
        .await
        .unwrap();
    assert!(outcome.success());
    assert!(!waiter.is_interrupted());
}

#[tokio::test]
async fn interrupted_waiter_refuses_new_work() {
    let waiter = SubprocessWaiter::new();
    waiter.interrupt();
    let err = waiter
        .run(HostCommand::new("/bin/sh").arg("-c").arg("exit 0"))
        .await
        .unwrap_err();
    assert!(err.is_interrupted());
}

#[tokio::test]
async fn interrupt_terminates_running_child() {
    let waiter = SubprocessWaiter::new();
    let run_waiter = waiter.clone();
    let handle = tokio::spawn(async move {
        run_waiter
            .run(HostCommand::new("/bin/sh").arg("-c").arg("sleep 30").null_stdio())
            .await
    });
    // Give the child a moment to spawn, then interrupt.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    waiter.interrupt();
    let result = handle.await.unwrap();
    assert!(result.unwrap_err().is_interrupted());
}
