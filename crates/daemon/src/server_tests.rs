// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

use std::collections::HashMap;
use std::path::PathBuf;

use cvd_core::{Instance, InstanceGroup, InstanceState, StatusCode};
use cvd_storage::{InstanceDatabase, InstanceLockManager};

use crate::protocol::WaitBehavior;
use crate::protocol_wire as wire;

fn test_shared(dir: &Path) -> Arc<ServerShared> {
    let config = Config {
        runtime_dir: dir.to_path_buf(),
        socket_path: dir.join("cvd_server.sock"),
        lock_path: dir.join("cvd_server.pid"),
        version_path: dir.join("cvd_server.version"),
        log_path: dir.join("cvd_server.log"),
        db_snapshot_path: dir.join("instance_db.json"),
        instance_locks_dir: dir.join("instance_locks"),
    };
    let manager = Arc::new(InstanceManager::new(
        InstanceDatabase::new(),
        InstanceLockManager::new(dir.join("instance_locks")),
        dir.join("instance_db.json"),
    ));
    Arc::new(ServerShared::new(config, manager, -1))
}

fn running_group(home: &Path, id: u32) -> InstanceGroup {
    let mut instance = Instance::with_default_name(id);
    instance.state = InstanceState::Running;
    InstanceGroup {
        name: format!("cvd-{id}"),
        home_dir: home.to_path_buf(),
        host_artifacts_path: home.join("host"),
        product_out_path: home.join("product"),
        start_time_sec: 0,
        instances: vec![instance],
    }
}

fn command(args: &[&str]) -> Request {
    Request::Command {
        args: args.iter().map(|s| s.to_string()).collect(),
        env: HashMap::new(),
        working_directory: PathBuf::from("/"),
        selector_args: Vec::new(),
        wait_behavior: WaitBehavior::Wait,
    }
}

async fn roundtrip(shared: Arc<ServerShared>, request: Request) -> Response {
    let (client, server_side) = UnixStream::pair().unwrap();
    let task = tokio::spawn(handle_connection(shared, server_side));
    wire::send_request(&client, &request, &[]).await.unwrap();
    let response = wire::read_response(&client).await.unwrap();
    drop(client);
    let _ = task.await;
    response
}

// ── Env normalization ────────────────────────────────────────────────────────

#[test]
fn tilde_paths_are_rejected() {
    let mut env = HashMap::from([("HOME".to_string(), "~/cuttlefish".to_string())]);
    let err = normalize_path_envs(&mut env, Path::new("/work")).unwrap_err();
    assert_eq!(err.kind, cvd_core::StatusKind::Precondition);
    assert!(err.message.contains("HOME"));
}

#[test]
fn relative_paths_absolutize_against_working_directory() {
    let mut env = HashMap::from([
        ("ANDROID_HOST_OUT".to_string(), "out/host".to_string()),
        ("HOME".to_string(), "/already/absolute".to_string()),
        ("UNRELATED".to_string(), "relative/stays".to_string()),
    ]);
    normalize_path_envs(&mut env, Path::new("/work")).unwrap();
    assert_eq!(env["ANDROID_HOST_OUT"], "/work/out/host");
    assert_eq!(env["HOME"], "/already/absolute");
    assert_eq!(env["UNRELATED"], "relative/stays");
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fleet_round_trip_over_a_socket_pair() {
    let dir = tempfile::tempdir().unwrap();
    let shared = test_shared(dir.path());
    let response = roundtrip(shared, command(&["fleet"])).await;
    assert!(response.status().is_ok());
}

#[tokio::test]
async fn unknown_verb_is_internal() {
    let dir = tempfile::tempdir().unwrap();
    let shared = test_shared(dir.path());
    let response = roundtrip(shared, command(&["teleport"])).await;
    assert_eq!(response.status().code, StatusCode::Internal);
    assert!(response.status().message.contains("exactly one handler"));
}

#[tokio::test]
async fn shutdown_with_tracked_devices_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let shared = test_shared(dir.path());
    shared
        .instance_manager
        .add_group(running_group(&dir.path().join("h1"), 1))
        .unwrap();

    let response = roundtrip(Arc::clone(&shared), Request::Shutdown { clear: false }).await;
    assert_eq!(response.status().code, StatusCode::FailedPrecondition);
    assert!(response.status().message.contains("devices are being tracked"));
    // The daemon keeps running.
    assert!(shared.is_running());
    assert!(shared.instance_manager.has_groups());
}

#[tokio::test]
async fn shutdown_verb_with_tracked_devices_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let shared = test_shared(dir.path());
    shared
        .instance_manager
        .add_group(running_group(&dir.path().join("h1"), 1))
        .unwrap();

    let response = roundtrip(Arc::clone(&shared), command(&["shutdown"])).await;
    assert_eq!(response.status().code, StatusCode::FailedPrecondition);
    assert!(response.status().message.contains("devices are being tracked"));
}

#[tokio::test]
async fn shutdown_with_clear_stops_the_server() {
    let dir = tempfile::tempdir().unwrap();
    let shared = test_shared(dir.path());
    // A group whose config file does not exist: no stopper is spawned.
    shared
        .instance_manager
        .add_group(running_group(&dir.path().join("h1"), 1))
        .unwrap();

    let response = roundtrip(Arc::clone(&shared), Request::Shutdown { clear: true }).await;
    assert!(response.status().is_ok());
    assert!(!shared.instance_manager.has_groups());
    assert!(!shared.is_running());
}

#[tokio::test]
async fn shutdown_without_devices_stops_the_server() {
    let dir = tempfile::tempdir().unwrap();
    let shared = test_shared(dir.path());
    let response = roundtrip(Arc::clone(&shared), Request::Shutdown { clear: false }).await;
    assert!(response.status().is_ok());
    assert!(!shared.is_running());
}

#[tokio::test]
async fn version_verb_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let shared = test_shared(dir.path());
    let response = roundtrip(shared, command(&["version"])).await;
    assert!(response.status().is_ok());
}

#[tokio::test]
async fn help_verb_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let shared = test_shared(dir.path());
    let response = roundtrip(shared, command(&["help"])).await;
    assert!(response.status().is_ok());
}

#[tokio::test]
async fn fetch_help_is_intercepted_locally() {
    // `fetch --help` never reaches fetch_cvd (which would need
    // ANDROID_HOST_OUT); the server answers from the handler's own text.
    let dir = tempfile::tempdir().unwrap();
    let shared = test_shared(dir.path());
    let response = roundtrip(shared, command(&["fetch", "--help"])).await;
    assert!(response.status().is_ok());
}

#[tokio::test]
async fn help_with_a_verb_defers_to_that_verb() {
    let dir = tempfile::tempdir().unwrap();
    let shared = test_shared(dir.path());
    let response = roundtrip(shared, command(&["help", "restart-server"])).await;
    assert!(response.status().is_ok());
}

#[tokio::test]
async fn stop_with_no_groups_is_failed_precondition() {
    let dir = tempfile::tempdir().unwrap();
    let shared = test_shared(dir.path());
    let response = roundtrip(shared, command(&["stop"])).await;
    assert_eq!(response.status().code, StatusCode::FailedPrecondition);
}

#[tokio::test]
async fn requests_after_stop_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let shared = test_shared(dir.path());
    shared.stop();

    let response = roundtrip(shared, command(&["fleet"])).await;
    assert_eq!(response.status().code, StatusCode::Internal);
    assert_eq!(response.status().message, "Interrupted");
}

#[tokio::test]
async fn two_requests_on_one_connection_are_served_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let shared = test_shared(dir.path());
    let (client, server_side) = UnixStream::pair().unwrap();
    let task = tokio::spawn(handle_connection(shared, server_side));

    wire::send_request(&client, &command(&["version"]), &[]).await.unwrap();
    let first = wire::read_response(&client).await.unwrap();
    assert!(first.status().is_ok());

    wire::send_request(&client, &command(&["fleet"]), &[]).await.unwrap();
    let second = wire::read_response(&client).await.unwrap();
    assert!(second.status().is_ok());

    drop(client);
    let _ = task.await;
}
