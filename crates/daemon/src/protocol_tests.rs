// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn command_request_round_trip() {
    let request = Request::Command {
        args: vec!["start".to_string(), "--instance_num=1".to_string()],
        env: HashMap::from([("HOME".to_string(), "/home/user".to_string())]),
        working_directory: PathBuf::from("/work"),
        selector_args: vec!["--group_name=phone".to_string()],
        wait_behavior: WaitBehavior::Start,
    };
    let json = serde_json::to_string(&request).unwrap();
    let back: Request = serde_json::from_str(&json).unwrap();
    assert_eq!(back, request);
}

#[test]
fn shutdown_clear_defaults_to_false() {
    let request: Request = serde_json::from_str(r#"{"type":"Shutdown"}"#).unwrap();
    assert_eq!(request, Request::Shutdown { clear: false });
}

#[test]
fn wait_behavior_defaults_to_wait() {
    let json = r#"{"type":"Command","args":["fleet"],"working_directory":"/"}"#;
    let request: Request = serde_json::from_str(json).unwrap();
    let Request::Command { wait_behavior, .. } = request else {
        panic!("wrong variant");
    };
    assert_eq!(wait_behavior, WaitBehavior::Wait);
}

#[test]
fn response_status_conversion() {
    let response = Response::command_error(Status::precondition("no devices"));
    let status = response.status();
    assert_eq!(status.code, StatusCode::FailedPrecondition);
    assert_eq!(status.message, "no devices");
    assert!(!status.is_ok());
    assert!(Response::command_ok().status().is_ok());
}
