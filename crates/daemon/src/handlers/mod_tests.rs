// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::io::{Read, Seek};
use yare::parameterized;

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

// ── Invocation parsing ───────────────────────────────────────────────────────

#[parameterized(
    plain_verb = { &["start", "--daemon"], "start", &["--daemon"] },
    cvd_prefix = { &["cvd", "stop"], "stop", &[] },
    cvd_path_prefix = { &["/usr/bin/cvd", "fleet"], "fleet", &[] },
    help_flag = { &["cvd", "--help"], "help", &[] },
    short_help = { &["-h"], "help", &[] },
    legacy_help = { &["-help"], "help", &[] },
)]
fn invocation_routing(args: &[&str], verb: &str, rest: &[&str]) {
    let (parsed_verb, parsed_rest) = parse_invocation(&strings(args));
    assert_eq!(parsed_verb, verb);
    assert_eq!(parsed_rest, strings(rest));
}

#[test]
fn empty_invocation_is_help() {
    let (verb, rest) = parse_invocation(&[]);
    assert_eq!(verb, "help");
    assert!(rest.is_empty());
}

#[test]
fn bare_cvd_is_help() {
    let (verb, _) = parse_invocation(&strings(&["cvd"]));
    assert_eq!(verb, "help");
}

#[test]
fn wants_help_detects_flags_anywhere() {
    assert!(wants_help(&strings(&["--default_build=x", "--help"])));
    assert!(!wants_help(&strings(&["--helpful"])));
}

// ── Client stdio ─────────────────────────────────────────────────────────────

#[test]
fn stdio_fds_are_assigned_in_order() {
    let make_fd = || {
        let file = tempfile::tempfile().unwrap();
        std::os::fd::OwnedFd::from(file)
    };
    let stdio = ClientStdio::from_fds(vec![make_fd(), make_fd()]);
    assert!(stdio.stdin.is_some());
    assert!(stdio.stdout.is_some());
    assert!(stdio.stderr.is_none());
    assert!(stdio.extra.is_none());
}

#[test]
fn write_out_reaches_the_descriptor() {
    let file = tempfile::tempfile().unwrap();
    let stdio = ClientStdio {
        stdin: None,
        stdout: Some(std::os::fd::OwnedFd::from(file.try_clone().unwrap())),
        stderr: None,
        extra: None,
    };
    stdio.write_out("fleet output\n");

    let mut file = file;
    file.rewind().unwrap();
    let mut contents = String::new();
    file.read_to_string(&mut contents).unwrap();
    assert_eq!(contents, "fleet output\n");
}

#[test]
fn missing_descriptors_become_null_stdio() {
    let stdio = ClientStdio::default();
    // No descriptors: children read/write /dev/null rather than failing.
    let (_stdin, _stdout, _stderr) = stdio.child_stdio();
    assert!(!stdio.stdin_is_tty());
}

// ── Subprocess construction ──────────────────────────────────────────────────

#[test]
fn group_command_injects_config_env_var() {
    let request = RequestContext {
        verb: "status".to_string(),
        args: strings(&["--print"]),
        selector: Default::default(),
        env: std::collections::HashMap::from([("PATH".to_string(), "/bin".to_string())]),
        working_directory: PathBuf::from("/work"),
        wait_behavior: WaitBehavior::Wait,
        stdio: ClientStdio::default(),
        client_fd: -1,
    };
    let cmd = group_command(
        Path::new("/host"),
        "cvd_internal_status",
        &request,
        Some(Path::new("/home/g/cuttlefish_config.json")),
    );
    assert_eq!(cmd.program(), Path::new("/host/bin/cvd_internal_status"));
}
