// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `cvd`: thin client for the control-plane daemon.
//!
//! Everything after the program name is forwarded to the server verbatim,
//! along with the calling environment, working directory, and this
//! process's stdio descriptors. The server streams subprocess output
//! straight onto those descriptors; the CLI only prints the final status.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod daemon_process;

use std::collections::HashMap;
use std::path::PathBuf;

use cvd_core::{envs, StatusCode};
use cvd_daemon::{Request, WaitBehavior};

use crate::client::{ClientError, DaemonClient};

/// Environment variables forwarded to the server.
const FORWARDED_ENVS: [&str; 7] = [
    envs::HOME,
    envs::ANDROID_HOST_OUT,
    envs::ANDROID_SOONG_HOST_OUT,
    envs::ANDROID_PRODUCT_OUT,
    envs::CUTTLEFISH_INSTANCE,
    envs::CUTTLEFISH_CONFIG_FILE,
    "PATH",
];

/// Selector flags the client hoists out of the argv prefix.
const SELECTOR_FLAGS: [&str; 3] = ["--group_name", "--instance_name", "--home"];

fn forwarded_env() -> HashMap<String, String> {
    FORWARDED_ENVS
        .iter()
        .filter_map(|&key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
        .collect()
}

fn is_selector_flag(arg: &str) -> bool {
    SELECTOR_FLAGS
        .iter()
        .any(|flag| arg == *flag || arg.starts_with(&format!("{flag}=")))
}

/// Split `cvd [selector flags] <verb> [args]` into selector args and the
/// verb's argv.
fn split_selector_args(args: Vec<String>) -> (Vec<String>, Vec<String>) {
    let mut selector = Vec::new();
    let mut iter = args.into_iter().peekable();
    while let Some(arg) = iter.peek() {
        if !is_selector_flag(arg) {
            break;
        }
        let flag = iter.next().unwrap_or_default();
        let split_form = !flag.contains('=');
        selector.push(flag);
        if split_form {
            if let Some(value) = iter.next() {
                selector.push(value);
            }
        }
    }
    (selector, iter.collect())
}

fn command_request(args: Vec<String>, selector_args: Vec<String>) -> anyhow::Result<Request> {
    let working_directory =
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    // launch_cvd's own --daemon flag detaches the launcher; everything else
    // waits for the spawned tool.
    let wait_behavior = if args.iter().any(|a| a == "--daemon") {
        WaitBehavior::Start
    } else {
        WaitBehavior::Wait
    };
    Ok(Request::Command {
        args,
        env: forwarded_env(),
        working_directory,
        selector_args,
        wait_behavior,
    })
}

async fn run() -> anyhow::Result<i32> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    // `--clean` clears the server before the actual verb runs.
    let clean = args.first().map(|a| a == "--clean").unwrap_or(false);
    if clean {
        args.remove(0);
        if let Ok(client) = DaemonClient::connect() {
            let _ = client.send_shutdown(true).await;
        }
    }

    if args.first().map(|a| a == "kill-server").unwrap_or(false) {
        return match DaemonClient::connect() {
            Ok(client) => {
                client.send_shutdown(false).await?;
                Ok(0)
            }
            Err(ClientError::DaemonNotRunning) => {
                eprintln!("cvd server is not running");
                Ok(0)
            }
            Err(e) => Err(e.into()),
        };
    }

    let (selector_args, verb_args) = split_selector_args(args);
    let request = command_request(verb_args, selector_args)?;

    let client = DaemonClient::connect_or_start()?;
    let status = client.send_command(&request).await?;
    if status.code == StatusCode::Ok {
        Ok(0)
    } else {
        if !status.message.is_empty() {
            eprintln!("cvd: {}", status.message);
        }
        Ok(1)
    }
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("cvd: {e}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
