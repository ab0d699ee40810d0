// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command handlers.
//!
//! One handler per user-facing verb family. Handlers are constructed per
//! request (so `interrupt` reaches exactly the in-flight work) and share
//! the server state through `ServerShared`.

mod bugreport;
mod clear;
mod fleet;
mod generic;
mod help;
mod restart;
mod shutdown;
mod start;
mod status;
mod stop;

use std::collections::HashMap;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use cvd_adapters::HostCommand;
use cvd_core::{envs, SelectorOpts, Status};

use crate::protocol::{Response, WaitBehavior};
use crate::server::ServerShared;

pub use clear::clear_all_groups;
pub use help::HELP_FLAGS;

/// The client's stdio descriptors, received over the socket in
/// stdin/stdout/stderr order (plus an optional extra).
#[derive(Debug, Default)]
pub struct ClientStdio {
    pub stdin: Option<OwnedFd>,
    pub stdout: Option<OwnedFd>,
    pub stderr: Option<OwnedFd>,
    pub extra: Option<OwnedFd>,
}

impl ClientStdio {
    pub fn from_fds(fds: Vec<OwnedFd>) -> Self {
        let mut iter = fds.into_iter();
        Self {
            stdin: iter.next(),
            stdout: iter.next(),
            stderr: iter.next(),
            extra: iter.next(),
        }
    }

    fn dup_or_null(fd: &Option<OwnedFd>) -> Stdio {
        match fd {
            Some(fd) => match fd.try_clone() {
                Ok(dup) => Stdio::from(dup),
                Err(_) => Stdio::null(),
            },
            None => Stdio::null(),
        }
    }

    /// Fresh `Stdio` handles for one child process.
    pub fn child_stdio(&self) -> (Stdio, Stdio, Stdio) {
        (
            Self::dup_or_null(&self.stdin),
            Self::dup_or_null(&self.stdout),
            Self::dup_or_null(&self.stderr),
        )
    }

    fn write_fd(fd: &Option<OwnedFd>, text: &str) {
        use std::io::Write;
        let Some(fd) = fd else { return };
        let Ok(dup) = fd.try_clone() else { return };
        let mut file = std::fs::File::from(dup);
        let _ = file.write_all(text.as_bytes());
    }

    /// Best-effort write to the client's stdout.
    pub fn write_out(&self, text: &str) {
        Self::write_fd(&self.stdout, text);
    }

    /// Best-effort write to the client's stderr.
    pub fn write_err(&self, text: &str) {
        Self::write_fd(&self.stderr, text);
    }

    /// Whether the client's stdin is a terminal.
    pub fn stdin_is_tty(&self) -> bool {
        self.stdin
            .as_ref()
            .map(|fd| nix::unistd::isatty(fd.as_raw_fd()).unwrap_or(false))
            .unwrap_or(false)
    }
}

/// Everything a handler sees for one request.
pub struct RequestContext {
    /// The routed verb.
    pub verb: String,
    /// Arguments after the verb, selector flags removed.
    pub args: Vec<String>,
    pub selector: SelectorOpts,
    pub env: HashMap<String, String>,
    pub working_directory: PathBuf,
    pub wait_behavior: WaitBehavior,
    pub stdio: ClientStdio,
    /// Raw descriptor of the client connection; the self-exec path carries
    /// it across the exec so the new server can answer this client.
    pub client_fd: std::os::fd::RawFd,
}

/// A `cvd` verb implementation.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Verbs this handler owns.
    fn cmd_list(&self) -> &'static [&'static str];

    fn can_handle(&self, verb: &str) -> bool {
        self.cmd_list().contains(&verb)
    }

    async fn handle(&self, request: &RequestContext) -> Result<Response, Status>;

    /// Cancel in-flight work (client hang-up or server stop).
    fn interrupt(&self);

    fn summary_help(&self) -> &'static str;

    fn detailed_help(&self, _args: &[String]) -> String {
        self.summary_help().to_string()
    }

    /// Whether `--help` is answered locally instead of forwarded to the
    /// underlying tool.
    fn should_intercept_help(&self) -> bool {
        true
    }
}

/// Construct the handler set for one request.
pub fn make_handlers(shared: &Arc<ServerShared>) -> Vec<Arc<dyn CommandHandler>> {
    let mut handlers: Vec<Arc<dyn CommandHandler>> = vec![
        Arc::new(start::StartHandler::new(shared)),
        Arc::new(stop::StopHandler::new(shared)),
        Arc::new(status::StatusHandler::new(shared)),
        Arc::new(fleet::FleetHandler::new(shared)),
        Arc::new(clear::ClearHandler::new(shared)),
        Arc::new(bugreport::BugreportHandler::new(shared)),
        Arc::new(shutdown::ShutdownHandler::new(shared)),
        Arc::new(restart::RestartHandler::new(shared)),
        Arc::new(help::VersionHandler),
    ];
    handlers.extend(generic::make_generic_handlers(shared));
    // The help handler needs the full verb table.
    handlers.push(Arc::new(help::HelpHandler::new(handlers.clone())));
    handlers
}

/// Strip a leading `cvd` argv[0] and route the verb.
///
/// `--help` spellings in verb position are rewritten to the `help` verb.
pub fn parse_invocation(args: &[String]) -> (String, Vec<String>) {
    let mut rest: &[String] = args;
    if let Some(first) = rest.first() {
        let basename = Path::new(first)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if basename == "cvd" {
            rest = &rest[1..];
        }
    }
    let Some(verb) = rest.first() else {
        return ("help".to_string(), Vec::new());
    };
    let verb = if HELP_FLAGS.contains(&verb.as_str()) {
        "help".to_string()
    } else {
        verb.clone()
    };
    (verb, rest[1..].to_vec())
}

/// Whether the request's own arguments ask for help.
pub fn wants_help(args: &[String]) -> bool {
    args.iter().any(|a| HELP_FLAGS.contains(&a.as_str()))
}

/// Common child construction: host tool, client stdio, request env and
/// working directory, plus the group config env var unless already set.
pub fn group_command(
    host_artifacts: &Path,
    bin_name: &str,
    request: &RequestContext,
    config_path: Option<&Path>,
) -> HostCommand {
    let (stdin, stdout, stderr) = request.stdio.child_stdio();
    let mut cmd = HostCommand::host_binary(host_artifacts, bin_name)
        .args(request.args.iter().cloned())
        .current_dir(request.working_directory.clone())
        .stdin(stdin)
        .stdout(stdout)
        .stderr(stderr);
    for (key, value) in &request.env {
        cmd = cmd.env(key, value);
    }
    if let Some(config_path) = config_path {
        if !request.env.contains_key(envs::CUTTLEFISH_CONFIG_FILE) {
            cmd = cmd.env(
                envs::CUTTLEFISH_CONFIG_FILE,
                config_path.display().to_string(),
            );
        }
    }
    cmd
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
