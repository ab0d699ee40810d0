// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess execution helpers.
//!
//! `HostCommand` is a thin argv builder over `tokio::process::Command` that
//! classifies terminations into [`ExitOutcome`]. `SubprocessWaiter` is the
//! shared handle a request handler and its `interrupt()` path both hold: the
//! waiter records the child's pid for the duration of the wait so an
//! interrupt can deliver a signal to it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cvd_core::Status;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// How a subprocess terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Normal exit with the given code.
    Exited(i32),
    /// Terminated by a signal.
    Killed(i32),
    /// Terminated by a signal and dumped core.
    Dumped(i32),
}

impl ExitOutcome {
    pub fn success(self) -> bool {
        matches!(self, ExitOutcome::Exited(0))
    }

    /// Human-readable failure description for `tool`.
    pub fn describe(self, tool: &str) -> String {
        match self {
            ExitOutcome::Exited(code) => format!("{tool} exited with code {code}"),
            ExitOutcome::Killed(sig) => format!("{tool} was killed by signal {sig}"),
            ExitOutcome::Dumped(sig) => format!("{tool} dumped core on signal {sig}"),
        }
    }

    fn from_status(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;
        if let Some(code) = status.code() {
            ExitOutcome::Exited(code)
        } else {
            let sig = status.signal().unwrap_or(0);
            if status.core_dumped() {
                ExitOutcome::Dumped(sig)
            } else {
                ExitOutcome::Killed(sig)
            }
        }
    }
}

/// Argv builder for host-side tools.
pub struct HostCommand {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    cwd: Option<PathBuf>,
    stdin: Option<Stdio>,
    stdout: Option<Stdio>,
    stderr: Option<Stdio>,
}

impl HostCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            cwd: None,
            stdin: None,
            stdout: None,
            stderr: None,
        }
    }

    /// A tool under the host artifacts tree (`<artifacts>/bin/<name>`).
    pub fn host_binary(artifacts_dir: &Path, name: &str) -> Self {
        Self::new(artifacts_dir.join("bin").join(name))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Basename used in error messages.
    pub fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdin(mut self, stdin: impl Into<Stdio>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn stdout(mut self, stdout: impl Into<Stdio>) -> Self {
        self.stdout = Some(stdout.into());
        self
    }

    pub fn stderr(mut self, stderr: impl Into<Stdio>) -> Self {
        self.stderr = Some(stderr.into());
        self
    }

    /// Point all three streams at /dev/null.
    pub fn null_stdio(self) -> Self {
        self.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
    }

    fn build(self) -> (Command, String) {
        let tool = self.tool_name();
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        if let Some(stdin) = self.stdin {
            cmd.stdin(stdin);
        }
        if let Some(stdout) = self.stdout {
            cmd.stdout(stdout);
        }
        if let Some(stderr) = self.stderr {
            cmd.stderr(stderr);
        }
        (cmd, tool)
    }

    /// Spawn and wait, classifying the termination.
    pub async fn run(self) -> Result<ExitOutcome, Status> {
        let (mut cmd, tool) = self.build();
        debug!(tool = %tool, "spawning subprocess");
        let status = cmd
            .status()
            .await
            .map_err(|e| Status::subprocess(format!("failed to spawn {tool}: {e}")))?;
        Ok(ExitOutcome::from_status(status))
    }

    /// Spawn, wait, and fail unless the tool exited 0.
    pub async fn run_ok(self) -> Result<(), Status> {
        let tool = self.tool_name();
        let outcome = self.run().await?;
        if outcome.success() {
            Ok(())
        } else {
            Err(Status::subprocess(outcome.describe(&tool)))
        }
    }

    /// Spawn, wait, and capture stdout as a string (stderr inherited).
    pub async fn run_and_capture_stdout(self) -> Result<String, Status> {
        let (mut cmd, tool) = self.build();
        cmd.stdout(Stdio::piped());
        let output = cmd
            .output()
            .await
            .map_err(|e| Status::subprocess(format!("failed to spawn {tool}: {e}")))?;
        let outcome = ExitOutcome::from_status(output.status);
        if !outcome.success() {
            return Err(Status::subprocess(outcome.describe(&tool)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Spawn without waiting. The child is placed in its own process group
    /// so it outlives the daemon.
    pub fn spawn_detached(self) -> Result<u32, Status> {
        let (mut cmd, tool) = self.build();
        cmd.process_group(0);
        let child = cmd
            .spawn()
            .map_err(|e| Status::subprocess(format!("failed to spawn {tool}: {e}")))?;
        child
            .id()
            .ok_or_else(|| Status::subprocess(format!("{tool} exited before detaching")))
    }
}

/// Shared handle for interruptible subprocess waits.
///
/// The handler-side `run` records the child's pid while blocked on it; the
/// interrupt side delivers SIGTERM to whatever pid is current and marks the
/// waiter so subsequent runs refuse to start.
#[derive(Clone, Default)]
pub struct SubprocessWaiter {
    current: Arc<Mutex<Option<i32>>>,
    interrupted: Arc<AtomicBool>,
}

impl SubprocessWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Run `command` to completion, subject to interruption.
    ///
    /// The waiter's lock is held only across the spawn; the wait itself
    /// happens with the lock released so `interrupt()` can take it.
    pub async fn run(&self, command: HostCommand) -> Result<ExitOutcome, Status> {
        let tool = command.tool_name();
        let mut child = {
            let mut current = self.current.lock();
            if self.is_interrupted() {
                return Err(Status::interrupted());
            }
            let (mut cmd, _) = command.build();
            let child: Child = cmd
                .spawn()
                .map_err(|e| Status::subprocess(format!("failed to spawn {tool}: {e}")))?;
            *current = child.id().map(|pid| pid as i32);
            child
        };

        let status = child.wait().await;
        *self.current.lock() = None;

        if self.is_interrupted() {
            return Err(Status::interrupted());
        }
        let status =
            status.map_err(|e| Status::subprocess(format!("failed to wait for {tool}: {e}")))?;
        Ok(ExitOutcome::from_status(status))
    }

    /// Run `command` and fail unless it exited 0.
    pub async fn run_ok(&self, command: HostCommand) -> Result<(), Status> {
        let tool = command.tool_name();
        let outcome = self.run(command).await?;
        if outcome.success() {
            Ok(())
        } else {
            Err(Status::subprocess(outcome.describe(&tool)))
        }
    }

    /// Terminate the in-flight subprocess (if any) and poison the waiter.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        let current = self.current.lock();
        if let Some(pid) = *current {
            debug!(pid, "interrupting subprocess");
            if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                warn!(pid, error = %e, "failed to signal subprocess");
            }
        }
    }
}

#[cfg(test)]
#[path = "subprocess_tests.rs"]
mod tests;
