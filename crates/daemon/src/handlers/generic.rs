// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pass-through verbs.
//!
//! Each verb maps to a binary: per-group utilities resolve under the
//! selected group's host artifacts tree, system utilities under an
//! absolute path, and `fetch` under the server's own artifacts.

use std::sync::Arc;

use async_trait::async_trait;
use cvd_adapters::{HostCommand, SubprocessWaiter};
use cvd_core::Status;

use crate::handlers::{group_command, CommandHandler, RequestContext};
use crate::protocol::{Response, WaitBehavior};
use crate::server::ServerShared;

/// Where a pass-through verb finds its executable.
enum BinSource {
    /// `<group host artifacts>/bin/<name>`, group chosen by selector.
    GroupTool(&'static str),
    /// An absolute system path.
    System(&'static str),
}

pub struct GenericCommandHandler {
    shared: Arc<ServerShared>,
    waiter: SubprocessWaiter,
    verbs: &'static [&'static str],
    source: BinSource,
    summary: &'static str,
    intercept_help: bool,
}

impl GenericCommandHandler {
    fn new(
        shared: &Arc<ServerShared>,
        verbs: &'static [&'static str],
        source: BinSource,
        summary: &'static str,
        intercept_help: bool,
    ) -> Self {
        Self {
            shared: Arc::clone(shared),
            waiter: SubprocessWaiter::new(),
            verbs,
            source,
            summary,
            intercept_help,
        }
    }
}

#[async_trait]
impl CommandHandler for GenericCommandHandler {
    fn cmd_list(&self) -> &'static [&'static str] {
        self.verbs
    }

    async fn handle(&self, request: &RequestContext) -> Result<Response, Status> {
        let cmd = match &self.source {
            BinSource::GroupTool(bin_name) => {
                let group = self
                    .shared
                    .instance_manager
                    .select_group(&request.selector)?;
                group_command(
                    &group.host_artifacts_path,
                    bin_name,
                    request,
                    Some(&group.config_path()),
                )
            }
            BinSource::System(path) => {
                let (stdin, stdout, stderr) = request.stdio.child_stdio();
                let mut cmd = HostCommand::new(*path)
                    .args(request.args.iter().cloned())
                    .current_dir(request.working_directory.clone())
                    .stdin(stdin)
                    .stdout(stdout)
                    .stderr(stderr);
                for (key, value) in &request.env {
                    cmd = cmd.env(key, value);
                }
                cmd
            }
        };

        match request.wait_behavior {
            WaitBehavior::Wait => self.waiter.run_ok(cmd).await?,
            WaitBehavior::Start => {
                cmd.spawn_detached()?;
            }
        }
        Ok(Response::command_ok())
    }

    fn interrupt(&self) {
        self.waiter.interrupt();
    }

    fn summary_help(&self) -> &'static str {
        self.summary
    }

    fn should_intercept_help(&self) -> bool {
        self.intercept_help
    }
}

/// The `fetch` verb: spawn the artifact fetcher with the request argv.
pub struct FetchHandler {
    waiter: SubprocessWaiter,
}

impl FetchHandler {
    pub fn new() -> Self {
        Self {
            waiter: SubprocessWaiter::new(),
        }
    }
}

#[async_trait]
impl CommandHandler for FetchHandler {
    fn cmd_list(&self) -> &'static [&'static str] {
        &["fetch", "fetch_cvd"]
    }

    async fn handle(&self, request: &RequestContext) -> Result<Response, Status> {
        let artifacts = request
            .env
            .get(cvd_core::envs::ANDROID_HOST_OUT)
            .map(std::path::PathBuf::from)
            .ok_or_else(|| {
                Status::precondition("ANDROID_HOST_OUT is required to locate fetch_cvd")
            })?;
        let cmd = group_command(&artifacts, "fetch_cvd", request, None);
        match request.wait_behavior {
            WaitBehavior::Wait => self.waiter.run_ok(cmd).await?,
            WaitBehavior::Start => {
                cmd.spawn_detached()?;
            }
        }
        Ok(Response::command_ok())
    }

    fn interrupt(&self) {
        self.waiter.interrupt();
    }

    fn summary_help(&self) -> &'static str {
        "Fetch Android build artifacts"
    }

    fn detailed_help(&self, _args: &[String]) -> String {
        "Usage: cvd fetch --default_build=<branch>/<target> [--system_build=...] \
         [--directory=<dir>]\n\
         Downloads build artifacts and assembles a host package.\n"
            .to_string()
    }
}

/// All pass-through handlers.
pub fn make_generic_handlers(shared: &Arc<ServerShared>) -> Vec<Arc<dyn CommandHandler>> {
    vec![
        Arc::new(GenericCommandHandler::new(
            shared,
            &["display"],
            BinSource::GroupTool("cvd_internal_display"),
            "Control a device's displays",
            false,
        )),
        Arc::new(GenericCommandHandler::new(
            shared,
            &["env"],
            BinSource::GroupTool("cvd_internal_env"),
            "Query or modify a device's environment service",
            false,
        )),
        Arc::new(GenericCommandHandler::new(
            shared,
            &["mkdir"],
            BinSource::System("/bin/mkdir"),
            "Create directories (recipe helper)",
            true,
        )),
        Arc::new(GenericCommandHandler::new(
            shared,
            &["ln"],
            BinSource::System("/bin/ln"),
            "Create links (recipe helper)",
            true,
        )),
        Arc::new(FetchHandler::new()),
    ]
}
