// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `clear` verb: stop everything, release every lock, forget every
//! group, and remove the per-group runtime artifacts.

use std::sync::Arc;

use async_trait::async_trait;
use cvd_adapters::{HostCommand, SubprocessWaiter};
use cvd_core::{envs, InstanceGroup, Status};
use tracing::warn;

use crate::handlers::{ClientStdio, CommandHandler, RequestContext};
use crate::protocol::Response;
use crate::server::ServerShared;

pub struct ClearHandler {
    shared: Arc<ServerShared>,
    waiter: SubprocessWaiter,
}

impl ClearHandler {
    pub fn new(shared: &Arc<ServerShared>) -> Self {
        Self {
            shared: Arc::clone(shared),
            waiter: SubprocessWaiter::new(),
        }
    }
}

fn stopper_command(group: &InstanceGroup, stdio: &ClientStdio, with_clear_flag: bool) -> HostCommand {
    let (stdin, stdout, stderr) = stdio.child_stdio();
    let mut cmd = HostCommand::host_binary(&group.host_artifacts_path, "stop_cvd")
        .env(
            envs::CUTTLEFISH_CONFIG_FILE,
            group.config_path().display().to_string(),
        )
        .stdin(stdin)
        .stdout(stdout)
        .stderr(stderr);
    if with_clear_flag {
        cmd = cmd.arg("--clear_instance_dirs");
    }
    cmd
}

/// Stop one group's devices, tolerating older stopper binaries.
async fn issue_stop_command(
    waiter: &SubprocessWaiter,
    group: &InstanceGroup,
    stdio: &ClientStdio,
) {
    if waiter.run_ok(stopper_command(group, stdio, true)).await.is_ok() {
        return;
    }
    // Old stoppers don't parse --clear_instance_dirs; retry without it.
    stdio.write_err(
        "stop_cvd was executed internally, and failed. It might be failing to \
         parse the new --clear_instance_dirs. Will try without the flag.\n",
    );
    if let Err(e) = waiter.run_ok(stopper_command(group, stdio, false)).await {
        stdio.write_err(&format!(
            "Warning: error stopping instances for dir \"{}\": {e}.\n\
             This can happen if instances are already stopped.\n",
            group.home_dir.display()
        ));
    }
}

/// Stop and forget every group. Shared with the shutdown path; callers
/// with an interruptible request pass their own waiter.
pub async fn clear_all_groups(shared: &Arc<ServerShared>, stdio: &ClientStdio) {
    clear_all_groups_with(shared, stdio, &SubprocessWaiter::new()).await;
}

async fn clear_all_groups_with(
    shared: &Arc<ServerShared>,
    stdio: &ClientStdio,
    waiter: &SubprocessWaiter,
) {
    let manager = &shared.instance_manager;
    for group in manager.clear() {
        if group.config_path().exists() {
            issue_stop_command(waiter, &group, stdio).await;
        }
        for instance in &group.instances {
            manager.release_instance_id(instance.id);
        }
        for artifact in [group.runtime_sentinel_path(), group.config_path()] {
            if artifact.exists() {
                if let Err(e) = std::fs::remove_file(&artifact) {
                    warn!(path = %artifact.display(), error = %e, "failed to remove artifact");
                }
            }
        }
    }
    stdio.write_err("Stopped all known instances\n");
}

#[async_trait]
impl CommandHandler for ClearHandler {
    fn cmd_list(&self) -> &'static [&'static str] {
        &["clear"]
    }

    async fn handle(&self, request: &RequestContext) -> Result<Response, Status> {
        clear_all_groups_with(&self.shared, &request.stdio, &self.waiter).await;
        if self.waiter.is_interrupted() {
            return Err(Status::interrupted());
        }
        Ok(Response::command_ok())
    }

    fn interrupt(&self) {
        self.waiter.interrupt();
    }

    fn summary_help(&self) -> &'static str {
        "Stop and remove every tracked device group"
    }
}
