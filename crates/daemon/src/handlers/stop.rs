// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `stop` / `stop_cvd` verb.

use std::sync::Arc;

use async_trait::async_trait;
use cvd_adapters::SubprocessWaiter;
use cvd_core::{InstanceState, Status};
use tracing::info;

use crate::handlers::{group_command, CommandHandler, RequestContext};
use crate::protocol::Response;
use crate::server::ServerShared;

pub struct StopHandler {
    shared: Arc<ServerShared>,
    waiter: SubprocessWaiter,
}

impl StopHandler {
    pub fn new(shared: &Arc<ServerShared>) -> Self {
        Self {
            shared: Arc::clone(shared),
            waiter: SubprocessWaiter::new(),
        }
    }
}

#[async_trait]
impl CommandHandler for StopHandler {
    fn cmd_list(&self) -> &'static [&'static str] {
        &["stop", "stop_cvd"]
    }

    async fn handle(&self, request: &RequestContext) -> Result<Response, Status> {
        let manager = &self.shared.instance_manager;
        let group = manager.select_group(&request.selector)?;
        if !group.has_active_instances() {
            return Err(Status::precondition(format!(
                "group \"{}\" has no active instances to stop",
                group.name
            )));
        }

        let cmd = group_command(
            &group.host_artifacts_path,
            "stop_cvd",
            request,
            Some(&group.config_path()),
        );
        self.waiter.run_ok(cmd).await?;

        info!(group = %group.name, "devices stopped");
        manager.set_group_state(&group.name, InstanceState::Stopped)?;
        for instance in &group.instances {
            manager.release_instance_id(instance.id);
        }
        Ok(Response::command_ok())
    }

    fn interrupt(&self) {
        self.waiter.interrupt();
    }

    fn summary_help(&self) -> &'static str {
        "Stop a running device group"
    }

    fn should_intercept_help(&self) -> bool {
        // stop_cvd owns the authoritative flag list.
        false
    }
}
