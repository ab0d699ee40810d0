// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `status` / `cvd_status` verb.

use std::sync::Arc;

use async_trait::async_trait;
use cvd_adapters::SubprocessWaiter;
use cvd_core::Status;

use crate::handlers::{group_command, CommandHandler, RequestContext};
use crate::protocol::Response;
use crate::server::ServerShared;

pub struct StatusHandler {
    shared: Arc<ServerShared>,
    waiter: SubprocessWaiter,
}

impl StatusHandler {
    pub fn new(shared: &Arc<ServerShared>) -> Self {
        Self {
            shared: Arc::clone(shared),
            waiter: SubprocessWaiter::new(),
        }
    }
}

#[async_trait]
impl CommandHandler for StatusHandler {
    fn cmd_list(&self) -> &'static [&'static str] {
        &["status", "cvd_status"]
    }

    async fn handle(&self, request: &RequestContext) -> Result<Response, Status> {
        let manager = &self.shared.instance_manager;
        // With a selector, one group; without, every group in turn.
        let groups = if request.selector.is_empty() {
            manager.groups()
        } else {
            vec![manager.select_group(&request.selector)?]
        };
        if groups.is_empty() {
            return Err(Status::not_found("no device groups are running"));
        }
        for group in groups {
            let cmd = group_command(
                &group.host_artifacts_path,
                "cvd_internal_status",
                request,
                Some(&group.config_path()),
            );
            self.waiter.run_ok(cmd).await?;
        }
        Ok(Response::command_ok())
    }

    fn interrupt(&self) {
        self.waiter.interrupt();
    }

    fn summary_help(&self) -> &'static str {
        "Query the state of running devices"
    }
}
