// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `host_bugreport` verb.

use std::sync::Arc;

use async_trait::async_trait;
use cvd_adapters::SubprocessWaiter;
use cvd_core::Status;

use crate::handlers::{group_command, CommandHandler, RequestContext};
use crate::protocol::Response;
use crate::server::ServerShared;

pub struct BugreportHandler {
    shared: Arc<ServerShared>,
    waiter: SubprocessWaiter,
}

impl BugreportHandler {
    pub fn new(shared: &Arc<ServerShared>) -> Self {
        Self {
            shared: Arc::clone(shared),
            waiter: SubprocessWaiter::new(),
        }
    }
}

#[async_trait]
impl CommandHandler for BugreportHandler {
    fn cmd_list(&self) -> &'static [&'static str] {
        &["host_bugreport", "cvd_host_bugreport"]
    }

    async fn handle(&self, request: &RequestContext) -> Result<Response, Status> {
        let group = self.shared.instance_manager.select_group(&request.selector)?;
        let cmd = group_command(
            &group.host_artifacts_path,
            "cvd_internal_host_bugreport",
            request,
            Some(&group.config_path()),
        );
        self.waiter.run_ok(cmd).await?;
        Ok(Response::command_ok())
    }

    fn interrupt(&self) {
        self.waiter.interrupt();
    }

    fn summary_help(&self) -> &'static str {
        "Capture host-side logs for a device group"
    }
}
