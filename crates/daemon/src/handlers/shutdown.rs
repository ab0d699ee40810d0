// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `shutdown` verb.
//!
//! Refuses to terminate the daemon while device groups are tracked,
//! unless `--clear` stops them first.

use std::sync::Arc;

use async_trait::async_trait;
use cvd_core::Status;

use crate::handlers::{clear_all_groups, CommandHandler, RequestContext};
use crate::protocol::Response;
use crate::server::ServerShared;

pub struct ShutdownHandler {
    shared: Arc<ServerShared>,
}

impl ShutdownHandler {
    pub fn new(shared: &Arc<ServerShared>) -> Self {
        Self {
            shared: Arc::clone(shared),
        }
    }
}

#[async_trait]
impl CommandHandler for ShutdownHandler {
    fn cmd_list(&self) -> &'static [&'static str] {
        &["shutdown"]
    }

    async fn handle(&self, request: &RequestContext) -> Result<Response, Status> {
        let clear = request.args.iter().any(|a| a == "--clear");
        if clear {
            clear_all_groups(&self.shared, &request.stdio).await;
        } else if self.shared.instance_manager.has_groups() {
            return Err(Status::precondition(
                "please stop the devices first; devices are being tracked",
            ));
        }
        request.stdio.write_err("Stopping the cvd server.\n");
        self.shared.request_stop();
        Ok(Response::command_ok())
    }

    fn interrupt(&self) {}

    fn summary_help(&self) -> &'static str {
        "Terminate the daemon (requires no tracked devices, or --clear)"
    }
}
