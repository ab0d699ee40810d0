// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `fleet` verb: a structured listing of every group and instance.

use std::sync::Arc;

use async_trait::async_trait;
use cvd_core::Status;
use serde_json::json;

use crate::handlers::{CommandHandler, RequestContext};
use crate::protocol::Response;
use crate::server::ServerShared;

pub struct FleetHandler {
    shared: Arc<ServerShared>,
}

impl FleetHandler {
    pub fn new(shared: &Arc<ServerShared>) -> Self {
        Self {
            shared: Arc::clone(shared),
        }
    }

    /// The fleet document, in canonical (sorted group name) order.
    pub fn fleet_json(&self) -> serde_json::Value {
        let groups: Vec<serde_json::Value> = self
            .shared
            .instance_manager
            .groups()
            .iter()
            .map(|group| {
                json!({
                    "group_name": group.name,
                    "home": group.home_dir,
                    "host_artifacts_path": group.host_artifacts_path,
                    "product_out_path": group.product_out_path,
                    "start_time_sec": group.start_time_sec,
                    "instances": group
                        .instances
                        .iter()
                        .map(|i| json!({
                            "id": i.id,
                            "name": i.name,
                            "state": i.state,
                        }))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        json!({ "groups": groups })
    }
}

#[async_trait]
impl CommandHandler for FleetHandler {
    fn cmd_list(&self) -> &'static [&'static str] {
        &["fleet"]
    }

    async fn handle(&self, request: &RequestContext) -> Result<Response, Status> {
        let document = self.fleet_json();
        let rendered = serde_json::to_string_pretty(&document)
            .map_err(|e| Status::invariant(format!("fleet serialization failed: {e}")))?;
        request.stdio.write_out(&rendered);
        request.stdio.write_out("\n");
        Ok(Response::command_ok())
    }

    fn interrupt(&self) {}

    fn summary_help(&self) -> &'static str {
        "List every tracked device group as JSON"
    }
}

#[cfg(test)]
#[path = "fleet_tests.rs"]
mod tests;
