// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `restart-server` verb.
//!
//! Serializes the database into a memfd, stops the server, and execs the
//! replacement binary with the listener and this client carried across.
//! Failure before the exec is reported to this client; the exec itself
//! never returns on success, and the new process answers the client.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use cvd_core::Status;
use tracing::warn;

use crate::handlers::{CommandHandler, RequestContext};
use crate::protocol::Response;
use crate::self_exec::exec_handoff;
use crate::server::ServerShared;

pub struct RestartHandler {
    shared: Arc<ServerShared>,
}

impl RestartHandler {
    pub fn new(shared: &Arc<ServerShared>) -> Self {
        Self {
            shared: Arc::clone(shared),
        }
    }

    fn new_executable(&self, args: &[String]) -> Result<Option<PathBuf>, Status> {
        if args.iter().any(|a| a == "reuse-server") {
            return Ok(None);
        }
        if let Some(path) = args
            .iter()
            .find_map(|a| a.strip_prefix("--exe_path="))
        {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(Status::not_found(format!(
                    "replacement server binary \"{}\" does not exist",
                    path.display()
                )));
            }
            return Ok(Some(path));
        }
        // Without an explicit binary the current executable is reused.
        Ok(None)
    }
}

#[async_trait]
impl CommandHandler for RestartHandler {
    fn cmd_list(&self) -> &'static [&'static str] {
        &["restart-server"]
    }

    async fn handle(&self, request: &RequestContext) -> Result<Response, Status> {
        let new_exe = self.new_executable(&request.args)?;
        let db_json = self.shared.instance_manager.serialize()?;

        request
            .stdio
            .write_err("Stopping the cvd server and restarting it in place.\n");
        // Interrupt in-flight work but keep the accept loop parked: the old
        // process must still own the socket at the moment of exec.
        self.shared.interrupt_all();

        // exec_handoff only returns on failure; on success the replacement
        // process answers this client.
        let err = match exec_handoff(
            self.shared.listener_fd,
            request.client_fd,
            &db_json,
            new_exe,
        ) {
            Err(status) => status,
            // execv returning Ok is unrepresentable.
            Ok(never) => match never {},
        };
        warn!(error = %err, "self-exec failed");
        // The running flag is already down; let the old process exit after
        // this error reaches the client.
        self.shared.request_stop();
        Err(err)
    }

    fn interrupt(&self) {}

    fn summary_help(&self) -> &'static str {
        "Replace the server executable in place, preserving devices"
    }

    fn detailed_help(&self, _args: &[String]) -> String {
        "Usage: cvd restart-server [reuse-server | --exe_path=<binary>]\n\
         Restarts the daemon without dropping tracked devices or this \
         connection.\n"
            .to_string()
    }
}
