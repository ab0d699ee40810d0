// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `help` and `version` verbs.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use cvd_core::Status;

use crate::handlers::{CommandHandler, RequestContext};
use crate::protocol::Response;

/// Argument spellings rewritten to the `help` verb.
pub const HELP_FLAGS: [&str; 3] = ["--help", "-h", "-help"];

pub struct HelpHandler {
    handlers: Vec<Arc<dyn CommandHandler>>,
}

impl HelpHandler {
    pub fn new(handlers: Vec<Arc<dyn CommandHandler>>) -> Self {
        Self { handlers }
    }

    fn summary(&self) -> String {
        let mut text = String::from(
            "cvd: Cuttlefish Virtual Device control\n\n\
             Usage: cvd <verb> [arguments]\n\nVerbs:\n",
        );
        for handler in &self.handlers {
            let verbs = handler.cmd_list().join(", ");
            let _ = writeln!(text, "  {:<28} {}", verbs, handler.summary_help());
        }
        text.push_str("\nRun `cvd help <verb>` for verb-specific help.\n");
        text
    }
}

#[async_trait]
impl CommandHandler for HelpHandler {
    fn cmd_list(&self) -> &'static [&'static str] {
        &["help"]
    }

    async fn handle(&self, request: &RequestContext) -> Result<Response, Status> {
        let text = match request.args.first() {
            Some(verb) => match self.handlers.iter().find(|h| h.can_handle(verb)) {
                Some(handler) => handler.detailed_help(&request.args[1..]),
                None => format!("Unknown verb \"{verb}\"\n\n{}", self.summary()),
            },
            None => self.summary(),
        };
        request.stdio.write_out(&text);
        Ok(Response::command_ok())
    }

    fn interrupt(&self) {}

    fn summary_help(&self) -> &'static str {
        "Print this summary, or a verb's detailed help"
    }
}

pub struct VersionHandler;

#[async_trait]
impl CommandHandler for VersionHandler {
    fn cmd_list(&self) -> &'static [&'static str] {
        &["version"]
    }

    async fn handle(&self, request: &RequestContext) -> Result<Response, Status> {
        request
            .stdio
            .write_out(&format!("cvd server version {}\n", crate::SERVER_VERSION));
        Ok(Response::command_ok())
    }

    fn interrupt(&self) {}

    fn summary_help(&self) -> &'static str {
        "Print the server version"
    }
}
