// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cvd-daemon: the control-plane daemon.
//!
//! Serves a Unix socket; every client request is routed to exactly one
//! command handler, its stdout/stderr streamed straight to the client's
//! own descriptors. The daemon tracks running device groups in the
//! instance database and can replace its own executable without dropping
//! the listening socket or the database.

pub mod env;
pub mod handlers;
pub mod instance_manager;
pub mod lifecycle;
pub mod protocol;
pub mod protocol_wire;
pub mod self_exec;
pub mod server;

pub use instance_manager::InstanceManager;
pub use lifecycle::Config;
pub use protocol::{Request, Response, WaitBehavior, WireStatus};
pub use server::{CvdServer, ServerShared};

/// Server version reported by the `version` verb and the CLI handshake.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
