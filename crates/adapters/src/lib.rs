// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cvd-adapters: subprocess, archive and filesystem plumbing.
//!
//! Everything here treats external tools as black boxes: build an argv,
//! point stdio somewhere, wait, classify the exit.

pub mod archive;
pub mod files;
pub mod subprocess;

pub use archive::Archive;
pub use subprocess::{ExitOutcome, HostCommand, SubprocessWaiter};
