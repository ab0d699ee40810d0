// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The request dispatch loop.
//!
//! One task owns each client connection, so requests on a connection are
//! strictly ordered. While a handler runs, the connection task also
//! watches the socket: a client hang-up interrupts the handler. `stop`
//! flips the running flag and interrupts everything in flight.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cvd_core::{envs, SelectorOpts, Status};
use parking_lot::Mutex;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::handlers::{
    self, make_handlers, parse_invocation, wants_help, ClientStdio, CommandHandler, RequestContext,
};
use crate::instance_manager::InstanceManager;
use crate::lifecycle::Config;
use crate::protocol::{Request, Response, WireStatus};
use crate::protocol_wire as wire;

/// State shared between the accept loop, connection tasks and handlers.
pub struct ServerShared {
    pub config: Config,
    pub instance_manager: Arc<InstanceManager>,
    running: AtomicBool,
    stop_requested: AtomicBool,
    pub shutdown: Notify,
    /// Raw listening socket descriptor, kept for the self-exec handoff.
    pub listener_fd: RawFd,
    ongoing: Mutex<HashMap<u64, Arc<dyn CommandHandler>>>,
    next_request_id: AtomicU64,
}

impl ServerShared {
    pub fn new(config: Config, instance_manager: Arc<InstanceManager>, listener_fd: RawFd) -> Self {
        Self {
            config,
            instance_manager,
            running: AtomicBool::new(true),
            stop_requested: AtomicBool::new(false),
            shutdown: Notify::new(),
            listener_fd,
            ongoing: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the connection loop to stop the server once the current
    /// response has been delivered.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn stop_was_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Flip the running flag and interrupt everything in flight, without
    /// waking the accept loop. The self-exec path uses this: the old
    /// process must not exit (or remove the socket) before the exec.
    pub fn interrupt_all(&self) {
        self.running.store(false, Ordering::SeqCst);
        loop {
            let entry = {
                let mut ongoing = self.ongoing.lock();
                let Some(&id) = ongoing.keys().next() else {
                    break;
                };
                ongoing.remove(&id)
            };
            if let Some(handler) = entry {
                handler.interrupt();
            }
        }
    }

    /// Stop accepting work, interrupt everything in flight, and wake the
    /// accept loop so the daemon can exit.
    pub fn stop(&self) {
        self.interrupt_all();
        self.shutdown.notify_waiters();
    }

    fn register_ongoing(&self, handler: Arc<dyn CommandHandler>) -> Option<u64> {
        let mut ongoing = self.ongoing.lock();
        if !self.is_running() {
            return None;
        }
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        ongoing.insert(id, handler);
        Some(id)
    }

    fn unregister_ongoing(&self, id: u64) {
        self.ongoing.lock().remove(&id);
    }

    pub fn ongoing_count(&self) -> usize {
        self.ongoing.lock().len()
    }
}

/// The accept loop plus connection handling.
pub struct CvdServer {
    shared: Arc<ServerShared>,
    listener: UnixListener,
}

impl CvdServer {
    pub fn new(shared: Arc<ServerShared>, listener: UnixListener) -> Self {
        Self { shared, listener }
    }

    pub fn shared(&self) -> Arc<ServerShared> {
        Arc::clone(&self.shared)
    }

    /// Answer the carried-over client from a self-exec, then serve it as a
    /// regular connection.
    pub fn accept_carryover_client(&self, stream: UnixStream) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            if let Err(e) = wire::send_response(&stream, &Response::command_ok()).await {
                warn!(error = %e, "failed to answer carryover client");
                return;
            }
            handle_connection(shared, stream).await;
        });
    }

    /// Accept connections until the server stops, then drain.
    pub async fn serve(self) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let shared = Arc::clone(&self.shared);
                            tokio::spawn(handle_connection(shared, stream));
                        }
                        Err(e) => error!(error = %e, "accept failed"),
                    }
                }
                _ = self.shared.shutdown.notified() => break,
            }
        }

        // Give in-flight requests a moment to observe their interrupts and
        // flush responses.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.shared.ongoing_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        info!("server stopped");
    }
}

/// Serve one client connection to completion.
pub async fn handle_connection(shared: Arc<ServerShared>, stream: UnixStream) {
    loop {
        let (request, fds) = match wire::read_request(&stream).await {
            Ok(read) => read,
            Err(wire::ProtocolError::ConnectionClosed) => {
                debug!("client disconnected");
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to read request");
                return;
            }
        };

        let response = match request {
            Request::Shutdown { clear } => handle_shutdown(&shared, clear).await,
            Request::Command {
                args,
                env,
                working_directory,
                selector_args,
                wait_behavior,
            } => {
                let stdio = ClientStdio::from_fds(fds);
                handle_command(
                    &shared,
                    &stream,
                    args,
                    env,
                    working_directory,
                    selector_args,
                    wait_behavior,
                    stdio,
                )
                .await
            }
        };

        if let Err(e) = wire::send_response(&stream, &response).await {
            warn!(error = %e, "failed to send response");
            return;
        }

        if shared.stop_was_requested() {
            shared.stop();
            return;
        }
    }
}

/// The protocol-level shutdown message (`cvd kill-server`).
async fn handle_shutdown(shared: &Arc<ServerShared>, clear: bool) -> Response {
    if clear {
        handlers::clear_all_groups(shared, &ClientStdio::default()).await;
    } else if shared.instance_manager.has_groups() {
        return Response::Shutdown {
            status: Status::precondition(
                "please stop the devices first; devices are being tracked",
            )
            .into(),
        };
    }
    shared.request_stop();
    Response::Shutdown {
        status: WireStatus::ok(),
    }
}

fn normalize_path_envs(
    env: &mut std::collections::HashMap<String, String>,
    working_directory: &Path,
) -> Result<(), Status> {
    for key in envs::PATH_VALUED_ENVS {
        let Some(value) = env.get(key) else { continue };
        // The server cannot know the client's home directory.
        if value == "~" || value.starts_with("~/") {
            return Err(Status::precondition(format!(
                "the {key} directory should not start with ~"
            )));
        }
        if !Path::new(value).is_absolute() {
            let absolute = working_directory.join(value);
            env.insert(key.to_string(), absolute.display().to_string());
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_command(
    shared: &Arc<ServerShared>,
    stream: &UnixStream,
    args: Vec<String>,
    mut env: std::collections::HashMap<String, String>,
    working_directory: std::path::PathBuf,
    selector_args: Vec<String>,
    wait_behavior: crate::protocol::WaitBehavior,
    stdio: ClientStdio,
) -> Response {
    if let Err(status) = normalize_path_envs(&mut env, &working_directory) {
        return Response::command_error(status);
    }

    let (verb, verb_args) = parse_invocation(&args);
    let (selector, _rest) = match SelectorOpts::parse(&selector_args, &env) {
        Ok(parsed) => parsed,
        Err(status) => return Response::command_error(status),
    };

    let handlers = make_handlers(shared);
    let matching: Vec<_> = handlers.iter().filter(|h| h.can_handle(&verb)).collect();
    if matching.len() != 1 {
        return Response::command_error(Status::invariant(format!(
            "expected exactly one handler for \"{verb}\", found {}",
            matching.len()
        )));
    }
    let handler = Arc::clone(matching[0]);

    let request = RequestContext {
        verb: verb.clone(),
        args: verb_args,
        selector,
        env,
        working_directory,
        wait_behavior,
        stdio,
        client_fd: stream.as_raw_fd(),
    };

    // Local help interception for verbs that opt in.
    if wants_help(&request.args) && handler.should_intercept_help() && verb != "help" {
        request
            .stdio
            .write_out(&handler.detailed_help(&request.args));
        return Response::command_ok();
    }

    let Some(ongoing_id) = shared.register_ongoing(Arc::clone(&handler)) else {
        // Stop() is running concurrently; drop the request.
        return Response::command_error(Status::interrupted());
    };

    let result = {
        let work = handler.handle(&request);
        tokio::pin!(work);
        let hangup = wire::hangup(stream);
        tokio::pin!(hangup);
        let mut hangup_seen = false;
        loop {
            if hangup_seen {
                break work.await;
            }
            tokio::select! {
                result = &mut work => break result,
                _ = &mut hangup => {
                    debug!(verb = %verb, "client hung up, interrupting handler");
                    handler.interrupt();
                    hangup_seen = true;
                }
            }
        }
    };
    shared.unregister_ongoing(ongoing_id);

    match result {
        Ok(response) => response,
        Err(status) => {
            debug!(verb = %verb, error = %status, "handler failed");
            Response::command_error(status)
        }
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
