// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire format encoding/decoding for the IPC protocol.
//!
//! Frames are a 4-byte big-endian length prefix plus a JSON payload.
//! Descriptors ride as SCM_RIGHTS ancillary data on the first chunk of a
//! frame, so a request and its stdio arrive together.

use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::io::Interest;
use tokio::net::UnixStream;

use super::{Request, Response};

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Maximum message size (16 MB); requests are argv + env, never bulk data.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Most descriptors a single frame may carry (stdio plus one extra).
pub const MAX_FDS_PER_FRAME: usize = 4;

/// Encode a message to JSON bytes (without length prefix)
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    let json = serde_json::to_vec(msg)?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: json.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(json)
}

/// Decode a message from wire format
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn errno_to_io(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

/// Write a whole frame, attaching `fds` to its first chunk.
pub async fn write_frame(
    stream: &UnixStream,
    payload: &[u8],
    fds: &[RawFd],
) -> Result<(), ProtocolError> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: payload.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);

    let raw_fd = stream.as_raw_fd();
    let mut offset = 0;
    let mut fds_sent = false;
    while offset < buf.len() {
        let n = stream
            .async_io(Interest::WRITABLE, || {
                let iov = [IoSlice::new(&buf[offset..])];
                let cmsgs = if !fds_sent && !fds.is_empty() {
                    vec![ControlMessage::ScmRights(fds)]
                } else {
                    Vec::new()
                };
                sendmsg::<()>(raw_fd, &iov, &cmsgs, MsgFlags::MSG_NOSIGNAL, None)
                    .map_err(errno_to_io)
            })
            .await?;
        if n > 0 {
            fds_sent = true;
        }
        offset += n;
    }
    Ok(())
}

async fn read_exact_collecting_fds(
    stream: &UnixStream,
    buf: &mut [u8],
    fds: &mut Vec<OwnedFd>,
) -> Result<(), ProtocolError> {
    let raw_fd = stream.as_raw_fd();
    let mut offset = 0;
    while offset < buf.len() {
        let n = stream
            .async_io(Interest::READABLE, || {
                let mut iov = [IoSliceMut::new(&mut buf[offset..])];
                let mut cmsg_buffer = nix::cmsg_space!([RawFd; MAX_FDS_PER_FRAME]);
                let msg = recvmsg::<()>(
                    raw_fd,
                    &mut iov,
                    Some(&mut cmsg_buffer),
                    MsgFlags::empty(),
                )
                .map_err(errno_to_io)?;
                for cmsg in msg.cmsgs() {
                    if let ControlMessageOwned::ScmRights(received) = cmsg {
                        for fd in received {
                            // SAFETY: the kernel just installed these
                            // descriptors for us; we are their sole owner.
                            fds.push(unsafe { OwnedFd::from_raw_fd(fd) });
                        }
                    }
                }
                Ok(msg.bytes)
            })
            .await?;
        if n == 0 {
            return Err(ProtocolError::ConnectionClosed);
        }
        offset += n;
    }
    Ok(())
}

/// Read one frame plus any descriptors attached to it.
pub async fn read_frame(stream: &UnixStream) -> Result<(Vec<u8>, Vec<OwnedFd>), ProtocolError> {
    let mut fds = Vec::new();
    let mut len_buf = [0u8; 4];
    read_exact_collecting_fds(stream, &mut len_buf, &mut fds).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }
    let mut payload = vec![0u8; len];
    read_exact_collecting_fds(stream, &mut payload, &mut fds).await?;
    Ok((payload, fds))
}

/// Send a request frame carrying the client's descriptors.
pub async fn send_request(
    stream: &UnixStream,
    request: &Request,
    fds: &[RawFd],
) -> Result<(), ProtocolError> {
    let payload = encode(request)?;
    write_frame(stream, &payload, fds).await
}

/// Read a request and its descriptors.
pub async fn read_request(
    stream: &UnixStream,
) -> Result<(Request, Vec<OwnedFd>), ProtocolError> {
    let (payload, fds) = read_frame(stream).await?;
    Ok((decode(&payload)?, fds))
}

/// Send a response (responses never carry descriptors).
pub async fn send_response(stream: &UnixStream, response: &Response) -> Result<(), ProtocolError> {
    let payload = encode(response)?;
    write_frame(stream, &payload, &[]).await
}

/// Read a response.
pub async fn read_response(stream: &UnixStream) -> Result<Response, ProtocolError> {
    let (payload, _fds) = read_frame(stream).await?;
    decode(&payload)
}

/// Resolve once the peer hangs up. If payload data arrives instead, this
/// future parks forever; callers race it against request handling.
pub async fn hangup(stream: &UnixStream) {
    let raw_fd = stream.as_raw_fd();
    loop {
        let res = stream
            .async_io(Interest::READABLE, || {
                let mut probe = [0u8; 1];
                nix::sys::socket::recv(raw_fd, &mut probe, MsgFlags::MSG_PEEK)
                    .map_err(errno_to_io)
            })
            .await;
        match res {
            // Zero-length read or a socket error both mean the client is gone.
            Ok(0) | Err(_) => return,
            // Data pending is the next request, not a hangup; stop probing.
            Ok(_) => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
#[path = "protocol_wire_tests.rs"]
mod tests;
