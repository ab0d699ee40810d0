// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::collections::HashMap;
use std::io::{Read, Seek, Write};
use std::path::PathBuf;

use crate::protocol::WaitBehavior;

fn command_request() -> Request {
    Request::Command {
        args: vec!["fleet".to_string()],
        env: HashMap::new(),
        working_directory: PathBuf::from("/work"),
        selector_args: Vec::new(),
        wait_behavior: WaitBehavior::Wait,
    }
}

#[tokio::test]
async fn request_round_trip_without_fds() {
    let (client, server) = UnixStream::pair().unwrap();

    send_request(&client, &command_request(), &[]).await.unwrap();
    let (request, fds) = read_request(&server).await.unwrap();
    assert_eq!(request, command_request());
    assert!(fds.is_empty());
}

#[tokio::test]
async fn request_carries_descriptors() {
    let (client, server) = UnixStream::pair().unwrap();

    let mut file = tempfile::tempfile().unwrap();
    file.write_all(b"through the socket").unwrap();
    file.flush().unwrap();

    send_request(&client, &command_request(), &[file.as_raw_fd()])
        .await
        .unwrap();
    let (_request, mut fds) = read_request(&server).await.unwrap();
    assert_eq!(fds.len(), 1);

    // The received descriptor references the same open file.
    let mut received = std::fs::File::from(fds.remove(0));
    received.rewind().unwrap();
    let mut contents = String::new();
    received.read_to_string(&mut contents).unwrap();
    assert_eq!(contents, "through the socket");
}

#[tokio::test]
async fn response_round_trip() {
    let (client, server) = UnixStream::pair().unwrap();
    let response = Response::command_ok();
    send_response(&server, &response).await.unwrap();
    assert_eq!(read_response(&client).await.unwrap(), response);
}

#[tokio::test]
async fn reading_from_closed_peer_reports_connection_closed() {
    let (client, server) = UnixStream::pair().unwrap();
    drop(client);
    match read_request(&server).await {
        Err(ProtocolError::ConnectionClosed) => {}
        other => panic!("expected ConnectionClosed, got {other:?}"),
    }
}

#[tokio::test]
async fn hangup_resolves_on_peer_close() {
    let (client, server) = UnixStream::pair().unwrap();
    let watcher = tokio::spawn(async move { hangup(&server).await });
    drop(client);
    tokio::time::timeout(std::time::Duration::from_secs(1), watcher)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn hangup_parks_when_data_arrives() {
    let (client, server) = UnixStream::pair().unwrap();
    send_request(&client, &command_request(), &[]).await.unwrap();
    // Data is pending, not a hangup: the future must not resolve.
    let parked = tokio::time::timeout(
        std::time::Duration::from_millis(100),
        hangup(&server),
    )
    .await;
    assert!(parked.is_err());
    // The queued request is still intact afterwards.
    let (request, _) = read_request(&server).await.unwrap();
    assert_eq!(request, command_request());
}

#[test]
fn oversized_payload_rejected_at_encode() {
    // A vec of 17M zeros serializes past the limit.
    let huge = vec![0u8; MAX_MESSAGE_SIZE + 1];
    let err = encode(&huge).unwrap_err();
    assert!(matches!(err, ProtocolError::MessageTooLarge { .. }));
}
