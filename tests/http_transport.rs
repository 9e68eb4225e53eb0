//! HTTP transport against a local mock server.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use tier_access::{AccessError, HttpTransport, Method, Transport};

fn transport() -> HttpTransport {
    HttpTransport::new(Duration::from_secs(5)).expect("client should build")
}

#[tokio::test]
async fn get_decodes_json_body() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(GET).path("/users/1");
        then.status(200).json_body(json!({"id": 1, "name": "Ada"}));
    });

    let value = transport().get(&server.url("/users/1")).await.unwrap();

    assert_eq!(value, json!({"id": 1, "name": "Ada"}));
    mock.assert();
}

#[tokio::test]
async fn empty_success_body_is_null() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(PUT).path("/users/1");
        then.status(204);
    });

    let value = transport()
        .send(Method::Put, &server.url("/users/1"), &json!({"id": 1}))
        .await
        .unwrap();
    assert_eq!(value, Value::Null);
}

#[tokio::test]
async fn server_error_is_retryable_transport_error() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/flaky");
        then.status(503).body("try later");
    });

    let err = transport().get(&server.url("/flaky")).await.unwrap_err();

    assert_eq!(
        err,
        AccessError::Transport { status: Some(503), message: "try later".into() }
    );
    assert!(err.is_retryable());
}

#[tokio::test]
async fn client_error_is_not_retryable() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/users");
        then.status(422);
    });

    let err = transport()
        .send(Method::Post, &server.url("/users"), &json!({"name": ""}))
        .await
        .unwrap_err();

    assert!(matches!(err, AccessError::Transport { status: Some(422), .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn unreachable_host_is_retryable() {
    let err = transport().get("http://127.0.0.1:9/nothing").await.unwrap_err();
    assert!(matches!(err, AccessError::Transport { status: None, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn delete_sends_id_array_as_body() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(DELETE).path("/users").json_body(json!([1, 2]));
        then.status(200).json_body(json!({"deleted": 2}));
    });

    let value = transport()
        .send(Method::Delete, &server.url("/users"), &json!([1, 2]))
        .await
        .unwrap();

    assert_eq!(value, json!({"deleted": 2}));
    mock.assert();
}

#[tokio::test]
async fn upload_posts_multipart_and_reports_progress() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(POST).path("/upload").header_exists("content-type");
        then.status(201).json_body(json!({"url": "/files/avatar.png"}));
    });

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("avatar.png");
    std::fs::write(&file, vec![7u8; 128]).unwrap();
    let mut params = BTreeMap::new();
    params.insert("owner".to_string(), "42".to_string());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let progress = {
        let seen = Arc::clone(&seen);
        move |done: u64, total: Option<u64>| seen.lock().push((done, total))
    };
    let value = transport()
        .upload(&server.url("/upload"), &file, "image", &params, &progress)
        .await
        .unwrap();

    assert_eq!(value, json!({"url": "/files/avatar.png"}));
    assert_eq!(seen.lock().first(), Some(&(0, Some(128))));
    assert_eq!(seen.lock().last(), Some(&(128, Some(128))));
    mock.assert();
}

#[tokio::test]
async fn upload_streams_large_file_in_chunks() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(POST).path("/upload");
        then.status(200).json_body(json!({"stored": true}));
    });

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("video.bin");
    let size = 3 * 64 * 1024 + 17;
    std::fs::write(&file, vec![1u8; size]).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let progress = {
        let seen = Arc::clone(&seen);
        move |done: u64, total: Option<u64>| seen.lock().push((done, total))
    };
    transport()
        .upload(&server.url("/upload"), &file, "video", &BTreeMap::new(), &progress)
        .await
        .unwrap();

    let seen = seen.lock().clone();
    let size = size as u64;
    // Start, one event per chunk read, end
    assert!(seen.len() >= 5, "progress events: {seen:?}");
    assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
    assert!(seen.iter().all(|(_, total)| *total == Some(size)));
    assert_eq!(seen.last(), Some(&(size, Some(size))));
    mock.assert();
}

#[tokio::test]
async fn download_streams_into_file() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/files/report.txt");
        then.status(200).body("quarterly numbers");
    });

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("nested").join("report.txt");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let progress = {
        let seen = Arc::clone(&seen);
        move |done: u64, total: Option<u64>| seen.lock().push((done, total))
    };

    let written = transport()
        .download(&server.url("/files/report.txt"), &dest, &progress)
        .await
        .unwrap();

    assert_eq!(written, dest);
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "quarterly numbers");
    assert_eq!(seen.lock().first(), Some(&(0, Some(17))));
    assert_eq!(seen.lock().last(), Some(&(17, Some(17))));
}

#[tokio::test]
async fn download_error_status_writes_nothing() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/missing");
        then.status(404);
    });

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("missing.bin");
    let err = transport()
        .download(&server.url("/missing"), &dest, &|_: u64, _: Option<u64>| {})
        .await
        .unwrap_err();

    assert!(matches!(err, AccessError::Transport { status: Some(404), .. }));
    assert!(!dest.exists());
}

#[tokio::test]
async fn interrupted_download_leaves_no_file() {
    // Promises 100 bytes, sends 5, then hangs up
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1024];
        let _ = socket.read(&mut request).await;
        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nshort")
            .await;
        let _ = socket.shutdown().await;
    });

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("archive.zip");
    let err = transport()
        .download(&format!("http://{addr}/archive.zip"), &dest, &|_: u64, _: Option<u64>| {})
        .await
        .unwrap_err();

    assert!(matches!(err, AccessError::Transport { status: None, .. }));
    assert!(!dest.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn download_replaces_existing_file_only_on_success() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/gone");
        then.status(500);
    });
    server.mock(|when, then| {
        when.method(GET).path("/fresh");
        then.status(200).body("new contents");
    });

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("notes.txt");
    std::fs::write(&dest, "old contents").unwrap();
    let quiet = |_: u64, _: Option<u64>| {};

    assert!(transport().download(&server.url("/gone"), &dest, &quiet).await.is_err());
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "old contents");

    transport().download(&server.url("/fresh"), &dest, &quiet).await.unwrap();
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "new contents");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}
