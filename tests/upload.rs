//! Upload Integration Tests
//!
//! Tests for the HTTP upload transport against a local one-shot server.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use specify::adapters::{HttpUploader, UploadError, Uploader};

/// A request as seen by the test server
struct Received {
    head: String,
    body: String,
}

/// Serve exactly one request, answering with `response`
async fn serve_once(response: &'static str) -> (String, oneshot::Receiver<Received>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        // Read until the header block is complete
        let header_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);

        while buf.len() < header_end + length {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        let _ = tx.send(Received { head, body });
    });

    (origin, rx)
}

fn uploader(origin: &str) -> HttpUploader {
    HttpUploader::new(origin, "upload.php", Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_upload_returns_location_url() {
    let (origin, received) = serve_once(
        "HTTP/1.1 201 Created\r\nLocation: /profile/abc123\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    )
    .await;

    let url = uploader(&origin).upload("{\"Version\":\"1\"}\n").await.unwrap();
    assert_eq!(url, format!("{}/profile/abc123", origin));

    let request = received.await.unwrap();
    assert!(request.head.starts_with("POST /upload.php HTTP/1.1"));
    assert!(request
        .head
        .to_ascii_lowercase()
        .contains("content-type: application/json"));
    assert_eq!(request.body, "{\"Version\":\"1\"}\n");
}

#[tokio::test]
async fn test_upload_rejected_status() {
    let (origin, _received) = serve_once(
        "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    )
    .await;

    let err = uploader(&origin).upload("{}").await.unwrap_err();
    assert!(matches!(err, UploadError::Status { status: 500 }));
}

#[tokio::test]
async fn test_redirect_is_not_followed() {
    let (origin, _received) = serve_once(
        "HTTP/1.1 302 Found\r\nLocation: /elsewhere\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    )
    .await;

    let err = uploader(&origin).upload("{}").await.unwrap_err();
    assert!(matches!(err, UploadError::Status { status: 302 }));
}

#[tokio::test]
async fn test_success_without_location_is_error() {
    let (origin, _received) =
        serve_once("HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;

    let err = uploader(&origin).upload("{}").await.unwrap_err();
    assert!(matches!(err, UploadError::MissingLocation));
}

#[tokio::test]
async fn test_unreachable_origin_is_transport_error() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let err = uploader(&origin).upload("{}").await.unwrap_err();
    assert!(matches!(err, UploadError::Transport(_)));
}
