//! HttpTransfer against an in-process axum blob store

use axum::{
    Router,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    routing::{get, put},
};
use bytes::Bytes;
use leaseworker::humanize::ByteSize;
use leaseworker::storage::{BlobTransfer, HttpTransfer, TransferError};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

const IMAGE: &[u8] = b"\x89PNG\r\n\x1a\nnot really an image but close enough";

type Uploads = Arc<Mutex<Vec<(Option<String>, Vec<u8>)>>>;

async fn spawn_server(app: Router) -> String {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

fn blob_store(uploads: &Uploads) -> Router {
    let sink = Arc::clone(uploads);
    Router::new()
        .route("/blob/input.png", get(|| async { Bytes::from_static(IMAGE) }))
        .route("/blob/missing.png", get(|| async { StatusCode::NOT_FOUND }))
        .route(
            "/blob/upload",
            put(move |headers: HeaderMap, body: Bytes| {
                let sink = Arc::clone(&sink);
                async move {
                    let content_type = headers
                        .get(CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    sink.lock().unwrap().push((content_type, body.to_vec()));
                    StatusCode::OK
                }
            }),
        )
        .route("/blob/forbidden", put(|| async { StatusCode::FORBIDDEN }))
}

fn transfer(limit: u64) -> HttpTransfer {
    HttpTransfer::new(reqwest::Client::new(), ByteSize(limit))
}

#[tokio::test]
async fn test_fetch_streams_to_file() {
    let base = spawn_server(blob_store(&Uploads::default())).await;
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("nested").join("t1_input.png");

    let path = transfer(1024 * 1024)
        .fetch(
            &format!("{}/blob/input.png", base),
            &destination,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    assert_eq!(path, destination);
    assert_eq!(std::fs::read(&destination).unwrap(), IMAGE);
}

#[tokio::test]
async fn test_fetch_http_error() {
    let base = spawn_server(blob_store(&Uploads::default())).await;
    let dir = TempDir::new().unwrap();

    let err = transfer(1024)
        .fetch(
            &format!("{}/blob/missing.png", base),
            &dir.path().join("t1_input.png"),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Status { method: "GET", status: 404 }));
}

#[tokio::test]
async fn test_fetch_rejects_oversized_input() {
    let base = spawn_server(blob_store(&Uploads::default())).await;
    let dir = TempDir::new().unwrap();

    let err = transfer(16)
        .fetch(
            &format!("{}/blob/input.png", base),
            &dir.path().join("t1_input.png"),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::TooLarge { .. }));
}

#[tokio::test]
async fn test_fetch_unreachable_host() {
    let dir = TempDir::new().unwrap();

    let err = transfer(1024)
        .fetch(
            "http://127.0.0.1:9/blob/input.png",
            &dir.path().join("t1_input.png"),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Request { method: "GET", .. }));
}

#[tokio::test]
async fn test_push_sends_body_and_content_type() {
    let uploads = Uploads::default();
    let base = spawn_server(blob_store(&uploads)).await;
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("t1_output.mp4");
    std::fs::write(&output, b"fake video bytes").unwrap();

    transfer(1024)
        .push(
            &output,
            &format!("{}/blob/upload", base),
            "video/mp4",
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    let uploads = uploads.lock().unwrap().clone();
    assert_eq!(
        uploads,
        vec![(Some("video/mp4".to_string()), b"fake video bytes".to_vec())]
    );
}

#[tokio::test]
async fn test_push_http_error() {
    let base = spawn_server(blob_store(&Uploads::default())).await;
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("t1_output.mp4");
    std::fs::write(&output, b"fake video bytes").unwrap();

    let err = transfer(1024)
        .push(
            &output,
            &format!("{}/blob/forbidden", base),
            "video/mp4",
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Status { method: "PUT", status: 403 }));
}
