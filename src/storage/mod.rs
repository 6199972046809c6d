//! Blob transfers through presigned URLs
//!
//! Single attempt, explicit timeout, no retry: a failed transfer fails the task.

use crate::humanize::ByteSize;
use crate::worker::http::describe_error;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("{method} request failed: {message}")]
    Request {
        method: &'static str,
        message: String,
    },

    #[error("{method} returned HTTP {status}")]
    Status { method: &'static str, status: u16 },

    #[error("Local file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Input exceeds the {limit} limit ({actual} bytes or more)")]
    TooLarge { limit: ByteSize, actual: u64 },

    #[error("Local I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, TransferError>;

/// Moves bytes between presigned URLs and local files
#[async_trait]
pub trait BlobTransfer: Send + Sync {
    /// Stream `url` into `destination`, creating parent directories
    async fn fetch(&self, url: &str, destination: &Path, timeout: Duration) -> Result<PathBuf>;

    /// PUT the contents of `local_path` to `url`
    async fn push(
        &self,
        local_path: &Path,
        url: &str,
        content_type: &str,
        timeout: Duration,
    ) -> Result<()>;
}

/// reqwest-backed transfer gateway
#[derive(Clone)]
pub struct HttpTransfer {
    client: Client,
    max_input_size: ByteSize,
}

impl HttpTransfer {
    pub fn new(client: Client, max_input_size: ByteSize) -> Self {
        Self {
            client,
            max_input_size,
        }
    }

    fn too_large(&self, actual: u64) -> TransferError {
        TransferError::TooLarge {
            limit: self.max_input_size,
            actual,
        }
    }
}

#[async_trait]
impl BlobTransfer for HttpTransfer {
    async fn fetch(&self, url: &str, destination: &Path, timeout: Duration) -> Result<PathBuf> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }

        let request_failed = |e: reqwest::Error| TransferError::Request {
            method: "GET",
            message: describe_error(&e),
        };

        let mut response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(request_failed)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status {
                method: "GET",
                status: status.as_u16(),
            });
        }

        let limit = self.max_input_size.as_u64();
        if let Some(declared) = response.content_length() {
            if declared > limit {
                return Err(self.too_large(declared));
            }
        }

        let mut file = fs::File::create(destination).await?;
        let mut written: u64 = 0;

        while let Some(chunk) = response.chunk().await.map_err(request_failed)? {
            written += chunk.len() as u64;
            if written > limit {
                return Err(self.too_large(written));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!(
            path = %destination.display(),
            size = %ByteSize(written),
            "Download completed"
        );

        Ok(destination.to_path_buf())
    }

    async fn push(
        &self,
        local_path: &Path,
        url: &str,
        content_type: &str,
        timeout: Duration,
    ) -> Result<()> {
        // Presigned PUTs need a Content-Length, so the body is sent in one piece
        let data = match fs::read(local_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransferError::NotFound(local_path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let size = data.len() as u64;

        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .timeout(timeout)
            .body(data)
            .send()
            .await
            .map_err(|e| TransferError::Request {
                method: "PUT",
                message: describe_error(&e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status {
                method: "PUT",
                status: status.as_u16(),
            });
        }

        debug!(
            path = %local_path.display(),
            size = %ByteSize(size),
            content_type,
            "Upload completed"
        );

        Ok(())
    }
}

/// MIME type for an artifact, from its file extension
pub fn content_type_for(path: &Path) -> mime::Mime {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let essence = match extension.as_deref() {
        Some("png") => return mime::IMAGE_PNG,
        Some("jpg") | Some("jpeg") => return mime::IMAGE_JPEG,
        Some("gif") => return mime::IMAGE_GIF,
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        _ => return mime::APPLICATION_OCTET_STREAM,
    };

    essence.parse().unwrap_or(mime::APPLICATION_OCTET_STREAM)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for_known_extensions() {
        assert_eq!(content_type_for(Path::new("out/t1_output.mp4")).as_ref(), "video/mp4");
        assert_eq!(content_type_for(Path::new("clip.MOV")).as_ref(), "video/quicktime");
        assert_eq!(content_type_for(Path::new("p1_original.png")), mime::IMAGE_PNG);
        assert_eq!(content_type_for(Path::new("photo.JPEG")), mime::IMAGE_JPEG);
        assert_eq!(content_type_for(Path::new("frame.webp")).as_ref(), "image/webp");
    }

    #[test]
    fn test_content_type_for_unknown_extension() {
        assert_eq!(
            content_type_for(Path::new("archive.tar.zst")),
            mime::APPLICATION_OCTET_STREAM
        );
        assert_eq!(
            content_type_for(Path::new("no_extension")),
            mime::APPLICATION_OCTET_STREAM
        );
    }

    #[tokio::test]
    async fn test_push_missing_file_fails_before_any_request() {
        let transfer = HttpTransfer::new(Client::new(), ByteSize(1024));
        let temp_dir = tempfile::TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.mp4");

        let result = transfer
            .push(&missing, "http://127.0.0.1:9/upload", "video/mp4", Duration::from_secs(1))
            .await;

        assert!(matches!(result, Err(TransferError::NotFound(path)) if path == missing));
    }
}
