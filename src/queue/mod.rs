//! Remote task queue: claim, presign, lease renewal and result reporting

pub mod client;
pub mod models;

pub use client::QueueClient;
pub use models::{Task, TaskOutcome, TaskParams, TransferDescriptor, TransferRequest};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("{operation} request failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("{operation} returned an unreadable response: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} rejected by queue: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} response is missing '{field}'")]
    MissingField {
        operation: &'static str,
        field: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Client side of the queue protocol, bound to one worker identity.
///
/// `renew_lease` deliberately returns a plain `bool`: renewal is best-effort and
/// callers cannot propagate its failure by accident. Every other operation
/// returns a `Result` the caller has to deal with.
#[async_trait]
pub trait QueueApi: Send + Sync {
    /// Claim the next task; `Ok(None)` when the queue has nothing to hand out
    async fn claim_next(&self, lease_duration: Duration) -> Result<Option<Task>>;

    /// Mint a presigned URL for downloading the input or uploading the output
    async fn transfer_url(&self, request: &TransferRequest) -> Result<TransferDescriptor>;

    /// Extend the lease on `task_id`; `false` on any failure
    async fn renew_lease(&self, task_id: &str, extend_by: Duration) -> bool;

    /// Send the terminal status of `task_id`
    async fn report_result(&self, task_id: &str, outcome: &TaskOutcome) -> Result<()>;
}
