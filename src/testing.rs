//! In-memory stand-ins for the queue, transfer gateway and compute runner

use crate::compute::{Compute, ComputeError, ComputeParams};
use crate::queue::{
    QueueApi, QueueError, Task, TaskOutcome, TaskParams, TransferDescriptor, TransferRequest,
};
use crate::storage::{BlobTransfer, TransferError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) fn task(task_id: &str) -> Task {
    Task {
        task_id: task_id.to_string(),
        group_id: Some("g1".to_string()),
        input_ref: "g1/p1_original.png".to_string(),
        params: TaskParams::default(),
        lease_expires_at: None,
        malformed: None,
    }
}

/// Scripted queue: hands out the queued claim results in order, then reports
/// an empty queue forever
#[derive(Default)]
pub(crate) struct MockQueue {
    claims: Mutex<VecDeque<Result<Option<Task>, QueueError>>>,
    reports: Mutex<Vec<(String, TaskOutcome)>>,
    transfers: Mutex<Vec<TransferRequest>>,
    claim_calls: AtomicU64,
    renewals: AtomicU64,
    renew_fails: AtomicBool,
    transfer_url_fails: AtomicBool,
    report_fails: AtomicBool,
    drained: Option<CancellationToken>,
}

impl MockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_claims(claims: Vec<Result<Option<Task>, QueueError>>) -> Self {
        Self {
            claims: Mutex::new(claims.into()),
            ..Self::default()
        }
    }

    /// Cancel `token` once the claim script has been used up
    pub fn cancel_when_drained(mut self, token: CancellationToken) -> Self {
        self.drained = Some(token);
        self
    }

    pub fn fail_renewals(self) -> Self {
        self.renew_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_transfer_urls(self) -> Self {
        self.transfer_url_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_reports(self) -> Self {
        self.report_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn reports(&self) -> Vec<(String, TaskOutcome)> {
        self.reports.lock().unwrap().clone()
    }

    pub fn transfers(&self) -> Vec<TransferRequest> {
        self.transfers.lock().unwrap().clone()
    }

    pub fn claim_calls(&self) -> u64 {
        self.claim_calls.load(Ordering::SeqCst)
    }

    pub fn renewals(&self) -> u64 {
        self.renewals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueApi for MockQueue {
    async fn claim_next(&self, _lease_duration: Duration) -> Result<Option<Task>, QueueError> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.claims.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => {
                if let Some(token) = &self.drained {
                    token.cancel();
                }
                Ok(None)
            }
        }
    }

    async fn transfer_url(&self, request: &TransferRequest) -> Result<TransferDescriptor, QueueError> {
        self.transfers.lock().unwrap().push(request.clone());
        if self.transfer_url_fails.load(Ordering::SeqCst) {
            return Err(QueueError::Rejected {
                operation: "presign-download",
                message: "storage unavailable".to_string(),
            });
        }

        let descriptor = match request {
            TransferRequest::Download { storage_path } => TransferDescriptor {
                url: format!("http://storage.test/get/{}", storage_path),
                expires_in: Some(3600),
                storage_path: None,
            },
            TransferRequest::Upload {
                item_id,
                file_extension,
            } => TransferDescriptor {
                url: format!("http://storage.test/put/{}", item_id),
                expires_in: Some(3600),
                storage_path: Some(format!("videos/{}.{}", item_id, file_extension)),
            },
        };
        Ok(descriptor)
    }

    async fn renew_lease(&self, _task_id: &str, _extend_by: Duration) -> bool {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        !self.renew_fails.load(Ordering::SeqCst)
    }

    async fn report_result(&self, task_id: &str, outcome: &TaskOutcome) -> Result<(), QueueError> {
        self.reports
            .lock()
            .unwrap()
            .push((task_id.to_string(), outcome.clone()));
        if self.report_fails.load(Ordering::SeqCst) {
            return Err(QueueError::Status {
                operation: "report-result",
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

/// Writes a placeholder file instead of fetching, records pushes
#[derive(Default)]
pub(crate) struct MockTransfer {
    fetch_fails: bool,
    fetches: AtomicU64,
    pushes: Mutex<Vec<(PathBuf, String)>>,
}

impl MockTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_fetch() -> Self {
        Self {
            fetch_fails: true,
            ..Self::default()
        }
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// `(local path, content type)` of every push
    pub fn pushes(&self) -> Vec<(PathBuf, String)> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobTransfer for MockTransfer {
    async fn fetch(
        &self,
        _url: &str,
        destination: &Path,
        _timeout: Duration,
    ) -> Result<PathBuf, TransferError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fetch_fails {
            return Err(TransferError::Status {
                method: "GET",
                status: 404,
            });
        }
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(destination, b"input image")?;
        Ok(destination.to_path_buf())
    }

    async fn push(
        &self,
        local_path: &Path,
        _url: &str,
        content_type: &str,
        _timeout: Duration,
    ) -> Result<(), TransferError> {
        if !local_path.exists() {
            return Err(TransferError::NotFound(local_path.to_path_buf()));
        }
        self.pushes
            .lock()
            .unwrap()
            .push((local_path.to_path_buf(), content_type.to_string()));
        Ok(())
    }
}

/// Sleeps for `delay`, then writes the output file or fails
#[derive(Default)]
pub(crate) struct MockCompute {
    delay: Duration,
    fails: bool,
    on_start: Option<CancellationToken>,
    runs: Mutex<Vec<ComputeParams>>,
}

impl MockCompute {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fails: true,
            ..Self::default()
        }
    }

    /// Cancel `token` as soon as a run starts
    pub fn cancel_on_start(mut self, token: CancellationToken) -> Self {
        self.on_start = Some(token);
        self
    }

    pub fn runs(&self) -> Vec<ComputeParams> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Compute for MockCompute {
    async fn execute(
        &self,
        input: &Path,
        output: &Path,
        params: &ComputeParams,
    ) -> Result<PathBuf, ComputeError> {
        self.runs.lock().unwrap().push(params.clone());
        if let Some(token) = &self.on_start {
            token.cancel();
        }
        if !input.exists() {
            return Err(ComputeError::InputMissing(input.to_path_buf()));
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fails {
            return Err(ComputeError::Failed {
                code: Some(1),
                diagnostics: "CUDA out of memory".to_string(),
            });
        }
        std::fs::write(output, b"video")?;
        Ok(output.to_path_buf())
    }
}
