//! Task pipeline - takes one claimed task to exactly one terminal report

use super::lease::LeaseKeeper;
use crate::compute::{Compute, ComputeDefaults, ComputeError, ParamError};
use crate::config::Config;
use crate::observability::WorkerMetrics;
use crate::queue::{QueueApi, QueueError, Task, TaskOutcome, TransferRequest};
use crate::storage::{BlobTransfer, TransferError, content_type_for};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{Instrument, error, info, info_span, warn};

/// How far a task got through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Claimed,
    DownloadUrlObtained,
    InputDownloaded,
    Computed,
    UploadUrlObtained,
    OutputUploaded,
    Reported,
    ReportedFailed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Claimed => "claimed",
            Stage::DownloadUrlObtained => "download_url_obtained",
            Stage::InputDownloaded => "input_downloaded",
            Stage::Computed => "computed",
            Stage::UploadUrlObtained => "upload_url_obtained",
            Stage::OutputUploaded => "output_uploaded",
            Stage::Reported => "reported",
            Stage::ReportedFailed => "reported_failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Malformed task payload: {0}")]
    Malformed(String),

    #[error("Invalid task: {0}")]
    InvalidTask(#[source] ParamError),

    #[error("Failed to get download URL: {0}")]
    DownloadUrl(#[source] QueueError),

    #[error("Download failed: {0}")]
    Download(#[source] TransferError),

    #[error("{0}")]
    Compute(#[source] ComputeError),

    #[error("Failed to get upload URL: {0}")]
    UploadUrl(#[source] QueueError),

    #[error("Upload failed: {0}")]
    Upload(#[source] TransferError),
}

impl TaskError {
    /// Last stage the task reached before this error
    pub fn stage(&self) -> Stage {
        match self {
            TaskError::Malformed(_) | TaskError::InvalidTask(_) | TaskError::DownloadUrl(_) => {
                Stage::Claimed
            }
            TaskError::Download(_) => Stage::DownloadUrlObtained,
            TaskError::Compute(_) => Stage::InputDownloaded,
            TaskError::UploadUrl(_) => Stage::Computed,
            TaskError::Upload(_) => Stage::UploadUrlObtained,
        }
    }
}

/// Pipeline settings taken from the worker configuration
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub temp_dir: PathBuf,
    pub auto_cleanup: bool,
    pub download_timeout: Duration,
    pub upload_timeout: Duration,
    pub output_extension: String,
    pub renewal_interval: Duration,
    pub lease_extension: Duration,
    pub defaults: ComputeDefaults,
}

impl RunnerSettings {
    pub fn from_config(config: &Config, temp_dir: PathBuf) -> Self {
        Self {
            temp_dir,
            auto_cleanup: config.worker.auto_cleanup,
            download_timeout: config.transfer.download_timeout.as_duration(),
            upload_timeout: config.transfer.upload_timeout.as_duration(),
            output_extension: config.transfer.output_extension.clone(),
            renewal_interval: config.queue.renewal_interval.as_duration(),
            lease_extension: config.queue.lease_extension.as_duration(),
            defaults: ComputeDefaults::from(&config.compute),
        }
    }
}

/// Local scratch files of one task
#[derive(Debug, Clone, PartialEq, Eq)]
struct TempPaths {
    input: PathBuf,
    output: PathBuf,
}

impl TempPaths {
    fn for_task(settings: &RunnerSettings, task: &Task) -> Self {
        let stem = sanitize(&task.task_id);
        let input_ext = Path::new(&task.input_ref)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|e| format!(".{}", e))
            .unwrap_or_default();

        Self {
            input: settings
                .temp_dir
                .join(format!("{}_input{}", stem, input_ext)),
            output: settings
                .temp_dir
                .join(format!("{}_output.{}", stem, settings.output_extension)),
        }
    }

    async fn cleanup(&self) {
        for path in [&self.input, &self.output] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temp file"),
            }
        }
    }
}

/// Task ids come from the queue; keep only characters safe in a file name
fn sanitize(task_id: &str) -> String {
    let cleaned: String = task_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "task".to_string()
    } else {
        cleaned
    }
}

/// The fallible steps, kept apart from the lease keeper so the two can be
/// borrowed at the same time
struct TaskSteps {
    queue: Arc<dyn QueueApi>,
    storage: Arc<dyn BlobTransfer>,
    compute: Arc<dyn Compute>,
    settings: RunnerSettings,
}

impl TaskSteps {
    /// Returns the storage path of the uploaded artifact
    async fn process(&self, task: &Task, paths: &TempPaths) -> Result<String, TaskError> {
        if let Some(reason) = &task.malformed {
            return Err(TaskError::Malformed(reason.clone()));
        }

        let params = self
            .settings
            .defaults
            .resolve(&task.params)
            .map_err(TaskError::InvalidTask)?;

        info!(step = 1, storage_path = %task.input_ref, "Requesting download URL");
        let download = self
            .queue
            .transfer_url(&TransferRequest::download(&task.input_ref))
            .await
            .map_err(TaskError::DownloadUrl)?;

        info!(step = 2, path = %paths.input.display(), "Downloading input");
        let input = self
            .storage
            .fetch(&download.url, &paths.input, self.settings.download_timeout)
            .await
            .map_err(TaskError::Download)?;

        info!(
            step = 3,
            frame_num = params.frame_num,
            sample_steps = params.sample_steps,
            cfg_scale = params.cfg_scale,
            "Running generation"
        );
        let output = self
            .compute
            .execute(&input, &paths.output, &params)
            .await
            .map_err(TaskError::Compute)?;

        info!(step = 4, "Requesting upload URL");
        let upload = self
            .queue
            .transfer_url(&TransferRequest::upload(
                &task.task_id,
                &self.settings.output_extension,
            ))
            .await
            .map_err(TaskError::UploadUrl)?;
        let storage_path = upload
            .storage_path
            .ok_or(TaskError::UploadUrl(QueueError::MissingField {
                operation: "presign-upload",
                field: "storage_path",
            }))?;

        let content_type = content_type_for(&output);
        info!(step = 5, storage_path = %storage_path, %content_type, "Uploading output");
        self.storage
            .push(
                &output,
                &upload.url,
                content_type.as_ref(),
                self.settings.upload_timeout,
            )
            .await
            .map_err(TaskError::Upload)?;

        Ok(storage_path)
    }
}

/// Runs claimed tasks one at a time, each under its own lease heartbeat
pub struct TaskRunner {
    steps: TaskSteps,
    lease: LeaseKeeper,
    metrics: Arc<WorkerMetrics>,
}

impl TaskRunner {
    pub fn new(
        queue: Arc<dyn QueueApi>,
        storage: Arc<dyn BlobTransfer>,
        compute: Arc<dyn Compute>,
        settings: RunnerSettings,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        let lease = LeaseKeeper::new(
            Arc::clone(&queue),
            settings.renewal_interval,
            settings.lease_extension,
            Arc::clone(&metrics),
        );

        Self {
            steps: TaskSteps {
                queue,
                storage,
                compute,
                settings,
            },
            lease,
            metrics,
        }
    }

    /// Process `task` and report its outcome; `true` only when it completed and
    /// the completion was reported. Never fails: every error ends in a report.
    pub async fn run(&mut self, task: Task) -> bool {
        let span = info_span!(
            "task",
            task_id = %task.task_id,
            group_id = task.group_id.as_deref().unwrap_or("-"),
        );

        self.run_in_span(&task).instrument(span).await
    }

    async fn run_in_span(&mut self, task: &Task) -> bool {
        let started = Instant::now();
        info!(input = %task.input_ref, "Task started");

        let paths = TempPaths::for_task(&self.steps.settings, task);
        let lease = self.lease.hold(&task.task_id);

        let result = self.steps.process(task, &paths).await;
        let outcome = match &result {
            Ok(storage_path) => TaskOutcome::completed(storage_path.as_str()),
            Err(e) => {
                error!(stage = %e.stage(), error = %e, "Task failed");
                TaskOutcome::failed(e.to_string())
            }
        };

        // One report attempt per task, whatever it returns
        let stage = match self.steps.queue.report_result(&task.task_id, &outcome).await {
            Ok(()) => {
                info!(step = 6, status = outcome.status(), "Result reported");
                if result.is_ok() {
                    Stage::Reported
                } else {
                    Stage::ReportedFailed
                }
            }
            Err(e) => {
                self.metrics.report_failed();
                error!(
                    status = outcome.status(),
                    error = %e,
                    "Failed to report result, the lease will expire on the queue"
                );
                result.as_ref().err().map(TaskError::stage).unwrap_or(Stage::OutputUploaded)
            }
        };

        let renewals = lease.release().await;

        let success = stage == Stage::Reported;
        if !success || self.steps.settings.auto_cleanup {
            paths.cleanup().await;
        }

        if success {
            self.metrics.task_completed();
        } else {
            self.metrics.task_failed();
        }

        info!(
            status = if success { "SUCCESS" } else { "FAILED" },
            %stage,
            renewals,
            elapsed_secs = started.elapsed().as_secs(),
            "Task finished"
        );

        success
    }
}
