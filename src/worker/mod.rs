//! Poll loop: claim one task at a time and run it to its terminal report
//!
//! Shutdown is checked between tasks only. A claimed task always runs to the
//! end, so the queue never has to wait for its lease to lapse.

pub mod http;
pub mod lease;
pub mod runner;

use crate::compute::{Compute, ComputeError, ComputeRunner};
use crate::config::Config;
use crate::observability::{MetricsSnapshot, WorkerMetrics};
use crate::queue::{QueueApi, QueueClient};
use crate::storage::{BlobTransfer, HttpTransfer};
use self::http::{HttpConfig, HttpError};
use runner::{RunnerSettings, TaskRunner};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("Compute setup failed: {0}")]
    Compute(#[from] ComputeError),

    #[error("Failed to prepare temp directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker token is not configured")]
    MissingToken,
}

/// Poll loop timing
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Sleep between claims while the queue is empty or unreachable
    pub poll_interval: Duration,
    /// Sleep after each processed task
    pub post_task_pause: Duration,
    /// Lease requested with every claim
    pub lease_duration: Duration,
}

impl PollSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.worker.poll_interval.as_duration(),
            post_task_pause: config.worker.post_task_pause.as_duration(),
            lease_duration: config.queue.lease_duration.as_duration(),
        }
    }
}

pub struct Worker {
    queue: Arc<dyn QueueApi>,
    runner: TaskRunner,
    settings: PollSettings,
    metrics: Arc<WorkerMetrics>,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn QueueApi>,
        runner: TaskRunner,
        settings: PollSettings,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        Self {
            queue,
            runner,
            settings,
            metrics,
        }
    }

    /// Wire the production queue client, transfer gateway and compute runner
    pub fn from_config(config: &Config) -> Result<Self, WorkerError> {
        let token = config
            .queue
            .token
            .clone()
            .ok_or(WorkerError::MissingToken)?;

        std::fs::create_dir_all(&config.worker.temp_dir)?;
        let temp_dir = std::path::absolute(&config.worker.temp_dir)?;

        let client = http::build_client(&HttpConfig::default())?;
        let metrics = Arc::new(WorkerMetrics::new());

        let queue: Arc<dyn QueueApi> = Arc::new(QueueClient::new(
            client.clone(),
            config.queue.base_url.as_str(),
            token,
            config.worker.id.as_str(),
            config.queue.request_timeout.as_duration(),
        ));
        let storage: Arc<dyn BlobTransfer> =
            Arc::new(HttpTransfer::new(client, config.transfer.max_input_size));
        let compute: Arc<dyn Compute> = Arc::new(ComputeRunner::new(config.compute.clone())?);

        let runner = TaskRunner::new(
            Arc::clone(&queue),
            storage,
            compute,
            RunnerSettings::from_config(config, temp_dir),
            Arc::clone(&metrics),
        );

        Ok(Self::new(
            queue,
            runner,
            PollSettings::from_config(config),
            metrics,
        ))
    }

    /// Poll until `shutdown` fires, then return the final counters
    pub async fn run(&mut self, shutdown: CancellationToken) -> MetricsSnapshot {
        info!(
            poll_interval = %self.settings.poll_interval.as_secs_f64(),
            lease_secs = self.settings.lease_duration.as_secs(),
            "Worker started"
        );

        while !shutdown.is_cancelled() {
            // Not raced against shutdown: a claimed task must not be abandoned
            let pause = match self.queue.claim_next(self.settings.lease_duration).await {
                Ok(Some(task)) => {
                    self.metrics.task_claimed();
                    self.runner.run(task).await;
                    self.settings.post_task_pause
                }
                Ok(None) => {
                    debug!("No task available");
                    self.settings.poll_interval
                }
                Err(e) => {
                    self.metrics.claim_error();
                    warn!(error = %e, "Failed to claim task");
                    self.settings.poll_interval
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        let snapshot = self.metrics.snapshot();
        info!(
            claimed = snapshot.tasks_claimed,
            completed = snapshot.tasks_completed,
            failed = snapshot.tasks_failed,
            renewal_failures = snapshot.lease_renewal_failures,
            report_failures = snapshot.report_failures,
            claim_errors = snapshot.claim_errors,
            "Worker stopped"
        );
        snapshot
    }
}
