//! Logging setup and worker counters

use crate::config::LoggingConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(#[from] ParseError),

    #[error("Failed to open log directory: {0}")]
    LogDir(#[from] InitError),

    #[error("Failed to install tracing subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Install the global subscriber: stdout always, plus a daily-rolling file
/// `<dir>/<worker_id>.<date>.log` when `logging.dir` is set.
///
/// `RUST_LOG` takes precedence over `logging.level`. Keep the returned guard
/// alive for the life of the process or buffered file output is lost.
pub fn init_tracing(
    config: &LoggingConfig,
    worker_id: &str,
) -> Result<Option<WorkerGuard>, TracingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)?,
    };

    let stdout_layer = fmt::layer().with_target(false);

    match &config.dir {
        Some(dir) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(worker_id)
                .filename_suffix("log")
                .build(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()?;

            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .try_init()?;

            Ok(None)
        }
    }
}

/// Process-wide counters, logged at shutdown
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    tasks_claimed: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    lease_renewals: AtomicU64,
    lease_renewal_failures: AtomicU64,
    report_failures: AtomicU64,
    claim_errors: AtomicU64,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_claimed(&self) {
        self.tasks_claimed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "tasks_completed", "Metric incremented");
    }

    pub fn task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "tasks_failed", "Metric incremented");
    }

    pub fn lease_renewed(&self) {
        self.lease_renewals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lease_renewal_failed(&self) {
        self.lease_renewal_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report_failed(&self) {
        self.report_failures.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "report_failures", "Metric incremented");
    }

    pub fn claim_error(&self) {
        self.claim_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_claimed: self.tasks_claimed.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            lease_renewals: self.lease_renewals.load(Ordering::Relaxed),
            lease_renewal_failures: self.lease_renewal_failures.load(Ordering::Relaxed),
            report_failures: self.report_failures.load(Ordering::Relaxed),
            claim_errors: self.claim_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub tasks_claimed: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub lease_renewals: u64,
    pub lease_renewal_failures: u64,
    pub report_failures: u64,
    pub claim_errors: u64,
}
