//! Lease heartbeat for the task in flight
//!
//! The queue hands out a task under a time-limited lease. While the pipeline
//! works on it, a background tokio task keeps extending that lease so the
//! queue does not give the task to another worker.

use crate::observability::WorkerMetrics;
use crate::queue::QueueApi;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Starts one heartbeat per claimed task
pub struct LeaseKeeper {
    queue: Arc<dyn QueueApi>,
    renewal_interval: Duration,
    extend_by: Duration,
    metrics: Arc<WorkerMetrics>,
}

impl LeaseKeeper {
    pub fn new(
        queue: Arc<dyn QueueApi>,
        renewal_interval: Duration,
        extend_by: Duration,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        Self {
            queue,
            renewal_interval,
            extend_by,
            metrics,
        }
    }

    /// Start renewing the lease on `task_id`.
    ///
    /// The guard borrows the keeper mutably, so only one lease can be held at a
    /// time. Renewal stops when the guard is released or dropped.
    ///
    /// ```no_run
    /// use leaseworker::worker::lease::LeaseKeeper;
    ///
    /// async fn one_after_another(keeper: &mut LeaseKeeper) {
    ///     let first = keeper.hold("t1");
    ///     first.release().await;
    ///     let second = keeper.hold("t2");
    ///     second.release().await;
    /// }
    /// ```
    ///
    /// A second lease while the first is still held does not compile:
    ///
    /// ```compile_fail,E0499
    /// use leaseworker::worker::lease::LeaseKeeper;
    ///
    /// fn two_at_once(keeper: &mut LeaseKeeper) {
    ///     let first = keeper.hold("t1");
    ///     let second = keeper.hold("t2");
    ///     drop((first, second));
    /// }
    /// ```
    pub fn hold(&mut self, task_id: &str) -> LeaseGuard<'_> {
        let token = CancellationToken::new();

        let handle = tokio::spawn(heartbeat(
            Arc::clone(&self.queue),
            task_id.to_string(),
            self.renewal_interval,
            self.extend_by,
            Arc::clone(&self.metrics),
            token.clone(),
        ));

        debug!(
            task_id,
            interval_secs = self.renewal_interval.as_secs_f64(),
            "Lease heartbeat started"
        );

        LeaseGuard {
            token,
            handle: Some(handle),
            _keeper: PhantomData,
        }
    }
}

/// Live heartbeat for one task
pub struct LeaseGuard<'a> {
    token: CancellationToken,
    handle: Option<JoinHandle<u64>>,
    _keeper: PhantomData<&'a mut LeaseKeeper>,
}

impl LeaseGuard<'_> {
    /// Stop the heartbeat and wait for it, returning the number of renewal attempts
    pub async fn release(mut self) -> u64 {
        self.token.cancel();

        let Some(handle) = self.handle.take() else {
            return 0;
        };

        match handle.await {
            Ok(attempts) => attempts,
            Err(e) => {
                error!(error = %e, "Lease heartbeat task failed");
                0
            }
        }
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn heartbeat(
    queue: Arc<dyn QueueApi>,
    task_id: String,
    interval: Duration,
    extend_by: Duration,
    metrics: Arc<WorkerMetrics>,
    token: CancellationToken,
) -> u64 {
    let mut attempts: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        attempts += 1;
        let renewed = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            renewed = queue.renew_lease(&task_id, extend_by) => renewed,
        };

        if renewed {
            metrics.lease_renewed();
            debug!(task_id = %task_id, attempt = attempts, "Lease renewed");
        } else {
            metrics.lease_renewal_failed();
            warn!(task_id = %task_id, attempt = attempts, "Lease renewal failed, will retry");
        }
    }

    debug!(task_id = %task_id, attempts, "Lease heartbeat stopped");
    attempts
}
