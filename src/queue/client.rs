//! HTTP implementation of the queue protocol

use super::models::{
    ClaimRequest, Envelope, RenewRequest, ReportRequest, Task, TaskOutcome, TransferDescriptor,
    TransferRequest,
};
use super::{QueueApi, QueueError, Result};
use crate::worker::http::{describe_error, truncate_body};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const CLAIM_PATH: &str = "/worker/next-task";
const PRESIGN_PATH: &str = "/worker/presign";
const HEARTBEAT_PATH: &str = "/worker/heartbeat";
const REPORT_PATH: &str = "/worker/report";

/// Queue API client authenticated with a bearer worker token
#[derive(Clone)]
pub struct QueueClient {
    client: Client,
    base_url: String,
    token: String,
    worker_id: String,
    timeout: Duration,
}

impl QueueClient {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
        worker_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            token: token.into(),
            worker_id: worker_id.into(),
            timeout,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a JSON body; anything but a 2xx becomes an error
    async fn post<B: Serialize + ?Sized>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
    ) -> Result<Response> {
        let response = self
            .client
            .post(self.endpoint(path))
            .bearer_auth(&self.token)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| QueueError::Transport {
                operation,
                message: describe_error(&e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Status {
                operation,
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        Ok(response)
    }

    /// POST and unwrap the `{success, data, error}` envelope
    async fn post_envelope<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
    ) -> Result<Option<T>> {
        let response = self.post(operation, path, body).await?;

        let text = response.text().await.map_err(|e| QueueError::Transport {
            operation,
            message: describe_error(&e),
        })?;

        let envelope: Envelope<T> =
            serde_json::from_str(&text).map_err(|e| QueueError::Decode {
                operation,
                message: e.to_string(),
            })?;

        if !envelope.success {
            return Err(QueueError::Rejected {
                operation,
                message: envelope
                    .error
                    .unwrap_or_else(|| "no error message".to_string()),
            });
        }

        Ok(envelope.data)
    }
}

#[async_trait]
impl QueueApi for QueueClient {
    async fn claim_next(&self, lease_duration: Duration) -> Result<Option<Task>> {
        let request = ClaimRequest {
            worker_id: &self.worker_id,
            lease_duration_seconds: lease_duration.as_secs(),
        };

        let Some(payload) = self
            .post_envelope::<_, Value>("claim-next", CLAIM_PATH, &request)
            .await?
        else {
            return Ok(None);
        };

        let task = Task::from_claim(payload).map_err(|e| QueueError::Decode {
            operation: "claim-next",
            message: e.to_string(),
        })?;

        if let Some(reason) = &task.malformed {
            warn!(task_id = %task.task_id, reason = %reason, "Claimed task payload is malformed");
        }
        Ok(Some(task))
    }

    async fn transfer_url(&self, request: &TransferRequest) -> Result<TransferDescriptor> {
        let operation = request.operation();

        self.post_envelope(operation, PRESIGN_PATH, request)
            .await?
            .ok_or(QueueError::MissingField {
                operation,
                field: "data",
            })
    }

    async fn renew_lease(&self, task_id: &str, extend_by: Duration) -> bool {
        let request = RenewRequest {
            item_id: task_id,
            worker_id: &self.worker_id,
            extend_seconds: extend_by.as_secs(),
        };

        match self.post("renew-lease", HEARTBEAT_PATH, &request).await {
            Ok(_) => true,
            Err(e) => {
                debug!(task_id, error = %e, "Lease renewal request failed");
                false
            }
        }
    }

    async fn report_result(&self, task_id: &str, outcome: &TaskOutcome) -> Result<()> {
        let request = ReportRequest {
            item_id: task_id,
            worker_id: &self.worker_id,
            outcome,
        };

        self.post("report-result", REPORT_PATH, &request).await?;
        Ok(())
    }
}
