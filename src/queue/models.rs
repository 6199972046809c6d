//! Wire types for the queue API

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A unit of work claimed from the queue
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Task {
    #[serde(rename = "item_id")]
    pub task_id: String,
    #[serde(default)]
    pub group_id: Option<String>,
    /// Storage locator of the input image
    #[serde(rename = "photo_storage_path")]
    pub input_ref: String,
    #[serde(flatten)]
    pub params: TaskParams,
    /// Informational only; lease timing is driven by the renewal interval.
    /// A value that is not RFC 3339 is ignored.
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Set when the claim payload could not be decoded beyond its id.
    /// Such a task is still reported, as failed.
    #[serde(skip)]
    pub malformed: Option<String>,
}

impl Task {
    /// Decode a claimed payload.
    ///
    /// Only `item_id` is required: once the queue has leased a task it must get
    /// a report, so any other decode failure is kept in `malformed` instead of
    /// failing the claim.
    pub fn from_claim(payload: Value) -> Result<Self, serde_json::Error> {
        let task_id = match payload.get("item_id") {
            Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
            Some(_) => {
                return Err(serde_json::Error::custom(
                    "item_id must be a non-empty string",
                ));
            }
            None => return Err(serde_json::Error::missing_field("item_id")),
        };

        match Task::deserialize(&payload) {
            Ok(task) => Ok(task),
            Err(e) => Ok(Task {
                task_id,
                group_id: payload
                    .get("group_id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                input_ref: payload
                    .get("photo_storage_path")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                params: TaskParams::default(),
                lease_expires_at: None,
                malformed: Some(e.to_string()),
            }),
        }
    }
}

/// Per-task overrides of the generation defaults.
///
/// Numbers are also accepted as numeric strings, and counts as integral floats.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TaskParams {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub frame_num: Option<u32>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub sample_steps: Option<u32>,
    #[serde(default, deserialize_with = "lenient_float")]
    pub cfg_scale: Option<f64>,
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc)))
}

fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    let Some(raw) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(None);
    };

    let parsed = match &raw {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= f64::from(u32::MAX))
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    parsed
        .and_then(|n| u32::try_from(n).ok())
        .map(Some)
        .ok_or_else(|| D::Error::custom(format!("expected a non-negative integer, got {raw}")))
}

fn lenient_float<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let Some(raw) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(None);
    };

    let parsed = match &raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    parsed
        .map(Some)
        .ok_or_else(|| D::Error::custom(format!("expected a number, got {raw}")))
}

/// Standard response wrapper: `{"success": true, "data": ..., "error": null}`
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClaimRequest<'a> {
    pub worker_id: &'a str,
    pub lease_duration_seconds: u64,
}

/// Which presigned URL to mint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum TransferRequest {
    Download {
        storage_path: String,
    },
    Upload {
        item_id: String,
        file_extension: String,
    },
}

impl TransferRequest {
    pub fn download(storage_path: impl Into<String>) -> Self {
        Self::Download {
            storage_path: storage_path.into(),
        }
    }

    pub fn upload(item_id: impl Into<String>, file_extension: impl Into<String>) -> Self {
        Self::Upload {
            item_id: item_id.into(),
            file_extension: file_extension.into(),
        }
    }

    /// Operation name used in queue errors and logs
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Download { .. } => "presign-download",
            Self::Upload { .. } => "presign-upload",
        }
    }
}

/// Presigned URL minted for one transfer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransferDescriptor {
    pub url: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Only set for uploads: where the artifact lands, reported back on completion
    #[serde(default)]
    pub storage_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RenewRequest<'a> {
    pub item_id: &'a str,
    pub worker_id: &'a str,
    pub extend_seconds: u64,
}

/// Terminal status of a task as reported to the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaskOutcome {
    Completed { video_storage_path: String },
    Failed { error_message: String },
}

impl TaskOutcome {
    pub fn completed(video_storage_path: impl Into<String>) -> Self {
        Self::Completed {
            video_storage_path: video_storage_path.into(),
        }
    }

    /// An empty message is replaced so a failure never reaches the queue unexplained
    pub fn failed(error_message: impl Into<String>) -> Self {
        let error_message = error_message.into();
        let error_message = if error_message.trim().is_empty() {
            "task failed without an error message".to_string()
        } else {
            error_message
        };
        Self::Failed { error_message }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReportRequest<'a> {
    pub item_id: &'a str,
    pub worker_id: &'a str,
    #[serde(flatten)]
    pub outcome: &'a TaskOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_from_claim_payload() {
        let payload = json!({
            "item_id": "t1",
            "group_id": "g1",
            "photo_storage_path": "g1/p1_original.png",
            "prompt": "a cat surfing",
            "lease_expires_at": "2026-10-18T12:00:00Z"
        });

        let task: Task = serde_json::from_value(payload).unwrap();
        assert_eq!(task.task_id, "t1");
        assert_eq!(task.group_id.as_deref(), Some("g1"));
        assert_eq!(task.input_ref, "g1/p1_original.png");
        assert_eq!(task.params.prompt.as_deref(), Some("a cat surfing"));
        assert_eq!(task.params.frame_num, None);
        assert!(task.lease_expires_at.is_some());
    }

    #[test]
    fn test_task_minimal_payload() {
        let task: Task = serde_json::from_value(json!({
            "item_id": "t2",
            "photo_storage_path": "p.jpg",
            "frame_num": 81
        }))
        .unwrap();

        assert_eq!(task.group_id, None);
        assert_eq!(task.params.frame_num, Some(81));
    }

    #[test]
    fn test_transfer_request_wire_format() {
        let download = serde_json::to_value(TransferRequest::download("g1/p1.png")).unwrap();
        assert_eq!(
            download,
            json!({"operation": "download", "storage_path": "g1/p1.png"})
        );

        let upload = serde_json::to_value(TransferRequest::upload("t1", "mp4")).unwrap();
        assert_eq!(
            upload,
            json!({"operation": "upload", "item_id": "t1", "file_extension": "mp4"})
        );

        assert_eq!(TransferRequest::download("p").operation(), "presign-download");
        assert_eq!(TransferRequest::upload("t1", "mp4").operation(), "presign-upload");
    }

    #[test]
    fn test_report_wire_format() {
        let completed = TaskOutcome::completed("videos/t1.mp4");
        let body = serde_json::to_value(ReportRequest {
            item_id: "t1",
            worker_id: "w1",
            outcome: &completed,
        })
        .unwrap();
        assert_eq!(
            body,
            json!({
                "item_id": "t1",
                "worker_id": "w1",
                "status": "completed",
                "video_storage_path": "videos/t1.mp4"
            })
        );

        let failed = TaskOutcome::failed("download failed");
        let body = serde_json::to_value(ReportRequest {
            item_id: "t1",
            worker_id: "w1",
            outcome: &failed,
        })
        .unwrap();
        assert_eq!(body["status"], "failed");
        assert_eq!(body["error_message"], "download failed");
    }

    #[test]
    fn test_failed_outcome_never_empty() {
        let TaskOutcome::Failed { error_message } = TaskOutcome::failed("  ") else {
            panic!("expected failed outcome");
        };
        assert!(!error_message.trim().is_empty());
    }

    #[test]
    fn test_empty_claim_envelope() {
        let envelope: Envelope<Task> =
            serde_json::from_value(json!({"success": true, "data": null})).unwrap();
        assert!(envelope.success);
        assert!(envelope.data.is_none());
    }

    #[test]
    fn test_envelope_without_data_field() {
        // TransferDescriptor has no Default impl
        let envelope: Envelope<TransferDescriptor> =
            serde_json::from_value(json!({"success": false, "error": "denied"})).unwrap();
        assert!(!envelope.success);
        assert!(envelope.data.is_none());
        assert_eq!(envelope.error.as_deref(), Some("denied"));
    }

    #[test]
    fn test_claim_tolerates_loose_numbers_and_timestamp() {
        let task = Task::from_claim(json!({
            "item_id": "t1",
            "photo_storage_path": "p.png",
            "frame_num": "121",
            "sample_steps": 40.0,
            "cfg_scale": "5.5",
            "lease_expires_at": "2026-10-18 12:00:00+00"
        }))
        .unwrap();

        assert_eq!(task.malformed, None);
        assert_eq!(task.params.frame_num, Some(121));
        assert_eq!(task.params.sample_steps, Some(40));
        assert_eq!(task.params.cfg_scale, Some(5.5));
        assert_eq!(task.lease_expires_at, None);
    }

    #[test]
    fn test_claim_with_bad_params_keeps_task() {
        let task = Task::from_claim(json!({
            "item_id": "t1",
            "group_id": "g1",
            "photo_storage_path": "g1/p.png",
            "frame_num": "many"
        }))
        .unwrap();

        assert_eq!(task.task_id, "t1");
        assert_eq!(task.group_id.as_deref(), Some("g1"));
        assert_eq!(task.input_ref, "g1/p.png");
        assert!(task.malformed.as_deref().unwrap().contains("many"));
    }

    #[test]
    fn test_claim_without_input_keeps_task() {
        let task = Task::from_claim(json!({"item_id": "t1"})).unwrap();
        assert_eq!(task.input_ref, "");
        assert!(task.malformed.is_some());
    }

    #[test]
    fn test_claim_requires_item_id() {
        assert!(Task::from_claim(json!({"photo_storage_path": "p.png"})).is_err());
        assert!(Task::from_claim(json!({"item_id": 7, "photo_storage_path": "p.png"})).is_err());
        assert!(Task::from_claim(json!({"item_id": "", "photo_storage_path": "p.png"})).is_err());
    }

    #[test]
    fn test_fractional_frame_num_rejected() {
        let err = serde_json::from_value::<TaskParams>(json!({"frame_num": 80.5})).unwrap_err();
        assert!(err.to_string().contains("non-negative integer"));
    }
}
