use crate::humanize::{ByteSize, HumanDuration};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub compute: ComputeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Worker identity and poll loop pacing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerSettings {
    /// Identity sent with every queue call; random per process when unset
    #[serde(default = "default_worker_id")]
    pub id: String,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    /// Delete temp artifacts after a successful task (failed tasks always clean up)
    #[serde(default = "default_auto_cleanup")]
    pub auto_cleanup: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: HumanDuration,
    #[serde(default = "default_post_task_pause")]
    pub post_task_pause: HumanDuration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            id: default_worker_id(),
            temp_dir: default_temp_dir(),
            auto_cleanup: default_auto_cleanup(),
            poll_interval: default_poll_interval(),
            post_task_pause: default_post_task_pause(),
        }
    }
}

fn default_worker_id() -> String {
    format!("worker-{}", uuid::Uuid::new_v4().simple())
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("tmp")
}

fn default_auto_cleanup() -> bool {
    true
}

fn default_poll_interval() -> HumanDuration {
    HumanDuration::from_secs(10)
}

fn default_post_task_pause() -> HumanDuration {
    HumanDuration::from_secs(1)
}

/// Remote queue API and lease timing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub base_url: String,
    /// Bearer token; may also be supplied through `WORKER_TOKEN`
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: HumanDuration,
    /// Lease requested when claiming a task
    #[serde(default = "default_lease_duration")]
    pub lease_duration: HumanDuration,
    /// Time between heartbeats while a task is in flight
    #[serde(default = "default_renewal_interval")]
    pub renewal_interval: HumanDuration,
    /// How far each heartbeat pushes the lease expiry
    #[serde(default = "default_lease_extension")]
    pub lease_extension: HumanDuration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            request_timeout: default_request_timeout(),
            lease_duration: default_lease_duration(),
            renewal_interval: default_renewal_interval(),
            lease_extension: default_lease_extension(),
        }
    }
}

fn default_request_timeout() -> HumanDuration {
    HumanDuration::from_secs(30)
}

fn default_lease_duration() -> HumanDuration {
    HumanDuration::from_secs(600)
}

fn default_renewal_interval() -> HumanDuration {
    HumanDuration::from_secs(120)
}

fn default_lease_extension() -> HumanDuration {
    HumanDuration::from_secs(300)
}

/// Presigned URL transfers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransferConfig {
    #[serde(default = "default_download_timeout")]
    pub download_timeout: HumanDuration,
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout: HumanDuration,
    #[serde(default = "default_max_input_size")]
    pub max_input_size: ByteSize,
    /// Extension of the generated artifact, also sent when requesting the upload URL
    #[serde(default = "default_output_extension")]
    pub output_extension: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            download_timeout: default_download_timeout(),
            upload_timeout: default_upload_timeout(),
            max_input_size: default_max_input_size(),
            output_extension: default_output_extension(),
        }
    }
}

fn default_download_timeout() -> HumanDuration {
    HumanDuration::from_secs(300)
}

fn default_upload_timeout() -> HumanDuration {
    HumanDuration::from_secs(600)
}

fn default_max_input_size() -> ByteSize {
    ByteSize(100 * 1024 * 1024) // 100 MB
}

fn default_output_extension() -> String {
    "mp4".to_string()
}

/// External generation process and its defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ComputeConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Checkout containing the generation script; also the working directory
    #[serde(default = "default_repo_path")]
    pub repo_path: PathBuf,
    #[serde(default = "default_script")]
    pub script: String,
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    #[serde(default = "default_task_type")]
    pub task_type: String,
    #[serde(default = "default_frame_num")]
    pub frame_num: u32,
    #[serde(default = "default_sample_solver")]
    pub sample_solver: String,
    #[serde(default = "default_sample_steps")]
    pub sample_steps: u32,
    #[serde(default = "default_cfg_scale")]
    pub cfg_scale: f64,
    #[serde(default = "default_compute_timeout")]
    pub timeout: HumanDuration,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            repo_path: default_repo_path(),
            script: default_script(),
            model_path: default_model_path(),
            task_type: default_task_type(),
            frame_num: default_frame_num(),
            sample_solver: default_sample_solver(),
            sample_steps: default_sample_steps(),
            cfg_scale: default_cfg_scale(),
            timeout: default_compute_timeout(),
        }
    }
}

fn default_interpreter() -> String {
    "python".to_string()
}

fn default_repo_path() -> PathBuf {
    PathBuf::from("Wan2.2")
}

fn default_script() -> String {
    "generate.py".to_string()
}

fn default_model_path() -> PathBuf {
    PathBuf::from("Wan2.2/Wan2.2-TI2V-5B")
}

fn default_task_type() -> String {
    "ti2v-5B".to_string()
}

fn default_frame_num() -> u32 {
    121
}

fn default_sample_solver() -> String {
    "unipc".to_string()
}

fn default_sample_steps() -> u32 {
    30
}

fn default_cfg_scale() -> f64 {
    5.0
}

fn default_compute_timeout() -> HumanDuration {
    HumanDuration::from_secs(1800)
}

/// Log output
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also write a daily-rolling log file here
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
