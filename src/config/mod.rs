//! Worker configuration
//!
//! Settings are layered, later sources winning:
//! 1. Built-in defaults
//! 2. The TOML file (`config/leaseworker.toml`, or `LEASEWORKER_CONFIG`)
//! 3. `.env` and process environment
//!
//! ```no_run
//! use leaseworker::config::Config;
//!
//! let config = Config::load().expect("invalid configuration");
//! println!("Polling {} as {}", config.queue.base_url, config.worker.id);
//! ```
//!
//! Any key can be set from the environment as `LEASEWORKER__<SECTION>__<KEY>`,
//! e.g. `LEASEWORKER__QUEUE__RENEWAL_INTERVAL=90s` or
//! `LEASEWORKER__COMPUTE__FRAME_NUM=81`.
//!
//! The worker token is a secret: it is accepted from the file, from
//! `LEASEWORKER__QUEUE__TOKEN` or from `WORKER_TOKEN`, and never serialized.

mod models;
mod sources;
mod validation;

pub use crate::humanize::{ByteSize, HumanDuration};
pub use models::{
    ComputeConfig, Config, LoggingConfig, QueueConfig, TransferConfig, WorkerSettings,
};
pub use validation::ValidationError;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load from the default file location plus environment, then validate.
    ///
    /// Fails on a malformed file or on any validation error (bad frame count,
    /// lease timing that cannot keep the lease alive, missing token, ...), so
    /// a misconfigured worker never claims a task.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(Self::default_path())
    }

    /// File read by [`Config::load`]: `LEASEWORKER_CONFIG` or `config/leaseworker.toml`
    pub fn default_path() -> PathBuf {
        sources::default_path()
    }

    /// Same as [`Config::load`] with an explicit file path
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
