use super::models::Config;
use crate::compute::params::validate_frame_num;
use crate::humanize::HumanDuration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("worker.id must not be empty")]
    EmptyWorkerId,

    #[error("queue.base_url is not configured")]
    MissingQueueUrl,

    #[error("Invalid queue URL scheme in '{url}', expected 'http://' or 'https://'")]
    InvalidQueueScheme { url: String },

    #[error("No worker token configured (set queue.token or WORKER_TOKEN)")]
    MissingWorkerToken,

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("queue.renewal_interval ({renewal}) must be shorter than {field} ({limit})")]
    RenewalTooSlow {
        renewal: HumanDuration,
        field: &'static str,
        limit: HumanDuration,
    },

    #[error("compute.frame_num {value} is invalid: {reason}")]
    InvalidFrameNum { value: u32, reason: String },

    #[error("compute.sample_steps must be greater than zero")]
    InvalidSampleSteps,

    #[error("compute.cfg_scale must be a positive number, got {0}")]
    InvalidCfgScale(f64),

    #[error("transfer.output_extension must not be empty")]
    EmptyOutputExtension,

    #[error("transfer.output_extension must be letters and digits only, without a leading dot, got '{0}'")]
    InvalidOutputExtension(String),

    #[error("transfer.max_input_size must be positive")]
    InvalidMaxInputSize,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_worker(config)?;
    validate_queue(config)?;
    validate_lease_timing(config)?;
    validate_transfer(config)?;
    validate_compute(config)?;
    Ok(())
}

fn validate_worker(config: &Config) -> Result<(), ValidationError> {
    if config.worker.id.trim().is_empty() {
        return Err(ValidationError::EmptyWorkerId);
    }

    if config.worker.poll_interval.is_zero() {
        return Err(ValidationError::ZeroDuration {
            field: "worker.poll_interval",
        });
    }

    Ok(())
}

fn validate_queue(config: &Config) -> Result<(), ValidationError> {
    let url = config.queue.base_url.trim();
    if url.is_empty() {
        return Err(ValidationError::MissingQueueUrl);
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ValidationError::InvalidQueueScheme {
            url: url.to_string(),
        });
    }

    match config.queue.token.as_deref() {
        Some(token) if !token.trim().is_empty() => {}
        _ => return Err(ValidationError::MissingWorkerToken),
    }

    if config.queue.request_timeout.is_zero() {
        return Err(ValidationError::ZeroDuration {
            field: "queue.request_timeout",
        });
    }

    Ok(())
}

/// A heartbeat must land before the lease it is meant to extend runs out
fn validate_lease_timing(config: &Config) -> Result<(), ValidationError> {
    let queue = &config.queue;

    for (field, value) in [
        ("queue.lease_duration", queue.lease_duration),
        ("queue.renewal_interval", queue.renewal_interval),
        ("queue.lease_extension", queue.lease_extension),
    ] {
        if value.is_zero() {
            return Err(ValidationError::ZeroDuration { field });
        }
    }

    for (field, limit) in [
        ("queue.lease_duration", queue.lease_duration),
        ("queue.lease_extension", queue.lease_extension),
    ] {
        if queue.renewal_interval >= limit {
            return Err(ValidationError::RenewalTooSlow {
                renewal: queue.renewal_interval,
                field,
                limit,
            });
        }
    }

    Ok(())
}

fn validate_transfer(config: &Config) -> Result<(), ValidationError> {
    let transfer = &config.transfer;

    let extension = &transfer.output_extension;
    if extension.trim().is_empty() {
        return Err(ValidationError::EmptyOutputExtension);
    }
    // Used verbatim in temp file names and in the upload request
    if !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::InvalidOutputExtension(extension.clone()));
    }

    if transfer.max_input_size.as_u64() == 0 {
        return Err(ValidationError::InvalidMaxInputSize);
    }

    for (field, value) in [
        ("transfer.download_timeout", transfer.download_timeout),
        ("transfer.upload_timeout", transfer.upload_timeout),
    ] {
        if value.is_zero() {
            return Err(ValidationError::ZeroDuration { field });
        }
    }

    Ok(())
}

fn validate_compute(config: &Config) -> Result<(), ValidationError> {
    let compute = &config.compute;

    validate_frame_num(compute.frame_num).map_err(|e| ValidationError::InvalidFrameNum {
        value: compute.frame_num,
        reason: e.to_string(),
    })?;

    if compute.sample_steps == 0 {
        return Err(ValidationError::InvalidSampleSteps);
    }

    if !compute.cfg_scale.is_finite() || compute.cfg_scale <= 0.0 {
        return Err(ValidationError::InvalidCfgScale(compute.cfg_scale));
    }

    if compute.timeout.is_zero() {
        return Err(ValidationError::ZeroDuration {
            field: "compute.timeout",
        });
    }

    Ok(())
}
