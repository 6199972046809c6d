//! Generation knobs: configured defaults plus per-task overrides

use crate::config::ComputeConfig;
use crate::queue::TaskParams;
use thiserror::Error;

/// Smallest and largest frame counts the generation model accepts
pub const MIN_FRAME_NUM: u32 = 5;
pub const MAX_FRAME_NUM: u32 = 481;

#[derive(Debug, Error, PartialEq)]
pub enum ParamError {
    #[error("frame_num must be of the form 4n+1, got {0}")]
    FrameNumNotAligned(u32),

    #[error("frame_num must be between {min} and {max}, got {0}", min = MIN_FRAME_NUM, max = MAX_FRAME_NUM)]
    FrameNumOutOfRange(u32),

    #[error("sample_steps must be greater than zero")]
    ZeroSampleSteps,

    #[error("cfg_scale must be a positive number, got {0}")]
    InvalidCfgScale(f64),
}

/// Frame counts are `4n+1` within the model's supported range
pub fn validate_frame_num(frame_num: u32) -> Result<(), ParamError> {
    if frame_num % 4 != 1 {
        return Err(ParamError::FrameNumNotAligned(frame_num));
    }
    if !(MIN_FRAME_NUM..=MAX_FRAME_NUM).contains(&frame_num) {
        return Err(ParamError::FrameNumOutOfRange(frame_num));
    }
    Ok(())
}

/// Fully resolved arguments for one generation run
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeParams {
    pub prompt: Option<String>,
    pub frame_num: u32,
    pub sample_steps: u32,
    pub cfg_scale: f64,
}

/// Values used when a task leaves a knob unset
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeDefaults {
    pub frame_num: u32,
    pub sample_steps: u32,
    pub cfg_scale: f64,
}

impl From<&ComputeConfig> for ComputeDefaults {
    fn from(config: &ComputeConfig) -> Self {
        Self {
            frame_num: config.frame_num,
            sample_steps: config.sample_steps,
            cfg_scale: config.cfg_scale,
        }
    }
}

impl ComputeDefaults {
    /// Apply task overrides; an invalid override rejects the task up front
    pub fn resolve(&self, overrides: &TaskParams) -> Result<ComputeParams, ParamError> {
        let frame_num = overrides.frame_num.unwrap_or(self.frame_num);
        validate_frame_num(frame_num)?;

        let sample_steps = overrides.sample_steps.unwrap_or(self.sample_steps);
        if sample_steps == 0 {
            return Err(ParamError::ZeroSampleSteps);
        }

        let cfg_scale = overrides.cfg_scale.unwrap_or(self.cfg_scale);
        if !cfg_scale.is_finite() || cfg_scale <= 0.0 {
            return Err(ParamError::InvalidCfgScale(cfg_scale));
        }

        let prompt = overrides
            .prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        Ok(ComputeParams {
            prompt,
            frame_num,
            sample_steps,
            cfg_scale,
        })
    }
}
