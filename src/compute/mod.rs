//! External video generation process
//!
//! The generation script is opaque: it gets a fixed, versioned argument list,
//! runs for minutes, and signals success through its exit code plus the
//! artifact it leaves at `--save_file`.

pub mod params;

pub use params::{ComputeDefaults, ComputeParams, ParamError, validate_frame_num};

use crate::config::ComputeConfig;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Diagnostics quoted in a failure keep only the tail of the process output
const MAX_DIAGNOSTIC_CHARS: usize = 2000;

#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("{what} not found: {}", .path.display())]
    MissingPath { what: &'static str, path: PathBuf },

    #[error("Input not found: {}", .0.display())]
    InputMissing(PathBuf),

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Generation failed with {}: {diagnostics}", exit_label(.code))]
    Failed {
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("Generation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Generation exited successfully but produced no output at {}", .0.display())]
    OutputMissing(PathBuf),

    #[error("Local I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (killed by signal)".to_string(),
    }
}

/// Runs one generation to completion
#[async_trait]
pub trait Compute: Send + Sync {
    async fn execute(
        &self,
        input: &Path,
        output: &Path,
        params: &ComputeParams,
    ) -> Result<PathBuf, ComputeError>;
}

/// Launches the generation script as a child process
#[derive(Debug, Clone)]
pub struct ComputeRunner {
    config: ComputeConfig,
    script: PathBuf,
}

impl ComputeRunner {
    /// Check that the checkout, its script and the model directory exist
    pub fn new(config: ComputeConfig) -> Result<Self, ComputeError> {
        let repo_path = std::path::absolute(&config.repo_path)?;
        let script = repo_path.join(&config.script);
        let model_path = std::path::absolute(&config.model_path)?;

        for (what, path) in [
            ("Generation repository", &repo_path),
            ("Generation script", &script),
            ("Model directory", &model_path),
        ] {
            if !path.exists() {
                return Err(ComputeError::MissingPath {
                    what,
                    path: path.clone(),
                });
            }
        }

        let config = ComputeConfig {
            repo_path,
            model_path,
            ..config
        };

        Ok(Self { config, script })
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout.as_duration()
    }

    /// Argument list passed to the interpreter, script first
    fn command_args(&self, input: &Path, output: &Path, params: &ComputeParams) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            self.script.clone().into(),
            "--task".into(),
            self.config.task_type.clone().into(),
            "--ckpt_dir".into(),
            self.config.model_path.clone().into(),
            "--image".into(),
            input.into(),
            "--save_file".into(),
            output.into(),
            "--frame_num".into(),
            params.frame_num.to_string().into(),
            "--sample_solver".into(),
            self.config.sample_solver.clone().into(),
            "--sample_steps".into(),
            params.sample_steps.to_string().into(),
            "--cfg_scale".into(),
            params.cfg_scale.to_string().into(),
        ];

        if let Some(prompt) = &params.prompt {
            args.push("--prompt".into());
            args.push(prompt.into());
        }

        args
    }
}

#[async_trait]
impl Compute for ComputeRunner {
    async fn execute(
        &self,
        input: &Path,
        output: &Path,
        params: &ComputeParams,
    ) -> Result<PathBuf, ComputeError> {
        // The child runs inside the repository, so relative paths would resolve there
        let input = std::path::absolute(input)?;
        let output = std::path::absolute(output)?;

        if !fs::try_exists(&input).await.unwrap_or(false) {
            return Err(ComputeError::InputMissing(input));
        }

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).await?;
        }

        let args = self.command_args(&input, &output, params);
        debug!(program = %self.config.interpreter, ?args, "Launching generation");

        let mut command = Command::new(&self.config.interpreter);
        command
            .args(&args)
            .current_dir(&self.config.repo_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout can take down everything the script started
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|source| ComputeError::Spawn {
            program: self.config.interpreter.clone(),
            source,
        })?;
        let pid = child.id();

        let started = Instant::now();
        let limit = self.timeout();

        // On timeout the wait future is dropped, taking the child with it (SIGKILL)
        let result = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                kill_process_group(pid);
                warn!(timeout_secs = limit.as_secs(), "Generation timed out, child killed");
                return Err(ComputeError::Timeout(limit));
            }
        };

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let stdout = String::from_utf8_lossy(&result.stdout);
            let diagnostics = if stderr.trim().is_empty() { stdout } else { stderr };

            return Err(ComputeError::Failed {
                code: result.status.code(),
                diagnostics: tail(diagnostics.trim(), MAX_DIAGNOSTIC_CHARS),
            });
        }

        if !fs::try_exists(&output).await.unwrap_or(false) {
            return Err(ComputeError::OutputMissing(output));
        }

        info!(
            elapsed_secs = started.elapsed().as_secs(),
            output = %output.display(),
            "Generation finished"
        );

        Ok(output)
    }
}

/// SIGKILL every process left in the group led by `pid`
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pgid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };

    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(pgid, error = %e, "Failed to kill generation process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Last `max_chars` characters of `text`
fn tail(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let skip = total - max_chars;
    let start = text
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(0);
    format!("...{}", &text[start..])
}
