//! Shared HTTP client for the queue API and presigned transfers

use reqwest::Client;
use std::error::Error as _;
use std::time::Duration;
use thiserror::Error;

/// Response bodies quoted in errors are cut to this many characters
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// HTTP client configuration
///
/// Request timeouts are not set here: every queue call and transfer passes
/// its own.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("leaseworker/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Build the client shared by the queue client and the transfer gateway
pub fn build_client(config: &HttpConfig) -> Result<Client, HttpError> {
    let client = Client::builder()
        .connect_timeout(config.connect_timeout)
        .user_agent(&config.user_agent)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()?;

    Ok(client)
}

/// Render a reqwest error with its source chain, so "error sending request"
/// also says *why* (connection refused, dns failure, ...)
pub fn describe_error(err: &reqwest::Error) -> String {
    let mut message = if err.is_timeout() {
        format!("timed out: {}", err)
    } else {
        err.to_string()
    };

    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }

    message
}

/// Keep error bodies short enough for a log line
pub fn truncate_body(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
