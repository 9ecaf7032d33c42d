//! Run-scoped configuration for one render pipeline invocation.
//!
//! All paths and endpoints are gathered into an explicit [`RenderConfig`]
//! constructed once per run and passed to each component, rather than
//! read from process-wide globals.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::CoreError;

/// Default ComfyUI endpoint for a local instance.
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8188";
/// Default delay between history polls.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
/// Default per-job completion ceiling. CPU renders can take hours.
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 18_000;
/// Default interval between elapsed-time progress lines while polling.
pub const DEFAULT_PROGRESS_EVERY_SECS: u64 = 60;

/// Polling parameters for one job's completion wait.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between consecutive history queries.
    pub interval: Duration,
    /// Wall-clock ceiling from first poll to terminal state.
    pub timeout: Duration,
    /// How often to emit an elapsed-time progress line.
    pub progress_every: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            timeout: Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECS),
            progress_every: Duration::from_secs(DEFAULT_PROGRESS_EVERY_SECS),
        }
    }
}

/// Configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Base HTTP URL of the ComfyUI server, without a trailing slash.
    pub server_url: String,
    /// ComfyUI `input/` directory where referenced images are staged.
    pub input_dir: PathBuf,
    /// Local directory where fetched artifacts are written.
    pub output_dir: PathBuf,
    /// Per-job polling parameters.
    pub poll: PollConfig,
}

impl RenderConfig {
    /// Build a config from `HOMEFORGE_*` environment variables, falling
    /// back to the documented defaults for anything unset.
    ///
    /// Recognized variables: `HOMEFORGE_SERVER_URL`, `HOMEFORGE_INPUT_DIR`,
    /// `HOMEFORGE_OUTPUT_DIR`, `HOMEFORGE_POLL_INTERVAL_SECS`,
    /// `HOMEFORGE_JOB_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, CoreError> {
        let server_url = std::env::var("HOMEFORGE_SERVER_URL")
            .unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
        let input_dir = std::env::var("HOMEFORGE_INPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("input"));
        let output_dir = std::env::var("HOMEFORGE_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("output"));

        let mut poll = PollConfig::default();
        if let Some(secs) = env_secs("HOMEFORGE_POLL_INTERVAL_SECS")? {
            poll.interval = secs;
        }
        if let Some(secs) = env_secs("HOMEFORGE_JOB_TIMEOUT_SECS")? {
            poll.timeout = secs;
        }

        let config = Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            input_dir,
            output_dir,
            poll,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject obviously broken configs before any network traffic.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(CoreError::Config(format!(
                "Server URL must be http(s), got '{}'",
                self.server_url
            )));
        }
        if self.poll.interval.is_zero() {
            return Err(CoreError::Config("Poll interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Parse an optional duration-in-seconds environment variable.
fn env_secs(name: &str) -> Result<Option<Duration>, CoreError> {
    match std::env::var(name) {
        Ok(raw) => {
            let secs: u64 = raw
                .parse()
                .map_err(|_| CoreError::Config(format!("{name} must be an integer, got '{raw}'")))?;
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_poll_config() {
        let poll = PollConfig::default();
        assert_eq!(poll.interval, Duration::from_secs(5));
        assert_eq!(poll.timeout, Duration::from_secs(18_000));
    }

    #[test]
    fn validate_rejects_non_http_url() {
        let config = RenderConfig {
            server_url: "ftp://example.com".into(),
            input_dir: PathBuf::from("input"),
            output_dir: PathBuf::from("output"),
            poll: PollConfig::default(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let config = RenderConfig {
            server_url: DEFAULT_SERVER_URL.into(),
            input_dir: PathBuf::from("input"),
            output_dir: PathBuf::from("output"),
            poll: PollConfig {
                interval: Duration::ZERO,
                ..Default::default()
            },
        };
        assert!(config.validate().is_err());
    }
}
