//! Generator configuration.

use crate::errors::GenflowError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable overriding [`GeneratorConfig::poll_interval_ms`].
pub const ENV_POLL_INTERVAL_MS: &str = "GENFLOW_POLL_INTERVAL_MS";
/// Environment variable overriding [`GeneratorConfig::max_poll_attempts`].
pub const ENV_MAX_POLL_ATTEMPTS: &str = "GENFLOW_MAX_POLL_ATTEMPTS";
/// Environment variable overriding [`GeneratorConfig::stale_window_ms`].
pub const ENV_STALE_WINDOW_MS: &str = "GENFLOW_STALE_WINDOW_MS";
/// Environment variable overriding [`GeneratorConfig::report_cancellation`].
pub const ENV_REPORT_CANCELLATION: &str = "GENFLOW_REPORT_CANCELLATION";
/// Environment variable overriding [`RetryPolicy::max_attempts`].
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "GENFLOW_RETRY_MAX_ATTEMPTS";
/// Environment variable overriding [`RetryPolicy::initial_delay_ms`].
pub const ENV_RETRY_INITIAL_DELAY_MS: &str = "GENFLOW_RETRY_INITIAL_DELAY_MS";
/// Environment variable overriding [`RetryPolicy::max_delay_ms`].
pub const ENV_RETRY_MAX_DELAY_MS: &str = "GENFLOW_RETRY_MAX_DELAY_MS";
/// Environment variable overriding [`RetryPolicy::backoff_multiplier`].
pub const ENV_RETRY_BACKOFF_MULTIPLIER: &str = "GENFLOW_RETRY_BACKOFF_MULTIPLIER";

/// Configuration for a [`PipelineOrchestrator`](crate::pipeline::PipelineOrchestrator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Wait between render job polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Polls per render job before the job counts as timed out.
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    /// Age after which an active generation-state record is stale.
    #[serde(default = "default_stale_window_ms")]
    pub stale_window_ms: u64,
    /// Whether cancellation is reported through `on_error`.
    #[serde(default)]
    pub report_cancellation: bool,
    /// Retry policy used when a run does not supply its own.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_max_poll_attempts() -> u32 {
    150
}

fn default_stale_window_ms() -> u64 {
    5 * 60 * 1000
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
            stale_window_ms: default_stale_window_ms(),
            report_cancellation: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl GeneratorConfig {
    /// Loads defaults overlaid with `GENFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, GenflowError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads defaults overlaid with values returned by `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GenflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = parse_var(&lookup, ENV_POLL_INTERVAL_MS)? {
            config.poll_interval_ms = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_MAX_POLL_ATTEMPTS)? {
            config.max_poll_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_STALE_WINDOW_MS)? {
            config.stale_window_ms = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_REPORT_CANCELLATION)? {
            config.report_cancellation = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_RETRY_MAX_ATTEMPTS)? {
            config.retry.max_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_RETRY_INITIAL_DELAY_MS)? {
            config.retry.initial_delay_ms = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_RETRY_MAX_DELAY_MS)? {
            config.retry.max_delay_ms = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_RETRY_BACKOFF_MULTIPLIER)? {
            config.retry.backoff_multiplier = v;
        }
        Ok(config)
    }

    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, GenflowError> {
        serde_json::from_str(json).map_err(|e| GenflowError::Config(format!("invalid config: {e}")))
    }

    /// Sets the render job poll interval.
    #[must_use]
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Sets the render job poll ceiling.
    #[must_use]
    pub fn with_max_poll_attempts(mut self, attempts: u32) -> Self {
        self.max_poll_attempts = attempts;
        self
    }

    /// Sets the staleness window.
    #[must_use]
    pub fn with_stale_window_ms(mut self, ms: u64) -> Self {
        self.stale_window_ms = ms;
        self
    }

    /// Sets whether cancellation reaches `on_error`.
    #[must_use]
    pub fn with_report_cancellation(mut self, report: bool) -> Self {
        self.report_cancellation = report;
        self
    }

    /// Sets the default retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The poll interval as a duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The staleness window as a duration.
    #[must_use]
    pub fn stale_window(&self) -> Duration {
        Duration::from_millis(self.stale_window_ms)
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>, GenflowError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|e| GenflowError::Config(format!("{name}={raw:?}: {e}")))
}
