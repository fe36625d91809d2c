//! Bulk processor configuration
//!
//! TOML-friendly settings with the defaults of the hosted ingestion API.
//! Durations are given either as a float number of seconds (`0.025`) or as
//! a humantime string (`"25ms"`).
//!
//! # Example
//!
//! ```toml
//! [processor]
//! thread_pool_size = 4
//! batch_size = 25
//! flush_interval = 5.0
//! processing_timeout = "25ms"
//!
//! [remote]
//! base_url = "https://db.example.com/db/main"
//! api_key = "..."
//! timeout = "30s"
//! ```

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{ConfigError, Result};

// =============================================================================
// Constants
// =============================================================================

/// Default number of concurrent workers
pub const DEFAULT_THREAD_POOL_SIZE: usize = 4;

/// Default maximum records per pushed batch
pub const DEFAULT_BATCH_SIZE: usize = 25;

/// Default maximum age of a non-empty queue, in seconds
pub const DEFAULT_FLUSH_INTERVAL_SECS: f64 = 5.0;

/// Default pause between a worker's batch attempts, in seconds
pub const DEFAULT_PROCESSING_TIMEOUT_SECS: f64 = 0.025;

/// Default retry attempts for a failed push
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default request timeout for the HTTP writer
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Processor configuration
// =============================================================================

/// Configuration for [`BulkProcessor`](crate::BulkProcessor)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Number of concurrent worker loops
    /// Default: 4
    pub thread_pool_size: usize,

    /// Maximum records per pushed batch
    /// Default: 25
    pub batch_size: usize,

    /// Maximum time a non-empty queue may wait below `batch_size`
    /// Default: 5s
    #[serde(rename = "flush_interval", deserialize_with = "deserialize_seconds")]
    pub flush_interval_secs: f64,

    /// Sleep between a worker's consecutive batch attempts
    /// Default: 25ms
    #[serde(rename = "processing_timeout", deserialize_with = "deserialize_seconds")]
    pub processing_timeout_secs: f64,

    /// Retries for a batch that failed with a transient error
    /// Default: 3
    pub retry_attempts: u32,

    /// Base delay for exponential backoff (doubles each retry)
    /// Default: 100ms
    #[serde(rename = "retry_base_delay", deserialize_with = "deserialize_seconds")]
    pub retry_base_delay_secs: f64,

    /// Upper bound for the backoff delay
    /// Default: 10s
    #[serde(rename = "retry_max_delay", deserialize_with = "deserialize_seconds")]
    pub retry_max_delay_secs: f64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: DEFAULT_THREAD_POOL_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            processing_timeout_secs: DEFAULT_PROCESSING_TIMEOUT_SECS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay_secs: 0.1,
            retry_max_delay_secs: 10.0,
        }
    }
}

impl ProcessorConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::io(path.display().to_string(), e))?;
        content.parse()
    }

    /// Set the worker count
    #[must_use]
    pub fn with_thread_pool_size(mut self, size: usize) -> Self {
        self.thread_pool_size = size;
        self
    }

    /// Set the batch size
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the flush interval
    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_secs = interval.as_secs_f64();
        self
    }

    /// Set the flush interval in (possibly fractional) seconds
    #[must_use]
    pub fn with_flush_interval_secs(mut self, secs: f64) -> Self {
        self.flush_interval_secs = secs;
        self
    }

    /// Set the pause between batch attempts
    #[must_use]
    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout_secs = timeout.as_secs_f64();
        self
    }

    /// Set the pause between batch attempts in (possibly fractional) seconds
    #[must_use]
    pub fn with_processing_timeout_secs(mut self, secs: f64) -> Self {
        self.processing_timeout_secs = secs;
        self
    }

    /// Set the number of retry attempts
    #[must_use]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Set the backoff bounds
    #[must_use]
    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay_secs = base.as_secs_f64();
        self.retry_max_delay_secs = max.as_secs_f64();
        self
    }

    /// Flush interval as Duration
    pub fn flush_interval(&self) -> Duration {
        secs_to_duration(self.flush_interval_secs)
    }

    /// Processing timeout as Duration
    pub fn processing_timeout(&self) -> Duration {
        secs_to_duration(self.processing_timeout_secs)
    }

    /// Base retry delay as Duration
    pub fn retry_base_delay(&self) -> Duration {
        secs_to_duration(self.retry_base_delay_secs)
    }

    /// Maximum retry delay as Duration
    pub fn retry_max_delay(&self) -> Duration {
        secs_to_duration(self.retry_max_delay_secs)
    }

    /// Get retry delay for attempt N (exponential backoff, capped)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let delay = self.retry_base_delay().saturating_mul(1 << attempt.min(16));
        delay.min(self.retry_max_delay())
    }

    /// Check every field, returning the first violation
    pub fn validate(&self) -> Result<()> {
        if self.thread_pool_size == 0 {
            return Err(ConfigError::invalid_value(
                "processor",
                "thread_pool_size",
                "must be greater than 0",
            ));
        }

        if self.batch_size < 1 {
            return Err(ConfigError::invalid_value(
                "processor",
                "batch_size",
                "must be at least 1",
            ));
        }

        check_seconds("flush_interval", self.flush_interval_secs)?;
        check_seconds("processing_timeout", self.processing_timeout_secs)?;
        check_seconds("retry_base_delay", self.retry_base_delay_secs)?;
        check_seconds("retry_max_delay", self.retry_max_delay_secs)?;

        if self.retry_max_delay_secs < self.retry_base_delay_secs {
            return Err(ConfigError::invalid_value(
                "processor",
                "retry_max_delay",
                format!(
                    "must not be smaller than retry_base_delay ({}s)",
                    self.retry_base_delay_secs
                ),
            ));
        }

        Ok(())
    }
}

impl FromStr for ProcessorConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        Ok(config)
    }
}

// =============================================================================
// Remote configuration
// =============================================================================

/// Connection settings for the HTTP remote writer
///
/// # Example
///
/// ```toml
/// [remote]
/// base_url = "https://db.example.com/db/main"
/// api_key = "key_abc123"
/// timeout = "30s"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Database branch URL; tables are addressed below it
    /// Required
    pub base_url: String,

    /// Bearer token sent with every request
    /// Default: none
    pub api_key: Option<String>,

    /// Per-request timeout
    /// Default: 30s
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl RemoteConfig {
    /// Create a config pointing at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Set the API key
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check that the URL is usable
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(ConfigError::invalid_value("remote", "base_url", "is required"));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::invalid_value(
                "remote",
                "base_url",
                format!("'{}' must start with http:// or https://", self.base_url),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid_value("remote", "timeout", "must be non-zero"));
        }
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn check_seconds(field: &'static str, secs: f64) -> Result<()> {
    if !secs.is_finite() {
        return Err(ConfigError::invalid_value(
            "processor",
            field,
            "must be a finite number of seconds",
        ));
    }
    if secs < 0.0 {
        return Err(ConfigError::invalid_value(
            "processor",
            field,
            format!("must not be negative (got {secs})"),
        ));
    }
    Ok(())
}

/// Values too large for a `Duration` saturate; negative and NaN are zero
fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Accepts `5`, `0.025` or `"25ms"`; negative numbers pass through to `validate`
fn deserialize_seconds<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(f64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Number(secs) => Ok(secs),
        Seconds::Text(text) => humantime::parse_duration(&text)
            .map(|d| d.as_secs_f64())
            .map_err(|e| serde::de::Error::custom(format!("invalid duration '{text}': {e}"))),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
