//! Loader configuration
//!
//! One TOML file with a section per concern. Every section is optional.
//!
//! ```toml
//! [processor]
//! thread_pool_size = 8
//! batch_size = 100
//! flush_interval = "2s"
//!
//! [remote]
//! base_url = "https://db.example.com/db/main"
//! api_key = "key_abc123"
//!
//! [log]
//! level = "debug"
//! format = "json"
//! ```

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use strata_bulk::{ConfigError, ProcessorConfig, RemoteConfig};

/// Log level
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing level filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable console output (default)
    #[default]
    Console,
    /// JSON structured logging
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default: info
    pub level: LogLevel,
    /// Default: console
    pub format: LogFormat,
}

/// Complete loader configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub processor: ProcessorConfig,
    pub remote: RemoteConfig,
    pub log: LogConfig,
}

impl LoaderConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::io(path.display().to_string(), e))?;
        content.parse()
    }

    /// Validate the sections needed for a run
    ///
    /// The remote section is only required when records are actually sent.
    pub fn validate(&self, dry_run: bool) -> Result<(), ConfigError> {
        self.processor.validate()?;
        if !dry_run {
            self.remote.validate()?;
        }
        Ok(())
    }
}

impl FromStr for LoaderConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
