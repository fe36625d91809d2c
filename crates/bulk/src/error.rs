//! Error types for bulk ingestion
//!
//! Configuration problems are fatal to construction. Push failures are
//! never surfaced to producers; they only show up in the statistics.

use std::io;
use thiserror::Error;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("failed to read config file '{path}': {source}")]
    Io {
        /// Path to the file
        path: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field holds a value outside its allowed range
    #[error("{component} has invalid {field}: {message}")]
    InvalidValue {
        /// Component type (e.g., "processor", "remote")
        component: &'static str,
        /// Field name
        field: &'static str,
        /// Error message
        message: String,
    },
}

impl ConfigError {
    /// Create an InvalidValue error
    pub fn invalid_value(
        component: &'static str,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            component,
            field,
            message: message.into(),
        }
    }

    /// Create an Io error for the given path
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Name of the offending field, if this is a validation error
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::InvalidValue { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Errors returned when constructing a [`BulkProcessor`](crate::BulkProcessor)
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// Configuration rejected; no workers were started
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Workers are tokio tasks and need a runtime to be spawned on
    #[error("bulk processor must be created inside a tokio runtime")]
    NoRuntime,
}

/// Errors from a single remote write attempt
#[derive(Debug, Clone, Error)]
pub enum WriteError {
    /// The request never produced a status (connect, timeout, TLS, ...)
    #[error("transport error: {0}")]
    Transport(String),

    /// Records could not be encoded for the wire
    #[error("encode error: {0}")]
    Encode(String),

    /// The writer panicked while handling the batch
    #[error("remote writer panicked")]
    Panicked,
}

impl WriteError {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
