//! Remote write collaborators
//!
//! The processor hands each batch to a [`RemoteWriter`]. A writer returns the
//! HTTP-style status the remote store answered with, or a [`WriteError`] when
//! no status was obtained at all.
//!
//! # Implementations
//!
//! | Writer | Purpose |
//! |--------|---------|
//! | [`HttpBulkWriter`] | `POST {base_url}/tables/{table}/bulk` over reqwest |
//! | [`MemoryWriter`] | In-process capture for tests and dry runs |

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::RemoteConfig;
use crate::error::{ConfigError, WriteError};
use crate::store::{Batch, Record};

// =============================================================================
// Writer contract
// =============================================================================

/// Answer from the remote store for one bulk insert
#[derive(Debug, Clone, PartialEq)]
pub struct WriteResponse {
    /// HTTP-style status code
    pub status_code: u16,
    /// Error detail on failure (JSON if the body parsed, else a string)
    pub body: serde_json::Value,
}

impl WriteResponse {
    /// A bare 200 response
    pub fn ok() -> Self {
        Self::status(200)
    }

    /// A response with the given status and no body
    pub fn status(status_code: u16) -> Self {
        Self {
            status_code,
            body: serde_json::Value::Null,
        }
    }

    /// Whether the batch was accepted
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Whether the failure is transient and worth another attempt
    pub fn is_retryable(&self) -> bool {
        is_retryable_status(self.status_code)
    }
}

/// Server errors, rate limits and request timeouts are transient
pub fn is_retryable_status(status_code: u16) -> bool {
    status_code >= 500 || status_code == 429 || status_code == 408
}

/// Sink for drained batches
///
/// Called concurrently from every worker; implementations must be cheap to
/// share. Retries are handled by the processor, not the writer.
#[async_trait]
pub trait RemoteWriter: Send + Sync + 'static {
    /// Insert `records` into `table` in one request
    async fn bulk_insert(&self, table: &str, records: &[Record])
    -> Result<WriteResponse, WriteError>;
}

// =============================================================================
// HTTP writer
// =============================================================================

#[derive(Serialize)]
struct BulkInsertBody<'a> {
    records: &'a [Record],
}

/// Writer for the hosted database's bulk insert endpoint
pub struct HttpBulkWriter {
    client: reqwest::Client,
    base_url: reqwest::Url,
    config: RemoteConfig,
}

impl HttpBulkWriter {
    /// Create a writer, validating the remote config
    pub fn new(config: RemoteConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let base_url = reqwest::Url::parse(&config.base_url)
            .map_err(|e| ConfigError::invalid_value("remote", "base_url", e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::invalid_value(
                "remote",
                "base_url",
                format!("'{}' cannot carry a path", config.base_url),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::invalid_value("remote", "client", e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    /// Endpoint for a table's bulk insert
    ///
    /// The table name is percent-encoded as a single path segment.
    pub fn table_url(&self, table: &str) -> reqwest::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["tables", table, "bulk"]);
        }
        url
    }

    /// Get reference to config
    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }
}

#[async_trait]
impl RemoteWriter for HttpBulkWriter {
    async fn bulk_insert(
        &self,
        table: &str,
        records: &[Record],
    ) -> Result<WriteResponse, WriteError> {
        let body = serde_json::to_vec(&BulkInsertBody { records })
            .map_err(|e| WriteError::Encode(e.to_string()))?;

        let mut request = self
            .client
            .post(self.table_url(table))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);

        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| WriteError::transport(e.to_string()))?;

        let status_code = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(bytes) if bytes.is_empty() => serde_json::Value::Null,
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
            }),
            Err(e) => {
                tracing::debug!(error = %e, table = %table, "failed to read response body");
                serde_json::Value::Null
            }
        };

        Ok(WriteResponse { status_code, body })
    }
}

// =============================================================================
// Memory writer
// =============================================================================

/// Scripted result for one [`MemoryWriter`] call
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Answer with this status (2xx accepts the batch)
    Status(u16),
    /// Fail without a status
    Transport(String),
    /// Panic inside the writer
    Panic,
}

/// Writer that keeps accepted batches in memory
///
/// Calls consume scripted outcomes first and fall back to the default
/// outcome (200 unless changed) once the script runs out.
pub struct MemoryWriter {
    accepted: Mutex<Vec<Batch>>,
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    delay: Duration,
    calls: AtomicU64,
}

impl Default for MemoryWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWriter {
    /// Writer that accepts everything
    pub fn new() -> Self {
        Self {
            accepted: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            fallback: Outcome::Status(200),
            delay: Duration::ZERO,
            calls: AtomicU64::new(0),
        }
    }

    /// Play these outcomes in order before falling back
    #[must_use]
    pub fn with_script(self, outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        self.script.lock().extend(outcomes);
        self
    }

    /// Outcome once the script is exhausted
    #[must_use]
    pub fn with_fallback(mut self, outcome: Outcome) -> Self {
        self.fallback = outcome;
        self
    }

    /// Simulated round-trip latency per call
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Accepted batches in completion order
    pub fn batches(&self) -> Vec<Batch> {
        self.accepted.lock().clone()
    }

    /// Accepted records for one table, in completion order
    pub fn records(&self, table: &str) -> Vec<Record> {
        self.accepted
            .lock()
            .iter()
            .filter(|b| b.table == table)
            .flat_map(|b| b.records.iter().cloned())
            .collect()
    }

    /// Accepted record count per table
    pub fn counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for batch in self.accepted.lock().iter() {
            *counts.entry(batch.table.clone()).or_insert(0) += batch.len();
        }
        counts
    }

    /// Number of `bulk_insert` calls, including failed ones
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RemoteWriter for MemoryWriter {
    async fn bulk_insert(
        &self,
        table: &str,
        records: &[Record],
    ) -> Result<WriteResponse, WriteError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match outcome {
            Outcome::Status(status_code) => {
                let response = WriteResponse::status(status_code);
                if response.is_success() {
                    self.accepted.lock().push(Batch {
                        table: table.to_string(),
                        records: records.to_vec(),
                    });
                }
                Ok(response)
            }
            Outcome::Transport(message) => Err(WriteError::Transport(message)),
            Outcome::Panic => panic!("scripted writer panic for table {table}"),
        }
    }
}

#[cfg(test)]
#[path = "writer_test.rs"]
mod writer_test;
