//! Strata - Bulk ingestion
//!
//! Buffers records per table and pushes them to a remote store in bounded
//! batches, using a fixed pool of concurrent workers.
//!
//! # Architecture
//!
//! Producers append records to a [`RecordStore`], which keeps one FIFO queue
//! per table. Workers visit tables round-robin and take a batch whenever a
//! table holds a full batch or has waited longer than the flush interval.
//!
//! ```text
//! [put_record] --> [RecordStore: table -> FIFO] --> worker 0..N --> [RemoteWriter]
//! ```
//!
//! # Writers
//!
//! | Writer | Purpose |
//! |--------|---------|
//! | [`HttpBulkWriter`] | Hosted database bulk endpoint |
//! | [`MemoryWriter`] | Tests and dry runs |
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use strata_bulk::{BulkProcessor, HttpBulkWriter, ProcessorConfig, RemoteConfig};
//!
//! let writer = HttpBulkWriter::new(RemoteConfig::new("https://db.example.com/v1"))?;
//! let processor = BulkProcessor::new(ProcessorConfig::default(), Arc::new(writer))?;
//!
//! processor.put_record("users", record);
//! let stats = processor.close().await;
//! println!("pushed {} records", stats.total);
//! ```

// =============================================================================
// Core
// =============================================================================

/// Per-table FIFO queues and batch selection
pub mod store;

/// Worker pool, retries and draining
pub mod processor;

/// Remote writer contract and implementations
pub mod writer;

// =============================================================================
// Support
// =============================================================================

pub mod config;
pub mod error;
pub mod metrics;

/// Logging helpers shared by the workers
pub mod util;

pub use config::{ProcessorConfig, RemoteConfig};
pub use error::{ConfigError, ProcessorError, WriteError};
pub use metrics::{ProcessorMetrics, ProcessorMetricsHandle, Stats};
pub use processor::BulkProcessor;
pub use store::{Batch, Record, RecordStore};
pub use writer::{
    HttpBulkWriter, MemoryWriter, Outcome, RemoteWriter, WriteResponse, is_retryable_status,
};
