//! Bulk processor statistics
//!
//! Atomic counters shared by every worker. Each field is updated atomically
//! on its own; a [`Stats`] snapshot reads the fields one after another and is
//! therefore not a single transaction across fields.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::store::RecordStore;

// =============================================================================
// Metrics
// =============================================================================

/// Counters for a running [`BulkProcessor`](crate::BulkProcessor)
#[derive(Debug, Default)]
pub struct ProcessorMetrics {
    /// Records pushed successfully, all tables
    total: AtomicU64,

    /// Batches pushed successfully
    batches_written: AtomicU64,

    /// Batches dropped after a failed push
    failed_batches: AtomicU64,

    /// Records inside dropped batches
    failed_records: AtomicU64,

    /// Retry attempts across all batches
    retry_count: AtomicU64,

    /// Records popped from the store whose push has not resolved yet
    in_flight: AtomicU64,

    /// Records pushed successfully, per table
    tables: Mutex<HashMap<String, u64>>,
}

impl ProcessorMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successfully pushed batch
    pub fn record_batch_written(&self, table: &str, count: u64) {
        self.total.fetch_add(count, Ordering::Relaxed);
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        *self.tables.lock().entry(table.to_string()).or_insert(0) += count;
    }

    /// Record a batch that was dropped
    #[inline]
    pub fn record_failed_batch(&self, count: u64) {
        self.failed_batches.fetch_add(1, Ordering::Relaxed);
        self.failed_records.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a retry attempt
    #[inline]
    pub fn record_retry(&self) {
        self.retry_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark `count` records as in flight until the guard is dropped
    pub fn begin_flight(&self, count: u64) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(count, Ordering::AcqRel);
        InFlightGuard {
            metrics: self,
            count,
        }
    }

    /// Records currently being pushed
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Snapshot every counter; `queue` is supplied by the caller
    pub fn snapshot(&self, queue: usize) -> Stats {
        Stats {
            total: self.total.load(Ordering::Relaxed),
            queue: queue as u64,
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            tables: self
                .tables
                .lock()
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            failed_records: self.failed_records.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            retry_count: self.retry_count.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Acquire),
        }
    }
}

/// Clears an in-flight reservation on drop, including during unwinding
#[must_use]
pub struct InFlightGuard<'a> {
    metrics: &'a ProcessorMetrics,
    count: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.metrics.in_flight.fetch_sub(self.count, Ordering::AcqRel);
    }
}

/// Point-in-time view of processor statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Records pushed successfully
    pub total: u64,
    /// Records still queued in the store
    pub queue: u64,
    /// Batches dropped after failing to push
    pub failed_batches: u64,
    /// Records pushed successfully, per table
    pub tables: BTreeMap<String, u64>,
    /// Records lost with dropped batches
    pub failed_records: u64,
    /// Batches pushed successfully
    pub batches_written: u64,
    /// Retry attempts
    pub retry_count: u64,
    /// Records popped but not yet resolved
    pub in_flight: u64,
}

impl Stats {
    /// Records pushed successfully for one table
    pub fn table(&self, table: &str) -> u64 {
        self.tables.get(table).copied().unwrap_or(0)
    }
}

// =============================================================================
// Metrics Handle
// =============================================================================

/// Cloneable handle for reading processor stats from anywhere
///
/// Holds Arcs to the counters and the store, so it stays valid after the
/// processor has been shut down.
#[derive(Clone)]
pub struct ProcessorMetricsHandle {
    metrics: Arc<ProcessorMetrics>,
    store: Arc<RecordStore>,
}

impl ProcessorMetricsHandle {
    /// Create a new metrics handle
    pub fn new(metrics: Arc<ProcessorMetrics>, store: Arc<RecordStore>) -> Self {
        Self { metrics, store }
    }

    /// Current stats, with `queue` recomputed from the store
    pub fn stats(&self) -> Stats {
        self.metrics.snapshot(self.store.size())
    }
}
