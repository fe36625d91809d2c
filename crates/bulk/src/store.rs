//! Per-table record store
//!
//! Thread-safe accumulation of pending records, keyed by table name, with
//! FIFO batched withdrawal.
//!
//! # Locking
//!
//! Two independent levels:
//!
//! - the **mapping lock** (`RwLock`) covers only the set of known tables and
//!   their insertion order;
//! - each **table lock** (`Mutex`) covers that table's records and its last
//!   flush time.
//!
//! The mapping lock is always released before a table lock is taken, so the
//! two are never held together. A busy table never blocks producers or
//! workers on another table.
//!
//! # Readiness
//!
//! A table is due when it holds at least `batch_size` records, or when it is
//! non-empty and more than `flush_interval` has passed since its last drain.
//! [`RecordStore::next_batch`] visits tables round-robin, so a hot table
//! cannot starve a quiet one that is waiting on the timer.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

/// A single pending record: a JSON object of field name to value
///
/// Records are not validated locally; the remote store rejects bad ones.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Records drained from one table in a single [`RecordStore::next_batch`] call
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Table the records belong to
    pub table: String,
    /// Up to `batch_size` records, oldest first
    pub records: Vec<Record>,
}

impl Batch {
    /// Number of records in the batch
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// =============================================================================
// Table queue
// =============================================================================

struct QueueState {
    records: VecDeque<Record>,
    last_flushed_at: Instant,
}

/// Pending records for one table, behind the table's own lock
struct TableQueue {
    state: Mutex<QueueState>,
}

impl TableQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                records: VecDeque::new(),
                last_flushed_at: Instant::now(),
            }),
        }
    }

    fn len(&self) -> usize {
        self.state.lock().records.len()
    }
}

/// Known tables in first-seen order
#[derive(Default)]
struct TableIndex {
    names: Vec<String>,
    queues: HashMap<String, Arc<TableQueue>>,
}

// =============================================================================
// Record store
// =============================================================================

/// Thread-safe per-table FIFO queues with round-robin batch withdrawal
pub struct RecordStore {
    tables: RwLock<TableIndex>,

    /// Round-robin position; taken modulo the current table count
    cursor: AtomicUsize,

    batch_size: usize,

    /// Flush interval in nanoseconds, shared by every readiness check
    flush_interval_nanos: AtomicU64,
}

impl RecordStore {
    /// Create an empty store
    ///
    /// `batch_size` is clamped to at least 1.
    pub fn new(batch_size: usize, flush_interval: Duration) -> Self {
        Self {
            tables: RwLock::new(TableIndex::default()),
            cursor: AtomicUsize::new(0),
            batch_size: batch_size.max(1),
            flush_interval_nanos: AtomicU64::new(duration_to_nanos(flush_interval)),
        }
    }

    /// Maximum records returned per batch
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Current flush interval
    pub fn flush_interval(&self) -> Duration {
        Duration::from_nanos(self.flush_interval_nanos.load(Ordering::Relaxed))
    }

    /// Change the flush interval used by all future readiness checks
    ///
    /// Setting it to zero makes every non-empty table due on its next visit.
    pub fn set_flush_interval(&self, interval: Duration) {
        self.flush_interval_nanos
            .store(duration_to_nanos(interval), Ordering::Relaxed);
    }

    /// Append records to a table's queue, creating the table on first use
    pub fn put(&self, table: &str, records: impl IntoIterator<Item = Record>) {
        let mut records = records.into_iter().peekable();
        if records.peek().is_none() {
            return;
        }

        let queue = self.queue_or_create(table);
        let mut state = queue.state.lock();
        state.records.extend(records);
    }

    /// Drain the next due batch, visiting tables round-robin
    ///
    /// Returns `None` when no table is known or the visited table is not due.
    /// `None` is not an error: callers should simply try again later.
    pub fn next_batch(&self) -> Option<Batch> {
        let (table, queue) = {
            let index = self.tables.read();
            if index.names.is_empty() {
                return None;
            }
            let position = self.cursor.fetch_add(1, Ordering::Relaxed) % index.names.len();
            let table = index.names[position].clone();
            let queue = Arc::clone(index.queues.get(&table)?);
            (table, queue)
        };

        let flush_interval = self.flush_interval();
        let mut state = queue.state.lock();

        let pending = state.records.len();
        if pending == 0 {
            return None;
        }

        let flush_needed =
            flush_interval.is_zero() || state.last_flushed_at.elapsed() > flush_interval;
        if pending < self.batch_size && !flush_needed {
            return None;
        }

        let take = pending.min(self.batch_size);
        let records: Vec<Record> = state.records.drain(..take).collect();
        state.last_flushed_at = Instant::now();

        Some(Batch { table, records })
    }

    /// Queued records for one table (0 if the table is unknown)
    pub fn len(&self, table: &str) -> usize {
        let queue = self.tables.read().queues.get(table).cloned();
        queue.map_or(0, |q| q.len())
    }

    /// Queued records across all tables
    ///
    /// Best-effort: each table is counted under its own lock, so the sum is
    /// not a single point-in-time total while producers are active.
    pub fn size(&self) -> usize {
        self.snapshot_queues().iter().map(|q| q.len()).sum()
    }

    /// Whether every table is empty
    pub fn is_empty(&self) -> bool {
        self.snapshot_queues().iter().all(|q| q.len() == 0)
    }

    /// Known table names, in first-seen order
    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().names.clone()
    }

    fn queue_or_create(&self, table: &str) -> Arc<TableQueue> {
        if let Some(queue) = self.tables.read().queues.get(table) {
            return Arc::clone(queue);
        }

        let mut index = self.tables.write();
        // Another producer may have created it between the two locks
        if let Some(queue) = index.queues.get(table) {
            return Arc::clone(queue);
        }

        let queue = Arc::new(TableQueue::new());
        index.names.push(table.to_string());
        index.queues.insert(table.to_string(), Arc::clone(&queue));
        tracing::debug!(table = %table, tables = index.names.len(), "registered table");
        queue
    }

    fn snapshot_queues(&self) -> Vec<Arc<TableQueue>> {
        self.tables.read().queues.values().cloned().collect()
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("tables", &self.table_names())
            .field("batch_size", &self.batch_size)
            .field("flush_interval", &self.flush_interval())
            .finish()
    }
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;
