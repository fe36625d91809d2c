//! Bulk processor
//!
//! A fixed pool of tokio workers that drain due batches from the
//! [`RecordStore`] and push them through a [`RemoteWriter`].
//!
//! ```text
//! producers --put_record(s)--> [RecordStore] <--next_batch-- worker 0..N --> [RemoteWriter]
//!                                                               |
//!                                                               +--> ProcessorMetrics
//! ```
//!
//! # Failure policy
//!
//! Transient failures (5xx, 429, 408, transport errors) are retried with
//! capped exponential backoff, up to `retry_attempts` times. Permanent
//! failures and exhausted retries drop the batch: it is counted in
//! `failed_batches` / `failed_records` and never re-queued. A panicking
//! writer counts as a failed push; the worker keeps running.
//!
//! # Draining
//!
//! [`BulkProcessor::flush_queue`] makes every table due immediately and waits
//! until the store is empty *and* no worker is holding a popped batch, so
//! every record queued before the call has either been pushed or dropped
//! when it returns.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ProcessorConfig;
use crate::error::{ProcessorError, WriteError};
use crate::metrics::{ProcessorMetrics, ProcessorMetricsHandle, Stats};
use crate::store::{Batch, Record, RecordStore};
use crate::util::RateLimitedLogger;
use crate::writer::{RemoteWriter, WriteResponse};

/// Pause between convergence checks in `flush_queue`
const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(10);

// =============================================================================
// Worker context
// =============================================================================

/// State shared by every worker of one processor
struct WorkerContext {
    store: Arc<RecordStore>,
    writer: Arc<dyn RemoteWriter>,
    metrics: Arc<ProcessorMetrics>,
    config: ProcessorConfig,

    /// Sleep between batch attempts, in nanoseconds; lowered while draining
    processing_timeout_nanos: AtomicU64,

    /// Workers between "about to pop" and "push resolved"
    active: AtomicUsize,

    /// Cuts worker pauses short when `flush_queue` starts
    wake: Notify,

    failures: RateLimitedLogger,
    cancel: CancellationToken,
}

impl WorkerContext {
    fn processing_timeout(&self) -> Duration {
        Duration::from_nanos(self.processing_timeout_nanos.load(Ordering::Relaxed))
    }

    fn set_processing_timeout(&self, timeout: Duration) {
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        self.processing_timeout_nanos.store(nanos, Ordering::Relaxed);
    }

    /// True when nothing is queued and no popped batch is unresolved
    fn is_drained(&self) -> bool {
        // Size first: a batch popped before this read is visible in `active`
        self.store.size() == 0 && self.active.load(Ordering::SeqCst) == 0
    }

    /// Push one batch, retrying transient failures
    async fn push(&self, batch: Batch) {
        let count = batch.len() as u64;
        let _flight = self.metrics.begin_flight(count);
        let mut attempt = 0u32;

        loop {
            let result = AssertUnwindSafe(self.writer.bulk_insert(&batch.table, &batch.records))
                .catch_unwind()
                .await
                .unwrap_or(Err(WriteError::Panicked));

            let failure = match result {
                Ok(response) if response.is_success() => {
                    self.metrics.record_batch_written(&batch.table, count);
                    tracing::debug!(
                        table = %batch.table,
                        count,
                        attempt,
                        "flushed batch"
                    );
                    return;
                }
                Ok(response) => PushFailure::Rejected(response),
                Err(error) => PushFailure::Failed(error),
            };

            if failure.is_retryable() && attempt < self.config.retry_attempts {
                let delay = self.config.retry_delay(attempt);
                attempt += 1;
                self.metrics.record_retry();
                tracing::warn!(
                    table = %batch.table,
                    attempt,
                    max_attempts = self.config.retry_attempts,
                    delay_ms = delay.as_millis(),
                    reason = %failure,
                    "retrying batch"
                );

                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        self.drop_batch(&batch, attempt, &failure);
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }

            self.drop_batch(&batch, attempt + 1, &failure);
            return;
        }
    }

    fn drop_batch(&self, batch: &Batch, attempts: u32, failure: &PushFailure) {
        self.metrics.record_failed_batch(batch.len() as u64);
        self.failures
            .dropped_batch(&batch.table, batch.len(), attempts, failure);
    }
}

/// Why a push attempt did not succeed
enum PushFailure {
    /// The remote store answered with a non-2xx status
    Rejected(WriteResponse),
    /// No status was obtained
    Failed(WriteError),
}

impl PushFailure {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Rejected(response) => response.is_retryable(),
            Self::Failed(error) => error.is_retryable(),
        }
    }
}

impl std::fmt::Display for PushFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected(response) if response.body.is_null() => {
                write!(f, "status {}", response.status_code)
            }
            Self::Rejected(response) => {
                write!(f, "status {}: {}", response.status_code, response.body)
            }
            Self::Failed(error) => write!(f, "{error}"),
        }
    }
}

/// Decrements the active-worker count on drop
struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(active: &'a AtomicUsize) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn run_worker(ctx: Arc<WorkerContext>, id: usize) {
    tracing::debug!(worker = id, "bulk worker started");

    while !ctx.cancel.is_cancelled() {
        {
            let _active = ActiveGuard::enter(&ctx.active);
            if let Some(batch) = ctx.store.next_batch() {
                ctx.push(batch).await;
            }
        }

        // Registered before the pause is read, so a flush starting in between wakes us
        let wake = ctx.wake.notified();
        tokio::pin!(wake);
        wake.as_mut().enable();

        let pause = ctx.processing_timeout();
        if pause.is_zero() {
            tokio::task::yield_now().await;
            continue;
        }

        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            _ = &mut wake => {}
            _ = tokio::time::sleep(pause) => {}
        }
    }

    tracing::debug!(worker = id, "bulk worker stopped");
}

// =============================================================================
// Bulk processor
// =============================================================================

/// Multi-worker batching pipeline in front of a remote store
///
/// Workers start as soon as the processor is created and run until
/// [`shutdown`](Self::shutdown), [`close`](Self::close) or drop.
pub struct BulkProcessor {
    ctx: Arc<WorkerContext>,
    workers: Vec<JoinHandle<()>>,

    /// Concurrent `flush_queue` calls; the last one out restores the intervals
    draining: AtomicUsize,
}

impl BulkProcessor {
    /// Validate `config` and start `thread_pool_size` workers
    ///
    /// Must be called from within a tokio runtime. On error no worker has
    /// been started.
    pub fn new(
        config: ProcessorConfig,
        writer: Arc<dyn RemoteWriter>,
    ) -> Result<Self, ProcessorError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| ProcessorError::NoRuntime)?;

        let store = Arc::new(RecordStore::new(
            config.batch_size,
            config.flush_interval(),
        ));

        let ctx = Arc::new(WorkerContext {
            store,
            writer,
            metrics: Arc::new(ProcessorMetrics::new()),
            processing_timeout_nanos: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            wake: Notify::new(),
            failures: RateLimitedLogger::default(),
            cancel: CancellationToken::new(),
            config,
        });
        ctx.set_processing_timeout(ctx.config.processing_timeout());

        let workers = (0..ctx.config.thread_pool_size)
            .map(|id| runtime.spawn(run_worker(Arc::clone(&ctx), id)))
            .collect();

        tracing::info!(
            workers = ctx.config.thread_pool_size,
            batch_size = ctx.config.batch_size,
            flush_interval_ms = ctx.config.flush_interval().as_millis(),
            processing_timeout_ms = ctx.config.processing_timeout().as_millis(),
            retry_attempts = ctx.config.retry_attempts,
            "bulk processor started"
        );

        Ok(Self {
            ctx,
            workers,
            draining: AtomicUsize::new(0),
        })
    }

    /// Queue one record for `table`
    pub fn put_record(&self, table: &str, record: Record) {
        self.ctx.store.put(table, [record]);
    }

    /// Queue records for `table`, preserving their order
    pub fn put_records(&self, table: &str, records: impl IntoIterator<Item = Record>) {
        self.ctx.store.put(table, records);
    }

    /// Snapshot of the statistics, with `queue` read from the store
    pub fn get_stats(&self) -> Stats {
        self.ctx.metrics.snapshot(self.ctx.store.size())
    }

    /// Push everything queued and wait until it has been resolved
    ///
    /// Forces the flush interval and the worker pause to zero for the
    /// duration of the call. Producers may keep writing; the call returns
    /// once the queue was observed empty with no batch in flight.
    pub async fn flush_queue(&self) -> Stats {
        self.draining.fetch_add(1, Ordering::AcqRel);
        self.ctx.store.set_flush_interval(Duration::ZERO);
        self.ctx.set_processing_timeout(Duration::ZERO);
        self.ctx.wake.notify_waiters();

        tracing::info!(queued = self.ctx.store.size(), "flushing queue");

        while !self.ctx.is_drained() {
            if self.workers.iter().all(|w| w.is_finished()) {
                tracing::warn!(
                    queued = self.ctx.store.size(),
                    "no running workers, flush abandoned"
                );
                break;
            }
            tokio::time::sleep(FLUSH_POLL_INTERVAL).await;
        }

        if self.draining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.ctx
                .store
                .set_flush_interval(self.ctx.config.flush_interval());
            self.ctx
                .set_processing_timeout(self.ctx.config.processing_timeout());
        }

        let stats = self.get_stats();
        tracing::info!(
            total = stats.total,
            failed_batches = stats.failed_batches,
            queue = stats.queue,
            "queue flushed"
        );
        stats
    }

    /// Stop every worker and wait for them to exit
    ///
    /// Pushes already in progress finish first; records still queued stay
    /// in the store and are not pushed.
    pub async fn shutdown(mut self) -> Stats {
        self.ctx.cancel.cancel();

        for worker in std::mem::take(&mut self.workers) {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "bulk worker failed");
            }
        }

        let stats = self.get_stats();
        tracing::info!(
            total = stats.total,
            failed_batches = stats.failed_batches,
            retries = stats.retry_count,
            left_queued = stats.queue,
            "bulk processor stopped"
        );
        stats
    }

    /// Drain the queue, then shut down
    pub async fn close(self) -> Stats {
        self.flush_queue().await;
        self.shutdown().await
    }

    /// Handle for reading stats after the processor has moved
    pub fn metrics_handle(&self) -> ProcessorMetricsHandle {
        ProcessorMetricsHandle::new(
            Arc::clone(&self.ctx.metrics),
            Arc::clone(&self.ctx.store),
        )
    }

    /// Read access to the underlying store
    pub fn store(&self) -> &RecordStore {
        &self.ctx.store
    }

    /// Get reference to config
    pub fn config(&self) -> &ProcessorConfig {
        &self.ctx.config
    }

    /// Number of workers still running
    pub fn running_workers(&self) -> usize {
        self.workers.iter().filter(|w| !w.is_finished()).count()
    }
}

impl Drop for BulkProcessor {
    fn drop(&mut self) {
        self.ctx.cancel.cancel();
    }
}

#[cfg(test)]
#[path = "processor_test.rs"]
mod processor_test;
