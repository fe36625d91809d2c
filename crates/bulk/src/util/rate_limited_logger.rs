//! Rate-limited logging of dropped batches
//!
//! Under a persistent remote outage every worker drops a batch per cycle.
//! Logging each one would flood the output, so failures are logged at most
//! once per interval with a count of the ones suppressed in between.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default interval between dropped-batch log lines
pub const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Logs at most once per interval; counts every call
pub struct RateLimitedLogger {
    /// Minimum interval between log messages
    min_interval: Duration,

    /// Last time we logged
    last_log_time: Mutex<Option<Instant>>,

    /// Failures since last log
    suppressed: AtomicU64,

    /// Failures ever recorded
    total: AtomicU64,
}

impl RateLimitedLogger {
    /// Create a new rate-limited logger with the specified interval
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_log_time: Mutex::new(None),
            suppressed: AtomicU64::new(0),
            total: AtomicU64::new(0),
        }
    }

    /// Record a dropped batch and log it if the interval has passed
    ///
    /// Returns true if a line was emitted.
    pub fn dropped_batch(
        &self,
        table: &str,
        records: usize,
        attempts: u32,
        reason: &dyn std::fmt::Display,
    ) -> bool {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
        let total = self.total.fetch_add(1, Ordering::Relaxed) + 1;

        if !self.should_log() {
            return false;
        }

        let count = self.suppressed.swap(0, Ordering::Relaxed);
        tracing::error!(
            table = %table,
            records,
            attempts,
            reason = %reason,
            suppressed_count = count.saturating_sub(1),
            total_dropped = total,
            "dropped batch after failed push"
        );
        true
    }

    /// Failures recorded since the last emitted line
    pub fn pending_count(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    /// Failures ever recorded
    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn should_log(&self) -> bool {
        let mut last_time = self.last_log_time.lock();
        let now = Instant::now();

        match *last_time {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                *last_time = Some(now);
                true
            }
        }
    }
}

impl Default for RateLimitedLogger {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_INTERVAL)
    }
}
