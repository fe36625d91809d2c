//! Tests for the per-table record store

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;

use super::*;

// =============================================================================
// Test Helpers
// =============================================================================

fn record(id: u64) -> Record {
    let mut record = Record::new();
    record.insert("id".into(), json!(id));
    record.insert("name".into(), json!(format!("row-{id}")));
    record
}

fn records(range: std::ops::Range<u64>) -> Vec<Record> {
    range.map(record).collect()
}

fn ids(batch: &Batch) -> Vec<u64> {
    batch
        .records
        .iter()
        .map(|r| r["id"].as_u64().expect("id"))
        .collect()
}

/// Store whose timer never fires during a test
fn size_only_store(batch_size: usize) -> RecordStore {
    RecordStore::new(batch_size, Duration::from_secs(3600))
}

// =============================================================================
// Basic operations
// =============================================================================

#[test]
fn test_empty_store_has_no_batch() {
    let store = size_only_store(10);
    assert!(store.next_batch().is_none());
    assert_eq!(store.size(), 0);
    assert!(store.is_empty());
    assert!(store.table_names().is_empty());
}

#[test]
fn test_put_creates_table_lazily() {
    let store = size_only_store(10);
    store.put("users", records(0..3));
    store.put("orders", records(0..2));
    store.put("users", records(3..4));

    assert_eq!(store.table_names(), vec!["users", "orders"]);
    assert_eq!(store.len("users"), 4);
    assert_eq!(store.len("orders"), 2);
    assert_eq!(store.len("unknown"), 0);
    assert_eq!(store.size(), 6);
    assert!(!store.is_empty());
}

#[test]
fn test_put_empty_is_noop() {
    let store = size_only_store(10);
    store.put("users", Vec::new());
    assert!(store.table_names().is_empty());
}

#[test]
fn test_batch_size_clamped() {
    let store = RecordStore::new(0, Duration::ZERO);
    assert_eq!(store.batch_size(), 1);
}

#[test]
fn test_set_flush_interval() {
    let store = size_only_store(10);
    assert_eq!(store.flush_interval(), Duration::from_secs(3600));
    store.set_flush_interval(Duration::from_millis(5));
    assert_eq!(store.flush_interval(), Duration::from_millis(5));
}

// =============================================================================
// Triggers
// =============================================================================

#[test]
fn test_below_batch_size_not_due() {
    let store = size_only_store(25);
    store.put("users", records(0..24));

    assert!(store.next_batch().is_none());
    assert_eq!(store.len("users"), 24);
}

#[test]
fn test_size_trigger() {
    let store = size_only_store(25);
    store.put("users", records(0..25));

    let batch = store.next_batch().expect("due at exactly batch_size");
    assert_eq!(batch.table, "users");
    assert_eq!(batch.len(), 25);
    assert_eq!(store.len("users"), 0);
}

#[test]
fn test_size_trigger_caps_batch() {
    let store = size_only_store(10);
    store.put("users", records(0..25));

    assert_eq!(store.next_batch().expect("first").len(), 10);
    assert_eq!(store.next_batch().expect("second").len(), 10);
    // 5 left, below batch size and the timer is far away
    assert!(store.next_batch().is_none());
    assert_eq!(store.len("users"), 5);
}

#[test]
fn test_time_trigger() {
    let store = RecordStore::new(25, Duration::from_millis(100));
    store.put("users", records(0..1));

    assert!(store.next_batch().is_none());

    thread::sleep(Duration::from_millis(150));

    let batch = store.next_batch().expect("due after flush interval");
    assert_eq!(ids(&batch), vec![0]);
    assert!(store.is_empty());
}

#[test]
fn test_time_trigger_resets_after_drain() {
    let store = RecordStore::new(25, Duration::from_millis(100));
    store.put("users", records(0..1));
    thread::sleep(Duration::from_millis(150));
    assert!(store.next_batch().is_some());

    store.put("users", records(1..2));
    assert!(store.next_batch().is_none());
}

#[test]
fn test_zero_flush_interval_drains_immediately() {
    let store = RecordStore::new(25, Duration::ZERO);
    store.put("users", records(0..3));

    let batch = store.next_batch().expect("zero interval is always due");
    assert_eq!(batch.len(), 3);
}

#[test]
fn test_max_flush_interval_never_time_flushes() {
    let store = RecordStore::new(25, Duration::MAX);
    store.put("users", records(0..1));

    assert!(store.next_batch().is_none());
    assert!(!store.flush_interval().is_zero());
    assert_eq!(store.len("users"), 1);
}

// =============================================================================
// Ordering and fairness
// =============================================================================

#[test]
fn test_fifo_across_batches() {
    let store = size_only_store(4);
    store.put("events", records(0..6));
    store.put("events", records(6..12));

    let mut seen = Vec::new();
    while let Some(batch) = store.next_batch() {
        seen.extend(ids(&batch));
    }

    assert_eq!(seen, (0..12).collect::<Vec<_>>());
}

#[test]
fn test_round_robin_does_not_starve() {
    let store = RecordStore::new(25, Duration::from_millis(50));
    store.put("hot", records(0..1000));
    store.put("quiet", records(5000..5001));

    thread::sleep(Duration::from_millis(80));

    let tables = store.table_names().len();
    let mut found = false;
    for _ in 0..tables {
        if let Some(batch) = store.next_batch()
            && batch.table == "quiet"
        {
            assert_eq!(ids(&batch), vec![5000]);
            found = true;
            break;
        }
    }

    assert!(found, "quiet table starved by hot table");
}

#[test]
fn test_round_robin_alternates_tables() {
    let store = size_only_store(2);
    store.put("a", records(0..10));
    store.put("b", records(100..110));

    let order: Vec<String> = (0..4)
        .filter_map(|_| store.next_batch())
        .map(|b| b.table)
        .collect();

    assert_eq!(order, vec!["a", "b", "a", "b"]);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_batches_are_disjoint() {
    let store = Arc::new(size_only_store(7));
    let total = 1000u64;
    store.put("events", records(0..total));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(batch) = store.next_batch() {
                    seen.extend(ids(&batch));
                }
                seen
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.join().expect("worker thread"));
    }

    let unique: HashSet<u64> = all.iter().copied().collect();
    assert_eq!(unique.len(), all.len(), "a record was popped twice");

    // Only the final partial batch may remain
    let remainder = total as usize % 7;
    assert_eq!(all.len(), total as usize - remainder);
    assert_eq!(store.len("events"), remainder);
}

#[test]
fn test_concurrent_producers_new_tables() {
    let store = Arc::new(size_only_store(1000));

    let handles: Vec<_> = (0..8u64)
        .map(|p| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..100 {
                    let table = format!("table_{}", i % 4);
                    store.put(&table, [record(p * 1000 + i)]);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("producer thread");
    }

    assert_eq!(store.table_names().len(), 4);
    assert_eq!(store.size(), 800);
    for i in 0..4 {
        assert_eq!(store.len(&format!("table_{i}")), 200);
    }
}
