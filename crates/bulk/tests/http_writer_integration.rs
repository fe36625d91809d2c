//! Integration tests for the HTTP bulk writer against a local axum server

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use strata_bulk::{
    BulkProcessor, HttpBulkWriter, ProcessorConfig, Record, RemoteConfig, RemoteWriter, WriteError,
};

// =============================================================================
// Mock server
// =============================================================================

/// One request as seen by the mock server
#[derive(Debug, Clone)]
struct Received {
    table: String,
    authorization: Option<String>,
    content_type: Option<String>,
    body: Value,
}

#[derive(Clone, Default)]
struct MockState {
    received: Arc<Mutex<Vec<Received>>>,
    /// Requests to answer with 503 before accepting
    fail_first: Arc<AtomicUsize>,
}

async fn bulk_handler(
    State(state): State<MockState>,
    Path(table): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    state.received.lock().push(Received {
        table: table.clone(),
        authorization: header_value(header::AUTHORIZATION),
        content_type: header_value(header::CONTENT_TYPE),
        body,
    });

    let remaining = state.fail_first.load(Ordering::SeqCst);
    if remaining > 0 {
        state.fail_first.store(remaining - 1, Ordering::SeqCst);
        return (StatusCode::SERVICE_UNAVAILABLE, "try again later").into_response();
    }

    match table.as_str() {
        "forbidden" => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "unknown table"})),
        )
            .into_response(),
        _ => StatusCode::OK.into_response(),
    }
}

async fn spawn_server(state: MockState) -> String {
    let app = Router::new()
        .route("/db/main/tables/{table}/bulk", post(bulk_handler))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().expect("failed to get addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock server failed");
    });

    format!("http://{addr}/db/main")
}

fn record(id: u64) -> Record {
    let mut record = Record::new();
    record.insert("id".into(), json!(id));
    record.insert("name".into(), json!(format!("user-{id}")));
    record
}

// =============================================================================
// Writer
// =============================================================================

#[tokio::test]
async fn test_posts_path_auth_and_body() {
    let state = MockState::default();
    let base_url = spawn_server(state.clone()).await;

    let writer = HttpBulkWriter::new(RemoteConfig::new(base_url).with_api_key("key_abc123")).unwrap();
    let response = writer.bulk_insert("users", &[record(1), record(2)]).await.unwrap();
    assert_eq!(response.status_code, 200);
    assert!(response.is_success());

    let received = state.received.lock().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].table, "users");
    assert_eq!(received[0].authorization.as_deref(), Some("Bearer key_abc123"));
    assert_eq!(received[0].content_type.as_deref(), Some("application/json"));
    assert_eq!(
        received[0].body,
        json!({"records": [
            {"id": 1, "name": "user-1"},
            {"id": 2, "name": "user-2"},
        ]})
    );
}

#[tokio::test]
async fn test_no_auth_header_without_key() {
    let state = MockState::default();
    let base_url = spawn_server(state.clone()).await;

    let writer = HttpBulkWriter::new(RemoteConfig::new(base_url)).unwrap();
    writer.bulk_insert("users", &[record(1)]).await.unwrap();

    assert_eq!(state.received.lock()[0].authorization, None);
}

#[tokio::test]
async fn test_table_name_sent_as_one_segment() {
    let state = MockState::default();
    let base_url = spawn_server(state.clone()).await;

    let writer = HttpBulkWriter::new(RemoteConfig::new(base_url)).unwrap();
    let response = writer.bulk_insert("a/b?c#d", &[record(1)]).await.unwrap();
    assert_eq!(response.status_code, 200);

    let received = state.received.lock().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].table, "a/b?c#d");
}

#[tokio::test]
async fn test_error_bodies() {
    let state = MockState::default();
    let base_url = spawn_server(state.clone()).await;
    let writer = HttpBulkWriter::new(RemoteConfig::new(base_url)).unwrap();

    // JSON error body is parsed
    let response = writer.bulk_insert("forbidden", &[record(1)]).await.unwrap();
    assert_eq!(response.status_code, 400);
    assert!(!response.is_retryable());
    assert_eq!(response.body, json!({"error": "unknown table"}));

    // Plain text error body is kept as a string
    state.fail_first.store(1, Ordering::SeqCst);
    let response = writer.bulk_insert("users", &[record(1)]).await.unwrap();
    assert_eq!(response.status_code, 503);
    assert!(response.is_retryable());
    assert_eq!(response.body, json!("try again later"));
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().expect("failed to get addr");
    drop(listener);

    let config = RemoteConfig::new(format!("http://{addr}")).with_timeout(Duration::from_secs(2));
    let writer = HttpBulkWriter::new(config).unwrap();

    let result = writer.bulk_insert("users", &[record(1)]).await;
    assert!(matches!(result, Err(WriteError::Transport(_))));
}

// =============================================================================
// End to end
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_processor_over_http_retries_then_lands() {
    let state = MockState::default();
    state.fail_first.store(1, Ordering::SeqCst);
    let base_url = spawn_server(state.clone()).await;

    let writer = HttpBulkWriter::new(RemoteConfig::new(base_url).with_api_key("k")).unwrap();
    let config = ProcessorConfig::default()
        .with_thread_pool_size(1)
        .with_batch_size(4)
        .with_processing_timeout(Duration::from_millis(1))
        .with_retry_delays(Duration::from_millis(5), Duration::from_millis(20));
    let processor = BulkProcessor::new(config, Arc::new(writer)).unwrap();

    processor.put_records("users", (0..10).map(record));
    let stats = processor.close().await;

    assert_eq!(stats.total, 10);
    assert_eq!(stats.retry_count, 1);
    assert_eq!(stats.failed_batches, 0);

    let received = state.received.lock().clone();
    let accepted: usize = received
        .iter()
        .skip(1)
        .map(|r| r.body["records"].as_array().map_or(0, Vec::len))
        .sum();
    assert_eq!(accepted, 10);
    assert!(received.iter().all(|r| r.body["records"].as_array().unwrap().len() <= 4));
}
