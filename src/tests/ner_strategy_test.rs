use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::NerServiceConfig;
use crate::models::{ColumnInfo, ColumnRef, PiiType, SampleData, SampleStatus};
use crate::services::detection::{ColumnData, DetectionStrategy, NerStrategy};

#[derive(Clone)]
struct StubState {
    detect_calls: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

async fn detect(
    State(state): State<StubState>,
    Json(request): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    state.detect_calls.fetch_add(1, Ordering::SeqCst);

    if state.failing.load(Ordering::SeqCst) {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    let samples = request["samples"].as_array().cloned().unwrap_or_default();
    let results: Vec<Value> = samples
        .iter()
        .map(|sample| {
            json!([{
                "text": sample,
                "type": "PERSON",
                "score": 0.9,
            }])
        })
        .collect();

    Ok(Json(json!({ "results": results })))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "model_loaded": true }))
}

/// In-process NER sidecar double; returns its base URL and the call counter
async fn spawn_stub() -> (String, Arc<AtomicUsize>, Arc<AtomicBool>) {
    let detect_calls = Arc::new(AtomicUsize::new(0));
    let failing = Arc::new(AtomicBool::new(false));
    let state =
        StubState { detect_calls: Arc::clone(&detect_calls), failing: Arc::clone(&failing) };

    let app = Router::new()
        .route("/detect-pii", post(detect))
        .route("/detect-pii/health", get(health))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), detect_calls, failing)
}

fn stub_config(base_url: &str) -> NerServiceConfig {
    NerServiceConfig {
        enabled: true,
        base_url: base_url.to_string(),
        timeout_secs: 2,
        max_samples: 50,
        failure_threshold: 5,
        reset_timeout_secs: 1,
        health_probe_interval_secs: 3600,
    }
}

fn names_column() -> ColumnData {
    let column = ColumnRef::new("app", "people", "full_name");
    let values: Vec<Option<String>> = ["Ada Lovelace", "Alan Turing", "Grace Hopper"]
        .iter()
        .map(|v| Some(v.to_string()))
        .collect();
    let total_rows = values.len();
    ColumnData {
        column: column.clone(),
        info: ColumnInfo {
            name: "full_name".to_string(),
            data_type: "varchar".to_string(),
            size: Some(255),
            nullable: true,
            primary_key: false,
            foreign_key: false,
            comment: None,
        },
        sample: SampleData {
            column,
            values,
            null_count: 0,
            total_rows,
            entropy: None,
            status: SampleStatus::Ok,
            error_message: None,
        },
    }
}

#[tokio::test]
async fn healthy_sidecar_yields_person_candidates() {
    let (base_url, calls, _) = spawn_stub().await;
    let strategy = NerStrategy::new(stub_config(&base_url));

    assert!(strategy.health_probe().await);

    let candidates = strategy.evaluate(&names_column()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let person = candidates.iter().find(|c| c.pii_type == PiiType::PersonName).unwrap();
    // Every sample carried one PERSON entity at 0.9: mean * coverage = 0.9
    assert!((person.confidence - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn circuit_opens_after_consecutive_failures_and_probes_after_reset() {
    let (base_url, calls, failing) = spawn_stub().await;
    let strategy = NerStrategy::new(stub_config(&base_url));
    assert!(strategy.health_probe().await);

    failing.store(true, Ordering::SeqCst);

    // Five consecutive 500s open the circuit; each evaluation degrades to
    // an empty candidate list
    for _ in 0..5 {
        let candidates = strategy.evaluate(&names_column()).await.unwrap();
        assert!(candidates.is_empty());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    // Circuit is OPEN: the sixth evaluation must not reach the wire
    let candidates = strategy.evaluate(&names_column()).await.unwrap();
    assert!(candidates.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    // After the reset timeout exactly one probe call goes out; it fails
    // and the circuit reopens
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let _ = strategy.evaluate(&names_column()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 6);
    let _ = strategy.evaluate(&names_column()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 6);

    // Sidecar recovers: the next probe closes the circuit for good
    failing.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let candidates = strategy.evaluate(&names_column()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 7);
    assert!(!candidates.is_empty());

    let candidates = strategy.evaluate(&names_column()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 8);
    assert!(!candidates.is_empty());
}

#[tokio::test]
async fn unhealthy_sidecar_disables_the_strategy() {
    // Nothing listens here; the startup probe fails and evaluation makes
    // no calls at all
    let strategy = NerStrategy::new(stub_config("http://127.0.0.1:9"));

    assert!(!strategy.health_probe().await);
    assert!(!strategy.is_healthy());

    let candidates = strategy.evaluate(&names_column()).await.unwrap();
    assert!(candidates.is_empty());
}

#[tokio::test]
async fn disabled_config_skips_evaluation() {
    let (base_url, calls, _) = spawn_stub().await;
    let mut config = stub_config(&base_url);
    config.enabled = false;
    let strategy = NerStrategy::new(config);

    let candidates = strategy.evaluate(&names_column()).await.unwrap();
    assert!(candidates.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_samples_are_never_sent() {
    let (base_url, calls, _) = spawn_stub().await;
    let strategy = NerStrategy::new(stub_config(&base_url));
    assert!(strategy.health_probe().await);

    let mut data = names_column();
    data.sample.values = vec![None, None];
    data.sample.null_count = 2;
    data.sample.total_rows = 2;

    let candidates = strategy.evaluate(&data).await.unwrap();
    assert!(candidates.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
