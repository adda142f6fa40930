//! Integration tests for the HTTP surface: binds the router to an ephemeral
//! port and drives it with a real `reqwest` client, matching the teacher's
//! style of exercising a server end-to-end rather than unit-testing
//! handlers in isolation.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

use intentd_core::{Config, Engine};
use intentd_server::metrics::PerformanceMetrics;
use intentd_server::state::{AppState, IntentJob};
use tokio::sync::mpsc;

async fn spawn_test_server() -> (String, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("main.rs"), "fn main() {}\n").unwrap();

    let config = Config::defaults(dir.path());
    let engine = Arc::new(Engine::open(config).unwrap());
    engine.build_index().unwrap();

    let (intent_tx, mut intent_rx) = mpsc::channel(16);
    let worker_engine = engine.clone();
    tokio::spawn(async move {
        while let Some(job) = intent_rx.recv().await {
            match job {
                IntentJob::SessionStart { session_id, now } => {
                    let _ = worker_engine.session_start(&session_id, now);
                }
                IntentJob::Capture { event, now } => {
                    let _ = worker_engine.capture_intent(&event, now);
                }
            }
        }
    });

    let state = AppState {
        engine,
        intent_tx,
        dropped_events: Arc::new(AtomicU64::new(0)),
        metrics: PerformanceMetrics::default(),
        started_at: Instant::now(),
    };

    let app = intentd_server::routes::router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), dir)
}

#[tokio::test]
async fn health_reports_ready() {
    let (base, _dir) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let body: serde_json::Value = client.get(format!("{base}/health")).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn symbol_query_finds_indexed_file() {
    let (base, _dir) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let body: serde_json::Value = client
        .get(format!("{base}/symbol"))
        .query(&[("q", "main"), ("limit", "5")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let results = body["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert_eq!(body["truncated"], false);
}

#[tokio::test]
async fn symbol_query_with_no_match_returns_empty() {
    let (base, _dir) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let body: serde_json::Value = client
        .get(format!("{base}/symbol"))
        .query(&[("q", "zzz_nonexistent_token_zzz"), ("limit", "5")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn intent_post_is_accepted_and_enqueued() {
    let (base, _dir) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/intent"))
        .json(&serde_json::json!({
            "event": "session-start",
            "session_id": "s1",
        }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn unknown_project_id_is_not_found() {
    let (base, _dir) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{base}/symbol"))
        .query(&[("q", "main"), ("project", "00000000-0000-0000-0000-000000000000")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rank_with_no_tag_still_ranks_by_recency() {
    let (base, _dir) = spawn_test_server().await;
    let client = reqwest::Client::new();
    // Two accesses, newest last, no tags on either: /rank with no `tag`
    // query param should still surface the more recently touched path
    // first via the global recency/frequency candidate pool.
    client
        .post(format!("{base}/intent"))
        .json(&serde_json::json!({"event": "session-start", "session_id": "s1"}))
        .send()
        .await
        .unwrap();
    for path in ["/src/old.py", "/src/new.py"] {
        client
            .post(format!("{base}/intent"))
            .json(&serde_json::json!({
                "event": "tool-use-post",
                "session_id": "s1",
                "tool": "Read",
                "tool_input": {"file_path": path},
            }))
            .send()
            .await
            .unwrap();
    }
    // Give the fire-and-forget intent worker a moment to drain.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let body: serde_json::Value =
        client.get(format!("{base}/rank")).query(&[("limit", "2")]).send().await.unwrap().json().await.unwrap();
    let files = body["files"].as_array().unwrap();
    assert!(!files.is_empty(), "expected non-empty candidate pool for an untagged /rank query");
}

#[tokio::test]
async fn tuner_stats_lists_every_fixed_arm() {
    let (base, _dir) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let body: serde_json::Value =
        client.get(format!("{base}/tuner/stats")).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["arm_count"], 8);
    assert_eq!(body["arms"].as_array().unwrap().len(), 8);
}
