//! HTTP handlers for the single localhost surface (§6 EXTERNAL INTERFACES).
//!
//! Every endpoint accepts an optional `project` query parameter; since this
//! process serves exactly one active project (bound to its `--repo` root at
//! startup, per the teacher's single-daemon-per-repo model), a `project`
//! that doesn't match the active one is a `NotFound`, not a lookup into
//! some other project's state (DESIGN.md "HTTP project scoping").

use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use intentd_core::error::IntentError;
use intentd_core::types::{IntentEvent, Tool, ToolInput};

use crate::state::{AppState, IntentJob};

/// Build the full router, mounting every endpoint in the §6 table.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/symbol", get(get_symbol))
        .route("/multi", get(get_multi))
        .route("/pattern", post(post_pattern))
        .route("/intent", post(post_intent))
        .route("/rank", get(get_rank))
        .route("/predict", post(post_predict))
        .route("/predict/log", post(post_predict_log))
        .route("/predict/check", post(post_predict_check))
        .route("/predict/finalize", post(post_predict_finalize))
        .route("/predict/stats", get(get_predict_stats))
        .route("/tuner/weights", get(get_tuner_weights))
        .route("/tuner/best", get(get_tuner_best))
        .route("/tuner/stats", get(get_tuner_stats))
        .route("/tuner/feedback", post(post_tuner_feedback))
        .route("/tuner/reset", post(post_tuner_reset))
        .route("/metrics", get(get_metrics))
        .route("/context", get(get_context).post(post_context))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn bad_request(msg: impl Into<String>) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": msg.into() })))
}

fn bad_query(msg: impl Into<String>) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": msg.into(), "kind": "bad_query" })))
}

fn not_found(msg: impl Into<String>) -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": msg.into() })))
}

fn internal(err: &IntentError) -> (StatusCode, Json<Value>) {
    tracing::error!(error = %err, "internal error");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": err.to_string() })))
}

/// Reject requests naming a project other than the one this process serves
/// (see module doc comment).
fn check_project(state: &AppState, project: Option<Uuid>) -> Result<(), (StatusCode, Json<Value>)> {
    match project {
        Some(id) if id != state.engine.project().id => {
            Err(not_found(format!("project {id} is not served by this instance")))
        }
        _ => Ok(()),
    }
}

/// Run blocking engine work under the configured query timeout, returning
/// `Err(())` (handlers render this as a `truncated:true` response, never an
/// error) if the bound is exceeded (§5 Cancellation & timeouts).
async fn with_query_timeout<F, T>(state: &AppState, f: F) -> Result<T, ()>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let timeout = Duration::from_millis(state.engine.config().server.query_timeout_ms);
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(value)) => Ok(value),
        _ => Err(()),
    }
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.engine.is_ready();
    Json(json!({
        "status": if ready { "ok" } else { "not_ready" },
        "components": {
            "index": if ready { "ok" } else { "building" },
            "store": "ok",
            "predictor": "ok",
        },
        "dropped_events": state.dropped_event_count(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

// ---------------------------------------------------------------------------
// GET /symbol
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SymbolParams {
    q: String,
    limit: Option<usize>,
    project: Option<Uuid>,
}

async fn get_symbol(
    State(state): State<AppState>,
    Query(params): Query<SymbolParams>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    check_project(&state, params.project)?;
    let limit = params.limit.unwrap_or(20).min(200);
    let start = Instant::now();
    let engine = state.engine.clone();
    let q = params.q.clone();
    match with_query_timeout(&state, move || engine.symbol(&q, limit)).await {
        Ok(results) => {
            state.metrics.record_search_latency(start.elapsed());
            Ok(Json(json!({ "results": results, "ms": start.elapsed().as_millis(), "truncated": false })))
        }
        Err(()) => Ok(Json(json!({ "results": [], "ms": start.elapsed().as_millis(), "truncated": true }))),
    }
}

// ---------------------------------------------------------------------------
// GET /multi
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MultiParams {
    q: String,
    mode: Option<String>,
    limit: Option<usize>,
    project: Option<Uuid>,
}

async fn get_multi(
    State(state): State<AppState>,
    Query(params): Query<MultiParams>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    check_project(&state, params.project)?;
    let limit = params.limit.unwrap_or(20).min(200);
    let tokens: Vec<String> = params.q.split_whitespace().map(str::to_string).collect();
    if tokens.is_empty() {
        return Err(bad_query("multi query requires at least one token"));
    }
    let mode = params.mode.as_deref().unwrap_or("or").to_ascii_lowercase();
    let start = Instant::now();
    let engine = state.engine.clone();
    let result = with_query_timeout(&state, move || {
        if mode == "and" {
            engine.multi_and(&tokens, limit)
        } else {
            Ok(engine.multi_or(&tokens, limit))
        }
    })
    .await;

    match result {
        Ok(Ok(results)) => {
            state.metrics.record_search_latency(start.elapsed());
            Ok(Json(json!({ "results": results, "ms": start.elapsed().as_millis(), "truncated": false })))
        }
        Ok(Err(err)) => Err(bad_query(err.to_string())),
        Err(()) => Ok(Json(json!({ "results": [], "ms": start.elapsed().as_millis(), "truncated": true }))),
    }
}

// ---------------------------------------------------------------------------
// POST /pattern
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PatternRequest {
    patterns: Vec<String>,
    #[serde(default)]
    #[allow(dead_code)]
    since: Option<String>,
    #[serde(default)]
    project: Option<Uuid>,
}

async fn post_pattern(
    State(state): State<AppState>,
    Json(body): Json<PatternRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    check_project(&state, body.project)?;
    if body.patterns.is_empty() {
        return Err(bad_query("at least one pattern is required"));
    }
    let start = Instant::now();
    let engine = state.engine.clone();
    let patterns = body.patterns;
    let result = with_query_timeout(&state, move || {
        let mut results = Vec::new();
        let mut scanned = 0usize;
        for pattern in &patterns {
            let (matches, scanned_paths) = engine.pattern(pattern)?;
            scanned = scanned.max(scanned_paths);
            results.extend(matches);
        }
        Ok::<_, IntentError>((results, scanned))
    })
    .await;

    match result {
        Ok(Ok((results, scanned_paths))) => Ok(Json(json!({
            "results": results,
            "scanned_paths": scanned_paths,
            "ms": start.elapsed().as_millis(),
            "truncated": false,
        }))),
        Ok(Err(err)) => Err(bad_query(err.to_string())),
        Err(()) => Ok(Json(json!({ "results": [], "scanned_paths": 0, "ms": start.elapsed().as_millis(), "truncated": true }))),
    }
}

// ---------------------------------------------------------------------------
// POST /intent
// ---------------------------------------------------------------------------

/// Wire shape of one `/intent` event (§6 envelope). `event` is an explicit
/// discriminator the envelope table doesn't show but the three accepted
/// event kinds (§4.5) require to disambiguate `session-start` (no `tool`)
/// from `tool-use-post` / `prompt-submit`; hosts that omit it fall back to
/// inference from the presence of `tool`/`prompt` (DESIGN.md Open Question).
#[derive(Debug, Deserialize)]
struct IntentEnvelope {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    tool: Option<Tool>,
    #[serde(default)]
    tool_input: ToolInput,
    #[serde(default)]
    prompt: Option<String>,
    session_id: String,
    #[serde(default)]
    tool_use_id: Option<String>,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    project: Option<Uuid>,
}

async fn post_intent(
    State(state): State<AppState>,
    Json(body): Json<IntentEnvelope>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    check_project(&state, body.project)?;
    if body.session_id.is_empty() {
        return Err(bad_request("session_id is required"));
    }

    let now = AppState::now_secs();
    let is_session_start =
        body.event.as_deref() == Some("session-start") || (body.tool.is_none() && body.prompt.is_none());

    let job = if is_session_start {
        IntentJob::SessionStart { session_id: body.session_id, now }
    } else {
        let event = IntentEvent {
            tool: body.tool.unwrap_or(Tool::Other),
            tool_input: body.tool_input,
            prompt: body.prompt,
            session_id: body.session_id,
            tool_use_id: body.tool_use_id,
            timestamp: body.timestamp,
            project: body.project,
        };
        IntentJob::Capture { event, now }
    };

    // Fire-and-forget: enqueue and return immediately (§4.5 latency budget,
    // §9 "Concurrency replacement for hook-time side effects"). A full
    // channel means the host is outrunning the capture worker; that's
    // backpressure (§5), not a host-visible failure, so this still answers
    // 200 with `ok:false` rather than an error status.
    match state.intent_tx.try_send(job) {
        Ok(()) => Ok(Json(json!({ "ok": true }))),
        Err(_) => {
            state.dropped_events.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            Ok(Json(json!({ "ok": false, "reason": "backpressure" })))
        }
    }
}

// ---------------------------------------------------------------------------
// GET /rank
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RankParams {
    tag: Option<String>,
    limit: Option<usize>,
    project: Option<Uuid>,
}

async fn get_rank(
    State(state): State<AppState>,
    Query(params): Query<RankParams>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    check_project(&state, params.project)?;
    let tag = params.tag.unwrap_or_default();
    let limit = params.limit.unwrap_or(20).min(200);
    let now = AppState::now_secs();
    let start = Instant::now();

    let engine = state.engine.clone();
    let result = with_query_timeout(&state, move || engine.rank(&tag, limit, now)).await;

    match result {
        Ok(Ok((ranked, weights, arm))) => {
            let files: Vec<&str> = ranked.iter().map(|r| r.path.as_str()).collect();
            Ok(Json(json!({
                "files": files,
                "details": ranked,
                "weights": weights,
                "arm": arm,
                "adaptive": true,
                "ms": start.elapsed().as_millis(),
            })))
        }
        Ok(Err(err)) => Err(internal(&err)),
        Err(()) => Ok(Json(json!({
            "files": [], "details": [], "weights": Value::Null, "arm": Value::Null,
            "adaptive": true, "ms": start.elapsed().as_millis(), "truncated": true,
        }))),
    }
}

// ---------------------------------------------------------------------------
// POST /predict and GET|POST /context
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PredictBody {
    intent: Option<String>,
    keywords: Option<Vec<String>>,
    current_file: Option<String>,
    session: String,
    snippet_lines: Option<usize>,
    #[serde(default)]
    project: Option<Uuid>,
}

async fn run_predict(
    state: &AppState,
    body: PredictBody,
    force_snippets: bool,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    check_project(state, body.project)?;
    let req = intentd_core::predict::PredictRequest {
        intent: body.intent,
        keywords: body.keywords,
        current_file: body.current_file,
        session: body.session,
        snippet_lines: if force_snippets { Some(body.snippet_lines.unwrap_or(20)) } else { body.snippet_lines },
    };
    let now = AppState::now_secs();
    let engine = state.engine.clone();
    match with_query_timeout(state, move || engine.predict(&req, now)).await {
        Ok(Ok(response)) => Ok(Json(serde_json::to_value(response).unwrap_or(Value::Null))),
        Ok(Err(err)) => Err(internal(&err)),
        Err(()) => Ok(Json(json!({ "files": [], "top_confidence": 0.0, "cached": false, "visible": false, "truncated": true }))),
    }
}

async fn post_predict(
    State(state): State<AppState>,
    Json(body): Json<PredictBody>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    run_predict(&state, body, false).await
}

#[derive(Debug, Deserialize)]
struct ContextParams {
    intent: Option<String>,
    keywords: Option<Vec<String>>,
    current_file: Option<String>,
    session: Option<String>,
    snippet_lines: Option<usize>,
    project: Option<Uuid>,
}

async fn get_context(
    State(state): State<AppState>,
    Query(params): Query<ContextParams>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let body = PredictBody {
        intent: params.intent,
        keywords: params.keywords,
        current_file: params.current_file,
        session: params.session.unwrap_or_else(|| "cli".to_string()),
        snippet_lines: params.snippet_lines,
        project: params.project,
    };
    run_predict(&state, body, true).await
}

async fn post_context(
    State(state): State<AppState>,
    Json(body): Json<PredictBody>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    run_predict(&state, body, true).await
}

// ---------------------------------------------------------------------------
// Prediction resolution endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct ProjectOnly {
    #[serde(default)]
    project: Option<Uuid>,
}

async fn post_predict_log(
    State(state): State<AppState>,
    body: Option<Json<ProjectOnly>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    check_project(&state, body.map(|b| b.0.project).unwrap_or(None))?;
    // Logging happens inline as part of `/predict`; this endpoint exists
    // for hosts that pre-announce a prediction id out-of-band and simply
    // acknowledges receipt (§6).
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct PredictCheckBody {
    session: String,
    path: String,
    #[serde(default)]
    project: Option<Uuid>,
}

async fn post_predict_check(
    State(state): State<AppState>,
    Json(body): Json<PredictCheckBody>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    check_project(&state, body.project)?;
    match state.engine.resolve_hit(&body.session, &body.path) {
        Ok(hit) => Ok(Json(json!({ "ok": true, "hit": hit }))),
        Err(err) => Err(internal(&err)),
    }
}

async fn post_predict_finalize(
    State(state): State<AppState>,
    body: Option<Json<ProjectOnly>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    check_project(&state, body.map(|b| b.0.project).unwrap_or(None))?;
    let now = AppState::now_secs();
    match state.engine.finalize_stale(now) {
        Ok(resolved) => Ok(Json(json!({ "ok": true, "resolved": resolved }))),
        Err(err) => Err(internal(&err)),
    }
}

async fn get_predict_stats(
    State(state): State<AppState>,
    Query(params): Query<ProjectOnly>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    check_project(&state, params.project)?;
    let now = AppState::now_secs();
    let rolling = state.engine.rolling_metrics(now).map_err(|e| internal(&e))?;
    let hits = rolling.hits;
    let misses = rolling.evaluated.saturating_sub(rolling.hits);
    #[allow(clippy::cast_precision_loss)]
    let hit_rate = if rolling.evaluated > 0 { hits as f64 / rolling.evaluated as f64 } else { 0.0 };
    let tuner_stats = state.engine.tuner_stats().map_err(|e| internal(&e))?;
    Ok(Json(json!({
        "hits": hits,
        "misses": misses,
        "hit_rate": hit_rate,
        "rolling": rolling,
        "tuner": tuner_stats,
    })))
}

// ---------------------------------------------------------------------------
// Tuner endpoints
// ---------------------------------------------------------------------------

async fn get_tuner_weights(
    State(state): State<AppState>,
    Query(params): Query<ProjectOnly>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    check_project(&state, params.project)?;
    let (arm, weights) = state.engine.tuner_sample().map_err(|e| internal(&e))?;
    Ok(Json(json!({ "arm": arm, "weights": weights })))
}

async fn get_tuner_best(
    State(state): State<AppState>,
    Query(params): Query<ProjectOnly>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    check_project(&state, params.project)?;
    let (arm, weights, mean) = state.engine.tuner_best().map_err(|e| internal(&e))?;
    Ok(Json(json!({ "arm": arm, "weights": weights, "posterior_mean": mean })))
}

async fn get_tuner_stats(
    State(state): State<AppState>,
    Query(params): Query<ProjectOnly>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    check_project(&state, params.project)?;
    let stats = state.engine.tuner_stats().map_err(|e| internal(&e))?;
    Ok(Json(json!({ "arms": stats, "arm_count": state.engine.tuner_arm_count() })))
}

#[derive(Debug, Deserialize)]
struct TunerFeedbackBody {
    arm_idx: usize,
    hit: bool,
    #[serde(default)]
    project: Option<Uuid>,
}

async fn post_tuner_feedback(
    State(state): State<AppState>,
    Json(body): Json<TunerFeedbackBody>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    check_project(&state, body.project)?;
    if body.arm_idx >= state.engine.tuner_arm_count() {
        return Err(bad_request(format!("unknown tuner arm {}", body.arm_idx)));
    }
    state.engine.tuner_feedback(body.arm_idx, body.hit).map_err(|e| internal(&e))?;
    Ok(Json(json!({ "ok": true })))
}

async fn post_tuner_reset(
    State(state): State<AppState>,
    body: Option<Json<ProjectOnly>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    check_project(&state, body.map(|b| b.0.project).unwrap_or(None))?;
    state.engine.tuner_reset().map_err(|e| internal(&e))?;
    Ok(Json(json!({ "ok": true })))
}

// ---------------------------------------------------------------------------
// GET /metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct UnifiedMetrics {
    hit_at_5: f64,
    target: f64,
    gap: f64,
    trend: intentd_core::types::Trend,
    rolling: intentd_core::types::RollingMetrics,
    tuner: Vec<intentd_core::tuner::ArmStat>,
    legacy: LegacyMetrics,
}

#[derive(Debug, Serialize)]
struct LegacyMetrics {
    total_searches: u64,
    p50_ms: f64,
    p95_ms: f64,
    p99_ms: f64,
    peak_memory_bytes: u64,
    dropped_events: u64,
}

async fn get_metrics(
    State(state): State<AppState>,
    Query(params): Query<ProjectOnly>,
) -> Result<Json<UnifiedMetrics>, (StatusCode, Json<Value>)> {
    check_project(&state, params.project)?;
    let now = AppState::now_secs();
    let rolling = state.engine.rolling_metrics(now).map_err(|e| internal(&e))?;
    let tuner = state.engine.tuner_stats().map_err(|e| internal(&e))?;

    const TARGET_HIT_AT_5: f64 = 0.60;
    let gap = TARGET_HIT_AT_5 - rolling.hit_at_k;

    Ok(Json(UnifiedMetrics {
        hit_at_5: rolling.hit_at_k,
        target: TARGET_HIT_AT_5,
        gap,
        trend: rolling.trend,
        rolling: rolling.clone(),
        tuner,
        legacy: LegacyMetrics {
            total_searches: state.metrics.get_total_searches(),
            p50_ms: state.metrics.get_latency_percentile(0.50),
            p95_ms: state.metrics.get_latency_percentile(0.95),
            p99_ms: state.metrics.get_latency_percentile(0.99),
            peak_memory_bytes: state.metrics.get_peak_memory_bytes(),
            dropped_events: state.dropped_event_count(),
        },
    }))
}
