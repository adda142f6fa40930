//! Shared HTTP server state: the engine, the intent-capture channel, and
//! the legacy performance-metrics tracker (§5 CONCURRENCY & RESOURCE MODEL).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use intentd_core::types::IntentEvent;
use intentd_core::Engine;
use tokio::sync::mpsc;

use crate::metrics::PerformanceMetrics;

/// One unit of work handed from an `/intent` handler to the background
/// capture worker. The HTTP handler enqueues and returns immediately; the
/// worker does the actual Ranking Store writes (§9 "Concurrency replacement
/// for hook-time side effects").
pub enum IntentJob {
    /// `session-start` event: seed a session sequence key.
    SessionStart {
        /// Session this sequence key belongs to.
        session_id: String,
        /// Epoch-seconds the event was received.
        now: i64,
    },
    /// `tool-use-post` / `prompt-submit` event.
    Capture {
        /// The decoded event to capture.
        event: IntentEvent,
        /// Epoch-seconds the event was received.
        now: i64,
    },
}

/// Depth of the bounded intent-ingest channel. Sized generously above the
/// expected steady-state rate of one event per tool call; a host emitting
/// faster than the worker can drain it is the backpressure case §5
/// describes.
pub const INTENT_CHANNEL_CAPACITY: usize = 1024;

/// State shared across every axum handler.
#[derive(Clone)]
pub struct AppState {
    /// The engine for the active project.
    pub engine: Arc<Engine>,
    /// Sender half of the intent-ingest channel; handlers only ever
    /// `try_send` onto this, never block on it.
    pub intent_tx: mpsc::Sender<IntentJob>,
    /// Count of events dropped because the channel was full (§5
    /// Backpressure).
    pub dropped_events: Arc<AtomicU64>,
    /// Legacy cumulative latency/throughput tracker surfaced on `/metrics`.
    pub metrics: PerformanceMetrics,
    /// Process start time, for `/health` and `/metrics` uptime reporting.
    pub started_at: Instant,
}

impl AppState {
    /// Current epoch-seconds, used for every ranking-store write and read.
    pub fn now_secs() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }

    /// Number of events dropped so far.
    pub fn dropped_event_count(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }
}
