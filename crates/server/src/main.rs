//! intentd -- persistent background code-intelligence engine.
//!
//! Keeps the Symbol Index, Ranking Store, Prediction Engine, and tuner hot
//! in memory for one project and exposes them over a localhost-only HTTP
//! surface (§6 EXTERNAL INTERFACES). One process serves exactly one
//! project, bound to `--repo` (or the current directory) at startup.
//!
//! ## Usage
//!
//! ```text
//! # Start the daemon, auto-indexing if no index exists yet
//! intentd --repo /path/to/repo
//! ```

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use intentd_core::{Config, Engine};
use intentd_server::{metrics, routes};
use tokio::sync::mpsc;

use intentd_server::state::{AppState, IntentJob, INTENT_CHANNEL_CAPACITY};

/// intentd -- local always-on code-intelligence service.
#[derive(Parser, Debug)]
#[command(name = "intentd", version, about = "Local code-intelligence daemon")]
struct Args {
    /// Path to the repository to serve.
    #[arg(long, default_value = ".")]
    repo: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Override the configured bind address (host:port).
    #[arg(long)]
    bind_addr: Option<String>,

    /// Skip automatic indexing on startup.
    #[arg(long)]
    no_auto_index: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let repo_path = std::path::PathBuf::from(&args.repo)
        .canonicalize()
        .unwrap_or_else(|_| std::path::PathBuf::from(&args.repo));

    if !repo_path.exists() {
        anyhow::bail!("repository path does not exist: {}", args.repo);
    }

    let mut config = Config::load(&repo_path).unwrap_or_else(|_| Config::defaults(&repo_path));
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(bind_addr) = &args.bind_addr {
        config.server.bind_addr = bind_addr.clone();
    }

    tracing_subscriber::fmt()
        .with_env_filter(config.logging.level.clone())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(repo = %repo_path.display(), "opening intentd engine");
    let engine = Arc::new(Engine::open(config)?);

    if !args.no_auto_index && engine.index_path_count() == 0 {
        tracing::info!("no existing symbol index, building one");
        let start = Instant::now();
        match engine.build_index() {
            Ok(count) => tracing::info!(paths = count, elapsed_ms = start.elapsed().as_millis(), "index build complete"),
            Err(err) => tracing::warn!(error = %err, "initial index build failed"),
        }
    } else {
        tracing::info!(paths = engine.index_path_count(), "using existing symbol index");
    }

    let (intent_tx, intent_rx) = mpsc::channel(INTENT_CHANNEL_CAPACITY);
    let dropped_events = Arc::new(AtomicU64::new(0));

    let state = AppState {
        engine: engine.clone(),
        intent_tx,
        dropped_events,
        metrics: metrics::PerformanceMetrics::default(),
        started_at: Instant::now(),
    };

    tokio::spawn(run_intent_worker(engine.clone(), intent_rx));
    tokio::spawn(run_maintenance_loop(engine.clone()));
    tokio::spawn(run_metrics_sampler(state.metrics.clone()));

    let bind_addr = state.engine.config().server.bind_addr.clone();
    let app = routes::router(state);

    tracing::info!(addr = %bind_addr, "binding HTTP surface");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!("intentd shut down");
    Ok(())
}

/// Drains `/intent` events off the bounded channel and applies them to the
/// engine one at a time, off the HTTP request path (§9 "Concurrency
/// replacement for hook-time side effects").
async fn run_intent_worker(engine: Arc<Engine>, mut rx: mpsc::Receiver<IntentJob>) {
    while let Some(job) = rx.recv().await {
        let result = match job {
            IntentJob::SessionStart { session_id, now } => engine.session_start(&session_id, now).map(|()| ()),
            IntentJob::Capture { event, now } => engine.capture_intent(&event, now).map(|_| ()),
        };
        if let Err(err) = result {
            tracing::warn!(error = %err, "intent capture failed");
        }
    }
}

/// Periodic housekeeping: resolve stale predictions as misses, expire idle
/// session sequences, and evict expired cache entries (§5 CONCURRENCY &
/// RESOURCE MODEL).
async fn run_maintenance_loop(engine: Arc<Engine>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(30));
    loop {
        ticker.tick().await;
        let now = AppState::now_secs();
        if let Err(err) = engine.finalize_stale(now) {
            tracing::warn!(error = %err, "finalize_stale failed");
        }
        if let Err(err) = engine.expire_sessions(now) {
            tracing::warn!(error = %err, "expire_sessions failed");
        }
        let evicted = engine.evict_cache(now);
        if evicted > 0 {
            tracing::debug!(evicted, "evicted expired cache entries");
        }
    }
}

/// Periodically samples process memory usage into the legacy metrics
/// tracker surfaced on `/metrics` (§6 "legacy cumulative" figures).
async fn run_metrics_sampler(metrics: metrics::PerformanceMetrics) {
    let mut ticker = tokio::time::interval(Duration::from_secs(10));
    loop {
        ticker.tick().await;
        metrics.update_memory_usage(metrics::PerformanceMetrics::get_current_memory_bytes());
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
