//! intentd CLI.
//!
//! A thin HTTP client for the `intentd` daemon's localhost surface (§6
//! EXTERNAL INTERFACES). Owns no domain logic of its own; every subcommand
//! is a request against the already-running server.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

/// intentd - local code-intelligence service client.
#[derive(Parser, Debug)]
#[command(name = "intentd-cli", version, about = "Client for the intentd code-intelligence daemon")]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,

    /// Base URL of the running intentd daemon. Falls back to
    /// `~/.config/intentd/cli.toml`'s `server` key, then `127.0.0.1:7420`.
    #[arg(long, global = true)]
    server: Option<String>,

    /// Log level.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check daemon health.
    Health,

    /// Exact/substring symbol lookup.
    Symbol {
        /// Query text.
        query: String,
        /// Maximum number of results.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Multi-token lookup (`mode` is `or` or `and`).
    Multi {
        /// Space-separated query tokens.
        query: String,
        /// `or` or `and`.
        #[arg(long, default_value = "or")]
        mode: String,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Regex line search over the bounded working set.
    Pattern {
        /// Regular expression.
        pattern: String,
    },

    /// Top files ranked by tag affinity and the tuner's current weights.
    Rank {
        /// Tag to rank by, e.g. `#editing`.
        #[arg(long, default_value = "")]
        tag: String,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Ask the prediction engine what to read next.
    Context {
        /// Free-text description of current intent.
        #[arg(long)]
        intent: Option<String>,
        /// Current file, used as a transition anchor.
        #[arg(long)]
        current_file: Option<String>,
        /// Session id to scope the prediction to.
        #[arg(long, default_value = "cli")]
        session: String,
        /// Number of snippet lines to fetch per candidate.
        #[arg(long, default_value_t = 20)]
        snippet_lines: usize,
    },

    /// Rolling prediction hit-rate metrics.
    PredictStats,

    /// Manage the Online Weight Tuner.
    Tuner {
        #[command(subcommand)]
        action: TunerAction,
    },

    /// Dump unified daemon metrics.
    Metrics,
}

#[derive(Subcommand, Debug)]
enum TunerAction {
    /// Show every arm's current posterior.
    Stats,
    /// Show the arm with the highest posterior mean.
    Best,
    /// Reset every arm's posterior to its prior.
    Reset,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_env_filter(cli.log_level.clone()).init();

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .context("building HTTP client")?;
    let base = cli.server.unwrap_or_else(default_server_url).trim_end_matches('/').to_string();

    let response: Value = match cli.command {
        Commands::Health => get(&client, &base, "/health", &[]).await?,
        Commands::Symbol { query, limit } => {
            get(&client, &base, "/symbol", &[("q", query), ("limit", limit.to_string())]).await?
        }
        Commands::Multi { query, mode, limit } => {
            get(&client, &base, "/multi", &[("q", query), ("mode", mode), ("limit", limit.to_string())]).await?
        }
        Commands::Pattern { pattern } => {
            post(&client, &base, "/pattern", &serde_json::json!({ "patterns": [pattern] })).await?
        }
        Commands::Rank { tag, limit } => {
            get(&client, &base, "/rank", &[("tag", tag), ("limit", limit.to_string())]).await?
        }
        Commands::Context { intent, current_file, session, snippet_lines } => {
            let mut query = vec![("session", session), ("snippet_lines", snippet_lines.to_string())];
            if let Some(intent) = intent {
                query.push(("intent", intent));
            }
            if let Some(current_file) = current_file {
                query.push(("current_file", current_file));
            }
            get(&client, &base, "/context", &query).await?
        }
        Commands::PredictStats => get(&client, &base, "/predict/stats", &[]).await?,
        Commands::Tuner { action } => match action {
            TunerAction::Stats => get(&client, &base, "/tuner/stats", &[]).await?,
            TunerAction::Best => get(&client, &base, "/tuner/best", &[]).await?,
            TunerAction::Reset => post(&client, &base, "/tuner/reset", &serde_json::json!({})).await?,
        },
        Commands::Metrics => get(&client, &base, "/metrics", &[]).await?,
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn get(client: &reqwest::Client, base: &str, path: &str, query: &[(&str, String)]) -> Result<Value> {
    let response = client
        .get(format!("{base}{path}"))
        .query(query)
        .send()
        .await
        .with_context(|| format!("requesting {path}"))?;
    parse(response).await
}

async fn post(client: &reqwest::Client, base: &str, path: &str, body: &Value) -> Result<Value> {
    let response = client
        .post(format!("{base}{path}"))
        .json(body)
        .send()
        .await
        .with_context(|| format!("requesting {path}"))?;
    parse(response).await
}

/// Resolve the server address absent an explicit `--server` flag: the user
/// config file's `server` key, if present, else the daemon's own default
/// bind address.
fn default_server_url() -> String {
    const DEFAULT: &str = "http://127.0.0.1:7420";
    let Some(config_dir) = dirs::config_dir() else {
        return DEFAULT.to_string();
    };
    let path = config_dir.join("intentd").join("cli.toml");
    let Ok(contents) = std::fs::read_to_string(path) else {
        return DEFAULT.to_string();
    };
    let Ok(table) = contents.parse::<toml::Table>() else {
        return DEFAULT.to_string();
    };
    table.get("server").and_then(toml::Value::as_str).map_or_else(|| DEFAULT.to_string(), str::to_string)
}

async fn parse(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.context("decoding response body")?;
    if !status.is_success() {
        bail!("server returned {status}: {body}");
    }
    Ok(body)
}
