//! Configuration loading and validation.
//!
//! Configuration is resolved with the following precedence (highest wins):
//!
//! 1. Environment variables (`INTENTD_*`)
//! 2. Project config (`.intentd/config.toml`)
//! 3. User config (`~/.config/intentd/config.toml`)
//! 4. Compiled-in defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::IntentResult;

/// Top-level configuration for intentd.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Repository root path to index.
    pub repo_path: PathBuf,

    /// Symbol index settings.
    #[serde(default)]
    pub index: IndexConfig,

    /// Ranking Store normalization and window settings.
    #[serde(default)]
    pub ranking: RankingConfig,

    /// Prediction Engine thresholds and windows.
    #[serde(default)]
    pub prediction: PredictionConfig,

    /// Online Weight Tuner settings.
    #[serde(default)]
    pub tuner: TunerConfig,

    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Symbol index settings (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory/file glob patterns excluded from the index walk.
    #[serde(default = "IndexConfig::default_excludes")]
    pub exclude_patterns: Vec<String>,

    /// Maximum file size to index (in bytes); larger files are skipped.
    #[serde(default = "IndexConfig::default_max_file_size")]
    pub max_file_size: u64,

    /// Bound on the regex "working set" (§4.1 — must not scan the whole repo).
    #[serde(default = "IndexConfig::default_working_set_cap")]
    pub working_set_cap: usize,

    /// Query timeout after which partial results are returned truncated.
    #[serde(default = "IndexConfig::default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            exclude_patterns: Self::default_excludes(),
            max_file_size: Self::default_max_file_size(),
            working_set_cap: Self::default_working_set_cap(),
            query_timeout_ms: Self::default_query_timeout_ms(),
        }
    }
}

impl IndexConfig {
    fn default_excludes() -> Vec<String> {
        vec![
            ".git".into(),
            "node_modules".into(),
            "target".into(),
            "__pycache__".into(),
            ".venv".into(),
            "venv".into(),
            "dist".into(),
            "build".into(),
            ".next".into(),
            "*.lock".into(),
        ]
    }

    fn default_max_file_size() -> u64 {
        5 * 1024 * 1024
    }

    fn default_working_set_cap() -> usize {
        50
    }

    fn default_query_timeout_ms() -> u64 {
        500
    }
}

/// Ranking Store normalization constants (§4.2, normative).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Recency half-life in seconds (default 1 hour).
    #[serde(default = "RankingConfig::default_recency_half_life_secs")]
    pub recency_half_life_secs: f64,

    /// Frequency saturation constant `C_max`.
    #[serde(default = "RankingConfig::default_frequency_c_max")]
    pub frequency_c_max: f64,

    /// Sliding window (seconds) within which two accesses count as a
    /// transition.
    #[serde(default = "RankingConfig::default_transition_window_secs")]
    pub transition_window_secs: u64,

    /// Cap on outgoing transitions kept per source path.
    #[serde(default = "RankingConfig::default_transition_top_n")]
    pub transition_top_n: usize,

    /// Session sequence TTL in seconds.
    #[serde(default = "RankingConfig::default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            recency_half_life_secs: Self::default_recency_half_life_secs(),
            frequency_c_max: Self::default_frequency_c_max(),
            transition_window_secs: Self::default_transition_window_secs(),
            transition_top_n: Self::default_transition_top_n(),
            session_ttl_secs: Self::default_session_ttl_secs(),
        }
    }
}

impl RankingConfig {
    fn default_recency_half_life_secs() -> f64 {
        3600.0
    }
    fn default_frequency_c_max() -> f64 {
        100.0
    }
    fn default_transition_window_secs() -> u64 {
        300
    }
    fn default_transition_top_n() -> usize {
        20
    }
    fn default_session_ttl_secs() -> u64 {
        4 * 3600
    }
}

/// Prediction Engine thresholds (§4.3, normative).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionConfig {
    /// Minimum top-1 confidence to return a non-empty prediction.
    #[serde(default = "PredictionConfig::default_confidence_floor")]
    pub confidence_floor: f64,

    /// Confidence above which a prediction is marked visible.
    #[serde(default = "PredictionConfig::default_confidence_show")]
    pub confidence_show: f64,

    /// Fixed weight applied to the transition term when an anchor is given.
    #[serde(default = "PredictionConfig::default_transition_weight")]
    pub transition_weight: f64,

    /// Candidate pool size per signal in step 4 of the pipeline.
    #[serde(default = "PredictionConfig::default_candidate_top_k")]
    pub candidate_top_k: usize,

    /// Finalization window (minutes) before an unresolved prediction is
    /// marked a miss.
    #[serde(default = "PredictionConfig::default_finalize_window_mins")]
    pub finalize_window_mins: u64,

    /// Grace period (seconds) added on top of the finalization window.
    #[serde(default = "PredictionConfig::default_finalize_grace_secs")]
    pub finalize_grace_secs: u64,

    /// Rolling hit-rate window in hours.
    #[serde(default = "PredictionConfig::default_rolling_window_hours")]
    pub rolling_window_hours: u64,

    /// Intent cache TTL in seconds.
    #[serde(default = "PredictionConfig::default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// `k` used for rolling hit-rate-at-k reporting.
    #[serde(default = "PredictionConfig::default_hit_at_k")]
    pub hit_at_k: usize,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            confidence_floor: Self::default_confidence_floor(),
            confidence_show: Self::default_confidence_show(),
            transition_weight: Self::default_transition_weight(),
            candidate_top_k: Self::default_candidate_top_k(),
            finalize_window_mins: Self::default_finalize_window_mins(),
            finalize_grace_secs: Self::default_finalize_grace_secs(),
            rolling_window_hours: Self::default_rolling_window_hours(),
            cache_ttl_secs: Self::default_cache_ttl_secs(),
            hit_at_k: Self::default_hit_at_k(),
        }
    }
}

impl PredictionConfig {
    fn default_confidence_floor() -> f64 {
        0.40
    }
    fn default_confidence_show() -> f64 {
        0.60
    }
    fn default_transition_weight() -> f64 {
        0.2
    }
    fn default_candidate_top_k() -> usize {
        20
    }
    fn default_finalize_window_mins() -> u64 {
        5
    }
    fn default_finalize_grace_secs() -> u64 {
        30
    }
    fn default_rolling_window_hours() -> u64 {
        24
    }
    fn default_cache_ttl_secs() -> u64 {
        3600
    }
    fn default_hit_at_k() -> usize {
        5
    }
}

/// Online Weight Tuner settings (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunerConfig {
    /// Cap on alpha/beta to avoid unbounded growth, ratio preserved.
    #[serde(default = "TunerConfig::default_param_cap")]
    pub param_cap: f64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            param_cap: Self::default_param_cap(),
        }
    }
}

impl TunerConfig {
    fn default_param_cap() -> f64 {
        1_000_000.0
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (always localhost per §6).
    #[serde(default = "ServerConfig::default_bind_addr")]
    pub bind_addr: String,

    /// Query-endpoint timeout in milliseconds.
    #[serde(default = "ServerConfig::default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Build/scan-endpoint timeout in milliseconds.
    #[serde(default = "ServerConfig::default_build_timeout_ms")]
    pub build_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: Self::default_bind_addr(),
            query_timeout_ms: Self::default_query_timeout_ms(),
            build_timeout_ms: Self::default_build_timeout_ms(),
        }
    }
}

impl ServerConfig {
    fn default_bind_addr() -> String {
        "127.0.0.1:7420".into()
    }
    fn default_query_timeout_ms() -> u64 {
        500
    }
    fn default_build_timeout_ms() -> u64 {
        5000
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "trace").
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Whether to output logs as JSON.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".into()
    }
}

impl Config {
    /// Load configuration from defaults, then overlay user config, then
    /// project config, then environment variables.
    pub fn load(repo_path: &Path) -> IntentResult<Self> {
        let mut config = Self::defaults(repo_path);

        if let Some(user_config_dir) = dirs::config_dir() {
            let user_config_path = user_config_dir.join("intentd").join("config.toml");
            if user_config_path.exists() {
                config.merge_from_file(&user_config_path)?;
            }
        }

        let project_config_path = repo_path.join(".intentd").join("config.toml");
        if project_config_path.exists() {
            config.merge_from_file(&project_config_path)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Create a default configuration for the given repo path.
    pub fn defaults(repo_path: &Path) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
            index: IndexConfig::default(),
            ranking: RankingConfig::default(),
            prediction: PredictionConfig::default(),
            tuner: TunerConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Returns the data directory for this repo's on-disk state (§6).
    pub fn data_dir(&self) -> PathBuf {
        let hash = self.repo_hash();
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("intentd")
            .join("projects")
            .join(&hash)
    }

    /// Merge values from a TOML config file (non-destructive overlay).
    fn merge_from_file(&mut self, path: &Path) -> IntentResult<()> {
        let content = std::fs::read_to_string(path)?;
        let overlay: toml::Value = toml::from_str(&content)?;

        if let Some(index) = overlay.get("index") {
            if let Ok(parsed) = index.clone().try_into::<IndexConfig>() {
                self.index = parsed;
            }
        }
        if let Some(ranking) = overlay.get("ranking") {
            if let Ok(parsed) = ranking.clone().try_into::<RankingConfig>() {
                self.ranking = parsed;
            }
        }
        if let Some(prediction) = overlay.get("prediction") {
            if let Ok(parsed) = prediction.clone().try_into::<PredictionConfig>() {
                self.prediction = parsed;
            }
        }
        if let Some(tuner) = overlay.get("tuner") {
            if let Ok(parsed) = tuner.clone().try_into::<TunerConfig>() {
                self.tuner = parsed;
            }
        }
        if let Some(server) = overlay.get("server") {
            if let Ok(parsed) = server.clone().try_into::<ServerConfig>() {
                self.server = parsed;
            }
        }
        if let Some(logging) = overlay.get("logging") {
            if let Ok(parsed) = logging.clone().try_into::<LoggingConfig>() {
                self.logging = parsed;
            }
        }

        Ok(())
    }

    /// Apply environment variable overrides (`INTENTD_*` prefix).
    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("INTENTD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(addr) = std::env::var("INTENTD_BIND_ADDR") {
            self.server.bind_addr = addr;
        }
    }

    /// Compute a short hash of the repo path for the data directory name.
    ///
    /// Normalizes the path to avoid Windows `\\?\` extended path prefix
    /// causing different hashes for the same physical directory.
    fn repo_hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let path_str = self.repo_path.to_string_lossy();
        let normalized = path_str.strip_prefix(r"\\?\").unwrap_or(&path_str);
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..4])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::defaults(Path::new("/tmp/test-repo"));
        assert_eq!(config.index.max_file_size, 5 * 1024 * 1024);
        assert_eq!(config.prediction.confidence_floor, 0.40);
        assert_eq!(config.prediction.confidence_show, 0.60);
        assert_eq!(config.ranking.recency_half_life_secs, 3600.0);
    }

    #[test]
    fn data_dir_is_stable_for_same_repo_path() {
        let a = Config::defaults(Path::new("/tmp/repo-a"));
        let b = Config::defaults(Path::new("/tmp/repo-a"));
        assert_eq!(a.data_dir(), b.data_dir());
        let c = Config::defaults(Path::new("/tmp/repo-b"));
        assert_ne!(a.data_dir(), c.data_dir());
    }
}
