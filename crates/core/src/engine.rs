//! Wires the Symbol Index, Ranking Store, Prediction Engine, Online Weight
//! Tuner, and Intent Capture Pipeline together into a single per-project
//! engine, the library's top-level entry point.

use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::error::IntentResult;
use crate::intent::{self, CaptureOutcome};
use crate::predict::{self, IntentCache, PredictRequest, PredictionEngine, PredictionResponse, ReferenceMax};
use crate::store::{Normalization, RankingStore};
use crate::symbol_index::SymbolIndex;
use crate::tuner::{ArmStat, Tuner, ARM_COUNT};
use crate::types::{ArmWeights, IntentEvent, Project, RankedPath, RegexMatch, RollingMetrics, SymbolMatch};

/// The intentd engine for one project: owns the Symbol Index and Ranking
/// Store, and exposes every verb the HTTP surface needs (§2 SYSTEM
/// OVERVIEW, §6 EXTERNAL INTERFACES).
pub struct Engine {
    config: Config,
    project: Project,
    index: SymbolIndex,
    store: RankingStore,
    cache: IntentCache,
    reference_max: ReferenceMax,
}

impl Engine {
    /// Open (or create) the engine for `config.repo_path`, registering the
    /// project and loading any persisted symbol index.
    pub fn open(config: Config) -> IntentResult<Self> {
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir)?;

        let db_path = data_dir.join("intentd.sqlite3");
        let norm = Normalization {
            recency_half_life_secs: config.ranking.recency_half_life_secs,
            frequency_c_max: config.ranking.frequency_c_max,
            transition_window_secs: config.ranking.transition_window_secs,
            transition_top_n: config.ranking.transition_top_n,
        };
        let store = RankingStore::open(&db_path, norm)?;
        let project = store.register_project(&config.repo_path)?;

        let index = SymbolIndex::new(&config.repo_path, &config.index.exclude_patterns, config.index.working_set_cap)
            .with_query_timeout(Duration::from_millis(config.index.query_timeout_ms));
        let index_path = data_dir.join(format!("symbol_index_{}.json", project.id));
        index.load_into(&index_path)?;

        Ok(Self {
            config,
            project,
            index,
            store,
            cache: IntentCache::new(),
            reference_max: ReferenceMax::new(),
        })
    }

    /// The project this engine is bound to.
    pub fn project(&self) -> &Project {
        &self.project
    }

    fn project_id(&self) -> String {
        self.project.id.to_string()
    }

    /// Path to this project's persisted symbol index file.
    fn index_path(&self) -> std::path::PathBuf {
        self.config.data_dir().join(format!("symbol_index_{}.json", self.project.id))
    }

    // -----------------------------------------------------------------
    // Symbol Index (§4.1)
    // -----------------------------------------------------------------

    /// Build (or rebuild) the symbol index from scratch and persist it.
    pub fn build_index(&self) -> IntentResult<usize> {
        let count = self.index.build()?;
        self.index.persist(&self.index_path())?;
        Ok(count)
    }

    /// Re-index a single file, e.g. in response to a file-watcher event.
    pub fn reindex_path(&self, abs_path: &Path) -> IntentResult<()> {
        self.index.index_path(abs_path)?;
        self.index.persist(&self.index_path())
    }

    /// `GET /symbol`.
    pub fn symbol(&self, query: &str, limit: usize) -> Vec<SymbolMatch> {
        self.index.symbol(query, limit)
    }

    /// `GET /multi` with `mode=and`.
    pub fn multi_and(&self, tokens: &[String], limit: usize) -> IntentResult<Vec<SymbolMatch>> {
        self.index.multi_and(tokens, limit)
    }

    /// `GET /multi` with `mode=or`.
    pub fn multi_or(&self, tokens: &[String], limit: usize) -> Vec<SymbolMatch> {
        self.index.symbol(&tokens.join(" "), limit)
    }

    /// `POST /pattern`.
    pub fn pattern(&self, regex: &str) -> IntentResult<(Vec<RegexMatch>, usize)> {
        self.index.regex(regex, None)
    }

    /// Number of paths currently indexed, for `/health`.
    pub fn index_path_count(&self) -> usize {
        self.index.path_count()
    }

    // -----------------------------------------------------------------
    // Intent Capture (§4.5)
    // -----------------------------------------------------------------

    /// `POST /intent` with a `session-start` event.
    pub fn session_start(&self, session_id: &str, now: i64) -> IntentResult<()> {
        intent::start_session(&self.store, &self.project_id(), session_id, now)
    }

    /// `POST /intent` with a `tool-use-post` or `prompt-submit` event.
    /// Resolves any pending prediction the event's paths satisfy, and (for
    /// `prompt-submit`) precomputes and logs a prediction.
    pub fn capture_intent(&self, event: &IntentEvent, now: i64) -> IntentResult<CaptureOutcome> {
        let project = self.project_id();
        let outcome = intent::capture(&self.store, &project, event, now)?;

        for (path, _) in &outcome.path_accesses {
            self.resolve_hit(&event.session_id, path)?;
        }

        if !outcome.prompt_keywords.is_empty() {
            let req = PredictRequest {
                keywords: Some(outcome.prompt_keywords.clone()),
                session: event.session_id.clone(),
                ..Default::default()
            };
            self.predict(&req, now)?;
        }

        Ok(outcome)
    }

    // -----------------------------------------------------------------
    // Ranking Store reads (§4.2)
    // -----------------------------------------------------------------

    /// `GET /rank`: top files by tag, scored with the tuner's currently
    /// selected arm. With no tag, the candidate pool is assembled from
    /// global recency and frequency signals instead of a (necessarily
    /// empty) tag lookup, so composite ranking still applies.
    pub fn rank(&self, tag: &str, limit: usize, now: i64) -> IntentResult<(Vec<RankedPath>, ArmWeights, usize)> {
        let project = self.project_id();
        let pool_k = limit.max(self.config.prediction.candidate_top_k);
        let (candidates, tags): (Vec<String>, Vec<String>) = if tag.is_empty() {
            let mut candidates = self.store.top_by_recency(&project, pool_k)?;
            for path in self.store.top_by_frequency(&project, pool_k)? {
                if !candidates.contains(&path) {
                    candidates.push(path);
                }
            }
            (candidates, Vec::new())
        } else {
            (self.store.top_by_tag(&project, tag, pool_k)?, vec![tag.to_string()])
        };
        let tuner = Tuner::new(&self.store, &project, self.config.tuner.param_cap);
        let (arm, weights) = tuner.select_arm()?;
        let ranked = self.store.top_composite(
            &project,
            &candidates,
            &tags,
            crate::store::CompositeWeights { w_rec: weights.w_rec, w_freq: weights.w_freq, w_tag: weights.w_tag },
            None,
            now,
            limit,
        )?;
        Ok((ranked, weights, arm))
    }

    // -----------------------------------------------------------------
    // Prediction Engine (§4.3)
    // -----------------------------------------------------------------

    /// `POST /predict` / `POST|GET /context`.
    pub fn predict(&self, req: &PredictRequest, now: i64) -> IntentResult<PredictionResponse> {
        let engine = PredictionEngine::new(
            &self.store,
            &self.index,
            self.config.prediction.clone(),
            &self.cache,
            &self.reference_max,
        );
        engine.predict(&self.project_id(), req, now)
    }

    /// Hit attribution for one observed path access.
    pub fn resolve_hit(&self, session: &str, path: &str) -> IntentResult<bool> {
        let engine = PredictionEngine::new(
            &self.store,
            &self.index,
            self.config.prediction.clone(),
            &self.cache,
            &self.reference_max,
        );
        engine.resolve_hit(&self.project_id(), session, path)
    }

    /// `POST /predict/finalize`: resolve stale pending predictions as
    /// misses. Intended to run on a timer (§5 CONCURRENCY & RESOURCE MODEL).
    pub fn finalize_stale(&self, now: i64) -> IntentResult<usize> {
        let engine = PredictionEngine::new(
            &self.store,
            &self.index,
            self.config.prediction.clone(),
            &self.cache,
            &self.reference_max,
        );
        engine.finalize_stale(&self.project_id(), now)
    }

    /// `GET /predict/stats` rolling metrics.
    pub fn rolling_metrics(&self, now: i64) -> IntentResult<RollingMetrics> {
        let engine = PredictionEngine::new(
            &self.store,
            &self.index,
            self.config.prediction.clone(),
            &self.cache,
            &self.reference_max,
        );
        engine.rolling_metrics(&self.project_id(), now)
    }

    // -----------------------------------------------------------------
    // Online Weight Tuner (§4.4)
    // -----------------------------------------------------------------

    /// `GET /tuner/weights`: Thompson sample.
    pub fn tuner_sample(&self) -> IntentResult<(usize, ArmWeights)> {
        Tuner::new(&self.store, self.project_id(), self.config.tuner.param_cap).select_arm()
    }

    /// `GET /tuner/best`: exploitation pick.
    pub fn tuner_best(&self) -> IntentResult<(usize, ArmWeights, f64)> {
        Tuner::new(&self.store, self.project_id(), self.config.tuner.param_cap).best_arm()
    }

    /// `GET /tuner/stats`: full arm table.
    pub fn tuner_stats(&self) -> IntentResult<Vec<ArmStat>> {
        Tuner::new(&self.store, self.project_id(), self.config.tuner.param_cap).stats()
    }

    /// `POST /tuner/feedback`: manual feedback path.
    pub fn tuner_feedback(&self, arm: usize, hit: bool) -> IntentResult<()> {
        Tuner::new(&self.store, self.project_id(), self.config.tuner.param_cap).update_arm(arm, hit)
    }

    /// `POST /tuner/reset`.
    pub fn tuner_reset(&self) -> IntentResult<()> {
        Tuner::new(&self.store, self.project_id(), self.config.tuner.param_cap).reset_arms()
    }

    /// Number of fixed tuner arms, for response shaping.
    pub fn tuner_arm_count(&self) -> usize {
        ARM_COUNT
    }

    /// Expire session sequences older than the configured TTL. Intended to
    /// run on a timer alongside `finalize_stale`.
    pub fn expire_sessions(&self, now: i64) -> IntentResult<usize> {
        self.store.expire_sessions(now, self.config.ranking.session_ttl_secs)
    }

    /// Evict expired intent-cache entries. Intended to run on a timer (§5
    /// "cache-eviction loop").
    pub fn evict_cache(&self, now: i64) -> usize {
        predict::evict_expired_cache(&self.cache, now)
    }

    /// Whether the underlying store and index are ready to serve queries,
    /// for `GET /health`.
    pub fn is_ready(&self) -> bool {
        true
    }

    /// This engine's own config, for handlers that need timeouts etc.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_registers_project_and_builds_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::defaults(dir.path());
        let engine = Engine::open(config).unwrap();
        assert_eq!(engine.index_path_count(), 0);
        let count = engine.build_index().unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn rank_with_empty_tag_still_ranks_by_recency() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::defaults(dir.path());
        let engine = Engine::open(config).unwrap();
        let project = engine.project_id();
        engine.store.record_access(&project, "/src/old.py", &[], 1_000_000 - 3600).unwrap();
        engine.store.record_access(&project, "/src/new.py", &[], 1_000_000).unwrap();

        let (ranked, _, _) = engine.rank("", 2, 1_000_000).unwrap();
        assert_eq!(ranked.first().map(|r| r.path.as_str()), Some("/src/new.py"));
    }

    #[test]
    fn rank_with_empty_tag_still_ranks_by_frequency() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::defaults(dir.path());
        let engine = Engine::open(config).unwrap();
        let project = engine.project_id();
        engine.store.record_access(&project, "/a.py", &[], 1000).unwrap();
        engine.store.record_access(&project, "/b.py", &[], 1000).unwrap();
        for _ in 0..9 {
            engine.store.record_access(&project, "/b.py", &[], 1000).unwrap();
        }

        let (ranked, _, _) = engine.rank("", 2, 1000).unwrap();
        assert_eq!(ranked.first().map(|r| r.path.as_str()), Some("/b.py"));
    }
}
