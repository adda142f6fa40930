//! The Prediction Engine: the 11-step pipeline that turns an observation of
//! current user intent into a ranked set of candidate paths, plus the
//! feedback loop that measures and tunes prediction accuracy (§4.3).

use dashmap::DashMap;
use uuid::Uuid;

use crate::config::PredictionConfig;
use crate::error::IntentResult;
use crate::intent::{extract_keywords, infer_tags};
use crate::store::{CompositeWeights, RankingStore};
use crate::symbol_index::SymbolIndex;
use crate::tuner::Tuner;
use crate::types::{PredictedFile, PredictionOutcome, PredictionReason, PredictionRecord, RollingMetrics, Trend};

/// A prediction request (§6 `POST /predict`).
#[derive(Debug, Clone, Default)]
pub struct PredictRequest {
    /// Free-text intent, tokenized internally if `keywords` is absent.
    pub intent: Option<String>,
    /// Pre-tokenized keywords, used verbatim if present.
    pub keywords: Option<Vec<String>>,
    /// Current-file anchor for transition scoring.
    pub current_file: Option<String>,
    /// Session this prediction is made for.
    pub session: String,
    /// Number of snippet lines to fetch per candidate, if any.
    pub snippet_lines: Option<usize>,
}

/// A prediction response (§6 `POST /predict`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct PredictionResponse {
    /// Ranked candidate files.
    pub files: Vec<PredictedFile>,
    /// Top-1 confidence.
    pub top_confidence: f64,
    /// Whether this response came from the intent cache.
    pub cached: bool,
    /// Reason for an empty/low-confidence prediction, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    /// Whether this prediction crossed the "show" threshold (§4.3 step 8).
    pub visible: bool,
}

/// Shared, Engine-owned intent cache (fingerprint -> cached response). Kept
/// outside `PredictionEngine` itself so it survives across per-request
/// instances (§4.3 step 11).
pub type IntentCache = DashMap<String, CacheEntry>;

/// Shared, Engine-owned exponentially-decayed running confidence maximum
/// (§4.3 step 7).
pub type ReferenceMax = DashMap<(), (f64, i64)>;

/// One cached prediction response plus its expiry.
pub struct CacheEntry {
    response: PredictionResponse,
    expires_at: i64,
}

/// Drop every cache entry that has already expired (§5 "cache-eviction
/// loop"). Entries are also checked lazily on read (§4.3 step 3); this just
/// bounds the map's resident size between reads.
pub fn evict_expired_cache(cache: &IntentCache, now: i64) -> usize {
    let before = cache.len();
    cache.retain(|_, entry| entry.expires_at > now);
    before - cache.len()
}

/// The Prediction Engine for a single project. Borrows its backing store,
/// index, and Engine-owned cache/reference-max maps for the duration of one
/// call.
pub struct PredictionEngine<'a> {
    store: &'a RankingStore,
    index: &'a SymbolIndex,
    config: PredictionConfig,
    cache: &'a IntentCache,
    reference_max: &'a ReferenceMax,
}

impl<'a> PredictionEngine<'a> {
    /// Construct an engine bound to `store`/`index` and the caller-owned
    /// cache/reference-max maps, with the given config.
    pub fn new(
        store: &'a RankingStore,
        index: &'a SymbolIndex,
        config: PredictionConfig,
        cache: &'a IntentCache,
        reference_max: &'a ReferenceMax,
    ) -> Self {
        Self {
            store,
            index,
            config,
            cache,
            reference_max,
        }
    }

    /// Run the full 11-step prediction pipeline (§4.3).
    pub fn predict(&self, project: &str, req: &PredictRequest, now: i64) -> IntentResult<PredictionResponse> {
        // Step 1-2: keyword extraction + tag mapping.
        let keywords = match &req.keywords {
            Some(k) => {
                let mut k = k.clone();
                k.sort();
                k.dedup();
                k
            }
            None => extract_keywords(req.intent.as_deref().unwrap_or("")),
        };
        let text_for_tags = req.intent.clone().unwrap_or_else(|| keywords.join(" "));
        let tags = infer_tags(&text_for_tags);

        // Step 3: cache probe.
        let fingerprint = keywords.join("|");
        if let Some(entry) = self.cache.get(&fingerprint) {
            if entry.expires_at > now {
                let mut response = entry.response.clone();
                response.cached = true;
                return Ok(response);
            }
        }

        // Step 4: candidate assembly.
        let top_k = self.config.candidate_top_k;
        let mut candidates: Vec<String> = Vec::new();
        for tag in &tags {
            candidates.extend(self.store.top_by_tag(project, tag, top_k)?);
        }
        if let Some(anchor) = &req.current_file {
            let dests = self.store.transitions_from(project, anchor, top_k)?;
            candidates.extend(dests.into_iter().map(|(p, _)| p));
        }
        candidates.extend(self.store.top_by_recency(project, top_k)?);
        candidates.sort();
        candidates.dedup();

        if candidates.is_empty() {
            return Ok(PredictionResponse {
                files: Vec::new(),
                top_confidence: 0.0,
                cached: false,
                reason: Some(PredictionReason::ColdStart.as_str()),
                visible: false,
            });
        }

        // Step 5: arm selection.
        let tuner = Tuner::new(self.store, project, 1_000_000.0);
        let (arm, weights) = tuner.select_arm()?;

        // Step 6: scoring.
        let anchor = req.current_file.as_deref().map(|a| (a, self.config.transition_weight));
        let ranked = self.store.top_composite(
            project,
            &candidates,
            &tags,
            CompositeWeights { w_rec: weights.w_rec, w_freq: weights.w_freq, w_tag: weights.w_tag },
            anchor,
            now,
            top_k,
        )?;

        // Step 7: confidence.
        let top1 = ranked.first().map(|r| r.composite).unwrap_or(0.0);
        let reference_max = self.bump_reference_max(top1, now);
        let confidence = if reference_max > 0.0 { (top1 / reference_max).min(1.0) } else { 0.0 };

        // Step 8: threshold gate.
        if confidence < self.config.confidence_floor {
            return Ok(PredictionResponse {
                files: Vec::new(),
                top_confidence: confidence,
                cached: false,
                reason: Some(PredictionReason::BelowFloor.as_str()),
                visible: false,
            });
        }
        let visible = confidence >= self.config.confidence_show;

        // Step 9: snippet fetch.
        let files: Vec<PredictedFile> = ranked
            .iter()
            .map(|r| {
                let snippet = req
                    .snippet_lines
                    .and_then(|n| self.index.read_snippet(&r.path, n));
                let conf = if reference_max > 0.0 { (r.composite / reference_max).min(1.0) } else { 0.0 };
                PredictedFile { path: r.path.clone(), confidence: conf, snippet }
            })
            .collect();

        let response = PredictionResponse {
            files: files.clone(),
            top_confidence: confidence,
            cached: false,
            reason: None,
            visible,
        };

        // Step 10: log.
        let record = PredictionRecord {
            id: Uuid::new_v4(),
            session: req.session.clone(),
            fingerprint: fingerprint.clone(),
            arm,
            candidates: files.iter().map(|f| f.path.clone()).collect(),
            created_at: now,
            outcome: PredictionOutcome::Pending,
        };
        self.store.log_prediction(project, &record)?;

        // Step 11: cache.
        self.cache.insert(
            fingerprint,
            CacheEntry { response: response.clone(), expires_at: now + self.config.cache_ttl_secs as i64 },
        );

        Ok(response)
    }

    fn bump_reference_max(&self, observed: f64, now: i64) -> f64 {
        let half_life = (self.config.rolling_window_hours as f64) * 3600.0;
        let mut entry = self.reference_max.entry(()).or_insert((observed.max(1e-9), now));
        let (value, updated_at) = *entry;
        let decayed = value * (-std::f64::consts::LN_2 * (now - updated_at).max(0) as f64 / half_life).exp();
        let new_value = decayed.max(observed).max(1e-9);
        *entry = (new_value, now);
        new_value
    }

    /// Hit attribution: when Intent Capture observes an access to `path` in
    /// `session`, resolve the first unresolved prediction naming it as a hit
    /// and give its arm a positive update (§4.3 "Hit/miss attribution").
    pub fn resolve_hit(&self, project: &str, session: &str, path: &str) -> IntentResult<bool> {
        match self.store.resolve_hit(project, session, path, self.config.hit_at_k)? {
            Some(arm) => {
                Tuner::new(self.store, project, 1_000_000.0).update_arm(arm, true)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// `finalize_stale(now, grace)`: resolve unresolved predictions older
    /// than the finalization window as misses, with a negative tuner update
    /// each (§4.3 "Hit/miss attribution").
    pub fn finalize_stale(&self, project: &str, now: i64) -> IntentResult<usize> {
        let window_secs = self.config.finalize_window_mins * 60;
        let misses = self.store.finalize_stale(now, window_secs, self.config.finalize_grace_secs)?;
        let tuner = Tuner::new(self.store, project, 1_000_000.0);
        for arm in &misses {
            tuner.update_arm(*arm, false)?;
        }
        Ok(misses.len())
    }

    /// Rolling-window hit-rate and trend metrics (§4.3 Metrics).
    pub fn rolling_metrics(&self, project: &str, now: i64) -> IntentResult<RollingMetrics> {
        let window_hours = self.config.rolling_window_hours;
        let counts = self.store.rolling_counts(project, now, window_hours)?;

        let hit_at_k = if counts.evaluated > 0 {
            counts.hits as f64 / counts.evaluated as f64
        } else {
            0.0
        };

        const DEAD_BAND: f64 = 0.05;
        let trend = if counts.recent_evaluated < 5 || counts.prior_evaluated < 5 {
            Trend::InsufficientData
        } else {
            let recent_rate = counts.recent_hits as f64 / counts.recent_evaluated as f64;
            let prior_rate = counts.prior_hits as f64 / counts.prior_evaluated as f64;
            if recent_rate - prior_rate > DEAD_BAND {
                Trend::Improving
            } else if prior_rate - recent_rate > DEAD_BAND {
                Trend::Declining
            } else {
                Trend::Stable
            }
        };

        Ok(RollingMetrics {
            window_hours,
            total: counts.total,
            evaluated: counts.evaluated,
            pending: counts.pending,
            hits: counts.hits,
            hit_at_k,
            trend,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Normalization;
    use std::path::Path;

    fn setup() -> (RankingStore, SymbolIndex, IntentCache, ReferenceMax) {
        let store = RankingStore::open_in_memory(Normalization::default()).unwrap();
        let index = SymbolIndex::new(Path::new("/tmp/nonexistent"), &[], 50);
        (store, index, IntentCache::new(), ReferenceMax::new())
    }

    #[test]
    fn cold_start_with_no_history_returns_cold_start_reason() {
        let (store, index, cache, reference_max) = setup();
        let engine = PredictionEngine::new(&store, &index, PredictionConfig::default(), &cache, &reference_max);
        let req = PredictRequest { session: "s1".into(), intent: Some("fix auth bug".into()), ..Default::default() };
        let resp = engine.predict("p", &req, 1000).unwrap();
        assert!(resp.files.is_empty());
        assert_eq!(resp.reason, Some("cold_start"));
    }

    #[test]
    fn repeated_access_builds_confidence_above_floor() {
        let (store, index, cache, reference_max) = setup();
        store.record_access("p", "src/auth/login.rs", &["#authentication".into()], 500).unwrap();
        let engine = PredictionEngine::new(&store, &index, PredictionConfig::default(), &cache, &reference_max);
        let req = PredictRequest { session: "s1".into(), intent: Some("auth login".into()), ..Default::default() };
        let resp = engine.predict("p", &req, 1000).unwrap();
        assert!(!resp.files.is_empty());
        assert_eq!(resp.files[0].path, "src/auth/login.rs");
    }

    #[test]
    fn cache_probe_returns_cached_flag_on_repeat_query() {
        let (store, index, cache, reference_max) = setup();
        store.record_access("p", "src/auth/login.rs", &["#authentication".into()], 500).unwrap();
        let engine = PredictionEngine::new(&store, &index, PredictionConfig::default(), &cache, &reference_max);
        let req = PredictRequest { session: "s1".into(), intent: Some("auth login".into()), ..Default::default() };
        let first = engine.predict("p", &req, 1000).unwrap();
        assert!(!first.cached);
        let second = engine.predict("p", &req, 1001).unwrap();
        assert!(second.cached);
    }

    #[test]
    fn hit_resolution_marks_prediction_as_hit() {
        let (store, index, cache, reference_max) = setup();
        store.record_access("p", "src/auth/login.rs", &["#authentication".into()], 500).unwrap();
        let engine = PredictionEngine::new(&store, &index, PredictionConfig::default(), &cache, &reference_max);
        let req = PredictRequest { session: "s1".into(), intent: Some("auth login".into()), ..Default::default() };
        let resp = engine.predict("p", &req, 1000).unwrap();
        assert!(!resp.files.is_empty());
        let path = resp.files[0].path.clone();
        let hit = engine.resolve_hit("p", "s1", &path).unwrap();
        assert!(hit);
    }

    #[test]
    fn finalize_stale_resolves_old_pending_as_miss() {
        let (store, index, cache, reference_max) = setup();
        store.record_access("p", "src/auth/login.rs", &["#authentication".into()], 500).unwrap();
        let engine = PredictionEngine::new(&store, &index, PredictionConfig::default(), &cache, &reference_max);
        let req = PredictRequest { session: "s1".into(), intent: Some("auth login".into()), ..Default::default() };
        engine.predict("p", &req, 1000).unwrap();
        let resolved = engine.finalize_stale("p", 1000 + 10_000).unwrap();
        assert_eq!(resolved, 1);
    }
}
