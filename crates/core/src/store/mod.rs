//! The Ranking Store: the only read/write path for recency, frequency, tag
//! affinity, transitions, session sequences, prediction records, and tuner
//! state (§4.2). All other components use its verbs exclusively.
//!
//! Backed by SQLite in WAL mode — the embedded single-process implementation
//! §9's "Ranking Store abstraction" design note calls for as the default
//! deploy. The connection is guarded by a `parking_lot::Mutex` since
//! `rusqlite::Connection` is `!Sync`; every verb holds the lock only for the
//! duration of its own statement(s), matching §4.2 "no verb blocks longer
//! than a few milliseconds in the common case".

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::{IntentError, IntentResult};
use crate::types::{PredictionRecord, Project, RankedPath, SignalBreakdown};

/// Normalization constants and window parameters the store needs to compute
/// signals (§4.2 Normalization, normative).
#[derive(Debug, Clone, Copy)]
pub struct Normalization {
    /// Recency half-life in seconds.
    pub recency_half_life_secs: f64,
    /// Frequency saturation constant.
    pub frequency_c_max: f64,
    /// Sliding window (seconds) for transition recording.
    pub transition_window_secs: u64,
    /// Cap on outgoing transitions kept per source path.
    pub transition_top_n: usize,
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            recency_half_life_secs: 3600.0,
            frequency_c_max: 100.0,
            transition_window_secs: 300,
            transition_top_n: 20,
        }
    }
}

/// recency signal: `exp(-ln2 * (now - t_last) / T_half)`, clamped to `[0,1]`.
pub fn recency_signal(now: i64, t_last: i64, half_life_secs: f64) -> f64 {
    let dt = (now - t_last).max(0) as f64;
    (-std::f64::consts::LN_2 * dt / half_life_secs).exp().clamp(0.0, 1.0)
}

/// frequency signal: `min(1, log(1+count)/log(1+C_max))`.
pub fn frequency_signal(count: u64, c_max: f64) -> f64 {
    if c_max <= 0.0 {
        return 0.0;
    }
    (((1.0 + count as f64).ln()) / ((1.0 + c_max).ln())).min(1.0)
}

/// tag signal: `tag_score / max_tag_score_in_set`, or 0 if no tag supplied.
pub fn tag_signal(tag_score: f64, max_tag_score_in_set: f64) -> f64 {
    if max_tag_score_in_set <= 0.0 {
        0.0
    } else {
        (tag_score / max_tag_score_in_set).clamp(0.0, 1.0)
    }
}

/// transition signal: `trans_score / sum(trans_scores_from(A))`.
pub fn transition_signal(trans_score: f64, sum_trans_scores_from_a: f64) -> f64 {
    if sum_trans_scores_from_a <= 0.0 {
        0.0
    } else {
        (trans_score / sum_trans_scores_from_a).clamp(0.0, 1.0)
    }
}

/// Weights applied to each normalized signal in `top_composite` (§4.2, §4.4).
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositeWeights {
    /// Weight on the recency signal.
    pub w_rec: f64,
    /// Weight on the frequency signal.
    pub w_freq: f64,
    /// Weight on the tag affinity signal.
    pub w_tag: f64,
}

/// The embedded Ranking Store.
pub struct RankingStore {
    conn: Mutex<Connection>,
    norm: Normalization,
}

impl RankingStore {
    /// Open (or create) the store's SQLite database at `db_path`.
    pub fn open(db_path: &Path, norm: Normalization) -> IntentResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self {
            conn: Mutex::new(conn),
            norm,
        })
    }

    /// Open an in-memory store, for tests and ephemeral use.
    pub fn open_in_memory(norm: Normalization) -> IntentResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self {
            conn: Mutex::new(conn),
            norm,
        })
    }

    // -----------------------------------------------------------------
    // Projects
    // -----------------------------------------------------------------

    /// Register a new project, or return it unchanged if `root_path` is
    /// already registered.
    pub fn register_project(&self, root_path: &Path) -> IntentResult<Project> {
        let conn = self.conn.lock();
        let root = root_path.to_string_lossy().to_string();
        let existing: Option<String> = conn
            .query_row(
                "SELECT uuid FROM projects WHERE root_path = ?1",
                params![root],
                |row| row.get(0),
            )
            .optional()?;
        let id = match existing {
            Some(uuid_str) => Uuid::parse_str(&uuid_str).map_err(|e| IntentError::Internal(e.to_string()))?,
            None => {
                let id = Uuid::new_v4();
                conn.execute(
                    "INSERT INTO projects (uuid, root_path, enabled) VALUES (?1, ?2, 1)",
                    params![id.to_string(), root],
                )?;
                id
            }
        };
        Ok(Project {
            id,
            root_path: root_path.to_path_buf(),
            enabled: true,
        })
    }

    /// Remove a project and every key it owns (§3 "removing a project
    /// removes all its keys").
    pub fn remove_project(&self, project: &str) -> IntentResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM recency WHERE project = ?1", params![project])?;
        conn.execute("DELETE FROM frequency WHERE project = ?1", params![project])?;
        conn.execute("DELETE FROM tag_affinity WHERE project = ?1", params![project])?;
        conn.execute("DELETE FROM path_tags WHERE project = ?1", params![project])?;
        conn.execute("DELETE FROM transitions WHERE project = ?1", params![project])?;
        conn.execute("DELETE FROM session_seq WHERE project = ?1", params![project])?;
        conn.execute("DELETE FROM predictions WHERE project = ?1", params![project])?;
        conn.execute("DELETE FROM tuner_arms WHERE project = ?1", params![project])?;
        conn.execute("DELETE FROM projects WHERE uuid = ?1", params![project])?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // record_access / record_transition (§4.2)
    // -----------------------------------------------------------------

    /// `record_access(project, path, tags, now)`: upserts recency, increments
    /// frequency, and increments tag affinity for every supplied tag.
    /// Atomic in observable effect across all three (§4.2).
    pub fn record_access(&self, project: &str, path: &str, tags: &[String], now: i64) -> IntentResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO recency (project, path, score) VALUES (?1, ?2, ?3)
             ON CONFLICT(project, path) DO UPDATE SET score = excluded.score",
            params![project, path, now as f64],
        )?;
        tx.execute(
            "INSERT INTO frequency (project, path, count) VALUES (?1, ?2, 1)
             ON CONFLICT(project, path) DO UPDATE SET count = count + 1",
            params![project, path],
        )?;
        for tag in tags {
            tx.execute(
                "INSERT INTO tag_affinity (project, tag, path, score) VALUES (?1, ?2, ?3, 1)
                 ON CONFLICT(project, tag, path) DO UPDATE SET score = score + 1",
                params![project, tag, path],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO path_tags (project, path, tag) VALUES (?1, ?2, ?3)",
                params![project, path, tag],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// `record_transition(project, from, to, now)`: increments
    /// `trans:from[to]` only if `to != from` and the transition window has
    /// not elapsed since `from`'s last access; caps `trans:from` to the top N.
    pub fn record_transition(&self, project: &str, from: &str, to: &str, now: i64) -> IntentResult<()> {
        if from == to {
            return Ok(());
        }
        let conn = self.conn.lock();
        let last_access: Option<f64> = conn
            .query_row(
                "SELECT score FROM recency WHERE project = ?1 AND path = ?2",
                params![project, from],
                |row| row.get(0),
            )
            .optional()?;
        let Some(last_access) = last_access else {
            return Ok(());
        };
        if (now as f64 - last_access) > self.norm.transition_window_secs as f64 {
            return Ok(());
        }
        conn.execute(
            "INSERT INTO transitions (project, from_path, to_path, score) VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(project, from_path, to_path) DO UPDATE SET score = score + 1",
            params![project, from, to],
        )?;

        let cap = self.norm.transition_top_n as i64;
        conn.execute(
            "DELETE FROM transitions
             WHERE project = ?1 AND from_path = ?2
             AND to_path NOT IN (
                 SELECT to_path FROM transitions
                 WHERE project = ?1 AND from_path = ?2
                 ORDER BY score DESC LIMIT ?3
             )",
            params![project, from, cap],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    /// `top_by_tag(project, tag, k)`: top-k paths by tag affinity.
    pub fn top_by_tag(&self, project: &str, tag: &str, k: usize) -> IntentResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT path FROM tag_affinity WHERE project = ?1 AND tag = ?2
             ORDER BY score DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![project, tag, k as i64], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    /// `transitions_from(project, path, k)`: top-k destinations by
    /// transition score.
    pub fn transitions_from(&self, project: &str, path: &str, k: usize) -> IntentResult<Vec<(String, f64)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT to_path, score FROM transitions WHERE project = ?1 AND from_path = ?2
             ORDER BY score DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![project, path, k as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Global top-k by recency, used as the cold-start fallback (§4.3 step
    /// 4c).
    pub fn top_by_recency(&self, project: &str, k: usize) -> IntentResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT path FROM recency WHERE project = ?1 ORDER BY score DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![project, k as i64], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Global top-k by access frequency, used to round out the candidate
    /// pool for an untagged `/rank` query alongside `top_by_recency`.
    pub fn top_by_frequency(&self, project: &str, k: usize) -> IntentResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT path FROM frequency WHERE project = ?1 ORDER BY count DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![project, k as i64], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// `top_composite(project, tags, weights, k)`: rank `candidates` by
    /// `Σ weights_i · signal_i`, each signal normalized to `[0,1]` (§4.2).
    ///
    /// An optional `(anchor, transition_weight)` adds a transition term,
    /// re-normalizing the remaining weights only when no anchor is given
    /// (§4.3 step 6).
    pub fn top_composite(
        &self,
        project: &str,
        candidates: &[String],
        tags: &[String],
        weights: CompositeWeights,
        anchor: Option<(&str, f64)>,
        now: i64,
        k: usize,
    ) -> IntentResult<Vec<RankedPath>> {
        let conn = self.conn.lock();

        let mut recency_raw = HashMap::new();
        let mut freq_raw = HashMap::new();
        let mut tag_raw: HashMap<&String, HashMap<String, f64>> = HashMap::new();
        for tag in tags {
            tag_raw.insert(tag, HashMap::new());
        }

        for path in candidates {
            let r: Option<f64> = conn
                .query_row(
                    "SELECT score FROM recency WHERE project = ?1 AND path = ?2",
                    params![project, path],
                    |row| row.get(0),
                )
                .optional()?;
            recency_raw.insert(path.clone(), r.unwrap_or(0.0));

            let f: Option<i64> = conn
                .query_row(
                    "SELECT count FROM frequency WHERE project = ?1 AND path = ?2",
                    params![project, path],
                    |row| row.get(0),
                )
                .optional()?;
            freq_raw.insert(path.clone(), f.unwrap_or(0));

            for tag in tags {
                let t: Option<f64> = conn
                    .query_row(
                        "SELECT score FROM tag_affinity WHERE project = ?1 AND tag = ?2 AND path = ?3",
                        params![project, tag, path],
                        |row| row.get(0),
                    )
                    .optional()?;
                tag_raw.entry(tag).or_default().insert(path.clone(), t.unwrap_or(0.0));
            }
        }

        let max_tag_in_set: HashMap<&String, f64> = tag_raw
            .iter()
            .map(|(tag, per_path)| {
                let max = per_path.values().copied().fold(0.0_f64, f64::max);
                (*tag, max)
            })
            .collect();

        let (trans_raw, trans_sum): (HashMap<String, f64>, f64) = if let Some((anchor, _)) = anchor {
            let dests = self.transitions_from_locked(&conn, project, anchor, usize::MAX)?;
            let sum: f64 = dests.iter().map(|(_, s)| s).sum();
            (dests.into_iter().collect(), sum)
        } else {
            (HashMap::new(), 0.0)
        };

        let (w_rec, w_freq, w_tag, w_trans) = match anchor {
            Some((_, w_t)) => {
                let remaining = 1.0 - w_t;
                let denom = weights.w_rec + weights.w_freq + weights.w_tag;
                if denom <= 0.0 {
                    (0.0, 0.0, 0.0, w_t)
                } else {
                    (
                        weights.w_rec / denom * remaining,
                        weights.w_freq / denom * remaining,
                        weights.w_tag / denom * remaining,
                        w_t,
                    )
                }
            }
            None => (weights.w_rec, weights.w_freq, weights.w_tag, 0.0),
        };

        let mut ranked = Vec::with_capacity(candidates.len());
        for path in candidates {
            let rec = recency_signal(now, recency_raw[path] as i64, self.norm.recency_half_life_secs);
            let freq = frequency_signal(freq_raw[path] as u64, self.norm.frequency_c_max);
            let tag = tags
                .iter()
                .map(|t| tag_signal(tag_raw[t][path], max_tag_in_set[t]))
                .fold(0.0_f64, f64::max);
            let trans = if anchor.is_some() {
                transition_signal(trans_raw.get(path).copied().unwrap_or(0.0), trans_sum)
            } else {
                0.0
            };

            let signals = SignalBreakdown {
                recency: rec,
                frequency: freq,
                tag,
                transition: trans,
            };
            let composite = w_rec * rec + w_freq * freq + w_tag * tag + w_trans * trans;
            ranked.push(RankedPath {
                path: path.clone(),
                composite,
                signals,
            });
        }

        ranked.sort_by(|a, b| b.composite.partial_cmp(&a.composite).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(k);
        Ok(ranked)
    }

    fn transitions_from_locked(
        &self,
        conn: &Connection,
        project: &str,
        path: &str,
        k: usize,
    ) -> IntentResult<Vec<(String, f64)>> {
        let limit = if k == usize::MAX { i64::MAX } else { k as i64 };
        let mut stmt = conn.prepare(
            "SELECT to_path, score FROM transitions WHERE project = ?1 AND from_path = ?2
             ORDER BY score DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![project, path, limit], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -----------------------------------------------------------------
    // Session sequence
    // -----------------------------------------------------------------

    /// Record a path access within a session sequence (§3 `seq:{session}`).
    pub fn record_session_access(&self, project: &str, session: &str, path: &str, now: i64) -> IntentResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO session_seq (project, session, path, ts) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(project, session, path) DO UPDATE SET ts = excluded.ts",
            params![project, session, path, now],
        )?;
        Ok(())
    }

    /// The most recently accessed path in a session before `before_ts`, used
    /// as the transition source (§4.5 "pairs (last path in session within
    /// window, p)").
    pub fn last_session_path(&self, project: &str, session: &str, before_ts: i64) -> IntentResult<Option<String>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT path FROM session_seq WHERE project = ?1 AND session = ?2 AND ts < ?3
                 ORDER BY ts DESC LIMIT 1",
                params![project, session, before_ts],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Purge session sequence rows older than `ttl_secs` before `now`.
    pub fn expire_sessions(&self, now: i64, ttl_secs: u64) -> IntentResult<usize> {
        let conn = self.conn.lock();
        let cutoff = now - ttl_secs as i64;
        Ok(conn.execute("DELETE FROM session_seq WHERE ts < ?1", params![cutoff])?)
    }

    // -----------------------------------------------------------------
    // Predictions (§4.3)
    // -----------------------------------------------------------------

    /// `log_prediction(record)`.
    pub fn log_prediction(&self, project: &str, record: &PredictionRecord) -> IntentResult<()> {
        let conn = self.conn.lock();
        let candidates_json = serde_json::to_string(&record.candidates)?;
        conn.execute(
            "INSERT INTO predictions (id, project, session, fingerprint, arm, candidates, created_at, outcome)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending')",
            params![
                record.id.to_string(),
                project,
                record.session,
                record.fingerprint,
                record.arm as i64,
                candidates_json,
                record.created_at,
            ],
        )?;
        Ok(())
    }

    /// Find the first unresolved prediction in `session` naming `path`
    /// within its top-`hit_at_k` candidates (§4.3 "Hit/miss attribution")
    /// and resolve it as a hit, returning its arm index if one was found.
    pub fn resolve_hit(
        &self,
        project: &str,
        session: &str,
        path: &str,
        hit_at_k: usize,
    ) -> IntentResult<Option<usize>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, arm, candidates FROM predictions
             WHERE project = ?1 AND session = ?2 AND outcome = 'pending'
             ORDER BY created_at ASC",
        )?;
        let mut rows = stmt.query(params![project, session])?;
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let arm: i64 = row.get(1)?;
            let candidates_json: String = row.get(2)?;
            let candidates: Vec<String> = serde_json::from_str(&candidates_json)?;
            if candidates.iter().take(hit_at_k).any(|c| c == path) {
                drop(rows);
                conn.execute(
                    "UPDATE predictions SET outcome = 'hit' WHERE id = ?1",
                    params![id],
                )?;
                return Ok(Some(arm as usize));
            }
        }
        Ok(None)
    }

    /// `finalize_stale(now, grace)`: resolve any prediction older than
    /// `window + grace` still unresolved as a miss, returning the arm
    /// indices of every newly-resolved miss (so the caller can update them).
    pub fn finalize_stale(&self, now: i64, window_secs: u64, grace_secs: u64) -> IntentResult<Vec<usize>> {
        let conn = self.conn.lock();
        let cutoff = now - (window_secs + grace_secs) as i64;
        let mut stmt = conn.prepare(
            "SELECT id, arm FROM predictions WHERE outcome = 'pending' AND created_at < ?1",
        )?;
        let stale: Vec<(String, i64)> = stmt
            .query_map(params![cutoff], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;
        for (id, _) in &stale {
            conn.execute("UPDATE predictions SET outcome = 'miss' WHERE id = ?1", params![id])?;
        }
        Ok(stale.into_iter().map(|(_, arm)| arm as usize).collect())
    }

    /// Rolling-window raw counts, used by the prediction engine to derive
    /// `RollingMetrics` (§4.3 Metrics).
    pub fn rolling_counts(&self, project: &str, now: i64, window_hours: u64) -> IntentResult<RollingCounts> {
        let conn = self.conn.lock();
        let cutoff = now - (window_hours as i64) * 3600;
        let half_cutoff = now - (window_hours as i64) * 1800;

        let total: u64 = conn.query_row(
            "SELECT COUNT(*) FROM predictions WHERE project = ?1 AND created_at >= ?2",
            params![project, cutoff],
            |row| row.get(0),
        )?;
        let pending: u64 = conn.query_row(
            "SELECT COUNT(*) FROM predictions WHERE project = ?1 AND created_at >= ?2 AND outcome = 'pending'",
            params![project, cutoff],
            |row| row.get(0),
        )?;
        let evaluated: u64 = conn.query_row(
            "SELECT COUNT(*) FROM predictions WHERE project = ?1 AND created_at >= ?2 AND outcome != 'pending'",
            params![project, cutoff],
            |row| row.get(0),
        )?;
        let hits: u64 = conn.query_row(
            "SELECT COUNT(*) FROM predictions WHERE project = ?1 AND created_at >= ?2 AND outcome = 'hit'",
            params![project, cutoff],
            |row| row.get(0),
        )?;
        let recent_evaluated: u64 = conn.query_row(
            "SELECT COUNT(*) FROM predictions WHERE project = ?1 AND created_at >= ?2 AND outcome != 'pending'",
            params![project, half_cutoff],
            |row| row.get(0),
        )?;
        let recent_hits: u64 = conn.query_row(
            "SELECT COUNT(*) FROM predictions WHERE project = ?1 AND created_at >= ?2 AND outcome = 'hit'",
            params![project, half_cutoff],
            |row| row.get(0),
        )?;
        let prior_evaluated = evaluated.saturating_sub(recent_evaluated);
        let prior_hits = hits.saturating_sub(recent_hits);

        Ok(RollingCounts {
            total,
            pending,
            evaluated,
            hits,
            recent_evaluated,
            recent_hits,
            prior_evaluated,
            prior_hits,
        })
    }

    // -----------------------------------------------------------------
    // Tuner arms (§4.4)
    // -----------------------------------------------------------------

    /// `arm_state()`: the full `(alpha, beta)` table, indexed by arm.
    pub fn arm_state(&self, project: &str, arm_count: usize) -> IntentResult<Vec<(f64, f64)>> {
        let conn = self.conn.lock();
        let mut out = vec![(1.0, 1.0); arm_count];
        let mut stmt = conn.prepare("SELECT arm, alpha, beta FROM tuner_arms WHERE project = ?1")?;
        let rows = stmt.query_map(params![project], |row| {
            Ok((row.get::<_, i64>(0)? as usize, row.get::<_, f64>(1)?, row.get::<_, f64>(2)?))
        })?;
        for row in rows {
            let (arm, alpha, beta) = row?;
            if arm < out.len() {
                out[arm] = (alpha, beta);
            }
        }
        Ok(out)
    }

    /// `update_arm(k, hit)`: `alpha_k += 1` if hit, else `beta_k += 1`,
    /// capped at `param_cap` without changing the ratio (§4.4 failure modes).
    pub fn update_arm(&self, project: &str, arm: usize, hit: bool, param_cap: f64) -> IntentResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO tuner_arms (project, arm, alpha, beta) VALUES (?1, ?2, 1, 1)
             ON CONFLICT(project, arm) DO NOTHING",
            params![project, arm as i64],
        )?;
        if hit {
            conn.execute(
                "UPDATE tuner_arms SET alpha = alpha + 1 WHERE project = ?1 AND arm = ?2",
                params![project, arm as i64],
            )?;
        } else {
            conn.execute(
                "UPDATE tuner_arms SET beta = beta + 1 WHERE project = ?1 AND arm = ?2",
                params![project, arm as i64],
            )?;
        }
        let (alpha, beta): (f64, f64) = conn.query_row(
            "SELECT alpha, beta FROM tuner_arms WHERE project = ?1 AND arm = ?2",
            params![project, arm as i64],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if alpha > param_cap || beta > param_cap {
            let scale = param_cap / alpha.max(beta);
            conn.execute(
                "UPDATE tuner_arms SET alpha = ?3, beta = ?4 WHERE project = ?1 AND arm = ?2",
                params![project, arm as i64, alpha * scale, beta * scale],
            )?;
        }
        Ok(())
    }

    /// `reset_arms()`: set all arms back to `Beta(1,1)`.
    pub fn reset_arms(&self, project: &str, arm_count: usize) -> IntentResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM tuner_arms WHERE project = ?1", params![project])?;
        for arm in 0..arm_count {
            conn.execute(
                "INSERT INTO tuner_arms (project, arm, alpha, beta) VALUES (?1, ?2, 1, 1)",
                params![project, arm as i64],
            )?;
        }
        Ok(())
    }
}

/// Raw rolling-window prediction counts, before the prediction engine turns
/// them into `RollingMetrics` (trend comparison, hit-at-k, etc).
#[derive(Debug, Clone, Copy, Default)]
pub struct RollingCounts {
    /// Predictions logged in the full window.
    pub total: u64,
    /// Predictions still pending in the full window.
    pub pending: u64,
    /// Predictions resolved (hit or miss) in the full window.
    pub evaluated: u64,
    /// Predictions resolved as a hit in the full window.
    pub hits: u64,
    /// Resolved predictions in the most recent half-window.
    pub recent_evaluated: u64,
    /// Hits in the most recent half-window.
    pub recent_hits: u64,
    /// Resolved predictions in the prior half-window.
    pub prior_evaluated: u64,
    /// Hits in the prior half-window.
    pub prior_hits: u64,
}

/// Also re-export the outcome enum for callers constructing records.
pub use crate::types::PredictionOutcome as Outcome;

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RankingStore {
        RankingStore::open_in_memory(Normalization::default()).unwrap()
    }

    #[test]
    fn recency_dominance_invariant() {
        let store = store();
        store.record_access("p", "/src/old.py", &[], 1_000_000 - 3600).unwrap();
        store.record_access("p", "/src/new.py", &[], 1_000_000).unwrap();
        let candidates = vec!["/src/old.py".to_string(), "/src/new.py".to_string()];
        let ranked = store
            .top_composite(
                "p",
                &candidates,
                &[],
                CompositeWeights { w_rec: 1.0, w_freq: 0.0, w_tag: 0.0 },
                None,
                1_000_000,
                2,
            )
            .unwrap();
        assert_eq!(ranked[0].path, "/src/new.py");
    }

    #[test]
    fn frequency_dominance_invariant() {
        let store = store();
        store.record_access("p", "/a.py", &[], 1000).unwrap();
        store.record_access("p", "/b.py", &[], 1000).unwrap();
        for _ in 0..9 {
            store.record_access("p", "/b.py", &[], 1000).unwrap();
        }
        let candidates = vec!["/a.py".to_string(), "/b.py".to_string()];
        let ranked = store
            .top_composite(
                "p",
                &candidates,
                &[],
                CompositeWeights { w_rec: 0.0, w_freq: 1.0, w_tag: 0.0 },
                None,
                1000,
                2,
            )
            .unwrap();
        assert_eq!(ranked[0].path, "/b.py");
    }

    #[test]
    fn tag_affinity_dominance_invariant() {
        let store = store();
        store.record_access("p", "/routes.py", &["api".into()], 1000).unwrap();
        store.record_access("p", "/tests/test_routes.py", &["testing".into()], 1000).unwrap();
        let candidates = vec!["/routes.py".to_string(), "/tests/test_routes.py".to_string()];
        let ranked = store
            .top_composite(
                "p",
                &candidates,
                &["api".to_string()],
                CompositeWeights { w_rec: 0.0, w_freq: 0.0, w_tag: 1.0 },
                None,
                1000,
                2,
            )
            .unwrap();
        assert_eq!(ranked[0].path, "/routes.py");
    }

    #[test]
    fn arm_update_safety_invariant() {
        let store = store();
        store.reset_arms("p", 8).unwrap();
        store.update_arm("p", 2, true, 1_000_000.0).unwrap();
        let arms = store.arm_state("p", 8).unwrap();
        assert_eq!(arms[2], (2.0, 1.0));
        for (i, (a, b)) in arms.iter().enumerate() {
            if i != 2 {
                assert_eq!((*a, *b), (1.0, 1.0));
            }
        }
    }

    #[test]
    fn transition_only_recorded_within_window() {
        let store = store();
        store.record_access("p", "/auth.py", &[], 1000).unwrap();
        store.record_transition("p", "/auth.py", "/session.py", 1000 + 301).unwrap();
        let dests = store.transitions_from("p", "/auth.py", 10).unwrap();
        assert!(dests.is_empty());

        store.record_transition("p", "/auth.py", "/session.py", 1000 + 100).unwrap();
        let dests = store.transitions_from("p", "/auth.py", 10).unwrap();
        assert_eq!(dests[0].0, "/session.py");
    }

    #[test]
    fn transition_self_loop_ignored() {
        let store = store();
        store.record_access("p", "/a.py", &[], 1000).unwrap();
        store.record_transition("p", "/a.py", "/a.py", 1000).unwrap();
        assert!(store.transitions_from("p", "/a.py", 10).unwrap().is_empty());
    }

    #[test]
    fn normalization_formulas() {
        assert!((recency_signal(3600, 0, 3600.0) - 0.5).abs() < 1e-9);
        assert_eq!(recency_signal(0, 0, 3600.0), 1.0);
        assert!(frequency_signal(100, 100.0) <= 1.0);
        assert_eq!(frequency_signal(0, 100.0), 0.0);
        assert_eq!(tag_signal(5.0, 0.0), 0.0);
        assert_eq!(tag_signal(5.0, 10.0), 0.5);
    }

    #[test]
    fn prediction_resolution_hit_then_finalize_noop() {
        let store = store();
        let record = PredictionRecord {
            id: Uuid::new_v4(),
            session: "s1".into(),
            fingerprint: "fp".into(),
            arm: 2,
            candidates: vec!["/auth.py".into()],
            created_at: 1000,
            outcome: Outcome::Pending,
        };
        store.log_prediction("p", &record).unwrap();
        let arm = store.resolve_hit("p", "s1", "/auth.py", 5).unwrap();
        assert_eq!(arm, Some(2));

        // Already resolved; finalize_stale should not re-touch it.
        let misses = store.finalize_stale(1000 + 10_000, 300, 30).unwrap();
        assert!(misses.is_empty());
    }

    #[test]
    fn resolve_hit_ignores_matches_beyond_hit_at_k() {
        let store = store();
        let record = PredictionRecord {
            id: Uuid::new_v4(),
            session: "s1".into(),
            fingerprint: "fp".into(),
            arm: 0,
            candidates: vec!["/a.py".into(), "/b.py".into(), "/c.py".into()],
            created_at: 1000,
            outcome: Outcome::Pending,
        };
        store.log_prediction("p", &record).unwrap();

        // "/c.py" sits outside the top-2, so a hit_at_k of 2 must not
        // attribute it.
        assert_eq!(store.resolve_hit("p", "s1", "/c.py", 2).unwrap(), None);
        // It is inside the top-3, so the full candidate list still counts.
        assert_eq!(store.resolve_hit("p", "s1", "/c.py", 3).unwrap(), Some(0));
    }

    #[test]
    fn prediction_finalizes_as_miss_after_window() {
        let store = store();
        let record = PredictionRecord {
            id: Uuid::new_v4(),
            session: "s1".into(),
            fingerprint: "fp".into(),
            arm: 3,
            candidates: vec!["/x.py".into()],
            created_at: 1000,
            outcome: Outcome::Pending,
        };
        store.log_prediction("p", &record).unwrap();
        let misses = store.finalize_stale(1000 + 400, 300, 30).unwrap();
        assert_eq!(misses, vec![3]);
    }
}
