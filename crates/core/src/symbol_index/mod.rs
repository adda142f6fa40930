//! The symbol index: an inverted index from identifier tokens to
//! `{path, line}` positions, with filename boosting and three query modes
//! (§4.1). This is the only component that reads raw file contents.
//!
//! The in-memory structures (`Token→Postings`, `Path→Tokens`, filename
//! index) are held in `dashmap`s for lock-free concurrent reads during
//! incremental updates, and persisted to a single JSON file per project
//! under the data directory (§6 on-disk state: "the symbol index files, one
//! per project").

mod tokenize;

pub use tokenize::tokenize;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{IntentError, IntentResult};
use crate::types::{RegexMatch, SymbolMatch};

/// `name_boost` weight (§4.1): chosen so an exact filename match always
/// outranks a non-filename match of equal density. Density is bounded to
/// `[0,1]`, so any alpha > 1 suffices; 10 leaves generous headroom.
const NAME_BOOST_ALPHA: f64 = 10.0;

/// Per-file posting: how many times a token occurs, and at which lines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Posting {
    count: u32,
    lines: Vec<u32>,
}

/// On-disk representation of one project's symbol index.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedIndex {
    /// token -> path -> posting
    postings: HashMap<String, HashMap<String, Posting>>,
    /// path -> set of tokens (kept for symmetric removal)
    path_tokens: HashMap<String, HashSet<String>>,
    /// filename stem token -> set of paths
    filename_index: HashMap<String, HashSet<String>>,
}

/// The symbol index for a single project.
pub struct SymbolIndex {
    root: PathBuf,
    ignore: GlobSet,
    working_set_cap: usize,
    query_timeout: Duration,
    postings: DashMap<String, DashMap<String, Posting>>,
    path_tokens: DashMap<String, HashSet<String>>,
    filename_index: DashMap<String, HashSet<String>>,
    /// Bounded queue of recently-accessed paths, most recent last; this is
    /// the "working set" the regex query is allowed to scan (§4.1).
    working_set: parking_lot::Mutex<Vec<String>>,
}

impl SymbolIndex {
    /// Create an empty index for `root`, ignoring paths matching
    /// `exclude_patterns`.
    pub fn new(root: &Path, exclude_patterns: &[String], working_set_cap: usize) -> Self {
        let mut builder = GlobSetBuilder::new();
        for pattern in exclude_patterns {
            if let Ok(glob) = Glob::new(pattern) {
                builder.add(glob);
            }
        }
        let ignore = builder.build().unwrap_or_else(|_| GlobSet::empty());

        Self {
            root: root.to_path_buf(),
            ignore,
            working_set_cap,
            query_timeout: Duration::from_millis(500),
            postings: DashMap::new(),
            path_tokens: DashMap::new(),
            filename_index: DashMap::new(),
            working_set: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Override the query timeout (default 500ms).
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignore.is_match(path)
            || path.components().any(|c| {
                matches!(c, std::path::Component::Normal(p) if self.ignore.is_match(Path::new(p)))
            })
    }

    /// Walk `self.root`, skipping excluded paths, and build the index from
    /// scratch (§4.1 "Index build").
    pub fn build(&self) -> IntentResult<usize> {
        let mut indexed = 0usize;
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(path = %dir.display(), error = %err, "unreadable directory, skipping");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let rel = path.strip_prefix(&self.root).unwrap_or(&path);
                if self.is_ignored(rel) {
                    continue;
                }
                if path.is_dir() {
                    stack.push(path);
                } else if path.is_file() && self.index_path(&path).is_ok() {
                    indexed += 1;
                }
            }
        }
        Ok(indexed)
    }

    /// Atomically (delete-then-insert) index one file (§4.1 "Incremental
    /// updates are ... atomic delete-path-then-insert-path per file").
    pub fn index_path(&self, abs_path: &Path) -> IntentResult<()> {
        let content = std::fs::read_to_string(abs_path).map_err(|err| {
            tracing::warn!(path = %abs_path.display(), error = %err, "unreadable file, skipping");
            IntentError::Io(err)
        })?;
        let rel = abs_path
            .strip_prefix(&self.root)
            .unwrap_or(abs_path)
            .to_string_lossy()
            .replace('\\', "/");

        self.remove_path(&rel);

        let mut per_token: HashMap<String, Posting> = HashMap::new();
        for (line_no, line) in content.lines().enumerate() {
            let line_no = (line_no + 1) as u32;
            for tok in tokenize(line) {
                let entry = per_token.entry(tok).or_default();
                entry.count += 1;
                entry.lines.push(line_no);
            }
        }

        let mut path_tok_set = HashSet::with_capacity(per_token.len());
        for (tok, posting) in per_token {
            path_tok_set.insert(tok.clone());
            self.postings.entry(tok).or_default().insert(rel.clone(), posting);
        }
        self.path_tokens.insert(rel.clone(), path_tok_set);

        let stem = Path::new(&rel)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        for tok in tokenize(&stem) {
            self.filename_index.entry(tok).or_default().insert(rel.clone());
        }

        self.touch_working_set(&rel);
        Ok(())
    }

    /// Remove all postings for `rel_path` (symmetric with `Path→Tokens`).
    pub fn remove_path(&self, rel_path: &str) {
        if let Some((_, tokens)) = self.path_tokens.remove(rel_path) {
            for tok in tokens {
                if let Some(paths) = self.postings.get(&tok) {
                    paths.remove(rel_path);
                }
            }
        }
        for mut entry in self.filename_index.iter_mut() {
            entry.value_mut().remove(rel_path);
        }
    }

    /// Record that `rel_path` was accessed, for working-set bounding of the
    /// regex query (§4.1 "recently-accessed files, bounded <= ~50 paths").
    pub fn touch_working_set(&self, rel_path: &str) {
        let mut ws = self.working_set.lock();
        ws.retain(|p| p != rel_path);
        ws.push(rel_path.to_string());
        let cap = self.working_set_cap;
        if ws.len() > cap {
            let excess = ws.len() - cap;
            ws.drain(0..excess);
        }
    }

    fn total_count(&self, token: &str) -> u32 {
        self.postings
            .get(token)
            .map(|paths| paths.iter().map(|e| e.value().count).sum())
            .unwrap_or(0)
    }

    fn name_boost(&self, path: &str, tokens: &HashSet<String>) -> f64 {
        let stem = Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let mut best = 0.0_f64;
        for tok in tokens {
            let tok_lower = tok.to_lowercase();
            let boost = if stem == tok_lower {
                3.0
            } else if stem.starts_with(&tok_lower) {
                2.0
            } else if stem.contains(&tok_lower) {
                1.0
            } else {
                0.0
            };
            best = best.max(boost);
        }
        best
    }

    /// `symbol(q, limit)` — single token or multi-token OR query (§4.1).
    pub fn symbol(&self, query: &str, limit: usize) -> Vec<SymbolMatch> {
        let tokens: HashSet<String> = tokenize(query).into_iter().collect();
        self.rank_or(&tokens, limit)
    }

    /// `multi_and(tokens, limit)` — paths containing every token (§4.1).
    pub fn multi_and(&self, tokens: &[String], limit: usize) -> IntentResult<Vec<SymbolMatch>> {
        if tokens.is_empty() {
            return Err(IntentError::BadQuery("multi_and requires at least one token".into()));
        }
        let tokens: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();
        let mut candidate_paths: Option<HashSet<String>> = None;
        for tok in &tokens {
            let paths: HashSet<String> = match self.postings.get(tok) {
                Some(entry) => entry.iter().map(|e| e.key().clone()).collect(),
                None => return Ok(Vec::new()),
            };
            candidate_paths = Some(match candidate_paths {
                Some(existing) => existing.intersection(&paths).cloned().collect(),
                None => paths,
            });
        }
        let token_set: HashSet<String> = tokens.into_iter().collect();
        let mut results: Vec<SymbolMatch> = candidate_paths
            .unwrap_or_default()
            .into_iter()
            .map(|path| self.score_path(&path, &token_set))
            .collect();
        sort_and_truncate(&mut results, limit);
        Ok(results)
    }

    fn rank_or(&self, tokens: &HashSet<String>, limit: usize) -> Vec<SymbolMatch> {
        let tokens_lower: HashSet<String> = tokens.iter().map(|t| t.to_lowercase()).collect();
        let mut candidates: HashSet<String> = HashSet::new();
        for tok in &tokens_lower {
            if let Some(paths) = self.postings.get(tok) {
                candidates.extend(paths.iter().map(|e| e.key().clone()));
            }
            if let Some(paths) = self.filename_index.get(tok) {
                candidates.extend(paths.iter().cloned());
            }
        }
        let mut results: Vec<SymbolMatch> = candidates
            .into_iter()
            .map(|path| self.score_path(&path, &tokens_lower))
            .collect();
        sort_and_truncate(&mut results, limit);
        results
    }

    fn score_path(&self, path: &str, tokens: &HashSet<String>) -> SymbolMatch {
        let mut numer = 0.0_f64;
        let mut denom = 0.0_f64;
        let mut best_line = 1u32;
        let mut best_count = 0u32;
        for tok in tokens {
            let total = f64::from(self.total_count(tok).max(1));
            if let Some(paths) = self.postings.get(tok) {
                if let Some(posting) = paths.get(path) {
                    numer += f64::from(posting.count);
                    if posting.count > best_count {
                        best_count = posting.count;
                        best_line = posting.lines.first().copied().unwrap_or(1);
                    }
                }
            }
            denom += total;
        }
        let density = if denom > 0.0 { numer / denom } else { 0.0 };
        let boost = self.name_boost(path, tokens);
        let score = density + NAME_BOOST_ALPHA * boost;
        SymbolMatch {
            path: path.to_string(),
            line: best_line,
            score,
        }
    }

    /// `regex(pattern, since)` — scan only the bounded working set (§4.1).
    pub fn regex(
        &self,
        pattern: &str,
        working_set_override: Option<&[String]>,
    ) -> IntentResult<(Vec<RegexMatch>, usize)> {
        let re = Regex::new(pattern).map_err(|err| IntentError::BadQuery(err.to_string()))?;
        let start = Instant::now();
        let paths: Vec<String> = match working_set_override {
            Some(paths) => paths.to_vec(),
            None => self.working_set.lock().clone(),
        };
        let mut matches = Vec::new();
        for path in &paths {
            if start.elapsed() > self.query_timeout {
                break;
            }
            let abs = self.root.join(path);
            let Ok(content) = std::fs::read_to_string(&abs) else {
                continue;
            };
            for (line_no, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    matches.push(RegexMatch {
                        path: path.clone(),
                        line: (line_no + 1) as u32,
                        text: line.to_string(),
                    });
                }
            }
        }
        Ok((matches, paths.len()))
    }

    /// Number of distinct paths currently indexed.
    pub fn path_count(&self) -> usize {
        self.path_tokens.len()
    }

    /// Read the first `lines` lines of `rel_path`, for prediction snippet
    /// fetch (§4.3 step 9). Returns `None` on any I/O error rather than
    /// propagating it (§4.3 "omit the snippet for that path; still return
    /// the path").
    pub fn read_snippet(&self, rel_path: &str, lines: usize) -> Option<String> {
        let abs = self.root.join(rel_path);
        let content = std::fs::read_to_string(abs).ok()?;
        Some(content.lines().take(lines).collect::<Vec<_>>().join("\n"))
    }

    /// Serialize the index to a file under `path` (§6 on-disk state).
    pub fn persist(&self, path: &Path) -> IntentResult<()> {
        let mut postings = HashMap::new();
        for entry in self.postings.iter() {
            let mut paths = HashMap::new();
            for p in entry.value().iter() {
                paths.insert(p.key().clone(), p.value().clone());
            }
            postings.insert(entry.key().clone(), paths);
        }
        let path_tokens = self
            .path_tokens
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let filename_index = self
            .filename_index
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let persisted = PersistedIndex {
            postings,
            path_tokens,
            filename_index,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec(&persisted)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a previously persisted index file, replacing the in-memory
    /// index. Starts empty (not an error) if the file does not exist yet.
    pub fn load_into(&self, path: &Path) -> IntentResult<()> {
        if !path.exists() {
            return Ok(());
        }
        let bytes = std::fs::read(path)?;
        let persisted: PersistedIndex = serde_json::from_slice(&bytes)?;
        for (tok, paths) in persisted.postings {
            let map = DashMap::new();
            for (p, posting) in paths {
                map.insert(p, posting);
            }
            self.postings.insert(tok, map);
        }
        for (path, tokens) in persisted.path_tokens {
            self.path_tokens.insert(path, tokens);
        }
        for (tok, paths) in persisted.filename_index {
            self.filename_index.insert(tok, paths);
        }
        Ok(())
    }
}

fn sort_and_truncate(results: &mut Vec<SymbolMatch>, limit: usize) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.len().cmp(&b.path.len()))
            .then_with(|| a.path.cmp(&b.path))
    });
    results.truncate(limit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn tokenization_law_holds() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "auth.rs", "fn validate_token() {}\n");
        let index = SymbolIndex::new(dir.path(), &[], 50);
        index.build().unwrap();

        for entry in index.path_tokens.iter() {
            for tok in entry.value() {
                assert!(index
                    .postings
                    .get(tok)
                    .map(|paths| paths.contains_key(entry.key()))
                    .unwrap_or(false));
            }
        }
    }

    #[test]
    fn filename_match_outranks_body_match() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "auth.rs", "fn unrelated() {}\n");
        write(dir.path(), "other.rs", "fn auth_helper() { auth(); }\n");
        let index = SymbolIndex::new(dir.path(), &[], 50);
        index.build().unwrap();

        let results = index.symbol("auth", 10);
        assert_eq!(results[0].path, "auth.rs");
    }

    #[test]
    fn multi_and_requires_every_token() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.rs", "foo bar\n");
        write(dir.path(), "b.rs", "foo baz\n");
        let index = SymbolIndex::new(dir.path(), &[], 50);
        index.build().unwrap();

        let results = index.multi_and(&["foo".into(), "bar".into()], 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, "a.rs");
    }

    #[test]
    fn density_is_ratio_of_sums_not_mean_of_ratios() {
        let dir = tempfile::tempdir().unwrap();
        // "rare" appears once total (in a.rs); "common" appears once in
        // a.rs and nine more times spread across filler files, so its
        // global total is much larger than "rare"'s.
        write(dir.path(), "a.rs", "rare common\n");
        for i in 0..9 {
            write(dir.path(), &format!("filler{i}.rs"), "common\n");
        }
        let index = SymbolIndex::new(dir.path(), &[], 50);
        index.build().unwrap();

        let results = index.multi_and(&["rare".into(), "common".into()], 10).unwrap();
        assert_eq!(results.len(), 1);
        let density = results[0].score;
        // Ratio of sums: (1 + 1) / (1 + 10) = 2/11. A mean-of-ratios
        // formula would instead give (1/1 + 1/10)/2 = 0.55.
        assert!((density - 2.0 / 11.0).abs() < 1e-9, "density was {density}");
    }

    #[test]
    fn multi_and_empty_tokens_is_bad_query() {
        let dir = tempfile::tempdir().unwrap();
        let index = SymbolIndex::new(dir.path(), &[], 50);
        assert!(matches!(index.multi_and(&[], 10), Err(IntentError::BadQuery(_))));
    }

    #[test]
    fn regex_scans_only_working_set() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.rs", "needle here\n");
        write(dir.path(), "b.rs", "needle here too\n");
        let index = SymbolIndex::new(dir.path(), &[], 50);
        index.build().unwrap();

        let (matches, scanned) = index.regex("needle", Some(&["a.rs".to_string()])).unwrap();
        assert_eq!(scanned, 1);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "a.rs");
    }

    #[test]
    fn invalid_regex_is_bad_query() {
        let dir = tempfile::tempdir().unwrap();
        let index = SymbolIndex::new(dir.path(), &[], 50);
        assert!(matches!(index.regex("(", None), Err(IntentError::BadQuery(_))));
    }

    #[test]
    fn remove_path_deletes_all_postings() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.rs", "unique_token\n");
        let index = SymbolIndex::new(dir.path(), &[], 50);
        index.build().unwrap();
        assert!(!index.symbol("unique_token", 10).is_empty());

        index.remove_path("a.rs");
        assert!(index.symbol("unique_token", 10).is_empty());
    }
}
