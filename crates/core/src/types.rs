//! Core domain types shared across all intentd-core subsystems.
//!
//! These types form the API contract between the symbol index, the ranking
//! store, the prediction engine, the tuner, and the intent capture pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// A registered project: `{uuid, root_path, enabled}` (§3 DATA MODEL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Stable identifier for the life of the project.
    pub id: uuid::Uuid,
    /// Absolute root path of the indexed repository.
    pub root_path: PathBuf,
    /// Whether the project is currently active.
    pub enabled: bool,
}

// ---------------------------------------------------------------------------
// Symbol index result types
// ---------------------------------------------------------------------------

/// A single matching location returned by a symbol query (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolMatch {
    /// Path relative to the project root.
    pub path: String,
    /// 1-indexed line number of the match.
    pub line: u32,
    /// Composite rank score (`density + alpha * name_boost`).
    pub score: f64,
}

/// A single line match from a working-set regex query (§4.1 `regex`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegexMatch {
    /// Path relative to the project root.
    pub path: String,
    /// 1-indexed line number of the match.
    pub line: u32,
    /// The matched line text.
    pub text: String,
}

// ---------------------------------------------------------------------------
// Ranking Store signal types
// ---------------------------------------------------------------------------

/// Normalized signal values for one candidate path, each clamped to `[0,1]`
/// before combination (§4.2 Normalization, and Open Question #1 in
/// spec.md §9 — separate score spaces explicitly to avoid collision).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SignalBreakdown {
    /// Recency signal: `exp(-ln2 * (now - t_last) / T_half)`.
    pub recency: f64,
    /// Frequency signal: `min(1, log(1+count)/log(1+C_max))`.
    pub frequency: f64,
    /// Tag affinity signal: `tag_score / max_tag_score_in_set`.
    pub tag: f64,
    /// Transition signal: `trans_score / sum(trans_scores_from(A))`.
    pub transition: f64,
}

/// A path and its composite ranking score, with the signal breakdown that
/// produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedPath {
    /// Path relative to the project root.
    pub path: String,
    /// Weighted composite score.
    pub composite: f64,
    /// The individual normalized signals that were combined.
    pub signals: SignalBreakdown,
}

// ---------------------------------------------------------------------------
// Online Weight Tuner arm
// ---------------------------------------------------------------------------

/// The weight triple `(w_rec, w_freq, w_tag)` one tuner arm assigns to the
/// recency/frequency/tag signals (§4.4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ArmWeights {
    /// Weight on the recency signal.
    pub w_rec: f64,
    /// Weight on the frequency signal.
    pub w_freq: f64,
    /// Weight on the tag affinity signal.
    pub w_tag: f64,
}

// ---------------------------------------------------------------------------
// Prediction types
// ---------------------------------------------------------------------------

/// Why the prediction engine returned an empty or non-visible result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionReason {
    /// Top-1 confidence fell below the configured floor.
    BelowFloor,
    /// The candidate pool was empty after assembly (§4.3 failure modes).
    ColdStart,
}

impl PredictionReason {
    /// Stable string form used in JSON responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BelowFloor => "below_floor",
            Self::ColdStart => "cold_start",
        }
    }
}

/// A single predicted candidate path, with optional snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictedFile {
    /// Path relative to the project root.
    pub path: String,
    /// Confidence this candidate is the one the user will read next.
    pub confidence: f64,
    /// First N lines of the file, if requested and readable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Outcome of a prediction: resolved as a hit, resolved as a miss, or still
/// pending resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionOutcome {
    /// A matching read was observed before the finalization window elapsed.
    Hit,
    /// No matching read was observed before `finalize_stale` ran.
    Miss,
    /// Not yet resolved either way.
    Pending,
}

/// A logged prediction record (§3 DATA MODEL `pred:{id}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// Unique id for this prediction.
    pub id: uuid::Uuid,
    /// Session this prediction was made for.
    pub session: String,
    /// Stable fingerprint of the keyword set that produced it.
    pub fingerprint: String,
    /// Tuner arm index used to weight this prediction's candidates.
    pub arm: usize,
    /// Candidate paths returned.
    pub candidates: Vec<String>,
    /// Epoch-seconds creation time.
    pub created_at: i64,
    /// Current resolution state.
    pub outcome: PredictionOutcome,
}

// ---------------------------------------------------------------------------
// Rolling metrics
// ---------------------------------------------------------------------------

/// Trend direction for the rolling hit-rate metric (§4.3 Metrics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    /// Latest half-window hit rate exceeds the prior half-window beyond the
    /// dead-band.
    Improving,
    /// Latest half-window hit rate is below the prior half-window beyond the
    /// dead-band.
    Declining,
    /// Within the dead-band of the prior half-window.
    Stable,
    /// Not enough resolved predictions in one or both half-windows.
    InsufficientData,
}

/// Rolling-window prediction metrics, recomputed on read (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingMetrics {
    /// Window size in hours this was computed over.
    pub window_hours: u64,
    /// Total predictions logged in the window (resolved + pending).
    pub total: u64,
    /// Predictions resolved (hit or miss) within the window.
    pub evaluated: u64,
    /// Predictions still pending resolution.
    pub pending: u64,
    /// Resolved predictions that resolved as a hit.
    pub hits: u64,
    /// Hit rate at the configured `k` (fraction of resolved predictions
    /// whose top-k contained a hit).
    pub hit_at_k: f64,
    /// Trend relative to the prior half-window.
    pub trend: Trend,
}

// ---------------------------------------------------------------------------
// Intent capture: tool tagged variant (§9 Polymorphism design note)
// ---------------------------------------------------------------------------

/// The small closed set of tools that can appear in an intent event.
///
/// Each variant knows how to extract its associated path(s) (§4.5 "Path
/// extraction per tool") and its synthetic tag; no dynamic dispatch is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Tool {
    /// Reads a file.
    Read,
    /// Edits a file.
    Edit,
    /// Writes (creates) a file.
    Write,
    /// Searches file contents.
    Grep,
    /// Searches file paths.
    Glob,
    /// Searches by some other mechanism.
    Search,
    /// Runs a shell command.
    Bash,
    /// A user prompt submission (not a tool call).
    Prompt,
    /// Any tool not in the closed set above.
    Other,
}

impl Tool {
    /// The synthetic tag this tool contributes to every event it appears in
    /// (§4.5, §6 "Per-tool synthetic tags").
    pub fn synthetic_tag(&self) -> Option<&'static str> {
        match self {
            Self::Read => Some("#reading"),
            Self::Edit => Some("#editing"),
            Self::Write => Some("#creating"),
            Self::Grep | Self::Glob | Self::Search => Some("#searching"),
            Self::Bash => Some("#running"),
            Self::Prompt | Self::Other => None,
        }
    }

    /// Whether this tool is associated with any file path (§4.5 `Bash` →
    /// none).
    pub fn has_path_association(&self) -> bool {
        !matches!(self, Self::Bash | Self::Prompt | Self::Other)
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Read => "Read",
            Self::Edit => "Edit",
            Self::Write => "Write",
            Self::Grep => "Grep",
            Self::Glob => "Glob",
            Self::Search => "Search",
            Self::Bash => "Bash",
            Self::Prompt => "Prompt",
            Self::Other => "Other",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Intent capture: event envelope (§6 "Envelope for /intent events")
// ---------------------------------------------------------------------------

/// The raw payload of a `tool_input` field; only the fields intent capture
/// actually reads are modeled. Extra fields are preserved as opaque JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolInput {
    /// `Read` / `Edit` / `Write` file path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Alternate key some tools use instead of `file_path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Directory-level association for `Grep`/`Glob`/`Search`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<String>,
}

impl ToolInput {
    /// Resolve the single associated path this tool input names, per the
    /// §4.5 "Path extraction per tool" table.
    pub fn extract_path(&self) -> Option<&str> {
        self.file_path
            .as_deref()
            .or(self.path.as_deref())
            .or(self.include.as_deref())
    }
}

/// An incoming `/intent` event (§6 envelope, §4.5 accepted event kinds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentEvent {
    /// Which tool fired this event (or `Prompt` for a prompt submission).
    pub tool: Tool,
    /// Tool-specific structured input; absent for `Prompt` events.
    #[serde(default)]
    pub tool_input: ToolInput,
    /// The user's prompt text; only present for `Prompt` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Session this event belongs to.
    pub session_id: String,
    /// Optional id for exact tool-call correlation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    /// Epoch-millisecond timestamp.
    pub timestamp: i64,
    /// Optional explicit project id; falls back to the active project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<uuid::Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_synthetic_tags_match_table() {
        assert_eq!(Tool::Read.synthetic_tag(), Some("#reading"));
        assert_eq!(Tool::Edit.synthetic_tag(), Some("#editing"));
        assert_eq!(Tool::Write.synthetic_tag(), Some("#creating"));
        assert_eq!(Tool::Grep.synthetic_tag(), Some("#searching"));
        assert_eq!(Tool::Glob.synthetic_tag(), Some("#searching"));
        assert_eq!(Tool::Bash.synthetic_tag(), Some("#running"));
        assert_eq!(Tool::Prompt.synthetic_tag(), None);
    }

    #[test]
    fn bash_has_no_path_association() {
        assert!(!Tool::Bash.has_path_association());
        assert!(Tool::Read.has_path_association());
    }

    #[test]
    fn tool_input_extracts_path_by_precedence() {
        let input = ToolInput {
            file_path: Some("a.rs".into()),
            path: Some("b.rs".into()),
            include: None,
        };
        assert_eq!(input.extract_path(), Some("a.rs"));

        let input = ToolInput {
            file_path: None,
            path: None,
            include: Some("src/".into()),
        };
        assert_eq!(input.extract_path(), Some("src/"));
    }
}
