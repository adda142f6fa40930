//! Error types for intentd-core.
//!
//! Uses a hierarchical error enum so callers can pattern-match on the kind
//! of failure. Each variant maps directly onto a propagation policy: query
//! errors surface to the caller, ingest errors are swallowed by design.

use thiserror::Error;

/// Top-level error type for all intentd-core operations.
#[derive(Debug, Error)]
pub enum IntentError {
    // ---- Query-side: surface to the caller ----
    /// Malformed request or missing required field.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Invalid regex, or an AND query with no tokens.
    #[error("bad query: {0}")]
    BadQuery(String),

    /// Store unavailable, or the index is still running its initial sweep.
    #[error("not ready: {0}")]
    NotReady(String),

    /// Operation hit its timeout or result cap; the response is a correct
    /// prefix of the full result, not an error to refuse.
    #[error("truncated: {0}")]
    Truncated(String),

    /// Requested entity was not found.
    #[error("not found: {0}")]
    NotFound(String),

    // ---- Ingest-side: never surfaces to the host, only a health counter ----
    /// Intent capture could not complete; fire-and-forget path, swallowed by
    /// the caller of this error, logged and counted here.
    #[error("benign: {0}")]
    Benign(String),

    // ---- Fatal / internal ----
    /// Any unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),

    // ---- Wrapped external errors ----
    /// SQLite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML config parsing error.
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

impl IntentError {
    /// Whether this error should ever be surfaced to a query caller.
    ///
    /// `Benign` errors are swallowed by design (§7 propagation policy); the
    /// intent capture pipeline logs them and increments a counter instead of
    /// returning them to the host.
    #[must_use]
    pub const fn is_benign(&self) -> bool {
        matches!(self, Self::Benign(_))
    }
}

/// Convenience type alias for Results in intentd-core.
pub type IntentResult<T> = Result<T, IntentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benign_errors_are_flagged() {
        let err = IntentError::Benign("dropped event".into());
        assert!(err.is_benign());
        let err = IntentError::BadRequest("missing field".into());
        assert!(!err.is_benign());
    }
}
