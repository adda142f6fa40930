//! INTENT_PATTERNS: the normative `(regex, tags)` table used to infer tags
//! from combined prompt + path text (§4.5, §6).

use regex::Regex;
use std::sync::OnceLock;

/// One row of the INTENT_PATTERNS table.
pub struct PatternRow {
    /// Case-insensitive regex matched against the combined text.
    pub pattern: &'static str,
    /// Tags applied when the pattern matches.
    pub tags: &'static [&'static str],
}

/// The full INTENT_PATTERNS table (§6; spec.md's own table is an excerpt —
/// this is the complete normative list).
pub const INTENT_PATTERNS: &[PatternRow] = &[
    PatternRow { pattern: r"auth|login|session|oauth|jwt|token|credential", tags: &["#authentication", "#security"] },
    PatternRow { pattern: r"test[s]?[/_]|_test\.|\bspec[s]?\b", tags: &["#testing"] },
    PatternRow { pattern: r"config|settings|\.env|environ", tags: &["#configuration"] },
    PatternRow { pattern: r"api|endpoint|route|handler|middleware", tags: &["#api"] },
    PatternRow { pattern: r"index|search|query|scorer|ranking", tags: &["#search"] },
    PatternRow { pattern: r"database|\bdb\b|schema|migration", tags: &["#database"] },
    PatternRow { pattern: r"log|logger|logging", tags: &["#logging"] },
    PatternRow { pattern: r"redis|cache|memo", tags: &["#caching"] },
    PatternRow { pattern: r"docker|compose|supervisor|deploy|ci|cd|pipeline", tags: &["#devops"] },
    PatternRow { pattern: r"payment|stripe|checkout|billing", tags: &["#payments"] },
    PatternRow { pattern: r"ml|model|training|inference|embedding", tags: &["#machine-learning"] },
    PatternRow { pattern: r"ui|react|component|render", tags: &["#ui"] },
];

struct CompiledRow {
    regex: Regex,
    tags: &'static [&'static str],
}

fn compiled() -> &'static Vec<CompiledRow> {
    static COMPILED: OnceLock<Vec<CompiledRow>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        INTENT_PATTERNS
            .iter()
            .map(|row| CompiledRow {
                regex: Regex::new(&format!("(?i){}", row.pattern)).expect("INTENT_PATTERNS entries are valid regex"),
                tags: row.tags,
            })
            .collect()
    })
}

/// Match `text` against every row, union-deduplicating the tags of every
/// row that matches (§4.5 "Match all that apply; union tags").
pub fn infer_tags(text: &str) -> Vec<String> {
    let mut tags = Vec::new();
    for row in compiled() {
        if row.regex.is_match(text) {
            tags.extend(row.tags.iter().map(|t| t.to_string()));
        }
    }
    tags.sort();
    tags.dedup();
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_authentication_pattern() {
        let tags = infer_tags("src/auth/login.rs");
        assert!(tags.contains(&"#authentication".to_string()));
        assert!(tags.contains(&"#security".to_string()));
    }

    #[test]
    fn unions_tags_across_multiple_matching_rows() {
        let tags = infer_tags("config for the database migration");
        assert!(tags.contains(&"#configuration".to_string()));
        assert!(tags.contains(&"#database".to_string()));
    }

    #[test]
    fn no_match_yields_empty_tags() {
        assert!(infer_tags("zzz_nonmatching_xyz").is_empty());
    }
}
