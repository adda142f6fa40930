//! Normative tokenization rules (§4.1).
//!
//! Split on every character that is not a letter, digit, or underscore; `-`
//! and `.` are splitters; underscores are kept. Each raw token is emitted
//! alongside its lowercase form; tokens shorter than 2 chars or matching a
//! pure-digit stop pattern are discarded.

/// Tokenize `text` per the normative rules, returning both the raw token and
/// its lowercase form (deduplicated), minus short/numeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for raw in split_on_boundaries(text) {
        if !is_keepable(&raw) {
            continue;
        }
        let lower = raw.to_lowercase();
        if lower != raw {
            out.push(lower);
        }
        out.push(raw);
    }
    out.sort();
    out.dedup();
    out
}

fn split_on_boundaries(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_keepable(token: &str) -> bool {
    token.chars().count() >= 2 && !token.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_dash_and_dot() {
        assert_eq!(tokenize("tree-sitter"), vec!["sitter", "tree"]);
        assert_eq!(tokenize("app.post"), vec!["app", "post"]);
    }

    #[test]
    fn keeps_underscores() {
        let toks = tokenize("tree_sitter");
        assert!(toks.contains(&"tree_sitter".to_string()));
        assert!(!toks.contains(&"tree".to_string()));
    }

    #[test]
    fn discards_short_and_numeric_tokens() {
        let toks = tokenize("a 1 22 ab");
        assert!(!toks.iter().any(|t| t == "a"));
        assert!(!toks.iter().any(|t| t == "1"));
        assert!(!toks.iter().any(|t| t == "22"));
        assert!(toks.iter().any(|t| t == "ab"));
    }

    #[test]
    fn emits_raw_and_lowercase_forms() {
        let toks = tokenize("HttpClient");
        assert!(toks.contains(&"HttpClient".to_string()));
        assert!(toks.contains(&"httpclient".to_string()));
    }
}
