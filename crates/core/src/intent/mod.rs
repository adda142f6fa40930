//! The Intent Capture Pipeline: turns raw hook events into Ranking Store
//! writes and Prediction Engine feedback (§4.5). This is the only component
//! that interprets hook payloads.

mod patterns;

pub use patterns::{infer_tags, INTENT_PATTERNS};

use crate::error::IntentResult;
use crate::store::RankingStore;
use crate::types::{IntentEvent, Tool};

/// Stop words dropped during keyword extraction (§4.3 step 1).
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "in", "on", "at", "to",
    "of", "for", "with", "by", "as", "and", "or", "but", "if", "so", "this", "that", "it", "i",
    "you", "we", "can", "please", "how", "do", "does", "did", "me", "my",
];

/// Extract lowercase, punctuation-stripped, stop-word-free keywords from
/// free text (§4.3 step 1).
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut out: Vec<String> = text
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .filter(|w| w.len() >= 2 && !STOP_WORDS.contains(&w.as_str()))
        .collect();
    out.sort();
    out.dedup();
    out
}

/// A single path-level side effect the intent pipeline derived from one
/// event, ready to be handed to the Ranking Store and Prediction Engine.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    /// Paths touched by this event, with the tags inferred for each.
    pub path_accesses: Vec<(String, Vec<String>)>,
    /// Keywords extracted from a prompt, if this was a `Prompt` event.
    pub prompt_keywords: Vec<String>,
}

/// Process a `tool-use-post` or `prompt-submit` event against `store`,
/// returning the derived outcome so the caller (server layer) can also
/// drive the Prediction Engine's resolve hook and transition recording.
pub fn capture(store: &RankingStore, project: &str, event: &IntentEvent, now: i64) -> IntentResult<CaptureOutcome> {
    let mut path_accesses = Vec::new();
    let mut prompt_keywords = Vec::new();

    if event.tool == Tool::Prompt {
        if let Some(prompt) = &event.prompt {
            prompt_keywords = extract_keywords(prompt);
        }
        return Ok(CaptureOutcome { path_accesses, prompt_keywords });
    }

    if !event.tool.has_path_association() {
        return Ok(CaptureOutcome { path_accesses, prompt_keywords });
    }

    let Some(path) = event.tool_input.extract_path() else {
        return Ok(CaptureOutcome { path_accesses, prompt_keywords });
    };

    let combined_text = format!("{path} {}", event.prompt.as_deref().unwrap_or(""));
    let mut tags = infer_tags(&combined_text);
    if let Some(synthetic) = event.tool.synthetic_tag() {
        tags.push(synthetic.to_string());
    }
    tags.sort();
    tags.dedup();

    store.record_access(project, path, &tags, now)?;

    let session_last = store.last_session_path(project, &event.session_id, now)?;
    if let Some(last) = session_last {
        store.record_transition(project, &last, path, now)?;
    }
    store.record_session_access(project, &event.session_id, path, now)?;

    path_accesses.push((path.to_string(), tags));
    Ok(CaptureOutcome { path_accesses, prompt_keywords })
}

/// Create a session sequence key with TTL (§4.5 `session-start`). The TTL
/// itself is enforced by `RankingStore::expire_sessions` running on a
/// timer; this call only seeds the session so `last_session_path` has
/// something to anchor to.
pub fn start_session(store: &RankingStore, project: &str, session_id: &str, now: i64) -> IntentResult<()> {
    store.record_session_access(project, session_id, "", now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Normalization;
    use crate::types::ToolInput;

    fn store() -> RankingStore {
        RankingStore::open_in_memory(Normalization::default()).unwrap()
    }

    #[test]
    fn keyword_extraction_strips_stopwords_and_punctuation() {
        let kws = extract_keywords("How do I fix the authentication bug?");
        assert!(kws.contains(&"authentication".to_string()));
        assert!(kws.contains(&"bug".to_string()));
        assert!(!kws.contains(&"the".to_string()));
        assert!(!kws.contains(&"how".to_string()));
    }

    #[test]
    fn capture_read_event_records_access_and_tags() {
        let store = store();
        let event = IntentEvent {
            tool: Tool::Read,
            tool_input: ToolInput { file_path: Some("src/auth/login.rs".into()), path: None, include: None },
            prompt: None,
            session_id: "s1".into(),
            tool_use_id: None,
            timestamp: 0,
            project: None,
        };
        let outcome = capture(&store, "p", &event, 1000).unwrap();
        assert_eq!(outcome.path_accesses.len(), 1);
        let (path, tags) = &outcome.path_accesses[0];
        assert_eq!(path, "src/auth/login.rs");
        assert!(tags.contains(&"#authentication".to_string()));
        assert!(tags.contains(&"#reading".to_string()));
    }

    #[test]
    fn capture_bash_event_has_no_path_access() {
        let store = store();
        let event = IntentEvent {
            tool: Tool::Bash,
            tool_input: ToolInput::default(),
            prompt: None,
            session_id: "s1".into(),
            tool_use_id: None,
            timestamp: 0,
            project: None,
        };
        let outcome = capture(&store, "p", &event, 1000).unwrap();
        assert!(outcome.path_accesses.is_empty());
    }

    #[test]
    fn capture_records_transition_between_consecutive_accesses() {
        let store = store();
        let first = IntentEvent {
            tool: Tool::Read,
            tool_input: ToolInput { file_path: Some("a.rs".into()), path: None, include: None },
            prompt: None,
            session_id: "s1".into(),
            tool_use_id: None,
            timestamp: 0,
            project: None,
        };
        capture(&store, "p", &first, 1000).unwrap();

        let second = IntentEvent {
            tool: Tool::Read,
            tool_input: ToolInput { file_path: Some("b.rs".into()), path: None, include: None },
            prompt: None,
            session_id: "s1".into(),
            tool_use_id: None,
            timestamp: 0,
            project: None,
        };
        capture(&store, "p", &second, 1010).unwrap();

        let dests = store.transitions_from("p", "a.rs", 10).unwrap();
        assert_eq!(dests[0].0, "b.rs");
    }

    #[test]
    fn capture_prompt_event_extracts_keywords_without_path_access() {
        let store = store();
        let event = IntentEvent {
            tool: Tool::Prompt,
            tool_input: ToolInput::default(),
            prompt: Some("fix the login timeout bug".into()),
            session_id: "s1".into(),
            tool_use_id: None,
            timestamp: 0,
            project: None,
        };
        let outcome = capture(&store, "p", &event, 1000).unwrap();
        assert!(outcome.path_accesses.is_empty());
        assert!(outcome.prompt_keywords.contains(&"login".to_string()));
    }
}
