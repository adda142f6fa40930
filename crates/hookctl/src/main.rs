//! intentd-hook -- translates a host assistant's hook invocation into a
//! `POST /intent` call against the running `intentd` daemon (§4.5, §6).
//!
//! Installed as the hook entry point itself: the host assistant invokes
//! this binary once per tool call / prompt submission / session start,
//! piping a JSON payload on stdin. This binary owns no domain logic -- it
//! only reshapes the host's event into the wire envelope and forwards it.
//! Grounded in the teacher's `omni-daemon` IPC client (connect, send,
//! forget) but speaking HTTP instead of a named pipe.
//!
//! Never fails loudly: a hook that blocks or crashes the host's tool loop
//! is worse than a missed intent-capture event, so every error here is
//! logged to stderr and the process still exits `0`.

use std::io::Read;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default address of the daemon this hook reports to, matching
/// `ServerConfig::default_bind_addr`.
const DEFAULT_SERVER: &str = "http://127.0.0.1:7420";

/// How long the hook will wait for the daemon before giving up. Must stay
/// well under whatever timeout the host assistant enforces on its own hook
/// invocations.
const REQUEST_TIMEOUT: Duration = Duration::from_millis(800);

/// The subset of a host assistant's hook payload this binary reads. Extra
/// fields the host sends are ignored by `serde`'s default behavior.
#[derive(Debug, Deserialize)]
struct HookPayload {
    hook_event_name: String,
    session_id: String,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    tool_input: Value,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    project: Option<String>,
}

/// Mirror of `intentd_core::types::ToolInput`; kept local so this binary
/// doesn't need to link the core crate for one struct.
#[derive(Debug, Default, Serialize)]
struct ToolInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    include: Option<String>,
}

impl ToolInput {
    fn from_raw(raw: &Value) -> Self {
        let str_field = |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);
        Self { file_path: str_field("file_path"), path: str_field("path"), include: str_field("include") }
    }
}

/// The wire-level tool name the §6 envelope expects; any tool the host
/// reports that isn't one of the closed set maps to `Other`.
fn normalize_tool_name(name: &str) -> &'static str {
    match name {
        "Read" => "Read",
        "Edit" | "MultiEdit" => "Edit",
        "Write" => "Write",
        "Grep" => "Grep",
        "Glob" => "Glob",
        "WebSearch" => "Search",
        "Bash" => "Bash",
        _ => "Other",
    }
}

fn server_url() -> String {
    std::env::var("INTENTD_SERVER").unwrap_or_else(|_| DEFAULT_SERVER.to_string())
}

fn epoch_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Build the `/intent` envelope body for one hook payload, or `None` for a
/// hook event kind this pipeline doesn't capture (§4.5 "accepted event
/// kinds" is a closed set).
fn build_envelope(payload: &HookPayload) -> Option<Value> {
    let timestamp = epoch_millis();
    match payload.hook_event_name.as_str() {
        "SessionStart" => Some(serde_json::json!({
            "event": "session-start",
            "session_id": payload.session_id,
            "project": payload.project,
            "timestamp": timestamp,
        })),
        "UserPromptSubmit" => payload.prompt.as_ref().map(|prompt| {
            serde_json::json!({
                "event": "prompt-submit",
                "tool": "Prompt",
                "prompt": prompt,
                "session_id": payload.session_id,
                "project": payload.project,
                "timestamp": timestamp,
            })
        }),
        "PreToolUse" | "PostToolUse" => {
            let tool_name = payload.tool_name.as_deref()?;
            Some(serde_json::json!({
                "event": "tool-use-post",
                "tool": normalize_tool_name(tool_name),
                "tool_input": ToolInput::from_raw(&payload.tool_input),
                "session_id": payload.session_id,
                "project": payload.project,
                "timestamp": timestamp,
            }))
        }
        _ => None,
    }
}

fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter("warn").init();

    let mut input = String::new();
    if let Err(err) = std::io::stdin().read_to_string(&mut input) {
        tracing::warn!(error = %err, "failed to read hook payload from stdin");
        return;
    }

    let payload: HookPayload = match serde_json::from_str(&input) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(error = %err, "failed to parse hook payload");
            return;
        }
    };

    let Some(envelope) = build_envelope(&payload) else {
        tracing::debug!(event = %payload.hook_event_name, "hook event not captured, skipping");
        return;
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::warn!(error = %err, "failed to start runtime");
            return;
        }
    };
    runtime.block_on(send(envelope));
}

async fn send(envelope: Value) {
    let client = match reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build() {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!(error = %err, "failed to build HTTP client");
            return;
        }
    };

    let url = format!("{}/intent", server_url());
    if let Err(err) = client.post(&url).json(&envelope).send().await {
        tracing::warn!(error = %err, url = %url, "failed to deliver intent event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(event: &str) -> HookPayload {
        HookPayload {
            hook_event_name: event.to_string(),
            session_id: "s1".to_string(),
            tool_name: None,
            tool_input: Value::Null,
            prompt: None,
            project: None,
        }
    }

    #[test]
    fn session_start_has_no_tool_field() {
        let envelope = build_envelope(&payload("SessionStart")).unwrap();
        assert_eq!(envelope["event"], "session-start");
        assert!(envelope.get("tool").is_none());
    }

    #[test]
    fn prompt_submit_without_prompt_text_is_skipped() {
        assert!(build_envelope(&payload("UserPromptSubmit")).is_none());
    }

    #[test]
    fn unrecognized_tool_maps_to_other() {
        let mut raw = payload("PostToolUse");
        raw.tool_name = Some("CustomThing".to_string());
        raw.tool_input = serde_json::json!({ "file_path": "src/lib.rs" });
        let envelope = build_envelope(&raw).unwrap();
        assert_eq!(envelope["tool"], "Other");
        assert_eq!(envelope["tool_input"]["file_path"], "src/lib.rs");
    }

    #[test]
    fn known_tool_name_normalizes_through() {
        assert_eq!(normalize_tool_name("MultiEdit"), "Edit");
        assert_eq!(normalize_tool_name("WebSearch"), "Search");
        assert_eq!(normalize_tool_name("Bash"), "Bash");
    }
}
