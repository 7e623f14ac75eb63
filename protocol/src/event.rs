//! `agent`/`chat` event payloads (design §3, §4.6, §4.7) plus the data-model types
//! (`PresenceEntry`, `Session` history entries, `ContentPart`) they carry.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bumped on the corresponding state mutation; echoed in the relevant broadcast event and
/// in the handshake snapshot (design §3, §9 "State versioning vs. snapshot diffing").
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StateVersion {
    pub presence: u64,
    pub health: u64,
}

/// One entry in the presence list (design §3). Ordered by insertion time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub instance_id: String,
    pub host: String,
    pub version: String,
    pub platform: String,
    pub mode: String,
    pub ts: i64,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
}

/// `role ∈ {user, assistant}` (design §3 `HistoryEntry`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// A content part within a message: tagged variant (design §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolCall {
        name: String,
        tool_call_id: String,
        arguments: Value,
        status: ToolCallStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        result_error: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Success,
    Error,
}

/// One entry in a session's ordered history (design §3 `Session`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub role: Role,
    pub content: Vec<ContentPart>,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// `stream ∈ {lifecycle, assistant, reasoning, tool}` (design §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStream {
    Lifecycle,
    Assistant,
    Reasoning,
    Tool,
}

/// `agent` event envelope: `{runId, sessionKey, seq, stream, ts, data}` (design §4.6).
/// `seq` is the per-run counter — distinct from the broadcast bus's global `seq` on the
/// enclosing [`crate::Frame::Event`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    pub run_id: String,
    pub session_key: String,
    pub seq: u64,
    pub stream: AgentStream,
    pub ts: i64,
    pub data: Value,
}

/// `data` payload when `stream == lifecycle`. Exactly one `Start` and exactly one
/// terminal phase (`End` or `Error`) per run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum LifecyclePayload {
    Start,
    End,
    Error { error: String },
}

/// `data` payload when `stream == assistant` or `stream == reasoning`: `text` is the
/// accumulated text so far, `delta` the fragment that just arrived.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPayload {
    pub text: String,
    pub delta: String,
}

/// `data` payload when `stream == tool`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ToolPayload {
    Start {
        name: String,
        tool_call_id: String,
        args: Value,
    },
    Result {
        name: String,
        tool_call_id: String,
        result: Value,
        is_error: bool,
    },
}

/// `state ∈ {delta, final, error}` (design §4.6). `delta` events are throttled by the
/// run engine, not by this type.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ChatState {
    Delta {
        text: String,
    },
    Final {
        text: String,
        content: Vec<ContentPart>,
        stop_reason: String,
    },
    Error {
        error_message: String,
    },
}

/// `chat` event envelope: `{runId, sessionKey, seq, state, ...}` (design §4.6).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    pub run_id: String,
    pub session_key: String,
    pub seq: u64,
    #[serde(flatten)]
    pub state: ChatState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_event_flattens_state_tag_and_fields() {
        let ev = ChatEvent {
            run_id: "r1".into(),
            session_key: "main".into(),
            seq: 3,
            state: ChatState::Final {
                text: "hi".into(),
                content: vec![ContentPart::Text { text: "hi".into() }],
                stop_reason: "end_turn".into(),
            },
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["runId"], "r1");
        assert_eq!(v["state"], "final");
        assert_eq!(v["stopReason"], "end_turn");
    }

    #[test]
    fn tool_payload_renames_fields_per_variant() {
        let p = ToolPayload::Start {
            name: "web_search".into(),
            tool_call_id: "tc1".into(),
            args: serde_json::json!({}),
        };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["phase"], "start");
        assert_eq!(v["toolCallId"], "tc1");
    }

    #[test]
    fn content_part_tool_call_serializes_tagged() {
        let cp = ContentPart::ToolCall {
            name: "web_search".into(),
            tool_call_id: "tc1".into(),
            arguments: serde_json::json!({"q": "weather"}),
            status: ToolCallStatus::Success,
            result: Some(serde_json::json!({"ok": true})),
            result_error: None,
        };
        let v = serde_json::to_value(&cp).unwrap();
        assert_eq!(v["type"], "tool_call");
        assert_eq!(v["toolCallId"], "tc1");
        assert_eq!(v["status"], "success");
    }
}
