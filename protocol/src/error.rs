//! Uniform error shape used in `response` frames (design §7).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// String values in `error.code`. Never triggers a wire-level retry by itself —
/// `retryable`/`retry_after_ms` on [`ErrorPayload`] are the hints a client acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "INVALID_REQUEST")]
    InvalidRequest,
    #[serde(rename = "AGENT_TIMEOUT")]
    AgentTimeout,
    #[serde(rename = "NOT_LINKED")]
    NotLinked,
    #[serde(rename = "NOT_PAIRED")]
    NotPaired,
    #[serde(rename = "UNAVAILABLE")]
    Unavailable,
}

/// `{code, message, details?, retryable?, retryAfterMs?}` — the payload of a failed
/// `response` frame (never of an `agent.lifecycle.error`/`chat.error` event, which carry
/// a plain message instead; see [`crate::event::ChatState::Error`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ErrorPayload {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidRequest,
            message: message.into(),
            details: None,
            retryable: Some(false),
            retry_after_ms: None,
        }
    }

    pub fn agent_timeout(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::AgentTimeout,
            message: message.into(),
            details: None,
            retryable: Some(true),
            retry_after_ms: None,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Unavailable,
            message: message.into(),
            details: None,
            retryable: Some(true),
            retry_after_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_serializes_to_spec_strings() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::InvalidRequest).unwrap(),
            "\"INVALID_REQUEST\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::AgentTimeout).unwrap(),
            "\"AGENT_TIMEOUT\""
        );
    }

    #[test]
    fn invalid_request_omits_retry_after() {
        let p = ErrorPayload::invalid_request("bad method");
        let v = serde_json::to_value(&p).unwrap();
        assert!(v.get("retryAfterMs").is_none());
        assert_eq!(v["message"], "bad method");
    }
}
