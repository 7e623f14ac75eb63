//! Frame codec (design §4.1): the single entry point for turning inbound WebSocket text
//! into a typed [`Frame`], and for serializing outbound frames back to text.

use crate::error::ErrorPayload;
use crate::event::StateVersion;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 3;

/// The top-level message on the wire (design §3): a tagged union of three variants,
/// discriminated by the `type` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Request {
        id: String,
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
    Response {
        id: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorPayload>,
    },
    Event {
        event: String,
        payload: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        #[serde(rename = "stateVersion", skip_serializing_if = "Option::is_none")]
        state_version: Option<StateVersion>,
    },
}

impl Frame {
    pub fn response_ok(id: impl Into<String>, payload: Value) -> Self {
        Frame::Response {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn response_err(id: impl Into<String>, error: ErrorPayload) -> Self {
        Frame::Response {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error),
        }
    }

    pub fn event(event: impl Into<String>, payload: Value) -> Self {
        Frame::Event {
            event: event.into(),
            payload,
            seq: None,
            state_version: None,
        }
    }

    /// Serializes this frame to JSON text. Called exactly once per logical message;
    /// WebSocket framing (not this codec) handles chunking of large payloads.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            // Serialization of our own well-typed frames cannot fail in practice; fall
            // back to a minimal error frame rather than panicking the connection task.
            r#"{"type":"response","id":"","ok":false,"error":{"code":"INVALID_REQUEST","message":"serialization error"}}"#
                .to_string()
        })
    }
}

/// Error from [`decode`]. Callers map this to an `INVALID_REQUEST` response (no socket
/// close) except [`FrameDecodeError::Oversized`], which closes the connection with code 1009.
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame of {actual} bytes exceeds the {limit} byte payload ceiling")]
    Oversized { limit: usize, actual: usize },
}

/// Parses one inbound WebSocket text message into a [`Frame`].
///
/// Enforces the payload-size ceiling up front (on the raw byte length, before attempting
/// to parse) so an oversized frame never reaches the JSON parser. Missing/unknown `type`
/// and missing required fields (`id`/`method` on a `request`) surface as
/// [`FrameDecodeError::Malformed`] because `Frame`'s `Deserialize` impl already rejects them.
pub fn decode(text: &str, max_payload_bytes: usize) -> Result<Frame, FrameDecodeError> {
    let actual = text.len();
    if actual > max_payload_bytes {
        return Err(FrameDecodeError::Oversized {
            limit: max_payload_bytes,
            actual,
        });
    }
    let frame: Frame = serde_json::from_str(text)?;
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_request_frame() {
        let text = r#"{"type":"request","id":"1","method":"chat.send","params":{"a":1}}"#;
        let frame = decode(text, 1024).unwrap();
        match frame {
            Frame::Request { id, method, params } => {
                assert_eq!(id, "1");
                assert_eq!(method, "chat.send");
                assert_eq!(params.unwrap()["a"], 1);
            }
            _ => panic!("expected Request"),
        }
    }

    #[test]
    fn rejects_request_missing_id() {
        let text = r#"{"type":"request","method":"chat.send"}"#;
        assert!(decode(text, 1024).is_err());
    }

    #[test]
    fn rejects_unknown_type() {
        let text = r#"{"type":"bogus","id":"1"}"#;
        assert!(decode(text, 1024).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        let text = "{not json";
        assert!(decode(text, 1024).is_err());
    }

    #[test]
    fn rejects_oversized_frame_without_parsing() {
        let text = r#"{"type":"request","id":"1","method":"chat.send"}"#;
        let err = decode(text, 4).unwrap_err();
        assert!(matches!(err, FrameDecodeError::Oversized { .. }));
    }

    #[test]
    fn response_frame_round_trips() {
        let frame = Frame::response_ok("42", serde_json::json!({"runId": "r1"}));
        let text = frame.encode();
        let back = decode(&text, 4096).unwrap();
        match back {
            Frame::Response { id, ok, payload, .. } => {
                assert_eq!(id, "42");
                assert!(ok);
                assert_eq!(payload.unwrap()["runId"], "r1");
            }
            _ => panic!("expected Response"),
        }
    }

    #[test]
    fn event_frame_carries_seq_and_state_version() {
        let frame = Frame::Event {
            event: "presence".to_string(),
            payload: serde_json::json!({"entries": []}),
            seq: Some(7),
            state_version: Some(StateVersion {
                presence: 3,
                health: 1,
            }),
        };
        let v = serde_json::to_value(&frame).unwrap();
        assert_eq!(v["seq"], 7);
        assert_eq!(v["stateVersion"]["presence"], 3);
    }
}
