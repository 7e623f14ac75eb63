//! Internal error type for gateway-core operations, and its mapping onto the wire-level
//! `{code, message, ...}` shape (design §7).

use protocol::{ErrorCode, ErrorPayload};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("agent.wait timed out after {0}ms")]
    AgentTimeout(u64),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("not linked")]
    NotLinked,
    #[error("not paired")]
    NotPaired,
}

impl GatewayError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        GatewayError::InvalidRequest(message.into())
    }

    /// Maps this error onto the wire error payload sent back in a `response` frame.
    pub fn to_payload(&self) -> ErrorPayload {
        match self {
            GatewayError::InvalidRequest(msg) => ErrorPayload::invalid_request(msg.clone()),
            GatewayError::AgentTimeout(_) => ErrorPayload::agent_timeout(self.to_string()),
            GatewayError::Unavailable(_) => ErrorPayload::unavailable(self.to_string()),
            GatewayError::NotLinked => ErrorPayload {
                code: ErrorCode::NotLinked,
                message: self.to_string(),
                details: None,
                retryable: Some(false),
                retry_after_ms: None,
            },
            GatewayError::NotPaired => ErrorPayload {
                code: ErrorCode::NotPaired,
                message: self.to_string(),
                details: None,
                retryable: Some(false),
                retry_after_ms: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_request_maps_to_invalid_request_code() {
        let err = GatewayError::invalid_request("missing sessionKey");
        let payload = err.to_payload();
        assert_eq!(payload.code, ErrorCode::InvalidRequest);
        assert_eq!(payload.message, "missing sessionKey");
    }

    #[test]
    fn agent_timeout_is_retryable() {
        let err = GatewayError::AgentTimeout(60_000);
        let payload = err.to_payload();
        assert_eq!(payload.retryable, Some(true));
    }
}
