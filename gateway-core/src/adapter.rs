//! Backend adapter contract (design §4.7): the `AgentHandler` interface plus the small
//! set of collaborator traits (`ToolDispatcher`, `McpClient`) the streaming-translation
//! loop in [`crate::run`] drives them through.
//!
//! Deliberately out of core (design §1): concrete adapters (Ollama, OpenAI-compatible)
//! live in the `cli` crate and are injected here only as a `dyn AgentHandler`.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::GatewayError;

/// `role` on an [`AdapterMessage`] sent to the backend. `Tool` carries a result keyed by
/// `tool_call_id`; `Assistant` messages with pending tool calls carry `tool_calls`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone)]
pub struct AdapterMessage {
    pub role: AdapterRole,
    pub content: String,
    pub tool_call_id: Option<String>,
    pub tool_calls: Option<Vec<ToolCallRequest>>,
}

impl AdapterMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: AdapterRole::System,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: AdapterRole::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: AdapterRole::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: AdapterRole::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Some(calls),
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: AdapterRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub namespaced_name: String,
    pub schema: Value,
}

/// One fragment of a single streaming call's output. A backend emits a sequence of these;
/// the tool-loop driver in `run.rs` accumulates them (design §4.7).
#[derive(Debug, Clone)]
pub enum AdapterChunk {
    Thinking(String),
    Text(String),
    /// A fragment of an in-progress tool call, keyed by `index` (design §4.7
    /// "Tool-call accumulation"): some backends stream `id`/`name`/`arguments` as partial
    /// deltas that must be concatenated before dispatch.
    ToolCallFragment {
        index: usize,
        id_fragment: Option<String>,
        name_fragment: Option<String>,
        arguments_fragment: Option<String>,
    },
}

/// A pluggable backend. One call to [`AgentHandler::stream`] is one iteration of the
/// tool loop (design §4.7): given the conversation so far and the tools on offer, emit
/// chunks until the backend's turn ends (with or without pending tool calls).
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn stream(
        &self,
        messages: &[AdapterMessage],
        tools: &[ToolSpec],
        tx: mpsc::Sender<AdapterChunk>,
    ) -> Result<(), GatewayError>;
}

/// Built-in or MCP-routed tool execution. `call` returning `Err` surfaces as
/// `isError: true` on the `agent.tool{phase:result}` event — it is not a method failure.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    fn tool_specs(&self) -> Vec<ToolSpec>;
    async fn call(&self, namespaced_name: &str, arguments: Value) -> Result<Value, String>;
}

/// The sub-process MCP client (design §9 "Sub-process MCP client"), injected as a
/// capability rather than embedded in the core.
#[async_trait]
pub trait McpClient: Send + Sync {
    async fn get_tool_list(&self) -> Vec<ToolSpec>;
    async fn call(&self, namespaced_name: &str, arguments: Value) -> Result<Value, String>;
}

/// Splits `server__tool` on the first double underscore (design §9). Returns `None` if the
/// delimiter is absent, in which case dispatch falls back to built-ins.
pub fn split_mcp_name(namespaced_name: &str) -> Option<(&str, &str)> {
    namespaced_name.split_once("__")
}

/// A [`ToolDispatcher`] that routes `server__tool` names to an [`McpClient`] and anything
/// else to a fixed set of built-ins (here: none — built-ins are adapter-specific and can be
/// layered on by wrapping this type).
pub struct McpToolDispatcher {
    mcp: Option<std::sync::Arc<dyn McpClient>>,
}

impl McpToolDispatcher {
    pub fn new(mcp: Option<std::sync::Arc<dyn McpClient>>) -> Self {
        Self { mcp }
    }
}

#[async_trait]
impl ToolDispatcher for McpToolDispatcher {
    fn tool_specs(&self) -> Vec<ToolSpec> {
        Vec::new()
    }

    async fn call(&self, namespaced_name: &str, arguments: Value) -> Result<Value, String> {
        if split_mcp_name(namespaced_name).is_some() {
            if let Some(mcp) = &self.mcp {
                return mcp.call(namespaced_name, arguments).await;
            }
        }
        Err(format!("unknown tool: {namespaced_name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_mcp_name_splits_on_double_underscore() {
        assert_eq!(split_mcp_name("weather__forecast"), Some(("weather", "forecast")));
        assert_eq!(split_mcp_name("web_search"), None);
    }

    #[tokio::test]
    async fn dispatcher_without_mcp_errors_as_unknown_tool() {
        let dispatcher = McpToolDispatcher::new(None);
        let err = dispatcher.call("web_search", Value::Null).await.unwrap_err();
        assert!(err.contains("unknown tool"));
    }
}
