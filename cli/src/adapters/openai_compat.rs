//! Backend talking to an OpenAI-compatible `/chat/completions` endpoint (SSE streaming:
//! `data: {...}` lines, terminated by a literal `data: [DONE]`).

use async_trait::async_trait;
use futures_util::StreamExt;
use gateway_core::{AdapterChunk, AdapterMessage, AdapterRole, AgentHandler, GatewayError, ToolSpec};
use serde_json::{json, Value};
use tokio::sync::mpsc;

pub struct OpenAiCompatAdapter {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatAdapter {
    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            model,
            api_key,
        }
    }
}

fn role_str(role: &AdapterRole) -> &'static str {
    match role {
        AdapterRole::System => "system",
        AdapterRole::User => "user",
        AdapterRole::Assistant => "assistant",
        AdapterRole::Tool => "tool",
    }
}

fn to_openai_message(msg: &AdapterMessage) -> Value {
    let mut value = json!({
        "role": role_str(&msg.role),
        "content": msg.content,
    });
    if let Some(tool_call_id) = &msg.tool_call_id {
        value["tool_call_id"] = json!(tool_call_id);
    }
    if let Some(calls) = &msg.tool_calls {
        value["tool_calls"] = Value::Array(
            calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {"name": c.name, "arguments": c.arguments.to_string()},
                    })
                })
                .collect(),
        );
    }
    value
}

fn to_openai_tool(spec: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": spec.namespaced_name,
            "parameters": spec.schema,
        },
    })
}

#[async_trait]
impl AgentHandler for OpenAiCompatAdapter {
    async fn stream(
        &self,
        messages: &[AdapterMessage],
        tools: &[ToolSpec],
        tx: mpsc::Sender<AdapterChunk>,
    ) -> Result<(), GatewayError> {
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(to_openai_message).collect::<Vec<_>>(),
            "stream": true,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(to_openai_tool).collect());
        }

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("openai-compatible request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "openai-compatible backend returned status {}",
                response.status()
            )));
        }

        let mut buf = String::new();
        let mut byte_stream = response.bytes_stream();

        while let Some(chunk) = byte_stream.next().await {
            let chunk =
                chunk.map_err(|e| GatewayError::Unavailable(format!("openai-compatible stream error: {e}")))?;
            buf.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline_pos) = buf.find('\n') {
                let line = buf[..newline_pos].trim().to_string();
                buf.drain(..=newline_pos);
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    return Ok(());
                }
                if data.is_empty() {
                    continue;
                }

                let parsed: Value = serde_json::from_str(data)
                    .map_err(|e| GatewayError::Unavailable(format!("openai-compatible sent malformed json: {e}")))?;
                let Some(delta) = parsed.pointer("/choices/0/delta") else {
                    continue;
                };

                if let Some(content) = delta.get("content").and_then(Value::as_str) {
                    if !content.is_empty() {
                        let _ = tx.send(AdapterChunk::Text(content.to_string())).await;
                    }
                }
                if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
                    for call in tool_calls {
                        let index = call.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                        let id_fragment = call.get("id").and_then(Value::as_str).map(str::to_string);
                        let function = call.get("function");
                        let name_fragment = function
                            .and_then(|f| f.get("name"))
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        let arguments_fragment = function
                            .and_then(|f| f.get("arguments"))
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        let _ = tx
                            .send(AdapterChunk::ToolCallFragment {
                                index,
                                id_fragment,
                                name_fragment,
                                arguments_fragment,
                            })
                            .await;
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_openai_message_carries_tool_call_id() {
        let msg = AdapterMessage::tool_result("call_1", "42");
        let value = to_openai_message(&msg);
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_1");
    }

    #[test]
    fn role_str_maps_system() {
        assert_eq!(role_str(&AdapterRole::System), "system");
    }
}
