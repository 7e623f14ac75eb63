//! Backend talking to a local Ollama server's `/api/chat` endpoint (NDJSON streaming, one
//! JSON object per line, terminated by a line with `"done": true`).

use async_trait::async_trait;
use futures_util::StreamExt;
use gateway_core::{AdapterChunk, AdapterMessage, AdapterRole, AgentHandler, GatewayError, ToolSpec};
use serde_json::{json, Value};
use tokio::sync::mpsc;

pub struct OllamaAdapter {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaAdapter {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            model,
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

fn to_ollama_message(msg: &AdapterMessage) -> Value {
    json!({
        "role": role_str(&msg.role),
        "content": msg.content,
    })
}

fn to_ollama_tool(spec: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": spec.namespaced_name,
            "parameters": spec.schema,
        },
    })
}

#[async_trait]
impl AgentHandler for OllamaAdapter {
    async fn stream(
        &self,
        messages: &[AdapterMessage],
        tools: &[ToolSpec],
        tx: mpsc::Sender<AdapterChunk>,
    ) -> Result<(), GatewayError> {
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(to_ollama_message).collect::<Vec<_>>(),
            "stream": true,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(to_ollama_tool).collect());
        }

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("ollama request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "ollama returned status {}",
                response.status()
            )));
        }

        let mut buf = String::new();
        let mut byte_stream = response.bytes_stream();
        let mut tool_index = 0usize;

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| GatewayError::Unavailable(format!("ollama stream error: {e}")))?;
            buf.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline_pos) = buf.find('\n') {
                let line = buf[..newline_pos].trim().to_string();
                buf.drain(..=newline_pos);
                if line.is_empty() {
                    continue;
                }
                let parsed: Value = serde_json::from_str(&line)
                    .map_err(|e| GatewayError::Unavailable(format!("ollama sent malformed json: {e}")))?;

                if let Some(message) = parsed.get("message") {
                    if let Some(content) = message.get("content").and_then(Value::as_str) {
                        if !content.is_empty() {
                            let _ = tx.send(AdapterChunk::Text(content.to_string())).await;
                        }
                    }
                    if let Some(tool_calls) = message.get("tool_calls").and_then(Value::as_array) {
                        for call in tool_calls {
                            let function = call.get("function");
                            let name = function
                                .and_then(|f| f.get("name"))
                                .and_then(Value::as_str)
                                .map(str::to_string);
                            let arguments = function.and_then(|f| f.get("arguments")).map(|v| v.to_string());
                            let _ = tx
                                .send(AdapterChunk::ToolCallFragment {
                                    index: tool_index,
                                    id_fragment: name.clone(),
                                    name_fragment: name,
                                    arguments_fragment: arguments,
                                })
                                .await;
                            tool_index += 1;
                        }
                    }
                }

                if parsed.get("done").and_then(Value::as_bool).unwrap_or(false) {
                    return Ok(());
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
    fn role_str_maps_tool_to_tool() {
        assert_eq!(role_str(&AdapterRole::Tool), "tool");
    }

    #[test]
    fn to_ollama_message_preserves_content() {
        let msg = AdapterMessage::user("hi there");
        let value = to_ollama_message(&msg);
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"], "hi there");
    }
}
