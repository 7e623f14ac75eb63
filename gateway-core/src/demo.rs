//! Demo adapter (design §9 "Demo adapter"): a keyword-matching fallback so the gateway
//! is usable with no backend configured. Reference implementation of the
//! [`AgentHandler`] contract, not production behavior — it synthesizes per-word pacing
//! to exercise the throttled `chat.delta` path.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use crate::adapter::{AdapterChunk, AdapterMessage, AdapterRole, AgentHandler, ToolSpec};
use crate::error::GatewayError;

pub struct DemoAdapter {
    word_delay: Duration,
}

impl DemoAdapter {
    pub fn new() -> Self {
        Self {
            word_delay: Duration::from_millis(10),
        }
    }

    #[cfg(test)]
    fn with_word_delay(word_delay: Duration) -> Self {
        Self { word_delay }
    }

    async fn emit_words(&self, text: &str, tx: &mpsc::Sender<AdapterChunk>) -> Result<(), GatewayError> {
        for word in text.split_inclusive(' ') {
            if tx.send(AdapterChunk::Text(word.to_string())).await.is_err() {
                return Ok(()); // receiver dropped: run was aborted, caller will notice
            }
            sleep(self.word_delay).await;
        }
        Ok(())
    }
}

impl Default for DemoAdapter {
    fn default() -> Self {
        Self::new()
    }
}

const WEATHER_TOOL: &str = "web_search";

#[async_trait]
impl AgentHandler for DemoAdapter {
    async fn stream(
        &self,
        messages: &[AdapterMessage],
        _tools: &[ToolSpec],
        tx: mpsc::Sender<AdapterChunk>,
    ) -> Result<(), GatewayError> {
        let last_tool_result = messages
            .iter()
            .rev()
            .find(|m| m.role == AdapterRole::Tool && m.tool_call_id.as_deref() == Some("demo-1"));

        if let Some(result) = last_tool_result {
            let table = format!(
                "Here is the forecast:\n\n{}\n\n| Day | Condition |\n|---|---|\n| Mon | Sunny |\n| Tue | Cloudy |\n",
                result.content
            );
            return self.emit_words(&table, &tx).await;
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == AdapterRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let lowered = last_user.to_lowercase();

        if lowered.contains("weather") {
            let _ = tx
                .send(AdapterChunk::ToolCallFragment {
                    index: 0,
                    id_fragment: Some("demo-1".to_string()),
                    name_fragment: Some(WEATHER_TOOL.to_string()),
                    arguments_fragment: Some(r#"{"query":"weather"}"#.to_string()),
                })
                .await;
            return Ok(());
        }

        let reply = canned_reply(&lowered);
        self.emit_words(reply, &tx).await
    }
}

fn canned_reply(lowered: &str) -> &'static str {
    if lowered.contains("hello") || lowered.contains("hi") {
        "Hello! I'm the demo adapter — ask me about the weather to see a tool call."
    } else if lowered.contains("help") {
        "I'm a keyword-matching demo adapter. Try \"weather\", \"hello\", or anything else for an echo-style reply."
    } else {
        "I heard you, but I'm just the demo adapter — configure a real backend for actual answers."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn weather_keyword_emits_tool_call_fragment_with_no_preceding_text() {
        let adapter = DemoAdapter::with_word_delay(Duration::from_millis(1));
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![AdapterMessage::user("what's the weather like?")];
        adapter.stream(&messages, &[], tx).await.unwrap();

        let mut saw_tool_call = false;
        while let Some(chunk) = rx.recv().await {
            match chunk {
                AdapterChunk::Text(_) => panic!("no assistant text before the tool call completes"),
                AdapterChunk::ToolCallFragment { name_fragment, .. } => {
                    saw_tool_call = true;
                    assert_eq!(name_fragment.as_deref(), Some("web_search"));
                }
                AdapterChunk::Thinking(_) => {}
            }
        }
        assert!(saw_tool_call);
    }

    #[tokio::test]
    async fn tool_result_present_yields_final_table_no_further_tool_calls() {
        let adapter = DemoAdapter::with_word_delay(Duration::from_millis(1));
        let (tx, mut rx) = mpsc::channel(256);
        let messages = vec![
            AdapterMessage::user("what's the weather like?"),
            AdapterMessage::assistant("Let me check that for you."),
            AdapterMessage::tool_result("demo-1", "sunny and 72F"),
        ];
        adapter.stream(&messages, &[], tx).await.unwrap();

        let mut full_text = String::new();
        while let Some(chunk) = rx.recv().await {
            match chunk {
                AdapterChunk::Text(t) => full_text.push_str(&t),
                AdapterChunk::ToolCallFragment { .. } => panic!("should not call tools again"),
                AdapterChunk::Thinking(_) => {}
            }
        }
        assert!(full_text.contains("| Day | Condition |"));
        assert!(full_text.contains("sunny and 72F"));
    }

    #[tokio::test]
    async fn greeting_keyword_gets_canned_hello_reply() {
        let adapter = DemoAdapter::with_word_delay(Duration::from_millis(1));
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![AdapterMessage::user("hello there")];
        adapter.stream(&messages, &[], tx).await.unwrap();

        let mut full_text = String::new();
        while let Some(chunk) = rx.recv().await {
            if let AdapterChunk::Text(t) = chunk {
                full_text.push_str(&t);
            }
        }
        assert!(full_text.starts_with("Hello!"));
    }
}
