//! Run engine (design §4.6, §4.7): creates, tracks, aborts, and awaits runs; intercepts
//! slash commands; drives the streamed-delta/tool-loop translation against whichever
//! [`AgentHandler`] is registered (falling back to the [`DemoAdapter`]).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use protocol::{
    AgentEvent, AgentStream, ChatEvent, ChatState, ContentPart, HistoryEntry, LifecyclePayload,
    Role, TokenPayload, ToolCallStatus, ToolPayload,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::adapter::{AdapterChunk, AdapterMessage, AdapterRole, AgentHandler, ToolCallRequest, ToolDispatcher};
use crate::bus::Bus;
use crate::demo::DemoAdapter;
use crate::error::GatewayError;
use crate::history::HistoryStore;
use crate::idempotency::IdempotencyCache;

/// Tool loop hard cap (design §4.7 "Bounded iteration").
const MAX_ITERATIONS: u32 = 10;
/// `chat.delta` throttle window (design §4.6): at most one per ~150ms of wall clock.
const CHAT_DELTA_THROTTLE: Duration = Duration::from_millis(150);
/// `agent.wait` default timeout (design §4.6).
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Completed,
    Error,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct WaitResult {
    pub run_id: String,
    pub state: RunState,
    pub text: String,
}

pub struct Run {
    pub run_id: String,
    pub session_key: String,
    pub message: String,
    created_order: u64,
    seq: AtomicU64,
    state: Mutex<RunState>,
    accumulated_text: Mutex<String>,
    cancel: CancellationToken,
    waiters: Mutex<Vec<oneshot::Sender<WaitResult>>>,
}

impl Run {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().expect("run state lock poisoned")
    }

    fn set_accumulated_text(&self, text: String) {
        *self.accumulated_text.lock().expect("run text lock poisoned") = text;
    }

    fn accumulated_text(&self) -> String {
        self.accumulated_text.lock().expect("run text lock poisoned").clone()
    }

    /// Transitions `Running -> new_state` exactly once; returns `false` if the run was
    /// already terminal (design §3 invariant: "once terminal, no further child events").
    fn try_finish(&self, new_state: RunState) -> bool {
        let mut s = self.state.lock().expect("run state lock poisoned");
        if *s != RunState::Running {
            return false;
        }
        *s = new_state;
        true
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub struct RunSubmitted {
    pub run_id: String,
    pub session_key: String,
}

pub struct AbortResult {
    pub run_id: String,
    pub aborted: bool,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

struct ToolCallAccum {
    id: String,
    name: String,
    arguments: String,
}

pub struct RunEngine {
    history: Arc<HistoryStore>,
    bus: Arc<Bus>,
    idempotency: Arc<IdempotencyCache>,
    handler: Arc<dyn AgentHandler>,
    dispatcher: Arc<dyn ToolDispatcher>,
    runs: DashMap<String, Arc<Run>>,
    run_order: AtomicU64,
    active_models: DashMap<String, String>,
}

impl RunEngine {
    pub fn new(
        history: Arc<HistoryStore>,
        bus: Arc<Bus>,
        idempotency: Arc<IdempotencyCache>,
        handler: Option<Arc<dyn AgentHandler>>,
        dispatcher: Arc<dyn ToolDispatcher>,
    ) -> Self {
        Self {
            history,
            bus,
            idempotency,
            handler: handler.unwrap_or_else(|| Arc::new(DemoAdapter::new())),
            dispatcher,
            runs: DashMap::new(),
            run_order: AtomicU64::new(0),
            active_models: DashMap::new(),
        }
    }

    /// `chat.send`/`agent` contract (design §4.6 steps 1-5): validates, records
    /// idempotency, appends the user message, creates the run, and spawns its execution.
    /// Returns as soon as the run is created — it must not wait on backend I/O.
    pub fn submit(
        self: &Arc<Self>,
        session_key: String,
        message: String,
        idempotency_key: String,
    ) -> Result<RunSubmitted, GatewayError> {
        if session_key.trim().is_empty() {
            return Err(GatewayError::invalid_request("sessionKey is required"));
        }
        if message.trim().is_empty() {
            return Err(GatewayError::invalid_request("message is required"));
        }
        if idempotency_key.trim().is_empty() {
            return Err(GatewayError::invalid_request("idempotencyKey is required"));
        }
        if self.idempotency.is_duplicate(&idempotency_key) {
            return Err(GatewayError::invalid_request("Duplicate idempotency key"));
        }
        self.idempotency.record(idempotency_key);

        self.history.append(
            &session_key,
            HistoryEntry {
                role: Role::User,
                content: vec![ContentPart::Text { text: message.clone() }],
                timestamp: now_ms(),
                stop_reason: None,
                model: None,
                provider: None,
            },
        );

        let run_id = format!("run-{}", uuid::Uuid::new_v4());
        let run = Arc::new(Run {
            run_id: run_id.clone(),
            session_key: session_key.clone(),
            message,
            created_order: self.run_order.fetch_add(1, Ordering::SeqCst),
            seq: AtomicU64::new(0),
            state: Mutex::new(RunState::Running),
            accumulated_text: Mutex::new(String::new()),
            cancel: CancellationToken::new(),
            waiters: Mutex::new(Vec::new()),
        });
        self.runs.insert(run_id.clone(), run.clone());

        let engine = self.clone();
        tokio::spawn(async move {
            engine.execute_run(run).await;
        });

        Ok(RunSubmitted { run_id, session_key })
    }

    /// `chat.abort` contract (design §4.6): cancels the target run's handle.
    pub fn abort(&self, session_key: &str, run_id: Option<&str>) -> Result<AbortResult, GatewayError> {
        let run = match run_id {
            Some(id) => self
                .runs
                .get(id)
                .map(|r| r.clone())
                .ok_or_else(|| GatewayError::invalid_request(format!("unknown run id: {id}")))?,
            None => self
                .runs
                .iter()
                .filter(|e| e.session_key == session_key && e.state() == RunState::Running)
                .max_by_key(|e| e.created_order)
                .map(|e| e.clone())
                .ok_or_else(|| GatewayError::invalid_request("no running run in this session"))?,
        };
        run.cancel();
        Ok(AbortResult {
            run_id: run.run_id.clone(),
            aborted: true,
        })
    }

    /// `agent.wait` contract (design §4.6): resolves immediately if already terminal,
    /// otherwise registers a waiter with its own independent timeout.
    pub async fn wait(&self, run_id: &str, timeout_ms: Option<u64>) -> Result<WaitResult, GatewayError> {
        let run = self
            .runs
            .get(run_id)
            .map(|r| r.clone())
            .ok_or_else(|| GatewayError::invalid_request(format!("unknown run id: {run_id}")))?;

        if run.state() != RunState::Running {
            return Ok(WaitResult {
                run_id: run.run_id.clone(),
                state: run.state(),
                text: run.accumulated_text(),
            });
        }

        let (tx, rx) = oneshot::channel();
        run.waiters.lock().expect("waiters lock poisoned").push(tx);
        // The run may have finished between the state check above and registering the
        // waiter; re-check so we never block forever on a waiter nobody will resolve.
        if run.state() != RunState::Running {
            return Ok(WaitResult {
                run_id: run.run_id.clone(),
                state: run.state(),
                text: run.accumulated_text(),
            });
        }

        let timeout = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_WAIT_TIMEOUT.as_millis() as u64));
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(GatewayError::invalid_request("run dropped before resolving")),
            Err(_) => Err(GatewayError::AgentTimeout(timeout.as_millis() as u64)),
        }
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    pub fn cancel_all_running(&self) {
        for entry in self.runs.iter() {
            if entry.state() == RunState::Running {
                entry.cancel();
            }
        }
    }

    fn handle_slash_command(&self, session_key: &str, trimmed: &str) -> String {
        let mut parts = trimmed.splitn(2, char::is_whitespace);
        let cmd = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();
        match cmd {
            "/new" => {
                self.history.reset(session_key);
                "Started a new conversation.".to_string()
            }
            "/model" => {
                if rest.is_empty() {
                    let current = self
                        .active_models
                        .get(session_key)
                        .map(|m| m.clone())
                        .unwrap_or_else(|| "default".to_string());
                    format!("Current model: {current}")
                } else {
                    self.active_models.insert(session_key.to_string(), rest.to_string());
                    format!("Model set to {rest}")
                }
            }
            "/models" => "Available models: default".to_string(),
            "/help" => "Commands: /new, /model [name], /models, /help".to_string(),
            other => format!("Unknown command: {other}"),
        }
    }

    fn emit_agent(&self, run: &Run, stream: AgentStream, data: Value) {
        let seq = run.next_seq();
        let event = AgentEvent {
            run_id: run.run_id.clone(),
            session_key: run.session_key.clone(),
            seq,
            stream,
            ts: now_ms(),
            data,
        };
        self.bus.broadcast(
            "agent",
            serde_json::to_value(&event).expect("AgentEvent is always representable as JSON"),
            None,
            false,
        );
    }

    fn emit_chat(&self, run: &Run, state: ChatState) {
        let seq = run.next_seq();
        let event = ChatEvent {
            run_id: run.run_id.clone(),
            session_key: run.session_key.clone(),
            seq,
            state,
        };
        self.bus.broadcast(
            "chat",
            serde_json::to_value(&event).expect("ChatEvent is always representable as JSON"),
            None,
            false,
        );
    }

    fn emit_chat_delta(&self, run: &Run, text: String) {
        self.emit_chat(run, ChatState::Delta { text });
    }

    async fn execute_run(self: Arc<Self>, run: Arc<Run>) {
        self.emit_agent(
            &run,
            AgentStream::Lifecycle,
            serde_json::to_value(&LifecyclePayload::Start).unwrap(),
        );

        let trimmed = run.message.trim().to_string();
        if trimmed.starts_with('/') {
            let reply = self.handle_slash_command(&run.session_key, &trimmed);
            run.set_accumulated_text(reply.clone());
            self.emit_chat_delta(&run, reply);
            self.finish_run(&run, RunState::Completed, None, None).await;
            return;
        }

        let history = self.history.get(&run.session_key, None);
        let mut messages = history_to_messages(&history);
        messages.push(AdapterMessage::user(run.message.clone()));

        let tools = self.dispatcher.tool_specs();
        let mut iteration = 0u32;
        let mut content_parts: Vec<ContentPart> = Vec::new();

        loop {
            iteration += 1;
            if iteration > MAX_ITERATIONS {
                tracing::warn!(run_id = %run.run_id, "tool loop exceeded max iterations, finishing with accumulated text");
                break;
            }
            if run.is_cancelled() {
                self.finish_run(&run, RunState::Aborted, None, None).await;
                return;
            }

            let (tx, mut rx) = mpsc::channel::<AdapterChunk>(256);
            let handler = self.handler.clone();
            let call_messages = messages.clone();
            let call_tools = tools.clone();
            let stream_task =
                tokio::spawn(async move { handler.stream(&call_messages, &call_tools, tx).await });

            let mut text_acc = String::new();
            let mut thinking_acc = String::new();
            let mut tool_calls_acc: BTreeMap<usize, ToolCallAccum> = BTreeMap::new();
            let mut last_chat_delta: Option<Instant> = None;
            let mut cancelled_mid_stream = false;

            loop {
                tokio::select! {
                    biased;
                    _ = run.cancel.cancelled() => {
                        cancelled_mid_stream = true;
                        break;
                    }
                    chunk = rx.recv() => {
                        match chunk {
                            None => break,
                            Some(AdapterChunk::Thinking(delta)) => {
                                thinking_acc.push_str(&delta);
                                self.emit_agent(
                                    &run,
                                    AgentStream::Reasoning,
                                    serde_json::to_value(&TokenPayload { text: thinking_acc.clone(), delta }).unwrap(),
                                );
                            }
                            Some(AdapterChunk::Text(delta)) => {
                                text_acc.push_str(&delta);
                                run.set_accumulated_text(text_acc.clone());
                                self.emit_agent(
                                    &run,
                                    AgentStream::Assistant,
                                    serde_json::to_value(&TokenPayload { text: text_acc.clone(), delta }).unwrap(),
                                );
                                let should_emit = last_chat_delta.map_or(true, |t| t.elapsed() >= CHAT_DELTA_THROTTLE);
                                if should_emit {
                                    self.emit_chat_delta(&run, text_acc.clone());
                                    last_chat_delta = Some(Instant::now());
                                }
                            }
                            Some(AdapterChunk::ToolCallFragment { index, id_fragment, name_fragment, arguments_fragment }) => {
                                let accum = tool_calls_acc.entry(index).or_insert_with(|| ToolCallAccum {
                                    id: String::new(),
                                    name: String::new(),
                                    arguments: String::new(),
                                });
                                if let Some(f) = id_fragment { accum.id.push_str(&f); }
                                if let Some(f) = name_fragment { accum.name.push_str(&f); }
                                if let Some(f) = arguments_fragment { accum.arguments.push_str(&f); }
                            }
                        }
                    }
                }
            }

            if cancelled_mid_stream {
                stream_task.abort();
                self.finish_run(&run, RunState::Aborted, None, None).await;
                return;
            }

            match stream_task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.finish_run(&run, RunState::Error, Some(e.to_string()), None).await;
                    return;
                }
                Err(join_err) => {
                    self.finish_run(&run, RunState::Error, Some(join_err.to_string()), None).await;
                    return;
                }
            }

            if !tool_calls_acc.is_empty() {
                let calls: Vec<ToolCallRequest> = tool_calls_acc
                    .into_values()
                    .map(|a| ToolCallRequest {
                        id: a.id,
                        name: a.name,
                        arguments: serde_json::from_str(&a.arguments).unwrap_or_else(|_| serde_json::json!({})),
                    })
                    .collect();
                messages.push(AdapterMessage::assistant_with_tool_calls(text_acc.clone(), calls.clone()));

                for call in calls {
                    if run.is_cancelled() {
                        self.finish_run(&run, RunState::Aborted, None, None).await;
                        return;
                    }
                    self.emit_agent(
                        &run,
                        AgentStream::Tool,
                        serde_json::to_value(&ToolPayload::Start {
                            name: call.name.clone(),
                            tool_call_id: call.id.clone(),
                            args: call.arguments.clone(),
                        })
                        .unwrap(),
                    );
                    let dispatch = self.dispatcher.call(&call.name, call.arguments.clone()).await;
                    let (result_value, is_error, result_text) = match &dispatch {
                        Ok(v) => (v.clone(), false, v.to_string()),
                        Err(e) => (serde_json::json!({ "error": e }), true, e.clone()),
                    };
                    self.emit_agent(
                        &run,
                        AgentStream::Tool,
                        serde_json::to_value(&ToolPayload::Result {
                            name: call.name.clone(),
                            tool_call_id: call.id.clone(),
                            result: result_value.clone(),
                            is_error,
                        })
                        .unwrap(),
                    );
                    content_parts.push(ContentPart::ToolCall {
                        name: call.name.clone(),
                        tool_call_id: call.id.clone(),
                        arguments: call.arguments.clone(),
                        status: if is_error { ToolCallStatus::Error } else { ToolCallStatus::Success },
                        result: if is_error { None } else { Some(result_value) },
                        result_error: if is_error { Some(result_text.clone()) } else { None },
                    });
                    messages.push(AdapterMessage::tool_result(call.id.clone(), result_text));
                }
                continue;
            }

            if !text_acc.is_empty() {
                self.emit_chat_delta(&run, text_acc.clone());
            }
            if !thinking_acc.is_empty() {
                content_parts.push(ContentPart::Thinking { thinking: thinking_acc });
            }
            if !text_acc.is_empty() {
                content_parts.push(ContentPart::Text { text: text_acc });
            }
            break;
        }

        if run.is_cancelled() {
            self.finish_run(&run, RunState::Aborted, None, None).await;
            return;
        }
        self.finish_run(&run, RunState::Completed, None, Some(content_parts)).await;
    }

    async fn finish_run(
        &self,
        run: &Run,
        state: RunState,
        error_message: Option<String>,
        content_parts: Option<Vec<ContentPart>>,
    ) {
        if !run.try_finish(state) {
            return;
        }

        match state {
            RunState::Completed => {
                self.emit_agent(
                    run,
                    AgentStream::Lifecycle,
                    serde_json::to_value(&LifecyclePayload::End).unwrap(),
                );
                let text = run.accumulated_text();
                let content = content_parts.unwrap_or_else(|| {
                    if text.is_empty() {
                        Vec::new()
                    } else {
                        vec![ContentPart::Text { text: text.clone() }]
                    }
                });
                self.emit_chat(
                    run,
                    ChatState::Final {
                        text: text.clone(),
                        content: content.clone(),
                        stop_reason: "end_turn".to_string(),
                    },
                );
                self.history.append(
                    &run.session_key,
                    HistoryEntry {
                        role: Role::Assistant,
                        content,
                        timestamp: now_ms(),
                        stop_reason: Some("end_turn".to_string()),
                        model: None,
                        provider: None,
                    },
                );
            }
            RunState::Error => {
                let msg = error_message.unwrap_or_else(|| "run failed".to_string());
                self.emit_agent(
                    run,
                    AgentStream::Lifecycle,
                    serde_json::to_value(&LifecyclePayload::Error { error: msg.clone() }).unwrap(),
                );
                self.emit_chat(run, ChatState::Error { error_message: msg });
            }
            RunState::Aborted => {
                self.emit_agent(
                    run,
                    AgentStream::Lifecycle,
                    serde_json::to_value(&LifecyclePayload::End).unwrap(),
                );
            }
            RunState::Running => unreachable!("try_finish only succeeds for terminal states"),
        }

        let waiters = std::mem::take(&mut *run.waiters.lock().expect("waiters lock poisoned"));
        let result = WaitResult {
            run_id: run.run_id.clone(),
            state,
            text: run.accumulated_text(),
        };
        for tx in waiters {
            let _ = tx.send(result.clone());
        }
    }
}

fn history_to_messages(history: &[HistoryEntry]) -> Vec<AdapterMessage> {
    history
        .iter()
        .map(|entry| {
            let text = entry
                .content
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("");
            match entry.role {
                Role::User => AdapterMessage::user(text),
                Role::Assistant => AdapterMessage::assistant(text),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{McpToolDispatcher, ToolSpec};
    use async_trait::async_trait;

    struct EchoHandler;

    #[async_trait]
    impl AgentHandler for EchoHandler {
        async fn stream(
            &self,
            messages: &[AdapterMessage],
            _tools: &[ToolSpec],
            tx: mpsc::Sender<AdapterChunk>,
        ) -> Result<(), GatewayError> {
            let last = messages.iter().rev().find(|m| m.role == AdapterRole::User);
            let text = last.map(|m| m.content.clone()).unwrap_or_default();
            let _ = tx.send(AdapterChunk::Text(format!("echo: {text}"))).await;
            Ok(())
        }
    }

    fn make_engine(handler: Option<Arc<dyn AgentHandler>>) -> Arc<RunEngine> {
        Arc::new(RunEngine::new(
            Arc::new(HistoryStore::new(None)),
            Arc::new(Bus::new(crate::bus::DEFAULT_OUTBOX_CAPACITY)),
            Arc::new(IdempotencyCache::new(1000, Duration::from_secs(300))),
            handler,
            Arc::new(McpToolDispatcher::new(None)),
        ))
    }

    #[tokio::test]
    async fn submit_rejects_duplicate_idempotency_key() {
        let engine = make_engine(Some(Arc::new(EchoHandler)));
        engine
            .submit("main".into(), "hi".into(), "K".into())
            .expect("first submit should succeed");
        let err = engine
            .submit("main".into(), "hi again".into(), "K".into())
            .expect_err("duplicate should be rejected");
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn submit_rejects_empty_message() {
        let engine = make_engine(Some(Arc::new(EchoHandler)));
        let err = engine.submit("main".into(), "   ".into(), "K".into()).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn run_completes_and_resolves_wait() {
        let engine = make_engine(Some(Arc::new(EchoHandler)));
        let submitted = engine.submit("main".into(), "hi".into(), "K1".into()).unwrap();
        let result = engine.wait(&submitted.run_id, Some(5_000)).await.unwrap();
        assert_eq!(result.state, RunState::Completed);
        assert_eq!(result.text, "echo: hi");
    }

    #[tokio::test]
    async fn wait_on_unknown_run_id_errors() {
        let engine = make_engine(Some(Arc::new(EchoHandler)));
        let err = engine.wait("nope", Some(1_000)).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn abort_without_run_id_targets_most_recent_running_run() {
        struct HangHandler;
        #[async_trait]
        impl AgentHandler for HangHandler {
            async fn stream(
                &self,
                _messages: &[AdapterMessage],
                _tools: &[ToolSpec],
                tx: mpsc::Sender<AdapterChunk>,
            ) -> Result<(), GatewayError> {
                loop {
                    if tx.send(AdapterChunk::Text("x".into())).await.is_err() {
                        return Ok(());
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            }
        }

        let engine = make_engine(Some(Arc::new(HangHandler)));
        let submitted = engine.submit("main".into(), "go".into(), "K".into()).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let abort = engine.abort("main", None).unwrap();
        assert_eq!(abort.run_id, submitted.run_id);
        assert!(abort.aborted);

        let result = engine.wait(&submitted.run_id, Some(5_000)).await.unwrap();
        assert_eq!(result.state, RunState::Aborted);
    }

    #[tokio::test]
    async fn slash_new_clears_history_and_replies_without_calling_backend() {
        let engine = make_engine(Some(Arc::new(EchoHandler)));
        let submitted = engine.submit("main".into(), "/new".into(), "K".into()).unwrap();
        let result = engine.wait(&submitted.run_id, Some(5_000)).await.unwrap();
        assert_eq!(result.state, RunState::Completed);
        assert_eq!(result.text, "Started a new conversation.");
    }
}
