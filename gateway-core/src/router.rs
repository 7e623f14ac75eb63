//! Method router (design §4.2) and the connect/handshake logic it sits behind (design
//! §4.3). [`Gateway`] is the transport-agnostic facade `serve` drives: one call per
//! inbound frame, after the connection-level handshake state machine has admitted it.

use std::sync::Arc;
use std::time::Instant;

use protocol::{
    AuthMode, ContentPart, Features, HandshakeSnapshot, HistoryEntry, Policy, PresenceEntry, Role,
    ServerInfo, SessionDefaults, Snapshot,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::bus::Bus;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::history::HistoryStore;
use crate::idempotency::IdempotencyCache;
use crate::presence::Presence;
use crate::run::{RunEngine, RunState};

/// Real methods the router dispatches (design §4.2). Everything else in
/// [`STUB_METHODS`] is registered only so `features.methods` is accurate.
pub const REAL_METHODS: &[&str] = &[
    "connect",
    "chat.send",
    "chat.abort",
    "chat.history",
    "chat.inject",
    "chat.subscribe",
    "agent",
    "agent.wait",
    "sessions.list",
    "sessions.patch",
    "sessions.reset",
    "sessions.delete",
    "send",
    "health",
    "status",
    "system-presence",
    "logs.tail",
    "models.list",
    "config.get",
];

/// The >80% of the protocol surface that exists only as a documented stub (design §1,
/// §4.2). Each one returns `{stub:true, todo:"<tag>"}` and never touches core state.
pub const STUB_METHODS: &[&str] = &[
    "cron.list",
    "cron.create",
    "cron.delete",
    "devices.list",
    "devices.pair",
    "devices.unpair",
    "nodes.list",
    "nodes.register",
    "approvals.list",
    "approvals.respond",
    "tts.speak",
    "tts.voices",
    "wizard.start",
    "wizard.step",
    "memory.search",
    "memory.forget",
    "workspace.list",
    "workspace.open",
    "notifications.list",
    "notifications.ack",
];

pub const KNOWN_EVENTS: &[&str] = &[
    "hello",
    "connect.challenge",
    "presence",
    "tick",
    "health",
    "shutdown",
    "agent",
    "chat",
];

pub fn all_methods() -> Vec<String> {
    REAL_METHODS
        .iter()
        .chain(STUB_METHODS.iter())
        .map(|m| m.to_string())
        .collect()
}

fn is_known_method(method: &str) -> bool {
    REAL_METHODS.contains(&method) || STUB_METHODS.contains(&method)
}

#[derive(Debug, Deserialize)]
struct ClientDescriptor {
    id: String,
    version: String,
    #[serde(default)]
    platform: String,
    #[serde(default)]
    mode: String,
    #[serde(default, rename = "displayName")]
    display_name: Option<String>,
    #[serde(default, rename = "deviceFamily")]
    device_family: Option<String>,
    #[serde(default, rename = "modelIdentifier")]
    model_identifier: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthParams {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(rename = "minProtocol")]
    min_protocol: u32,
    #[serde(rename = "maxProtocol")]
    max_protocol: u32,
    client: ClientDescriptor,
    #[serde(default)]
    auth: Option<AuthParams>,
    #[serde(default)]
    roles: Option<Vec<String>>,
    #[serde(default)]
    scopes: Option<Vec<String>>,
}

pub struct Gateway {
    pub history: Arc<HistoryStore>,
    pub bus: Arc<Bus>,
    pub presence: Arc<Presence>,
    pub idempotency: Arc<IdempotencyCache>,
    pub runs: Arc<RunEngine>,
    pub config: GatewayConfig,
    started_at: Instant,
}

impl Gateway {
    pub fn new(
        history: Arc<HistoryStore>,
        bus: Arc<Bus>,
        presence: Arc<Presence>,
        idempotency: Arc<IdempotencyCache>,
        runs: Arc<RunEngine>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            history,
            bus,
            presence,
            idempotency,
            runs,
            config,
            started_at: Instant::now(),
        }
    }

    fn auth_mode(&self) -> AuthMode {
        if self.config.auth_token.is_some() {
            AuthMode::Token
        } else if self.config.auth_password.is_some() {
            AuthMode::Password
        } else {
            AuthMode::None
        }
    }

    /// Validates a `connect` request (design §4.3 steps 2-5) and, on success, registers
    /// presence + marks the connection authenticated on the bus. Returns the `hello-ok`
    /// snapshot to reply with.
    pub fn connect(&self, conn_id: &str, params: Option<Value>) -> Result<HandshakeSnapshot, GatewayError> {
        let params: ConnectParams = match params {
            Some(v) => serde_json::from_value(v)
                .map_err(|e| GatewayError::invalid_request(format!("invalid connect params: {e}")))?,
            None => return Err(GatewayError::invalid_request("connect requires params")),
        };

        if params.client.id.trim().is_empty() || params.client.version.trim().is_empty() {
            return Err(GatewayError::invalid_request("client.id and client.version are required"));
        }
        if !(params.min_protocol <= protocol::PROTOCOL_VERSION && protocol::PROTOCOL_VERSION <= params.max_protocol) {
            return Err(GatewayError::invalid_request(format!(
                "protocol mismatch: server supports {}, client range [{}, {}]",
                protocol::PROTOCOL_VERSION,
                params.min_protocol,
                params.max_protocol
            )));
        }

        match (&self.config.auth_token, &self.config.auth_password) {
            (Some(expected), _) => {
                let provided = params.auth.as_ref().and_then(|a| a.token.as_deref());
                if provided != Some(expected.as_str()) {
                    return Err(GatewayError::invalid_request("authentication failed"));
                }
            }
            (None, Some(expected)) => {
                let provided = params.auth.as_ref().and_then(|a| a.password.as_deref());
                if provided != Some(expected.as_str()) {
                    return Err(GatewayError::invalid_request("authentication failed"));
                }
            }
            (None, None) => {}
        }

        let now = chrono::Utc::now().timestamp_millis();
        self.presence.add(PresenceEntry {
            instance_id: conn_id.to_string(),
            host: params.client.display_name.clone().unwrap_or_else(|| params.client.id.clone()),
            version: params.client.version.clone(),
            platform: params.client.platform.clone(),
            mode: params.client.mode.clone(),
            ts: now,
            reason: "connect".to_string(),
            roles: params.roles.clone(),
            scopes: params.scopes.clone(),
        });
        self.bus.mark_authenticated(conn_id);

        let state_version = self.presence.state_version();
        self.bus.broadcast(
            "presence",
            json!({ "entries": self.presence.list() }),
            Some(state_version),
            true,
        );

        Ok(HandshakeSnapshot {
            kind: "hello-ok",
            protocol: protocol::PROTOCOL_VERSION,
            server: ServerInfo {
                version: env!("CARGO_PKG_VERSION").to_string(),
                conn_id: conn_id.to_string(),
            },
            features: Features {
                methods: all_methods(),
                events: KNOWN_EVENTS.iter().map(|e| e.to_string()).collect(),
            },
            snapshot: Snapshot {
                presence: self.presence.list(),
                health: json!({}),
                state_version,
                uptime_ms: self.started_at.elapsed().as_millis() as u64,
                auth_mode: self.auth_mode(),
                session_defaults: SessionDefaults {
                    main_session_key: "main".to_string(),
                },
            },
            policy: Policy {
                max_payload: self.config.max_payload,
                max_buffered_bytes: 50 * 1024 * 1024,
                tick_interval_ms: self.config.tick_interval_ms,
            },
        })
    }

    /// Removes presence for a disconnecting connection and broadcasts the update
    /// (design §4.3 step 7).
    pub fn on_disconnect(&self, conn_id: &str) {
        self.bus.unregister(conn_id);
        let version = self.presence.remove(conn_id);
        self.bus.broadcast(
            "presence",
            json!({ "entries": self.presence.list() }),
            Some(protocol::StateVersion { presence: version, health: self.presence.state_version().health }),
            true,
        );
    }

    /// Dispatches one authenticated request. Returns the `payload` for a successful
    /// `response` frame, or an error the caller turns into a failed `response` frame.
    pub async fn dispatch(&self, conn_id: &str, method: &str, params: Option<Value>) -> Result<Value, GatewayError> {
        if !is_known_method(method) {
            return Err(GatewayError::invalid_request(format!("unknown method: {method}")));
        }
        if STUB_METHODS.contains(&method) {
            return Ok(json!({ "stub": true, "todo": method }));
        }

        match method {
            "chat.send" => self.chat_send(params, "chat.send requires sessionKey", None).await,
            "agent" => self.chat_send(params, "agent requires message", Some("default")).await,
            "chat.abort" => self.chat_abort(params),
            "chat.history" => self.chat_history(params),
            "chat.inject" => self.chat_inject(params),
            "chat.subscribe" => Ok(json!({ "subscribed": true })),
            "agent.wait" => self.agent_wait(params).await,
            "sessions.list" => Ok(json!({ "sessions": self.history.list() })),
            "sessions.patch" => self.sessions_patch(params),
            "sessions.reset" => self.sessions_reset(params),
            "sessions.delete" => self.sessions_delete(params),
            "send" => self.send_stub(params),
            "health" => Ok(self.health_payload()),
            "status" => Ok(self.status_payload()),
            "system-presence" => Ok(json!({ "entries": self.presence.list() })),
            "logs.tail" => Ok(json!({ "lines": [] })),
            "models.list" => Ok(json!({ "models": ["default"] })),
            "config.get" => Ok(self.config.public_view()),
            other => Err(GatewayError::invalid_request(format!("unknown method: {other}"))),
        }
    }

    async fn chat_send(
        &self,
        params: Option<Value>,
        missing_message: &'static str,
        default_session_key: Option<&str>,
    ) -> Result<Value, GatewayError> {
        let params = params.ok_or_else(|| GatewayError::invalid_request(missing_message))?;
        let session_key = params
            .get("sessionKey")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| default_session_key.map(str::to_string))
            .ok_or_else(|| GatewayError::invalid_request("sessionKey is required"))?;
        let message = params
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GatewayError::invalid_request("message is required"))?;
        let idempotency_key = params
            .get("idempotencyKey")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GatewayError::invalid_request("idempotencyKey is required"))?;

        let submitted = self.runs.submit(session_key, message, idempotency_key)?;
        Ok(json!({ "runId": submitted.run_id, "sessionKey": submitted.session_key }))
    }

    fn chat_abort(&self, params: Option<Value>) -> Result<Value, GatewayError> {
        let params = params.ok_or_else(|| GatewayError::invalid_request("chat.abort requires sessionKey"))?;
        let session_key = params
            .get("sessionKey")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::invalid_request("sessionKey is required"))?;
        let run_id = params.get("runId").and_then(Value::as_str);
        let result = self.runs.abort(session_key, run_id)?;
        Ok(json!({ "runId": result.run_id, "aborted": result.aborted }))
    }

    fn chat_history(&self, params: Option<Value>) -> Result<Value, GatewayError> {
        let params = params.ok_or_else(|| GatewayError::invalid_request("chat.history requires sessionKey"))?;
        let session_key = params
            .get("sessionKey")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::invalid_request("sessionKey is required"))?;
        let limit = params.get("limit").and_then(Value::as_u64).map(|n| n as usize);
        let entries = self.history.get(session_key, limit);
        Ok(json!({ "sessionKey": session_key, "entries": entries }))
    }

    fn chat_inject(&self, params: Option<Value>) -> Result<Value, GatewayError> {
        let params = params.ok_or_else(|| GatewayError::invalid_request("chat.inject requires sessionKey"))?;
        let session_key = params
            .get("sessionKey")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::invalid_request("sessionKey is required"))?;
        let text = params
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::invalid_request("text is required"))?;
        let role = match params.get("role").and_then(Value::as_str) {
            Some("assistant") => Role::Assistant,
            _ => Role::User,
        };
        self.history.append(
            session_key,
            HistoryEntry {
                role,
                content: vec![ContentPart::Text { text: text.to_string() }],
                timestamp: chrono::Utc::now().timestamp_millis(),
                stop_reason: None,
                model: None,
                provider: None,
            },
        );
        Ok(json!({ "injected": true }))
    }

    async fn agent_wait(&self, params: Option<Value>) -> Result<Value, GatewayError> {
        let params = params.ok_or_else(|| GatewayError::invalid_request("agent.wait requires runId"))?;
        let run_id = params
            .get("runId")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::invalid_request("runId is required"))?;
        let timeout_ms = params.get("timeoutMs").and_then(Value::as_u64);
        let result = self.runs.wait(run_id, timeout_ms).await?;
        Ok(json!({
            "runId": result.run_id,
            "state": run_state_str(result.state),
            "text": result.text,
        }))
    }

    fn sessions_patch(&self, params: Option<Value>) -> Result<Value, GatewayError> {
        let params = params.ok_or_else(|| GatewayError::invalid_request("sessions.patch requires key"))?;
        let key = params
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::invalid_request("key is required"))?;
        let label = params.get("label").and_then(Value::as_str).map(str::to_string);
        self.history.patch(key, label)?;
        Ok(json!({ "patched": true }))
    }

    fn sessions_reset(&self, params: Option<Value>) -> Result<Value, GatewayError> {
        let key = required_key(&params)?;
        self.history.reset(key);
        Ok(json!({ "reset": true }))
    }

    fn sessions_delete(&self, params: Option<Value>) -> Result<Value, GatewayError> {
        let key = required_key(&params)?;
        self.history.delete(key);
        Ok(json!({ "deleted": true }))
    }

    /// `send` (design §9 Open Questions): validates idempotency and replies
    /// `{sent:true}`; performs no actual outbound routing. Intentional stub behavior.
    fn send_stub(&self, params: Option<Value>) -> Result<Value, GatewayError> {
        let params = params.ok_or_else(|| GatewayError::invalid_request("send requires idempotencyKey"))?;
        let idempotency_key = params
            .get("idempotencyKey")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::invalid_request("idempotencyKey is required"))?;
        if self.idempotency.is_duplicate(idempotency_key) {
            return Err(GatewayError::invalid_request("Duplicate idempotency key"));
        }
        self.idempotency.record(idempotency_key);
        Ok(json!({ "sent": true }))
    }

    fn health_payload(&self) -> Value {
        json!({
            "uptimeMs": self.started_at.elapsed().as_millis() as u64,
            "connections": self.bus.authenticated_count(),
            "runs": self.runs.run_count(),
        })
    }

    fn status_payload(&self) -> Value {
        json!({
            "uptimeMs": self.started_at.elapsed().as_millis() as u64,
            "connections": self.bus.authenticated_count(),
            "runs": self.runs.run_count(),
            "dedupeKeys": self.idempotency_len_hint(),
        })
    }

    fn idempotency_len_hint(&self) -> &'static str {
        // Exact occupancy isn't exposed by `IdempotencyCache` (bounded, not worth a
        // dedicated counter); `status` reports the configured ceiling instead.
        "bounded"
    }
}

fn required_key(params: &Option<Value>) -> Result<&str, GatewayError> {
    params
        .as_ref()
        .and_then(|p| p.get("key"))
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::invalid_request("key is required"))
}

fn run_state_str(state: RunState) -> &'static str {
    match state {
        RunState::Running => "running",
        RunState::Completed => "completed",
        RunState::Error => "error",
        RunState::Aborted => "aborted",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::McpToolDispatcher;
    use std::time::Duration;

    fn make_gateway() -> Gateway {
        let history = Arc::new(HistoryStore::new(None));
        let bus = Arc::new(Bus::new(crate::bus::DEFAULT_OUTBOX_CAPACITY));
        let presence = Arc::new(Presence::new());
        let idempotency = Arc::new(IdempotencyCache::new(1000, Duration::from_secs(300)));
        let runs = Arc::new(RunEngine::new(
            history.clone(),
            bus.clone(),
            idempotency.clone(),
            None,
            Arc::new(McpToolDispatcher::new(None)),
        ));
        Gateway::new(history, bus, presence, idempotency, runs, GatewayConfig::default())
    }

    #[test]
    fn all_methods_includes_every_real_method() {
        let methods = all_methods();
        for m in REAL_METHODS {
            assert!(methods.contains(&m.to_string()));
        }
    }

    #[test]
    fn connect_rejects_protocol_mismatch() {
        let gw = make_gateway();
        let err = gw
            .connect(
                "c1",
                Some(json!({
                    "minProtocol": 99, "maxProtocol": 99,
                    "client": {"id": "t", "version": "1", "platform": "t", "mode": "operator"}
                })),
            )
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.to_lowercase().contains("protocol"));
    }

    #[test]
    fn connect_happy_path_returns_hello_ok_with_chat_send_method() {
        let gw = make_gateway();
        let snapshot = gw
            .connect(
                "c1",
                Some(json!({
                    "minProtocol": 3, "maxProtocol": 3,
                    "client": {"id": "t", "version": "1", "platform": "t", "mode": "operator"}
                })),
            )
            .unwrap();
        assert_eq!(snapshot.kind, "hello-ok");
        assert!(snapshot.features.methods.iter().any(|m| m == "chat.send"));
        assert_eq!(snapshot.snapshot.presence.len(), 1);
    }

    #[test]
    fn connect_with_wrong_token_fails() {
        let mut gw = make_gateway();
        gw.config.auth_token = Some("secret".to_string());
        let err = gw
            .connect(
                "c1",
                Some(json!({
                    "minProtocol": 3, "maxProtocol": 3,
                    "client": {"id": "t", "version": "1", "platform": "t", "mode": "operator"},
                    "auth": {"token": "wrong"}
                })),
            )
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn dispatch_unknown_method_is_invalid_request() {
        let gw = make_gateway();
        let err = gw.dispatch("c1", "totally.bogus", None).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn dispatch_stub_method_returns_stub_payload() {
        let gw = make_gateway();
        let payload = gw.dispatch("c1", "cron.list", None).await.unwrap();
        assert_eq!(payload["stub"], true);
        assert_eq!(payload["todo"], "cron.list");
    }

    #[tokio::test]
    async fn dispatch_chat_send_then_history_round_trips() {
        let gw = make_gateway();
        let reply = gw
            .dispatch(
                "c1",
                "chat.send",
                Some(json!({"sessionKey": "main", "message": "hi", "idempotencyKey": "k1"})),
            )
            .await
            .unwrap();
        assert!(reply["runId"].is_string());

        let history = gw
            .dispatch("c1", "chat.history", Some(json!({"sessionKey": "main"})))
            .await
            .unwrap();
        assert_eq!(history["entries"].as_array().unwrap().len(), 1);
    }
}
