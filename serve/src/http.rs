//! HTTP completions surface (design §4.9): an OpenAI-shaped `/v1/chat/completions` backed
//! by the same run engine the WebSocket path uses, plus stub routes for the paths the
//! design calls out as not-yet-implemented. Anything else falls through to 426 so a
//! WebSocket upgrade attempt on the same path still works.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use protocol::{ContentPart, HistoryEntry, Role};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app::AppState;

pub(crate) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/responses", post(stub))
        .route("/hooks/wake", post(stub))
        .route("/hooks/agent", post(stub))
        .route("/tools/invoke", post(stub))
        .fallback(upgrade_required)
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsRequest {
    messages: Vec<ChatMessage>,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ChatCompletionsRequest>,
) -> Response {
    if let Some(expected) = &state.gateway.config.auth_token {
        match bearer_token(&headers) {
            Some(got) if &got == expected => {}
            _ => return (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid bearer token"}))).into_response(),
        }
    }

    let session_key = body.user.clone().unwrap_or_else(|| "http-default".to_string());
    let model = body.model.clone().unwrap_or_else(|| "gateway-default".to_string());

    let mut prompt = None;
    for msg in &body.messages {
        match msg.role.as_str() {
            "system" | "developer" => {
                state.gateway.history.append(
                    &session_key,
                    HistoryEntry {
                        role: Role::User,
                        content: vec![ContentPart::Text {
                            text: format!("[System] {}", msg.content),
                        }],
                        timestamp: chrono::Utc::now().timestamp_millis(),
                        stop_reason: None,
                        model: None,
                        provider: None,
                    },
                );
            }
            "user" => prompt = Some(msg.content.clone()),
            _ => {}
        }
    }

    let Some(prompt) = prompt else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "no user message in messages"}))).into_response();
    };

    let submitted = match state
        .gateway
        .runs
        .submit(session_key, prompt, Uuid::new_v4().to_string())
    {
        Ok(s) => s,
        Err(e) => return bad_request(e.to_string()),
    };

    let result = match state.gateway.runs.wait(&submitted.run_id, None).await {
        Ok(r) => r,
        Err(e) => return bad_request(e.to_string()),
    };

    let id = format!("chatcmpl_{}", &Uuid::new_v4().to_string()[..12]);
    if body.stream {
        sse_response(&id, &model, &result.text)
    } else {
        Json(json!({
            "id": id,
            "object": "chat.completion",
            "model": model,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": result.text},
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0},
        }))
        .into_response()
    }
}

/// Three `data:` chunks (role, content, finish) then `data: [DONE]` — the minimum the
/// design requires; a real streaming backend may forward per-token chunks instead.
fn sse_response(id: &str, model: &str, text: &str) -> Response {
    let chunk = |delta: Value, finish_reason: Option<&str>| {
        json!({
            "id": id,
            "object": "chat.completion.chunk",
            "model": model,
            "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}],
        })
    };
    let role_chunk = chunk(json!({"role": "assistant"}), None);
    let content_chunk = chunk(json!({"content": text}), None);
    let finish_chunk = chunk(json!({}), Some("stop"));

    let body = format!(
        "data: {}\n\ndata: {}\n\ndata: {}\n\ndata: [DONE]\n\n",
        role_chunk, content_chunk, finish_chunk
    );

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .body(body.into())
        .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "stream build failed").into_response())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("authorization")?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::to_string)
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}

async fn stub() -> Response {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(json!({"ok": false, "error": {"message": "#TODO not implemented"}})),
    )
        .into_response()
}

async fn upgrade_required() -> Response {
    StatusCode::UPGRADE_REQUIRED.into_response()
}
