//! WebSocket connection lifecycle (design §4.3, §9): handshake, then a reader loop
//! dispatching requests into [`gateway_core::Gateway`], paired with a writer task that
//! drains the connection's bus outbox. The two run concurrently so a broadcast event or a
//! `chat.abort` response can reach the client while a `chat.send` run is still streaming.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use protocol::{Frame, FrameDecodeError};
use tokio::sync::oneshot;
use uuid::Uuid;

use super::app::AppState;

/// `(close code, reason)` sent to the client on [`Message::Close`] before the socket drops.
/// Codes follow design §6: 1008 handshake failure/slow consumer, 1009 oversized payload,
/// 1012 server shutdown.
type CloseReason = (u16, String);

/// Outcome of reading and validating the first frame (design §4.3).
enum HandshakeOutcome {
    /// Authenticated; the reader loop should continue.
    Continue,
    /// Stop here. `Some` carries the close code to send; `None` means the peer is already
    /// gone (nothing to send to).
    Closed(Option<CloseReason>),
}

pub(crate) async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = format!("conn-{}", Uuid::new_v4());
    let (mut sink, mut stream) = socket.split();
    let mut outbox = state.gateway.bus.register(conn_id.clone());
    let (close_tx, mut close_rx) = oneshot::channel::<CloseReason>();

    let writer_conn_id = conn_id.clone();
    let writer = tokio::spawn(async move {
        let close_reason = loop {
            tokio::select! {
                frame = outbox.rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if sink.send(Message::Text(frame.encode())).await.is_err() {
                                break None;
                            }
                        }
                        None if outbox.shutting_down.load(std::sync::atomic::Ordering::SeqCst) => {
                            break Some((1012_u16, "server restart".to_string()));
                        }
                        None => break None,
                    }
                }
                _ = outbox.close.notified() => {
                    tracing::debug!(conn_id = %writer_conn_id, "writer closing on close signal");
                    break Some((1008_u16, "slow consumer".to_string()));
                }
                reason = &mut close_rx => {
                    break reason.ok();
                }
            }
        };
        if let Some((code, reason)) = close_reason {
            let _ = sink
                .send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
                .await;
        }
        let _ = sink.close().await;
    });

    let close_reason = match perform_handshake(&conn_id, &state, &mut stream).await {
        HandshakeOutcome::Continue => read_loop(&conn_id, &state, &mut stream).await,
        HandshakeOutcome::Closed(reason) => reason,
    };
    if let Some(reason) = close_reason {
        let _ = close_tx.send(reason);
    }

    state.gateway.bus.unregister(&conn_id);
    state.gateway.on_disconnect(&conn_id);
    let _ = tokio::time::timeout(Duration::from_secs(2), writer).await;

    if let Ok(mut guard) = state.once_shutdown.lock() {
        if let Some(tx) = guard.take() {
            let _ = tx.send(());
        }
    }
}

/// Reads the first frame and requires it to be a `connect` request (design §4.3). Returns
/// [`HandshakeOutcome::Continue`] if the connection is now authenticated and the reader
/// loop should continue.
async fn perform_handshake(
    conn_id: &str,
    state: &Arc<AppState>,
    stream: &mut SplitStream<WebSocket>,
) -> HandshakeOutcome {
    let timeout = Duration::from_millis(state.gateway.config.handshake_timeout_ms);
    let first = tokio::time::timeout(timeout, stream.next()).await;

    let Ok(Some(Ok(msg))) = first else {
        tracing::debug!(conn_id, "handshake timed out or socket closed before connect");
        return HandshakeOutcome::Closed(Some((1008, "handshake timed out".to_string())));
    };
    let Some(text) = as_text(&msg) else {
        return HandshakeOutcome::Closed(None);
    };

    let frame = match protocol::frame::decode(&text, state.gateway.config.max_payload) {
        Ok(frame) => frame,
        Err(FrameDecodeError::Oversized { limit, actual }) => {
            tracing::warn!(conn_id, limit, actual, "oversized handshake frame, closing");
            state.gateway.bus.send(
                conn_id,
                Frame::response_err(
                    "",
                    gateway_core::GatewayError::invalid_request("frame exceeds payload limit").to_payload(),
                ),
            );
            return HandshakeOutcome::Closed(Some((1009, "payload too large".to_string())));
        }
        Err(FrameDecodeError::Malformed(e)) => {
            tracing::debug!(conn_id, error = %e, "malformed handshake frame");
            return HandshakeOutcome::Closed(Some((1008, "first frame must be connect".to_string())));
        }
    };

    let Frame::Request { id, method, params } = frame else {
        tracing::debug!(conn_id, "first frame was not a request");
        return HandshakeOutcome::Closed(Some((1008, "first frame must be connect".to_string())));
    };
    if method != "connect" {
        state.gateway.bus.send(
            conn_id,
            Frame::response_err(
                id,
                gateway_core::GatewayError::invalid_request("first frame must be connect").to_payload(),
            ),
        );
        return HandshakeOutcome::Closed(Some((1008, "first frame must be connect".to_string())));
    }

    match state.gateway.connect(conn_id, params) {
        Ok(snapshot) => {
            let payload = serde_json::to_value(&snapshot).unwrap_or(serde_json::json!({}));
            state.gateway.bus.send(conn_id, Frame::response_ok(id, payload));
            HandshakeOutcome::Continue
        }
        Err(e) => {
            let reason = e.to_payload().message;
            state.gateway.bus.send(conn_id, Frame::response_err(id, e.to_payload()));
            HandshakeOutcome::Closed(Some((1008, reason)))
        }
    }
}

/// Returns the close code/reason to send (oversized frames only); a normal disconnect
/// (client-sent close, read error, or socket EOF) returns `None`.
async fn read_loop(
    conn_id: &str,
    state: &Arc<AppState>,
    stream: &mut SplitStream<WebSocket>,
) -> Option<CloseReason> {
    while let Some(res) = stream.next().await {
        let msg = match res {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(conn_id, error = %e, "read error, closing");
                return None;
            }
        };
        if matches!(msg, Message::Close(_)) {
            return None;
        }
        let Some(text) = as_text(&msg) else {
            continue;
        };

        match protocol::frame::decode(&text, state.gateway.config.max_payload) {
            Ok(Frame::Request { id, method, params }) => {
                let result = state.gateway.dispatch(conn_id, &method, params).await;
                let reply = match result {
                    Ok(payload) => Frame::response_ok(id, payload),
                    Err(e) => Frame::response_err(id, e.to_payload()),
                };
                state.gateway.bus.send(conn_id, reply);
            }
            Ok(_) => {
                // Clients only ever send `request` frames; anything else is ignored.
            }
            Err(FrameDecodeError::Oversized { limit, actual }) => {
                tracing::warn!(conn_id, limit, actual, "oversized frame, closing connection");
                state.gateway.bus.send(
                    conn_id,
                    Frame::response_err(
                        "",
                        gateway_core::GatewayError::invalid_request("frame exceeds payload limit").to_payload(),
                    ),
                );
                return Some((1009, "payload too large".to_string()));
            }
            Err(FrameDecodeError::Malformed(e)) => {
                state.gateway.bus.send(
                    conn_id,
                    Frame::response_err(
                        "",
                        gateway_core::GatewayError::invalid_request(format!("malformed frame: {e}")).to_payload(),
                    ),
                );
            }
        }
    }
    None
}

fn as_text(msg: &Message) -> Option<String> {
    match msg {
        Message::Text(t) => Some(t.clone()),
        Message::Binary(b) => Some(String::from_utf8_lossy(b).into_owned()),
        _ => None,
    }
}
