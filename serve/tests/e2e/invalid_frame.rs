use futures_util::{SinkExt, StreamExt};
use protocol::Frame;
use tokio_tungstenite::tungstenite::Message;

use super::common::{connect_request, recv_frame, send_and_recv, spawn_server_once};

#[tokio::test]
async fn malformed_json_gets_invalid_request_response_without_closing() {
    let (url, server) = spawn_server_once().await;
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut write, mut read) = ws.split();

    let hello = send_and_recv(&mut write, &mut read, &connect_request("1")).await;
    assert!(matches!(hello, Frame::Response { ok: true, .. }));

    write.send(Message::Text("{ this is not json".to_string())).await.unwrap();
    let reply = recv_frame(&mut read).await;
    match reply {
        Frame::Response { id, ok, error, .. } => {
            assert_eq!(id, "");
            assert!(!ok);
            assert_eq!(error.unwrap().code, protocol::ErrorCode::InvalidRequest);
        }
        other => panic!("expected Response, got {other:?}"),
    }

    // Connection must still be open: a follow-up well-formed request still gets answered.
    let history = Frame::Request {
        id: "2".to_string(),
        method: "chat.history".to_string(),
        params: Some(serde_json::json!({"sessionKey": "main"})),
    };
    let reply = send_and_recv(&mut write, &mut read, &history).await;
    assert!(matches!(reply, Frame::Response { ok: true, .. }));

    drop(write);
    let _ = server.await;
}

#[tokio::test]
async fn oversized_frame_closes_the_connection() {
    let (url, server) = spawn_server_once().await;
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut write, mut read) = ws.split();

    let hello = send_and_recv(&mut write, &mut read, &connect_request("1")).await;
    assert!(matches!(hello, Frame::Response { ok: true, .. }));

    let huge_message = "x".repeat(26 * 1024 * 1024);
    let oversized = Frame::Request {
        id: "2".to_string(),
        method: "chat.send".to_string(),
        params: Some(serde_json::json!({
            "sessionKey": "main",
            "message": huge_message,
            "idempotencyKey": "idem-huge",
        })),
    };
    write.send(Message::Text(oversized.encode())).await.unwrap();

    let next = read.next().await;
    let closed = match next {
        None => true,
        Some(Err(_)) => true,
        Some(Ok(m)) => m.is_close(),
    };
    assert!(closed, "expected the connection to close after an oversized frame");

    let _ = server.await;
}
