use futures_util::StreamExt;
use protocol::Frame;

use super::common::{connect_request, send_and_recv, spawn_server_once};

#[tokio::test]
async fn connect_returns_hello_ok_snapshot() {
    let (url, server) = spawn_server_once().await;
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut write, mut read) = ws.split();

    let reply = send_and_recv(&mut write, &mut read, &connect_request("1")).await;
    match reply {
        Frame::Response { id, ok, payload, .. } => {
            assert_eq!(id, "1");
            assert!(ok);
            let payload = payload.unwrap();
            assert_eq!(payload["type"], "hello-ok");
            assert_eq!(payload["protocol"], protocol::PROTOCOL_VERSION);
            assert!(payload["server"]["connId"].is_string());
        }
        other => panic!("expected Response, got {other:?}"),
    }

    drop(write);
    let _ = server.await;
}

#[tokio::test]
async fn non_connect_first_frame_closes_without_reply() {
    let (url, server) = spawn_server_once().await;
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut write, mut read) = ws.split();

    let bogus = Frame::Request {
        id: "1".to_string(),
        method: "chat.history".to_string(),
        params: Some(serde_json::json!({"sessionKey": "main"})),
    };
    use futures_util::SinkExt;
    write
        .send(tokio_tungstenite::tungstenite::Message::Text(bogus.encode()))
        .await
        .unwrap();

    let next = read.next().await;
    let closed = match next {
        None => true,
        Some(Err(_)) => true,
        Some(Ok(m)) => m.is_close(),
    };
    assert!(closed, "expected the connection to close after a non-connect first frame");

    let _ = server.await;
}
