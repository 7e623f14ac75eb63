use futures_util::StreamExt;
use protocol::Frame;

use super::common::{connect_request, recv_frame, send_and_recv, spawn_server_once};

#[tokio::test]
async fn chat_send_streams_deltas_then_final_and_is_recorded_in_history() {
    let (url, server) = spawn_server_once().await;
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut write, mut read) = ws.split();

    let hello = send_and_recv(&mut write, &mut read, &connect_request("1")).await;
    assert!(matches!(hello, Frame::Response { ok: true, .. }));

    let send = Frame::Request {
        id: "2".to_string(),
        method: "chat.send".to_string(),
        params: Some(serde_json::json!({
            "sessionKey": "main",
            "message": "hello there",
            "idempotencyKey": "idem-1",
        })),
    };
    let accepted = send_and_recv(&mut write, &mut read, &send).await;
    let run_id = match accepted {
        Frame::Response { id, ok, payload, .. } => {
            assert_eq!(id, "2");
            assert!(ok);
            payload.unwrap()["runId"].as_str().unwrap().to_string()
        }
        other => panic!("expected Response, got {other:?}"),
    };

    let mut saw_delta = false;
    let mut final_text = None;
    loop {
        match recv_frame(&mut read).await {
            Frame::Event { event, payload, .. } if event == "chat" && payload["runId"] == run_id => {
                match payload["state"].as_str().unwrap() {
                    "delta" => saw_delta = true,
                    "final" => {
                        final_text = Some(payload["text"].as_str().unwrap().to_string());
                        break;
                    }
                    "error" => panic!("run errored: {payload:?}"),
                    other => panic!("unexpected chat state: {other}"),
                }
            }
            _ => continue,
        }
    }
    assert!(saw_delta, "expected at least one chat.delta event");
    assert!(final_text.unwrap().to_lowercase().contains("hello"));

    let history = Frame::Request {
        id: "3".to_string(),
        method: "chat.history".to_string(),
        params: Some(serde_json::json!({"sessionKey": "main"})),
    };
    let reply = send_and_recv(&mut write, &mut read, &history).await;
    match reply {
        Frame::Response { ok, payload, .. } => {
            assert!(ok);
            let entries = payload.unwrap()["entries"].as_array().unwrap().clone();
            assert!(entries.len() >= 2, "expected both the user message and the reply recorded");
        }
        other => panic!("expected Response, got {other:?}"),
    }

    drop(write);
    let _ = server.await;
}
