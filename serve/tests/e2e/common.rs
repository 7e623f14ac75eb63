//! Shared helpers for e2e tests. Received frames are logged with `[e2e] received: ...`.
//! Run with `--nocapture` to see them.

use futures_util::{SinkExt, StreamExt};
use protocol::Frame;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

/// Binds to a random port and spawns the server in once mode (demo backend). Returns
/// (ws_url, server_handle).
pub async fn spawn_server_once() -> (
    String,
    tokio::task::JoinHandle<Result<(), Box<dyn std::error::Error + Send + Sync>>>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("ws://{}", addr);
    let server_handle = tokio::spawn(serve::run_serve_on_listener(listener, true, None));
    (url, server_handle)
}

pub fn connect_request(id: &str) -> Frame {
    Frame::Request {
        id: id.to_string(),
        method: "connect".to_string(),
        params: Some(serde_json::json!({
            "minProtocol": protocol::PROTOCOL_VERSION,
            "maxProtocol": protocol::PROTOCOL_VERSION,
            "client": {"id": "e2e-test", "version": "0.1.0", "platform": "test"},
        })),
    }
}

/// Sends a request frame and reads back the next frame, with a 10s timeout.
pub async fn send_and_recv<W, R>(write: &mut W, read: &mut R, frame: &Frame) -> Frame
where
    W: SinkExt<Message> + Unpin,
    W::Error: std::fmt::Debug,
    R: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    write.send(Message::Text(frame.encode())).await.unwrap();
    recv_frame(read).await
}

/// Reads the next text frame off the socket, decoding it as a [`Frame`].
pub async fn recv_frame<R>(read: &mut R) -> Frame
where
    R: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let msg = timeout(Duration::from_secs(10), read.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("socket closed before a frame arrived")
        .expect("websocket read error");
    let text = msg.to_text().expect("expected a text frame");
    eprintln!("[e2e] received: {}", text);
    serde_json::from_str(text).expect("frame did not decode")
}
