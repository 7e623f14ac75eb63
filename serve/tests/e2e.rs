//! End-to-end tests: a real server on a real socket, driven with `tokio-tungstenite`.

mod e2e {
    pub mod common;
    mod chat_round_trip;
    mod handshake;
    mod invalid_frame;
}
