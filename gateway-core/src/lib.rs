//! # gateway-core
//!
//! The transport-agnostic runtime behind Gateway Protocol v3: session/history storage,
//! the run engine that drives a streamed agent turn through its tool loop, the broadcast
//! bus that fans events out to every authenticated connection, and the method router that
//! ties a decoded [`protocol::Frame::Request`] to one of those.
//!
//! `serve` owns the socket; this crate owns everything behind it. Nothing here touches
//! axum, tokio-tungstenite, or any transport type directly — [`bus::Bus`] expresses
//! "deliver this frame" as a bounded channel plus a close [`tokio::sync::Notify`], and
//! `serve`'s writer task is the only thing that ever looks at a real socket.
//!
//! ## Main modules
//!
//! - [`router`]: [`router::Gateway`] — the method dispatch table (`chat.send`, `chat.abort`,
//!   `sessions.*`, `health`, ...) plus the connect/handshake validation.
//! - [`run`]: [`run::RunEngine`] — creates, tracks, and streams runs; owns the tool loop.
//! - [`bus`]: [`bus::Bus`] — global-sequenced broadcast with per-connection backpressure.
//! - [`history`]: [`history::HistoryStore`] — per-session message log and metadata.
//! - [`presence`]: [`presence::Presence`] — connected-instance roster and state-version vector.
//! - [`idempotency`]: [`idempotency::IdempotencyCache`] — bounded, TTL'd dedupe set.
//! - [`adapter`]: the [`adapter::AgentHandler`]/[`adapter::ToolDispatcher`] contracts concrete
//!   backends (in `cli`) implement.
//! - [`demo`]: [`demo::DemoAdapter`] — the keyword-matching fallback backend.
//! - [`logging`]: [`logging::HistoryLogger`] — optional JSONL transcript logging.
//! - [`periodic`]: background tick/health/dedupe-sweep tasks.
//! - [`config`]: [`config::GatewayConfig`] — the `GATEWAY_*` environment surface.
//! - [`error`]: [`error::GatewayError`] and its mapping onto the wire error taxonomy.

pub mod adapter;
pub mod bus;
pub mod config;
pub mod demo;
pub mod error;
pub mod history;
pub mod idempotency;
pub mod logging;
pub mod periodic;
pub mod presence;
pub mod router;
pub mod run;

pub use adapter::{
    AdapterChunk, AdapterMessage, AdapterRole, AgentHandler, McpClient, McpToolDispatcher,
    ToolCallRequest, ToolDispatcher, ToolSpec,
};
pub use bus::{Bus, Outbox, DEFAULT_OUTBOX_CAPACITY};
pub use config::GatewayConfig;
pub use demo::DemoAdapter;
pub use error::GatewayError;
pub use history::{HistoryStore, SessionMeta, SessionSummary};
pub use idempotency::IdempotencyCache;
pub use logging::{HistoryLogger, JsonlHistoryLogger, NoOpHistoryLogger};
pub use presence::Presence;
pub use router::Gateway;
pub use run::{AbortResult, Run, RunEngine, RunState, RunSubmitted, WaitResult};
