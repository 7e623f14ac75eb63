//! Gateway Protocol v3: the wire-level types shared by `gateway-core` and `serve`.
//!
//! This crate is transport-agnostic — it has no axum/tokio dependency. It owns:
//! the `Frame` envelope (§3 of the design), the error taxonomy (§7), the `agent`/`chat`
//! event payloads emitted by a run (§4.6/§4.7), and the `hello-ok` handshake snapshot (§6).

pub mod error;
pub mod event;
pub mod frame;
pub mod handshake;

pub use error::{ErrorCode, ErrorPayload};
pub use event::{
    AgentEvent, AgentStream, ChatEvent, ChatState, ContentPart, HistoryEntry, LifecyclePayload,
    PresenceEntry, Role, StateVersion, TokenPayload, ToolCallStatus, ToolPayload,
};
pub use frame::{Frame, FrameDecodeError, PROTOCOL_VERSION};
pub use handshake::{AuthMode, Features, HandshakeSnapshot, Policy, ServerInfo, SessionDefaults};
