//! Axum app: state, router, and WebSocket upgrade handler.

use std::sync::{Arc, Mutex};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use gateway_core::Gateway;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::connection::handle_socket;
use super::http;

/// Shared state for every connection and HTTP request this process serves.
pub(crate) struct AppState {
    pub(crate) gateway: Arc<Gateway>,
    /// Cancelled once on process shutdown; background periodic tasks select on this.
    pub(crate) shutdown: CancellationToken,
    /// Set only in "once" mode (used by tests): the first connection to close sends on
    /// this to make the server exit.
    pub(crate) once_shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

pub(crate) fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .merge(http::routes())
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
