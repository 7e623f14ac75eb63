//! Transport for Gateway Protocol v3 (axum + ws).
//!
//! Owns the socket; `gateway-core` owns everything behind it. A connection is two tasks:
//! a reader that decodes frames and calls into [`gateway_core::Gateway`], and a writer
//! that drains the per-connection outbox registered on [`gateway_core::Bus`]. Splitting
//! them is what lets a broadcast event (`tick`, `presence`) or a `chat.abort` response
//! reach the client while a run is mid-stream on the same connection (design §9
//! "Backpressure and slow-consumer detection").
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listener`].

mod app;
mod connection;
mod http;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::info;

use app::{router, AppState};
use gateway_core::{
    AgentHandler, Bus, Gateway, GatewayConfig, HistoryStore, IdempotencyCache, JsonlHistoryLogger,
    NoOpHistoryLogger, Presence, RunEngine,
};

const DEFAULT_ADDR: &str = "127.0.0.1:8765";

/// Runs the server on an existing listener. Used by tests (bind to `127.0.0.1:0`, pass the
/// listener in). When `once` is true, the server exits after its first connection closes.
/// `handler` selects the backend; `None` falls back to [`gateway_core::DemoAdapter`], which
/// is what every e2e test uses.
pub async fn run_serve_on_listener(
    listener: TcpListener,
    once: bool,
    handler: Option<Arc<dyn AgentHandler>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("gateway listening on ws://{}", addr);
    if once {
        info!("will exit after first connection closes (once mode, used by tests)");
    }

    let config = GatewayConfig::from_env();
    let shutdown = CancellationToken::new();
    let state = build_state(config.clone(), shutdown.clone(), handler);

    gateway_core::periodic::spawn_tick(
        state.gateway.bus.clone(),
        Duration::from_millis(config.tick_interval_ms),
        shutdown.clone(),
    );
    gateway_core::periodic::spawn_health(
        state.gateway.bus.clone(),
        state.gateway.presence.clone(),
        Duration::from_millis(config.health_refresh_interval_ms),
        shutdown.clone(),
    );
    gateway_core::periodic::spawn_idempotency_sweep(
        state.gateway.idempotency.clone(),
        Duration::from_millis(config.dedupe_ttl_ms),
        shutdown.clone(),
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    *state.once_shutdown.lock().expect("shutdown lock poisoned") = if once { Some(shutdown_tx) } else { None };

    let shutdown_state = state.clone();
    let app = router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if once {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = shutdown_rx => {}
                }
            } else {
                let _ = tokio::signal::ctrl_c().await;
            }
            info!("shutting down: draining connections (design §4.11)");
            shutdown_state.gateway.bus.shutdown("server_stop");
            shutdown_state.shutdown.cancel();
            shutdown_state.gateway.runs.cancel_all_running();
        })
        .await?;
    info!("shutdown complete");
    Ok(())
}

/// Runs the server. Listens on `addr` (default `127.0.0.1:8765`).
pub async fn run_serve(
    addr: Option<&str>,
    once: bool,
    handler: Option<Arc<dyn AgentHandler>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = addr.unwrap_or(DEFAULT_ADDR);
    let listener = TcpListener::bind(addr).await?;
    run_serve_on_listener(listener, once, handler).await
}

fn build_state(
    config: GatewayConfig,
    shutdown: CancellationToken,
    handler: Option<Arc<dyn AgentHandler>>,
) -> Arc<AppState> {
    let logger = config
        .log_dir
        .as_ref()
        .map(|dir| Arc::new(JsonlHistoryLogger::new(dir)) as Arc<dyn gateway_core::HistoryLogger>)
        .unwrap_or_else(|| Arc::new(NoOpHistoryLogger));
    let history = Arc::new(HistoryStore::new(Some(logger)));
    let bus = Arc::new(Bus::new(gateway_core::DEFAULT_OUTBOX_CAPACITY));
    let presence = Arc::new(Presence::new());
    let idempotency = Arc::new(IdempotencyCache::new(
        config.dedupe_max_keys,
        Duration::from_millis(config.dedupe_ttl_ms),
    ));
    let dispatcher = Arc::new(gateway_core::McpToolDispatcher::new(None));
    let runs = Arc::new(RunEngine::new(
        history.clone(),
        bus.clone(),
        idempotency.clone(),
        handler,
        dispatcher,
    ));
    let gateway = Arc::new(Gateway::new(history, bus, presence, idempotency, runs, config));

    Arc::new(AppState {
        gateway,
        shutdown,
        once_shutdown: std::sync::Mutex::new(None),
    })
}
