//! Periodic background tasks (design §9 "Periodic work"): tick/health broadcasts and
//! idempotency-cache GC. All three are spawned once at startup and run until the
//! process-wide shutdown token fires.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::bus::Bus;
use crate::idempotency::IdempotencyCache;
use crate::presence::Presence;

/// Spawns the `tick` emitter: a heartbeat broadcast every `interval`, `dropIfSlow` (design
/// §4.8 — a missed tick is not worth closing a connection over).
pub fn spawn_tick(bus: Arc<Bus>, interval: Duration, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    bus.broadcast("tick", json!({ "ts": chrono::Utc::now().timestamp_millis() }), None, true);
                }
            }
        }
    })
}

/// Spawns the `health` emitter: bumps `stateVersion.health` and broadcasts a refreshed
/// health snapshot every `interval`, `dropIfSlow`.
pub fn spawn_health(
    bus: Arc<Bus>,
    presence: Arc<Presence>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    let health_version = presence.bump_health();
                    let state_version = protocol::StateVersion {
                        presence: presence.state_version().presence,
                        health: health_version,
                    };
                    bus.broadcast("health", json!({ "ok": true }), Some(state_version), true);
                }
            }
        }
    })
}

/// Spawns the idempotency-cache sweep (design §4.4): a periodic full GC pass so memory
/// isn't held by entries nobody will check again. Runs on the cache's own TTL as the
/// interval — there is no value in sweeping more often than entries can expire.
pub fn spawn_idempotency_sweep(
    cache: Arc<IdempotencyCache>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    cache.sweep();
                }
            }
        }
    })
}
