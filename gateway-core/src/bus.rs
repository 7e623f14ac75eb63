//! Broadcast bus (design §4.8): global-sequenced event fan-out with per-connection
//! backpressure.
//!
//! Outbound delivery is modeled as a bounded per-connection channel with a dedicated
//! writer task living in `serve` (design §9 "Backpressure and slow-consumer detection") —
//! this crate has no socket access, so "close the connection" is expressed as a
//! [`tokio::sync::Notify`] the writer task selects on alongside the channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use protocol::{Frame, StateVersion};
use serde_json::Value;
use tokio::sync::{mpsc, Notify};

/// Channel depth backing the outbox (design §9: "e.g., 512 messages per connection").
pub const DEFAULT_OUTBOX_CAPACITY: usize = 512;

struct ConnectionSink {
    tx: mpsc::Sender<Frame>,
    close: Arc<Notify>,
    authenticated: AtomicBool,
}

/// Handle returned from [`Bus::register`]: the receiving half of the outbox, the
/// close-notification the writer task must also select on, and a flag distinguishing a
/// whole-server [`Bus::shutdown`] from an ordinary single-connection teardown — both drop
/// the outbox's sender, so `rx.recv()` returning `None` alone can't tell them apart.
pub struct Outbox {
    pub rx: mpsc::Receiver<Frame>,
    pub close: Arc<Notify>,
    pub shutting_down: Arc<AtomicBool>,
}

pub struct Bus {
    global_seq: AtomicU64,
    connections: DashMap<String, ConnectionSink>,
    outbox_capacity: usize,
    shutting_down: Arc<AtomicBool>,
}

impl Bus {
    pub fn new(outbox_capacity: usize) -> Self {
        Self {
            global_seq: AtomicU64::new(0),
            connections: DashMap::new(),
            outbox_capacity,
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn register(&self, conn_id: impl Into<String>) -> Outbox {
        let (tx, rx) = mpsc::channel(self.outbox_capacity);
        let close = Arc::new(Notify::new());
        self.connections.insert(
            conn_id.into(),
            ConnectionSink {
                tx,
                close: close.clone(),
                authenticated: AtomicBool::new(false),
            },
        );
        Outbox { rx, close, shutting_down: self.shutting_down.clone() }
    }

    pub fn unregister(&self, conn_id: &str) {
        self.connections.remove(conn_id);
    }

    pub fn mark_authenticated(&self, conn_id: &str) {
        if let Some(sink) = self.connections.get(conn_id) {
            sink.authenticated.store(true, Ordering::SeqCst);
        }
    }

    pub fn authenticated_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|s| s.authenticated.load(Ordering::SeqCst))
            .count()
    }

    /// Targeted delivery to one connection (used for `response` frames and for events a
    /// handler wants delivered to a single socket rather than broadcast). Swallows the
    /// failure the same way `broadcast` does for a non-droppable event: the connection is
    /// signalled to close.
    pub fn send(&self, conn_id: &str, frame: Frame) {
        let Some(sink) = self.connections.get(conn_id) else {
            return;
        };
        if sink.tx.try_send(frame).is_err() {
            tracing::warn!(conn_id, "outbox full on targeted send; closing slow consumer");
            sink.close.notify_one();
        }
    }

    /// Assigns the next global sequence number and fans the event out to every
    /// authenticated connection. `drop_if_slow` selects the backpressure policy for
    /// connections whose outbox is full: drop silently, or close with 1008.
    pub fn broadcast(
        &self,
        event: &str,
        payload: Value,
        state_version: Option<StateVersion>,
        drop_if_slow: bool,
    ) -> u64 {
        let seq = self.global_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let frame = Frame::Event {
            event: event.to_string(),
            payload,
            seq: Some(seq),
            state_version,
        };
        for entry in self.connections.iter() {
            if !entry.value().authenticated.load(Ordering::SeqCst) {
                continue;
            }
            if entry.value().tx.try_send(frame.clone()).is_err() {
                if drop_if_slow {
                    tracing::debug!(conn_id = entry.key(), event, "dropped slow-consumer event");
                } else {
                    tracing::warn!(conn_id = entry.key(), event, "closing slow consumer");
                    entry.value().close.notify_one();
                }
            }
        }
        seq
    }

    /// Broadcasts the `shutdown` event to every authenticated connection, then drops every
    /// outbox sender. A non-droppable broadcast queues the event ahead of the drop, and
    /// `mpsc::Receiver::recv` always drains whatever is buffered before returning `None` once
    /// its last sender is gone — so the writer task in `serve` is guaranteed to deliver
    /// `shutdown` before it ever observes the channel close (design §4.11).
    pub fn shutdown(&self, reason: &str) {
        self.broadcast("shutdown", serde_json::json!({ "reason": reason }), None, false);
        self.shutting_down.store(true, Ordering::SeqCst);
        self.connections.clear();
    }
}
