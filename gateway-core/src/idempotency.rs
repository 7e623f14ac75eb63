//! Idempotency cache (design §4.4): a bounded, TTL'd set of recently-seen request keys.
//!
//! Not an LRU — eviction at capacity is strictly oldest-insertion-first. Fairness matters
//! less than a hard upper bound on memory.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    key: String,
    first_seen: Instant,
}

struct Inner {
    order: VecDeque<Entry>,
}

pub struct IdempotencyCache {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<Inner>,
}

impl IdempotencyCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            ttl,
            capacity,
            inner: Mutex::new(Inner {
                order: VecDeque::with_capacity(capacity.min(1024)),
            }),
        }
    }

    fn purge_expired(&self, inner: &mut Inner, now: Instant) {
        while let Some(front) = inner.order.front() {
            if now.duration_since(front.first_seen) >= self.ttl {
                inner.order.pop_front();
            } else {
                break;
            }
        }
    }

    /// True iff `key` was recorded less than `ttl` ago. Lazily purges expired entries
    /// from the front of the queue first.
    pub fn is_duplicate(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("idempotency cache lock poisoned");
        self.purge_expired(&mut inner, now);
        inner.order.iter().any(|e| e.key == key)
    }

    /// Records `key` as seen now. If at capacity, evicts the oldest entry first,
    /// regardless of whether it has expired.
    pub fn record(&self, key: impl Into<String>) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("idempotency cache lock poisoned");
        self.purge_expired(&mut inner, now);
        if inner.order.len() >= self.capacity {
            inner.order.pop_front();
        }
        inner.order.push_back(Entry {
            key: key.into(),
            first_seen: now,
        });
    }

    /// Runs a full expiry sweep; used by the periodic dedupe-GC task (C10).
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("idempotency cache lock poisoned");
        self.purge_expired(&mut inner, now);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_within_ttl_is_rejected() {
        let cache = IdempotencyCache::new(1000, Duration::from_secs(300));
        assert!(!cache.is_duplicate("K"));
        cache.record("K");
        assert!(cache.is_duplicate("K"));
    }

    #[test]
    fn expires_after_ttl() {
        let cache = IdempotencyCache::new(1000, Duration::from_millis(10));
        cache.record("K");
        assert!(cache.is_duplicate("K"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(!cache.is_duplicate("K"));
    }

    #[test]
    fn evicts_oldest_first_at_capacity() {
        let cache = IdempotencyCache::new(2, Duration::from_secs(300));
        cache.record("a");
        cache.record("b");
        cache.record("c");
        assert_eq!(cache.len(), 2);
        assert!(!cache.is_duplicate("a"));
        assert!(cache.is_duplicate("b"));
        assert!(cache.is_duplicate("c"));
    }
}
