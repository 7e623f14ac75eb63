//! Presence list and the `{presence, health}` state-version vector (design §3, §9
//! "State versioning vs. snapshot diffing").
//!
//! The version counter is bumped inside the same critical section that mutates the
//! underlying list, so a client can never observe a stale snapshot paired with a fresh
//! counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use protocol::{PresenceEntry, StateVersion};

pub struct Presence {
    entries: Mutex<Vec<PresenceEntry>>,
    presence_version: AtomicU64,
    health_version: AtomicU64,
}

impl Presence {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            presence_version: AtomicU64::new(0),
            health_version: AtomicU64::new(0),
        }
    }

    /// Appends an entry and bumps `stateVersion.presence`. Returns the new version so the
    /// caller can stamp the broadcast `presence` event without a second lock acquisition.
    pub fn add(&self, entry: PresenceEntry) -> u64 {
        let mut entries = self.entries.lock().expect("presence lock poisoned");
        entries.push(entry);
        self.presence_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Removes the entry with the given `instance_id`, if present, and bumps the version
    /// regardless (a disconnect is observable even if the entry was already gone).
    pub fn remove(&self, instance_id: &str) -> u64 {
        let mut entries = self.entries.lock().expect("presence lock poisoned");
        entries.retain(|e| e.instance_id != instance_id);
        self.presence_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn list(&self) -> Vec<PresenceEntry> {
        self.entries
            .lock()
            .expect("presence lock poisoned")
            .clone()
    }

    pub fn count(&self) -> usize {
        self.entries.lock().expect("presence lock poisoned").len()
    }

    pub fn bump_health(&self) -> u64 {
        self.health_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn state_version(&self) -> StateVersion {
        StateVersion {
            presence: self.presence_version.load(Ordering::SeqCst),
            health: self.health_version.load(Ordering::SeqCst),
        }
    }
}

impl Default for Presence {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> PresenceEntry {
        PresenceEntry {
            instance_id: id.to_string(),
            host: "h".into(),
            version: "1".into(),
            platform: "t".into(),
            mode: "operator".into(),
            ts: 0,
            reason: "connect".into(),
            roles: None,
            scopes: None,
        }
    }

    #[test]
    fn add_and_remove_bump_presence_version_monotonically() {
        let p = Presence::new();
        let v1 = p.add(entry("a"));
        let v2 = p.add(entry("b"));
        assert!(v2 > v1);
        assert_eq!(p.count(), 2);
        let v3 = p.remove("a");
        assert!(v3 > v2);
        assert_eq!(p.count(), 1);
    }

    #[test]
    fn count_matches_authenticated_connections() {
        let p = Presence::new();
        p.add(entry("a"));
        p.add(entry("b"));
        p.remove("a");
        assert_eq!(p.list().len(), 1);
        assert_eq!(p.list()[0].instance_id, "b");
    }
}
