//! History & session store (design §4.5): per-session ordered message log with metadata.

use std::sync::Arc;

use dashmap::DashMap;
use protocol::HistoryEntry;
use serde::Serialize;

use crate::error::GatewayError;
use crate::logging::HistoryLogger;

const DEFAULT_GET_LIMIT: usize = 50;
const MAX_GET_LIMIT: usize = 1000;
const MAX_LABEL_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub created_at: i64,
    pub last_active_at: i64,
    pub label: Option<String>,
}

struct SessionRecord {
    history: Vec<HistoryEntry>,
    meta: SessionMeta,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub created_at: i64,
    pub last_active_at: i64,
    pub message_count: usize,
}

pub struct HistoryStore {
    sessions: DashMap<String, SessionRecord>,
    logger: Option<Arc<dyn HistoryLogger>>,
}

impl HistoryStore {
    pub fn new(logger: Option<Arc<dyn HistoryLogger>>) -> Self {
        Self {
            sessions: DashMap::new(),
            logger,
        }
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Appends one entry, creating the session (and its metadata) on first append.
    /// Forwards to the disk logger when one is configured.
    pub fn append(&self, session_key: &str, entry: HistoryEntry) {
        let now = Self::now();
        {
            let mut rec = self
                .sessions
                .entry(session_key.to_string())
                .or_insert_with(|| SessionRecord {
                    history: Vec::new(),
                    meta: SessionMeta {
                        created_at: now,
                        last_active_at: now,
                        label: None,
                    },
                });
            rec.meta.last_active_at = now;
            rec.history.push(entry.clone());
        }
        if let Some(logger) = &self.logger {
            logger.log(session_key, &entry);
        }
    }

    /// Returns the last `limit` entries (clamped to `[1, 1000]`, default 50) in order.
    pub fn get(&self, session_key: &str, limit: Option<usize>) -> Vec<HistoryEntry> {
        let limit = limit.unwrap_or(DEFAULT_GET_LIMIT).clamp(1, MAX_GET_LIMIT);
        match self.sessions.get(session_key) {
            Some(rec) => {
                let len = rec.history.len();
                let start = len.saturating_sub(limit);
                rec.history[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    /// Drops history and metadata for `session_key`. Idempotent.
    pub fn delete(&self, session_key: &str) {
        self.sessions.remove(session_key);
    }

    /// Drops history only; metadata (label, timestamps) survives.
    pub fn reset(&self, session_key: &str) {
        if let Some(mut rec) = self.sessions.get_mut(session_key) {
            rec.history.clear();
        }
    }

    /// Creates metadata if missing; rejects a label longer than 64 chars.
    pub fn patch(&self, session_key: &str, label: Option<String>) -> Result<(), GatewayError> {
        if let Some(ref l) = label {
            if l.len() > MAX_LABEL_LEN {
                return Err(GatewayError::invalid_request(format!(
                    "label exceeds {MAX_LABEL_LEN} chars"
                )));
            }
        }
        let now = Self::now();
        let mut rec = self
            .sessions
            .entry(session_key.to_string())
            .or_insert_with(|| SessionRecord {
                history: Vec::new(),
                meta: SessionMeta {
                    created_at: now,
                    last_active_at: now,
                    label: None,
                },
            });
        if label.is_some() {
            rec.meta.label = label;
        }
        Ok(())
    }

    /// All sessions that have metadata or at least one history entry.
    pub fn list(&self) -> Vec<SessionSummary> {
        self.sessions
            .iter()
            .map(|entry| SessionSummary {
                key: entry.key().clone(),
                label: entry.value().meta.label.clone(),
                created_at: entry.value().meta.created_at,
                last_active_at: entry.value().meta.last_active_at,
                message_count: entry.value().history.len(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{ContentPart, Role};

    fn entry(text: &str) -> HistoryEntry {
        HistoryEntry {
            role: Role::User,
            content: vec![ContentPart::Text { text: text.into() }],
            timestamp: 0,
            stop_reason: None,
            model: None,
            provider: None,
        }
    }

    #[test]
    fn append_creates_session_and_updates_last_active() {
        let store = HistoryStore::new(None);
        store.append("main", entry("hi"));
        let entries = store.get("main", None);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn get_clamps_limit_and_returns_last_n() {
        let store = HistoryStore::new(None);
        for i in 0..5 {
            store.append("s", entry(&i.to_string()));
        }
        let entries = store.get("s", Some(2));
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn reset_keeps_metadata_but_clears_history() {
        let store = HistoryStore::new(None);
        store.patch("s", Some("My Label".into())).unwrap();
        store.append("s", entry("hi"));
        store.reset("s");
        assert_eq!(store.get("s", None).len(), 0);
        let list = store.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].label.as_deref(), Some("My Label"));
    }

    #[test]
    fn delete_removes_session_entirely() {
        let store = HistoryStore::new(None);
        store.append("s", entry("hi"));
        store.delete("s");
        assert!(store.list().is_empty());
    }

    #[test]
    fn patch_rejects_oversized_label() {
        let store = HistoryStore::new(None);
        let long = "x".repeat(65);
        assert!(store.patch("s", Some(long)).is_err());
    }

    #[test]
    fn list_merges_metadata_only_and_history_only_sessions() {
        let store = HistoryStore::new(None);
        store.patch("meta-only", Some("label".into())).unwrap();
        store.append("history-only", entry("hi"));
        let keys: Vec<_> = store.list().into_iter().map(|s| s.key).collect();
        assert!(keys.contains(&"meta-only".to_string()));
        assert!(keys.contains(&"history-only".to_string()));
    }
}
