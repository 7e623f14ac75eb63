//! Disk history logger (design §6 "Disk log format"): one JSONL file per `(session, UTC-date)`.
//!
//! Advisory only — the in-memory [`crate::history::HistoryStore`] is the source of truth.
//! Modeled as a trait (grounded in the same append/list shape the rest of the workspace uses
//! for pluggable stores) so tests and no-log-dir deployments can swap in a no-op.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use protocol::HistoryEntry;
use serde::Serialize;

pub trait HistoryLogger: Send + Sync {
    /// Appends one entry for `session_key`. Best-effort: failures are logged, not propagated,
    /// since this log is advisory (design §1 non-goals: no durable session storage).
    fn log(&self, session_key: &str, entry: &HistoryEntry);
}

#[derive(Debug, Default)]
pub struct NoOpHistoryLogger;

impl HistoryLogger for NoOpHistoryLogger {
    fn log(&self, _session_key: &str, _entry: &HistoryEntry) {}
}

#[derive(Serialize)]
struct LogLine<'a> {
    session: &'a str,
    role: &'a str,
    content: &'a [protocol::ContentPart],
    timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_reason: &'a Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: &'a Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: &'a Option<String>,
}

/// Writes one JSONL line per append under `log_dir/<sanitized-session>-<UTC-date>.jsonl`.
pub struct JsonlHistoryLogger {
    log_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlHistoryLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Replaces any char outside `[A-Za-z0-9_-]` with `-` and truncates to 64 chars.
    fn sanitize_session_key(session_key: &str) -> String {
        let mut sanitized: String = session_key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        sanitized.truncate(64);
        sanitized
    }

    fn file_path(&self, session_key: &str) -> PathBuf {
        let date = chrono::Utc::now().format("%Y-%m-%d");
        let name = format!("{}-{}.jsonl", Self::sanitize_session_key(session_key), date);
        self.log_dir.join(name)
    }
}

impl HistoryLogger for JsonlHistoryLogger {
    fn log(&self, session_key: &str, entry: &HistoryEntry) {
        let line = LogLine {
            session: session_key,
            role: match entry.role {
                protocol::Role::User => "user",
                protocol::Role::Assistant => "assistant",
            },
            content: &entry.content,
            timestamp: entry.timestamp,
            stop_reason: &entry.stop_reason,
            model: &entry.model,
            provider: &entry.provider,
        };
        let json = match serde_json::to_string(&line) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize history log line");
                return;
            }
        };

        let _guard = self.write_lock.lock().expect("log write lock poisoned");
        if let Err(e) = std::fs::create_dir_all(&self.log_dir) {
            tracing::warn!(error = %e, dir = %self.log_dir.display(), "failed to create log dir");
            return;
        }
        let path = self.file_path(session_key);
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "{json}"));
        if let Err(e) = result {
            tracing::warn!(error = %e, path = %path.display(), "failed to append history log line");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{ContentPart, Role};

    #[test]
    fn sanitizes_session_key_for_filename() {
        let sanitized = JsonlHistoryLogger::sanitize_session_key("main/chat session!");
        assert_eq!(sanitized, "main-chat-session-");
    }

    #[test]
    fn truncates_long_session_key() {
        let long = "a".repeat(100);
        let sanitized = JsonlHistoryLogger::sanitize_session_key(&long);
        assert_eq!(sanitized.len(), 64);
    }

    #[test]
    fn writes_one_jsonl_line_per_append() {
        let dir = tempfile::tempdir().unwrap();
        let logger = JsonlHistoryLogger::new(dir.path());
        let entry = HistoryEntry {
            role: Role::User,
            content: vec![ContentPart::Text { text: "hi".into() }],
            timestamp: 1,
            stop_reason: None,
            model: None,
            provider: None,
        };
        logger.log("main", &entry);
        logger.log("main", &entry);

        let mut count = 0;
        for file in std::fs::read_dir(dir.path()).unwrap() {
            let file = file.unwrap();
            let contents = std::fs::read_to_string(file.path()).unwrap();
            count += contents.lines().count();
        }
        assert_eq!(count, 2);
    }
}
