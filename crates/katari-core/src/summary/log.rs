//! Durable event log (NDJSON, one JSON object per line).
//!
//! 週次サマリが読む耐久ログ。メトリクスのスナップショットとは別物で、
//! こちらは1行ずつ追記し、決して書き直しません。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{error, warn};

/// One line of the durable log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

pub struct EventLog {
    enabled: bool,
    path: PathBuf,
    // 1プロセス内の書き込み順序を守るためだけのロック。
    write_lock: Mutex<()>,
}

impl EventLog {
    pub fn new(enabled: bool, path: PathBuf) -> Self {
        Self {
            enabled,
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn log_event(&self, event_type: &str) {
        self.append(LogEntry {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            username: None,
        });
    }

    pub fn log_event_with_username(&self, event_type: &str, username: &str) {
        self.append(LogEntry {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            username: Some(username.to_string()),
        });
    }

    fn append(&self, entry: LogEntry) {
        if !self.enabled {
            return;
        }
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "failed to serialize log entry");
                return;
            }
        };

        let _guard = self.write_lock.lock().unwrap();
        let result = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(e) = result {
            error!(path = %self.path.display(), error = %e, "failed to append log entry");
        }
    }

    /// Read every entry back, skipping lines that do not parse.
    ///
    /// The log may contain partial lines after a crash; losing one entry is
    /// preferable to losing the weekly summary.
    pub fn read_entries(&self) -> Vec<LogEntry> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "failed to read event log");
                return Vec::new();
            }
        };

        let mut entries = Vec::new();
        for line in data.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(error = %e, "skipping malformed log line"),
            }
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(true, dir.path().join("log.ndjson"));

        log.log_event("alt_text_generated");
        log.log_event_with_username("human_written_alt_text", "mira@example.social");

        let entries = log.read_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event_type, "alt_text_generated");
        assert_eq!(entries[0].username, None);
        assert_eq!(entries[1].username.as_deref(), Some("mira@example.social"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.ndjson");
        let log = EventLog::new(true, path.clone());

        log.log_event("new_follower");
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "{{truncated"))
            .unwrap();
        log.log_event("new_follower");

        assert_eq!(log.read_entries().len(), 2);
    }

    #[test]
    fn disabled_log_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.ndjson");
        let log = EventLog::new(false, path.clone());

        log.log_event("alt_text_generated");
        assert!(!path.exists());
        assert!(log.read_entries().is_empty());
    }
}
