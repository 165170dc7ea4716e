//! Metrics - 追記専用のイベントログとスナップショット保存
//!
//! Design:
//! - メモリ上の Vec がログ本体。作成後のイベントは一切変更しない。
//! - 定期スナップショットはログ全体を JSON 配列としてファイルに上書き
//!   （差分追記ではない）。外部ダッシュボードがこのファイルを読む。
//! - 書き込みはこのプロセスだけ（プロセス間ロックは仮定しない）。
//! - `enabled = false` なら全操作が本当の no-op。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, error};

use crate::domain::AccountId;

/// A single recorded event. Append-only, never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEvent {
    pub timestamp: DateTime<Utc>,
    pub account: AccountId,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

pub struct MetricsManager {
    enabled: bool,
    path: PathBuf,
    events: Mutex<Vec<MetricEvent>>,
}

impl MetricsManager {
    pub fn new(enabled: bool, path: PathBuf) -> Self {
        Self {
            enabled,
            path,
            events: Mutex::new(Vec::new()),
        }
    }

    /// A manager that records nothing; handy for tests and disabled setups.
    pub fn disabled() -> Self {
        Self::new(false, PathBuf::from("metrics.json"))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn record(&self, account: &AccountId, event_type: &str, details: Map<String, Value>) {
        if !self.enabled {
            return;
        }
        let event = MetricEvent {
            timestamp: Utc::now(),
            account: account.clone(),
            event_type: event_type.to_string(),
            details,
        };
        self.events.lock().unwrap().push(event);
    }

    pub fn log_request(&self, account: &AccountId) {
        self.record(account, "request", Map::new());
    }

    pub fn log_follow(&self, account: &AccountId) {
        self.record(account, "follow", Map::new());
    }

    pub fn log_successful_generation(
        &self,
        account: &AccountId,
        media_type: &str,
        response_time_ms: i64,
    ) {
        let mut details = Map::new();
        details.insert("mediaType".to_string(), Value::from(media_type));
        details.insert("responseTime".to_string(), Value::from(response_time_ms));
        self.record(account, "successful_generation", details);
    }

    pub fn log_rate_limit_hit(&self, account: &AccountId) {
        self.record(account, "rate_limit_hit", Map::new());
    }

    pub fn log_new_account_activity(&self, account: &AccountId) {
        self.record(account, "new_account_activity", Map::new());
    }

    pub fn log_consent_request(&self, account: &AccountId, granted: bool) {
        let mut details = Map::new();
        details.insert("granted".to_string(), Value::from(granted));
        self.record(account, "consent_request", details);
    }

    pub fn log_shadow_ban(&self, account: &AccountId) {
        self.record(account, "shadow_ban", Map::new());
    }

    pub fn log_unban(&self, account: &AccountId) {
        self.record(account, "unban", Map::new());
    }

    pub fn log_missing_alt_text(&self, account: &AccountId) {
        self.record(account, "missing_alt_text", Map::new());
    }

    pub fn log_reminder_sent(&self, account: &AccountId) {
        self.record(account, "alt_text_reminder_sent", Map::new());
    }

    /// Serialize the whole log to disk, replacing the previous snapshot.
    ///
    /// Persistence errors are logged; the in-memory log stays authoritative
    /// and the next flush retries with the full content anyway.
    pub fn flush(&self) {
        if !self.enabled {
            return;
        }
        let serialized = {
            let events = self.events.lock().unwrap();
            serde_json::to_vec_pretty(&*events)
        };
        let serialized = match serialized {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to serialize metrics snapshot");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, serialized) {
            error!(path = %self.path.display(), error = %e, "failed to write metrics snapshot");
        } else {
            debug!(path = %self.path.display(), "metrics snapshot written");
        }
    }

    /// Test helper: a copy of everything recorded so far.
    pub fn recorded(&self) -> Vec<MetricEvent> {
        self.events.lock().unwrap().clone()
    }
}
