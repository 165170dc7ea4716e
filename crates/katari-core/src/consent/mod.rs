//! ConsentTracker - 投稿毎の同意ハンドシェイク
//!
//! 状態機械は `NONE → REQUESTED → {GRANTED, DENIED}`。終端状態は即座に
//! レコード削除で NONE に戻るので、保持するのは REQUESTED だけです。
//!
//! Design:
//! - 投稿ごとに未解決のリクエストは最大1件（request は冪等）。
//! - 解決は「誰が答えたか」を必ず検査する。作者以外の返答は無視して、
//!   レコードも消さない。作者の返答だけがレコードを消す。
//! - マップは JSON スナップショットとして毎回丸ごと書き直す。
//! - 30日より古いリクエストは毎時の掃除で期限切れにする。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::domain::{AccountId, StatusId};
use crate::ports::Clock;
use crate::text::strip_html;

/// Days before an unanswered request expires.
const MAX_AGE_DAYS: i64 = 30;

/// One outstanding consent request, keyed (in the map) by the post id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRequest {
    /// The mention that asked for this post to be described.
    pub mention_id: StatusId,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a consent response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Granted,
    Denied,
    /// Response from somebody who is not the post's author; ignored.
    Unauthorized,
}

pub struct ConsentTracker {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    requests: Mutex<HashMap<StatusId, ConsentRequest>>,
}

impl ConsentTracker {
    /// Load persisted requests, or start empty when the file is missing.
    pub fn load(path: PathBuf, clock: Arc<dyn Clock>) -> Self {
        let requests = match std::fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(map) => map,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "bad consent file, starting fresh");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to read consent file, starting fresh");
                HashMap::new()
            }
        };
        Self {
            path,
            clock,
            requests: Mutex::new(requests),
        }
    }

    /// Record a new request for `post_id`, unless one is already pending.
    ///
    /// Returns whether a request was recorded; the caller posts the
    /// consent-ask reply only in that case, which is what makes the whole
    /// operation idempotent.
    pub async fn begin(&self, post_id: StatusId, mention_id: StatusId) -> bool {
        let mut requests = self.requests.lock().await;
        if requests.contains_key(&post_id) {
            debug!(%post_id, "consent already requested");
            return false;
        }
        requests.insert(
            post_id,
            ConsentRequest {
                mention_id,
                created_at: self.clock.now(),
            },
        );
        self.save(&requests);
        true
    }

    pub async fn is_pending(&self, post_id: &StatusId) -> bool {
        self.requests.lock().await.contains_key(post_id)
    }

    /// Interpret a response to the consent request for `post_id`.
    ///
    /// Markup is stripped and the last whitespace-delimited token decides:
    /// `y`/`yes` (case-insensitive) grants, anything else denies. Both
    /// outcomes remove the request; an unauthorized responder changes
    /// nothing.
    pub async fn resolve(
        &self,
        post_id: &StatusId,
        author: &AccountId,
        responder: &AccountId,
        response_html: &str,
    ) -> Resolution {
        if author != responder {
            warn!(%post_id, %responder, "consent response from non-author ignored");
            return Resolution::Unauthorized;
        }

        let text = strip_html(response_html);
        let granted = text
            .split_whitespace()
            .last()
            .map(|word| {
                let word = word.to_lowercase();
                word == "y" || word == "yes"
            })
            .unwrap_or(false);

        let mut requests = self.requests.lock().await;
        requests.remove(post_id);
        self.save(&requests);

        if granted {
            info!(%post_id, "consent granted by the author");
            Resolution::Granted
        } else {
            info!(%post_id, "consent denied by the author");
            Resolution::Denied
        }
    }

    /// Scheduled hourly: expire requests that never got an answer.
    pub async fn sweep(&self) {
        let cutoff = self.clock.now() - Duration::days(MAX_AGE_DAYS);
        let mut requests = self.requests.lock().await;
        let before = requests.len();
        requests.retain(|_, request| request.created_at > cutoff);
        if requests.len() != before {
            debug!(dropped = before - requests.len(), "swept expired consent requests");
            self.save(&requests);
        }
    }

    pub async fn len(&self) -> usize {
        self.requests.lock().await.len()
    }

    fn save(&self, requests: &HashMap<StatusId, ConsentRequest>) {
        let serialized = match serde_json::to_vec_pretty(requests) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to serialize consent requests");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, serialized) {
            error!(path = %self.path.display(), error = %e, "failed to persist consent requests");
        }
    }
}
