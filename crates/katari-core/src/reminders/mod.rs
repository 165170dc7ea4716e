//! Reminders - 説明文が投稿本体に付いたかの後追いチェック
//!
//! 返信で説明文を渡しても、投稿者がそれを自分の投稿のメディアに付け直さない
//! 限り、投稿そのものはアクセシブルになりません。そこで返信の成功時に
//! チェックを予約しておき、一定時間後に投稿を見に行って、まだ説明文が
//! 無ければ（24時間に1回まで）思い出してもらう DM を送ります。

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::{AccountId, NewStatus, StatusId, Visibility};
use crate::locales::Locales;
use crate::metrics::MetricsManager;
use crate::ports::{Clock, SocialClient};

/// Hours between two reminders to the same account.
const REMINDER_COOLDOWN_HOURS: i64 = 24;

/// A queued verification that a description made it onto the post itself.
#[derive(Debug, Clone)]
pub struct PendingCheck {
    pub post_id: StatusId,
    pub account: AccountId,
    pub created_at: DateTime<Utc>,
}

pub struct ReminderTracker {
    clock: Arc<dyn Clock>,
    checks: Mutex<HashMap<StatusId, PendingCheck>>,
    last_reminded: Mutex<HashMap<AccountId, DateTime<Utc>>>,
}

impl ReminderTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            checks: Mutex::new(HashMap::new()),
            last_reminded: Mutex::new(HashMap::new()),
        }
    }

    /// Queue a check for `post_id`, attributed to the requesting account.
    pub async fn queue_check(&self, post_id: StatusId, account: AccountId) {
        let check = PendingCheck {
            post_id: post_id.clone(),
            account,
            created_at: self.clock.now(),
        };
        self.checks.lock().await.insert(post_id, check);
    }

    /// Remove and return every check older than `delay`.
    async fn take_due(&self, delay: Duration) -> Vec<PendingCheck> {
        let cutoff = self.clock.now() - delay;
        let mut checks = self.checks.lock().await;
        let due_ids: Vec<StatusId> = checks
            .values()
            .filter(|check| check.created_at <= cutoff)
            .map(|check| check.post_id.clone())
            .collect();
        due_ids
            .into_iter()
            .filter_map(|id| checks.remove(&id))
            .collect()
    }

    /// At most one reminder per account per 24 hours.
    ///
    /// Recording happens on the `true` path, so a suppressed reminder does
    /// not push the window forward.
    async fn should_remind(&self, account: &AccountId) -> bool {
        let now = self.clock.now();
        let mut last_reminded = self.last_reminded.lock().await;
        match last_reminded.get(account) {
            Some(last) if now - *last < Duration::hours(REMINDER_COOLDOWN_HOURS) => false,
            _ => {
                last_reminded.insert(account.clone(), now);
                true
            }
        }
    }

    /// One periodic pass: verify due posts and nudge where needed.
    ///
    /// A post we cannot fetch goes back into the queue and is retried on
    /// the next pass; every other check fires exactly once.
    pub async fn run_once(
        &self,
        social: &dyn SocialClient,
        metrics: &MetricsManager,
        locales: &Locales,
        delay: Duration,
    ) {
        for check in self.take_due(delay).await {
            let post = match social.get_status(&check.post_id).await {
                Ok(post) => post,
                Err(e) => {
                    warn!(post = %check.post_id, error = %e, "fetch failed, re-queueing check");
                    self.checks
                        .lock()
                        .await
                        .insert(check.post_id.clone(), check);
                    continue;
                }
            };

            let missing = post
                .media_attachments
                .iter()
                .any(|attachment| !attachment.has_description());
            if !missing {
                continue;
            }

            metrics.log_missing_alt_text(&check.account);
            if !self.should_remind(&check.account).await {
                continue;
            }

            info!(post = %post.id, account = %check.account, "sending description reminder");
            let message = locales
                .response(post.language.as_deref(), "alt_text_reminder")
                .replace("{user}", check.account.as_str());
            let reminder = NewStatus {
                text: message,
                in_reply_to_id: Some(post.id.clone()),
                visibility: Visibility::Direct,
                language: post.language.clone(),
                spoiler_text: String::new(),
            };
            match social.post_status(reminder).await {
                Ok(_) => metrics.log_reminder_sent(&check.account),
                Err(e) => warn!(post = %post.id, error = %e, "failed to post reminder"),
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.checks.lock().await.len()
    }
}
