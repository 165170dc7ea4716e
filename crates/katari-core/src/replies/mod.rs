//! ReplyTracker - 返信の記録と削除カスケード
//!
//! 元投稿 ID からボットの返信 ID を引けるようにしておき、元投稿が消えたら
//! 返信も消します。孤児になった説明文だけが残るのを防ぐための台帳です。
//!
//! Design:
//! - 1時間より古い記録は10分ごとの掃除で捨てる。メモリは有界になるが、
//!   その代わり「とても遅い削除」へのカスケードは起きない。これは既知の
//!   トレードオフであって不具合ではない。
//! - 台帳は揮発性。再起動すると追跡中の返信は忘れるが、どのみち1時間で
//!   捨てる記録なので永続化はしない。

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::StatusId;
use crate::ports::{Clock, SocialClient};

/// Retention window for reply records, in minutes.
const MAX_AGE_MINUTES: i64 = 60;

#[derive(Debug, Clone)]
struct ReplyRecord {
    reply_id: StatusId,
    created_at: DateTime<Utc>,
}

pub struct ReplyTracker {
    clock: Arc<dyn Clock>,
    records: Mutex<HashMap<StatusId, ReplyRecord>>,
}

impl ReplyTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Remember which reply belongs to which original post.
    ///
    /// At most one record per original post; a second successful reply to
    /// the same post (e.g. after an edit) replaces the first.
    pub async fn register(&self, original_id: StatusId, reply_id: StatusId) {
        let record = ReplyRecord {
            reply_id,
            created_at: self.clock.now(),
        };
        self.records.lock().await.insert(original_id, record);
    }

    /// Delete-cascade: the original post disappeared, remove our reply too.
    ///
    /// An untracked (or already swept) id is a silent no-op.
    pub async fn on_delete(&self, social: &dyn SocialClient, original_id: &StatusId) {
        let record = {
            let mut records = self.records.lock().await;
            records.remove(original_id)
        };
        let Some(record) = record else {
            return;
        };

        match social.delete_status(&record.reply_id).await {
            Ok(()) => info!(original = %original_id, reply = %record.reply_id, "cascaded delete"),
            Err(e) => warn!(reply = %record.reply_id, error = %e, "failed to delete reply"),
        }
    }

    /// Scheduled every 10 minutes: drop records older than one hour.
    pub async fn sweep(&self) {
        let cutoff = self.clock.now() - Duration::minutes(MAX_AGE_MINUTES);
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| record.created_at > cutoff);
        let dropped = before - records.len();
        if dropped > 0 {
            debug!(dropped, "swept old reply records");
        }
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}
