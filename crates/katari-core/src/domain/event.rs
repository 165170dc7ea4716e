//! Stream events - 取り込みループが受け取るイベント。
//!
//! ソーシャルネットワーク側のストリーミング接続（トランスポートは対象外）が
//! このイベント列を生成し、ingest loop が到着順に1件ずつ処理します。

use super::ids::StatusId;
use super::status::{Account, Status};

/// A notification delivered over the user stream.
///
/// `status` is the status that triggered the notification
/// (for mentions: the post that mentions the bot).
#[derive(Debug, Clone)]
pub struct Notification {
    pub account: Account,
    pub status: Status,
}

/// One event from the live user stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Somebody mentioned the bot.
    Mention(Notification),
    /// Somebody followed the bot.
    Follow(Account),
    /// A new post appeared on the watched timeline.
    Update(Status),
    /// A post was deleted.
    Delete(StatusId),
    /// Transport-level error; the stream itself continues.
    Error(String),
}
