//! Posts, accounts and media attachments as seen at the ingestion boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AccountId, StatusId};
use super::visibility::Visibility;

/// An account on the social network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Handle without the leading `@` (possibly `user@remote.example`).
    pub acct: String,
    #[serde(default)]
    pub bot: bool,
    /// Profile note (bio), as HTML.
    #[serde(default)]
    pub note: String,
    pub created_at: DateTime<Utc>,
}

/// Kind of a media attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    /// Soundless looping video, treated like video for generation purposes.
    Gifv,
    Audio,
    #[serde(other)]
    Unknown,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Gifv => "gifv",
            MediaKind::Audio => "audio",
            MediaKind::Unknown => "unknown",
        }
    }
}

/// One media item belonging to a post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: MediaKind,
    pub url: String,
    /// Human-authored accessible description, if any.
    #[serde(default)]
    pub description: Option<String>,
}

impl Attachment {
    /// 空文字列の説明は「無い」扱い（サーバによっては "" を返すため）。
    pub fn has_description(&self) -> bool {
        self.description.as_deref().is_some_and(|d| !d.is_empty())
    }
}

/// A post with zero or more media attachments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub id: StatusId,
    pub account: Account,
    /// Body as HTML.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    /// Content warning. Empty string when absent.
    #[serde(default)]
    pub spoiler_text: String,
    #[serde(default)]
    pub in_reply_to_id: Option<StatusId>,
    #[serde(default)]
    pub media_attachments: Vec<Attachment>,
}

/// An outbound post (reply) the bot is about to publish.
#[derive(Debug, Clone, Serialize)]
pub struct NewStatus {
    pub text: String,
    pub in_reply_to_id: Option<StatusId>,
    pub visibility: Visibility,
    pub language: Option<String>,
    pub spoiler_text: String,
}

impl NewStatus {
    /// Direct message with no reply target (admin notifications).
    pub fn direct(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            in_reply_to_id: None,
            visibility: Visibility::Direct,
            language: None,
            spoiler_text: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_description_counts_as_missing() {
        let mut attachment = Attachment {
            kind: MediaKind::Image,
            url: "https://files.example/a.png".to_string(),
            description: None,
        };
        assert!(!attachment.has_description());

        attachment.description = Some(String::new());
        assert!(!attachment.has_description());

        attachment.description = Some("a red bird".to_string());
        assert!(attachment.has_description());
    }

    #[test]
    fn unknown_media_kinds_fall_back() {
        let kind: MediaKind = serde_json::from_str("\"hologram\"").unwrap();
        assert_eq!(kind, MediaKind::Unknown);
    }
}
