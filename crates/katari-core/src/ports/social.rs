//! SocialClient port - ソーシャルネットワーク API の抽象化
//!
//! 本番実装はネットワーク越しの REST クライアント（このクレートの対象外）、
//! テスト/開発では `impls::InMemorySocialClient` を使います。

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Account, AccountId, NewStatus, Status, StatusId};

#[derive(Debug, Error)]
pub enum SocialError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("api error: {0}")]
    Api(String),
}

/// Client operations the engine consumes.
///
/// Design:
/// - Every call is a suspension point; implementations own their timeouts.
/// - `fetch_media` lives here because downloading media is part of talking
///   to the network, not part of describing it.
#[async_trait]
pub trait SocialClient: Send + Sync {
    /// The bot's own account.
    async fn me(&self) -> Result<Account, SocialError>;

    async fn get_status(&self, id: &StatusId) -> Result<Status, SocialError>;

    async fn get_account(&self, id: &AccountId) -> Result<Account, SocialError>;

    /// Publish a post and return it as created by the server.
    async fn post_status(&self, new_status: NewStatus) -> Result<Status, SocialError>;

    async fn delete_status(&self, id: &StatusId) -> Result<(), SocialError>;

    async fn follow(&self, id: &AccountId) -> Result<(), SocialError>;

    /// Download the raw bytes of a media attachment.
    async fn fetch_media(&self, url: &str) -> Result<Vec<u8>, SocialError>;
}
