//! Captioner port - 説明文生成バックエンドの抽象化
//!
//! ホスト型マルチモーダル API、ローカルのコマンドラインモデル、ローカル HTTP
//! 推論サーバの3実装がこの1つの契約を満たします（`impls` 参照）。

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::MediaKind;

#[derive(Debug, Error)]
pub enum CaptionError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("backend returned an empty description")]
    Empty,

    #[error("media kind not supported by this backend")]
    Unsupported,
}

/// One generation request.
#[derive(Debug, Clone)]
pub struct CaptionRequest {
    /// Kind-specific, localized prompt.
    pub prompt: String,
    /// Raw media bytes as downloaded.
    pub media: Vec<u8>,
    /// Format tag, e.g. "png", "mp4".
    pub format: String,
    pub kind: MediaKind,
    /// BCP-47 language the description should be written in.
    pub language: Option<String>,
}

/// The single generation contract.
#[async_trait]
pub trait Captioner: Send + Sync {
    /// Generate a description, or fail.
    ///
    /// An `Ok` with an empty string is a contract violation; implementations
    /// return `CaptionError::Empty` instead so callers have one error path.
    async fn describe(&self, request: CaptionRequest) -> Result<String, CaptionError>;

    /// Whether video/audio attachments can be processed by this backend.
    fn supports_multimedia(&self) -> bool;
}
