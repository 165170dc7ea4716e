//! Implementations of the ports.
//!
//! - **inmem_social**: 開発・テスト用のインメモリ SocialClient
//! - **fixed**: テスト用の Captioner（返答固定・呼び出し記録つき）
//! - **hosted**: ホスト型マルチモーダル API バックエンド
//! - **command**: ローカルのコマンドラインモデルバックエンド
//! - **server**: ローカル HTTP 推論サーババックエンド

pub mod command;
pub mod fixed;
pub mod hosted;
pub mod inmem_social;
pub mod server;

pub use self::command::CommandCaptioner;
pub use self::fixed::FixedCaptioner;
pub use self::hosted::HostedCaptioner;
pub use self::inmem_social::InMemorySocialClient;
pub use self::server::ServerCaptioner;

use std::sync::Arc;

use crate::KatariError;
use crate::config::GenerationConfig;
use crate::ports::Captioner;

/// Build the captioner selected by the configuration.
///
/// The command backend is probed here so a missing model aborts startup
/// instead of failing on the first request.
pub async fn captioner_from_config(
    config: &GenerationConfig,
) -> Result<Arc<dyn Captioner>, KatariError> {
    match config.provider.as_str() {
        "hosted" => Ok(Arc::new(HostedCaptioner::new(config)?)),
        "server" => {
            let captioner = ServerCaptioner::new(config)?;
            if !captioner.health().await {
                return Err(KatariError::Config(format!(
                    "inference server at {} is not reachable",
                    config.endpoint
                )));
            }
            Ok(Arc::new(captioner))
        }
        "command" => {
            let captioner = CommandCaptioner::new(config);
            captioner.probe().await?;
            Ok(Arc::new(captioner))
        }
        other => Err(KatariError::Config(format!(
            "unknown generation provider: {other:?}"
        ))),
    }
}
