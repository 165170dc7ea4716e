//! CommandCaptioner - ローカルのコマンドラインモデルバックエンド
//!
//! 画像を一時ファイルに書き、`<command> run <model> "<prompt> <path>"` を
//! 実行して標準出力を説明文として回収します。動画・音声は非対応。

use std::path::PathBuf;
use tokio::process::Command;
use ulid::Ulid;

use async_trait::async_trait;

use crate::config::GenerationConfig;
use crate::domain::MediaKind;
use crate::ports::{CaptionError, CaptionRequest, Captioner};

pub struct CommandCaptioner {
    command: String,
    model: String,
}

impl CommandCaptioner {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            command: config.command.clone(),
            model: config.model.clone(),
        }
    }

    /// Check that the command is installed and the model is pulled.
    ///
    /// Meant to run once at startup so a missing model aborts before the
    /// ingestion loop starts.
    pub async fn probe(&self) -> Result<(), CaptionError> {
        let output = Command::new(&self.command)
            .arg("list")
            .output()
            .await
            .map_err(|e| CaptionError::Backend(format!("{} not runnable: {e}", self.command)))?;
        let listing = String::from_utf8_lossy(&output.stdout);
        if !listing.contains(&self.model) {
            return Err(CaptionError::Backend(format!(
                "model {} not found; install it with: {} pull {}",
                self.model, self.command, self.model
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Captioner for CommandCaptioner {
    async fn describe(&self, request: CaptionRequest) -> Result<String, CaptionError> {
        if request.kind != MediaKind::Image {
            return Err(CaptionError::Unsupported);
        }

        let path: PathBuf =
            std::env::temp_dir().join(format!("katari-{}.{}", Ulid::new(), request.format));
        tokio::fs::write(&path, &request.media)
            .await
            .map_err(|e| CaptionError::Backend(format!("temp file write failed: {e}")))?;

        let result = Command::new(&self.command)
            .arg("run")
            .arg(&self.model)
            .arg(format!("{} {}", request.prompt, path.display()))
            .output()
            .await;

        // Best effort cleanup before looking at the result.
        let _ = tokio::fs::remove_file(&path).await;

        let output = result.map_err(|e| CaptionError::Backend(e.to_string()))?;
        if !output.status.success() {
            return Err(CaptionError::Backend(format!(
                "command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Err(CaptionError::Empty);
        }
        Ok(text)
    }

    fn supports_multimedia(&self) -> bool {
        false
    }
}
