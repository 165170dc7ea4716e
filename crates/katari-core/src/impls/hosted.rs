//! HostedCaptioner - ホスト型マルチモーダル API バックエンド
//!
//! 画像はリクエストにインライン（base64）で載せ、動画と音声は
//! upload → ready になるまでポーリング → 参照付きで生成、という
//! 非同期アップロードパターンを使います。

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::GenerationConfig;
use crate::domain::MediaKind;
use crate::ports::{CaptionError, CaptionRequest, Captioner};

const UPLOAD_POLL_INTERVAL: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct HostedCaptioner {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct FileResponse {
    id: String,
    state: String,
}

impl HostedCaptioner {
    pub fn new(config: &GenerationConfig) -> Result<Self, CaptionError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CaptionError::Backend(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    async fn generate(&self, body: serde_json::Value) -> Result<String, CaptionError> {
        let response = self
            .http
            .post(format!("{}/v1/generate", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CaptionError::Backend(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CaptionError::Backend(format!("status {status}: {body}")));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CaptionError::Backend(e.to_string()))?;
        if parsed.text.is_empty() {
            return Err(CaptionError::Empty);
        }
        Ok(parsed.text)
    }

    /// Upload media and poll until the server reports it ready.
    async fn upload_and_wait(&self, request: &CaptionRequest) -> Result<String, CaptionError> {
        let response = self
            .http
            .post(format!("{}/v1/files", self.endpoint))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/octet-stream")
            .header("x-media-format", &request.format)
            .body(request.media.clone())
            .send()
            .await
            .map_err(|e| CaptionError::Backend(e.to_string()))?;

        let mut file: FileResponse = response
            .json()
            .await
            .map_err(|e| CaptionError::Backend(e.to_string()))?;

        while file.state == "processing" {
            tokio::time::sleep(UPLOAD_POLL_INTERVAL).await;
            file = self
                .http
                .get(format!("{}/v1/files/{}", self.endpoint, file.id))
                .bearer_auth(&self.api_key)
                .send()
                .await
                .map_err(|e| CaptionError::Backend(e.to_string()))?
                .json()
                .await
                .map_err(|e| CaptionError::Backend(e.to_string()))?;
        }

        if file.state != "ready" {
            return Err(CaptionError::Backend(format!(
                "upload ended in state {:?}",
                file.state
            )));
        }
        Ok(file.id)
    }
}

#[async_trait]
impl Captioner for HostedCaptioner {
    async fn describe(&self, request: CaptionRequest) -> Result<String, CaptionError> {
        match request.kind {
            MediaKind::Image => {
                let body = json!({
                    "model": self.model,
                    "prompt": request.prompt,
                    "language": request.language,
                    "media": {
                        "format": request.format,
                        "data": BASE64.encode(&request.media),
                    },
                });
                self.generate(body).await
            }
            MediaKind::Video | MediaKind::Gifv | MediaKind::Audio => {
                let file_id = self.upload_and_wait(&request).await?;
                let body = json!({
                    "model": self.model,
                    "prompt": request.prompt,
                    "language": request.language,
                    "file_id": file_id,
                });
                self.generate(body).await
            }
            MediaKind::Unknown => Err(CaptionError::Unsupported),
        }
    }

    fn supports_multimedia(&self) -> bool {
        true
    }
}
