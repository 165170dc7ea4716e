//! ServerCaptioner - ローカル HTTP 推論サーババックエンド
//!
//! chat-completions 形の API を話すローカルサーバに画像を data URL で
//! 渡します。動画・音声は非対応。

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::GenerationConfig;
use crate::domain::MediaKind;
use crate::ports::{CaptionError, CaptionRequest, Captioner};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ServerCaptioner {
    http: reqwest::Client,
    endpoint: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl ServerCaptioner {
    pub fn new(config: &GenerationConfig) -> Result<Self, CaptionError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CaptionError::Backend(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    /// Liveness probe, usable for fail-fast startup checks.
    pub async fn health(&self) -> bool {
        match self.http.get(format!("{}/health", self.endpoint)).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl Captioner for ServerCaptioner {
    async fn describe(&self, request: CaptionRequest) -> Result<String, CaptionError> {
        if request.kind != MediaKind::Image {
            return Err(CaptionError::Unsupported);
        }

        let data_url = format!(
            "data:image/{};base64,{}",
            request.format,
            BASE64.encode(&request.media)
        );
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": request.prompt },
                    { "type": "image_url", "image_url": { "url": data_url } },
                ],
            }],
        });

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| CaptionError::Backend(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CaptionError::Backend(format!("status {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CaptionError::Backend(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default();
        if content.is_empty() {
            return Err(CaptionError::Empty);
        }
        Ok(content)
    }

    fn supports_multimedia(&self) -> bool {
        false
    }
}
