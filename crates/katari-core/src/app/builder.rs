//! BotBuilder - 構築とワイヤリング
//!
//! # Fail-fast 設計
//! - 設定の検証は build() の先頭で行う
//! - 自アカウントの取得が通らなければ、取り込みループが始まる前に
//!   エラーで止まる（必須の外部依存に届かない = 致命的な起動エラー）

use std::sync::Arc;

use crate::KatariError;
use crate::app::bot::Bot;
use crate::config::Config;
use crate::consent::ConsentTracker;
use crate::limiter::RateLimiter;
use crate::locales::Locales;
use crate::metrics::MetricsManager;
use crate::pipeline::GenerationPipeline;
use crate::ports::{Captioner, Clock, SocialClient, SystemClock};
use crate::reminders::ReminderTracker;
use crate::replies::ReplyTracker;
use crate::summary::EventLog;

/// BotBuilder はボットを組み立てる
///
/// # 使用例
/// ```ignore
/// let bot = BotBuilder::new(config)
///     .social(social_client)
///     .captioner(captioner)
///     .build()
///     .await?;
/// ```
pub struct BotBuilder {
    config: Config,
    social: Option<Arc<dyn SocialClient>>,
    captioner: Option<Arc<dyn Captioner>>,
    clock: Arc<dyn Clock>,
    locales: Option<Locales>,
}

impl BotBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            social: None,
            captioner: None,
            clock: Arc::new(SystemClock),
            locales: None,
        }
    }

    pub fn social(mut self, social: Arc<dyn SocialClient>) -> Self {
        self.social = Some(social);
        self
    }

    pub fn captioner(mut self, captioner: Arc<dyn Captioner>) -> Self {
        self.captioner = Some(captioner);
        self
    }

    /// Override the clock (tests).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override the locale table instead of loading it from disk.
    pub fn locales(mut self, locales: Locales) -> Self {
        self.locales = Some(locales);
        self
    }

    pub async fn build(self) -> Result<Arc<Bot>, KatariError> {
        self.config.validate()?;

        let social = self
            .social
            .ok_or_else(|| KatariError::Config("a social client is required".to_string()))?;
        let captioner = self
            .captioner
            .ok_or_else(|| KatariError::Config("a captioner is required".to_string()))?;

        // Fatal startup check: the one external dependency we cannot run
        // without. Everything after this degrades gracefully instead.
        let me = social.me().await?;

        let locales = match self.locales {
            Some(locales) => Arc::new(locales),
            None => Arc::new(Locales::load(&self.config.localization.file)?),
        };

        let metrics = Arc::new(MetricsManager::new(
            self.config.metrics.enabled,
            self.config.storage.metrics_path(),
        ));
        // The durable text log feeds the weekly summary, so it shares that
        // feature's switch.
        let event_log = Arc::new(EventLog::new(
            self.config.weekly_summary.enabled,
            self.config.storage.event_log_path(),
        ));
        let limiter = Arc::new(RateLimiter::load(
            self.config.rate_limit.clone(),
            self.config.storage.rate_limiter_path(),
            metrics.clone(),
            self.clock.clone(),
        ));
        let consent = Arc::new(ConsentTracker::load(
            self.config.storage.consent_path(),
            self.clock.clone(),
        ));
        let replies = Arc::new(ReplyTracker::new(self.clock.clone()));
        let reminders = Arc::new(ReminderTracker::new(self.clock.clone()));

        let pipeline = Arc::new(GenerationPipeline::new(
            &self.config,
            social.clone(),
            captioner.clone(),
            limiter.clone(),
            metrics.clone(),
            event_log.clone(),
            locales.clone(),
            replies.clone(),
            reminders.clone(),
        ));

        Ok(Arc::new(Bot::new(
            self.config,
            me,
            social,
            captioner,
            locales,
            limiter,
            consent,
            replies,
            reminders,
            metrics,
            event_log,
            pipeline,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{FixedCaptioner, InMemorySocialClient};

    #[tokio::test]
    async fn build_fails_without_a_social_client() {
        let result = BotBuilder::new(Config::default())
            .captioner(Arc::new(FixedCaptioner::new("x")))
            .build()
            .await;
        assert!(matches!(result, Err(KatariError::Config(_))));
    }

    #[tokio::test]
    async fn build_fails_on_invalid_config() {
        let mut config = Config::default();
        config.generation.provider = "abacus".to_string();
        let result = BotBuilder::new(config)
            .social(Arc::new(InMemorySocialClient::new("katari")))
            .captioner(Arc::new(FixedCaptioner::new("x")))
            .build()
            .await;
        assert!(matches!(result, Err(KatariError::Config(_))));
    }
}
