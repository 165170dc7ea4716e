//! GenerationPipeline - 添付ごとの fan-out / fan-in と返信の合成
//!
//! 1投稿につき: 添付ごとに独立タスクを起こし（fan-out）、全タスクの完了を
//! JoinSet で待ち合わせて（fan-in）、断片を1つの返信に合成して投稿します。
//!
//! Design:
//! - 各タスクはまず「依頼者」のレート制限を通る。拒否されたタスクの寄与は
//!   ローカライズ済みの断片1つで、生成呼び出しは起きない。
//! - 断片リストは Mutex 付きの共有 Vec。添付間の順序は保証しない。
//! - barrier がブロックするのはこの投稿の返信だけ。取り込みループは
//!   次のイベントを並行して処理している（呼び出し側が spawn する）。
//! - 元投稿が生成中に消されるレースは未解決のまま（DESIGN.md 参照）。
//!   タスクは途中キャンセルせず完走させる。

use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::domain::{AccountId, Attachment, MediaKind, NewStatus, Status, Visibility};
use crate::limiter::RateLimiter;
use crate::locales::Locales;
use crate::metrics::MetricsManager;
use crate::ports::{CaptionRequest, Captioner, SocialClient};
use crate::reminders::ReminderTracker;
use crate::replies::ReplyTracker;
use crate::summary::EventLog;
use crate::text::title_case;

/// Visual separator between fragments in the combined reply.
const FRAGMENT_SEPARATOR: &str = "\n―\n";

pub struct GenerationPipeline {
    social: Arc<dyn SocialClient>,
    captioner: Arc<dyn Captioner>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<MetricsManager>,
    event_log: Arc<EventLog>,
    locales: Arc<Locales>,
    replies: Arc<ReplyTracker>,
    reminders: Arc<ReminderTracker>,

    bot_username: String,
    provider_label: String,
    reply_visibility: Visibility,
    reminders_enabled: bool,
    boilerplate: Regex,
}

impl GenerationPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        social: Arc<dyn SocialClient>,
        captioner: Arc<dyn Captioner>,
        limiter: Arc<RateLimiter>,
        metrics: Arc<MetricsManager>,
        event_log: Arc<EventLog>,
        locales: Arc<Locales>,
        replies: Arc<ReplyTracker>,
        reminders: Arc<ReminderTracker>,
    ) -> Self {
        Self {
            social,
            captioner,
            limiter,
            metrics,
            event_log,
            locales,
            replies,
            reminders,
            bot_username: config.server.username.clone(),
            provider_label: title_case(&config.generation.provider),
            reply_visibility: config.behavior.reply_visibility,
            reminders_enabled: config.reminders.enabled,
            boilerplate: Regex::new(
                r"(?i)here's alt text (describing|for) the (image|video|audio):?\s*",
            )
            .expect("boilerplate pattern must compile"),
        }
    }

    /// Describe every attachment of `original` and reply to `request`.
    ///
    /// `request` is the post being answered: the mention that summoned us,
    /// the consent response, or `original` itself for timeline posts.
    pub async fn run(self: Arc<Self>, original: Status, request: Status) {
        let requester = request.account.clone();
        let language = request.language.clone();

        self.metrics.log_request(&requester.id);

        let fragments: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let described_notice_sent = Arc::new(AtomicBool::new(false));

        let mut tasks = JoinSet::new();
        for attachment in original.media_attachments.clone() {
            let pipeline = Arc::clone(&self);
            let fragments = Arc::clone(&fragments);
            let described_notice_sent = Arc::clone(&described_notice_sent);
            let requester_id = requester.id.clone();
            let language = language.clone();
            tasks.spawn(async move {
                pipeline
                    .describe_attachment(
                        attachment,
                        requester_id,
                        language,
                        fragments,
                        described_notice_sent,
                    )
                    .await;
            });
        }

        // Fan-in: every attachment task finishes before we compose.
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "attachment task panicked");
            }
        }

        let fragments = fragments.lock().unwrap().join(FRAGMENT_SEPARATOR);
        let attribution = self
            .locales
            .response(language.as_deref(), "provided_by")
            .replace("{bot}", &self.bot_username)
            .replace("{provider}", &self.provider_label);
        let body = format!("@{} {}\n\n{}", requester.acct, fragments, attribution);

        let reply = NewStatus {
            text: body,
            in_reply_to_id: Some(request.id.clone()),
            visibility: self.reply_visibility.more_restrictive(request.visibility),
            language: language.clone(),
            spoiler_text: carry_content_warning(&original.spoiler_text),
        };

        match self.social.post_status(reply).await {
            Ok(posted) => {
                info!(original = %original.id, reply = %posted.id, "posted combined description");
                self.replies.register(original.id.clone(), posted.id).await;
                if self.reminders_enabled {
                    self.reminders
                        .queue_check(original.id, requester.id)
                        .await;
                }
            }
            Err(e) => error!(original = %original.id, error = %e, "failed to post reply"),
        }
    }

    /// One attachment's contribution to the combined reply.
    async fn describe_attachment(
        &self,
        attachment: Attachment,
        requester: AccountId,
        language: Option<String>,
        fragments: Arc<Mutex<Vec<String>>>,
        described_notice_sent: Arc<AtomicBool>,
    ) {
        let lang = language.as_deref();
        let push = |fragment: String| fragments.lock().unwrap().push(fragment);

        // Throttle on the requesting account, not the subject's author.
        if !self.limiter.allow(self.social.as_ref(), &requester).await {
            warn!(%requester, "request dropped by rate limiter");
            self.metrics.log_rate_limit_hit(&requester);
            push(self.locales.response(lang, "rate_limited"));
            return;
        }

        if attachment.has_description() {
            // Emitted at most once per post, however many described
            // attachments there are.
            if !described_notice_sent.swap(true, Ordering::SeqCst) {
                push(self.locales.response(lang, "already_has_description"));
            }
            return;
        }

        let prompt_key = match attachment.kind {
            MediaKind::Image => "generate_alt_text",
            MediaKind::Video | MediaKind::Gifv | MediaKind::Audio
                if self.captioner.supports_multimedia() =>
            {
                if attachment.kind == MediaKind::Audio {
                    "generate_audio_alt_text"
                } else {
                    "generate_video_alt_text"
                }
            }
            _ => {
                push(self.locales.response(lang, "unsupported_file"));
                return;
            }
        };

        let started = Instant::now();
        match self.generate(&attachment, prompt_key, language.clone()).await {
            Ok(text) => {
                let elapsed_ms = started.elapsed().as_millis() as i64;
                self.metrics.log_successful_generation(
                    &requester,
                    attachment.kind.as_str(),
                    elapsed_ms,
                );
                self.event_log.log_event(generation_event_type(attachment.kind));
                push(self.post_process(&text));
            }
            Err(e) => {
                warn!(url = %attachment.url, error = %e, "description generation failed");
                push(self.locales.response(lang, "alt_text_error"));
            }
        }
    }

    async fn generate(
        &self,
        attachment: &Attachment,
        prompt_key: &str,
        language: Option<String>,
    ) -> Result<String, crate::KatariError> {
        let media = self.social.fetch_media(&attachment.url).await?;
        let request = CaptionRequest {
            prompt: self.locales.prompt(language.as_deref(), prompt_key),
            media,
            format: format_from_url(&attachment.url),
            kind: attachment.kind,
            language,
        };
        let text = self.captioner.describe(request).await?;
        if text.trim().is_empty() {
            return Err(crate::KatariError::Other("empty description".to_string()));
        }
        Ok(text)
    }

    /// Strip known lead-in boilerplate and defuse mention sigils.
    fn post_process(&self, text: &str) -> String {
        let text = self.boilerplate.replace_all(text, "");
        text.replace('@', "[@]").trim().to_string()
    }
}

/// Carry the original content warning over to the reply.
fn carry_content_warning(spoiler: &str) -> String {
    if spoiler.is_empty() || spoiler.starts_with("re:") {
        spoiler.to_string()
    } else {
        format!("re: {spoiler}")
    }
}

fn generation_event_type(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Video | MediaKind::Gifv => "video_alt_text_generated",
        MediaKind::Audio => "audio_alt_text_generated",
        _ => "alt_text_generated",
    }
}

/// Format tag from the attachment URL's extension.
fn format_from_url(url: &str) -> String {
    url.rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, extension)| extension.to_lowercase())
        .filter(|extension| !extension.is_empty() && extension.len() <= 5)
        .unwrap_or_else(|| "bin".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::domain::{AccountId, StatusId};
    use crate::impls::{FixedCaptioner, InMemorySocialClient};
    use crate::ports::SystemClock;
    use chrono::{Duration, Utc};

    struct Fixture {
        pipeline: Arc<GenerationPipeline>,
        social: Arc<InMemorySocialClient>,
        captioner: Arc<FixedCaptioner>,
        metrics: Arc<MetricsManager>,
        replies: Arc<ReplyTracker>,
        reminders: Arc<ReminderTracker>,
        _dir: tempfile::TempDir,
    }

    fn fixture(captioner: FixedCaptioner) -> Fixture {
        fixture_with(captioner, |_| {})
    }

    fn fixture_with(captioner: FixedCaptioner, tweak: impl FnOnce(&mut Config)) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.server.username = "katari".to_string();
        config.generation.provider = "hosted".to_string();
        config.rate_limit = RateLimitConfig {
            enabled: true,
            max_per_minute: 100,
            max_per_hour: 100,
            new_account_max_per_minute: 100,
            new_account_max_per_hour: 100,
            new_account_period_days: 30,
            shadow_ban_threshold: 50,
            admin_contact_handle: String::new(),
        };
        config.reminders.enabled = true;
        tweak(&mut config);

        let clock: Arc<SystemClock> = Arc::new(SystemClock);
        let social = Arc::new(InMemorySocialClient::new("katari"));
        social.seed_account("req", "requester", Utc::now() - Duration::days(200));
        let captioner = Arc::new(captioner);
        let metrics = Arc::new(MetricsManager::new(true, dir.path().join("metrics.json")));
        let limiter = Arc::new(RateLimiter::load(
            config.rate_limit.clone(),
            dir.path().join("rl.json"),
            metrics.clone(),
            clock.clone(),
        ));
        let event_log = Arc::new(EventLog::new(true, dir.path().join("log.ndjson")));
        let replies = Arc::new(ReplyTracker::new(clock.clone()));
        let reminders = Arc::new(ReminderTracker::new(clock.clone()));

        let pipeline = Arc::new(GenerationPipeline::new(
            &config,
            social.clone(),
            captioner.clone(),
            limiter,
            metrics.clone(),
            event_log,
            Arc::new(Locales::builtin()),
            replies.clone(),
            reminders.clone(),
        ));

        Fixture {
            pipeline,
            social,
            captioner,
            metrics,
            replies,
            reminders,
            _dir: dir,
        }
    }

    fn attachment(kind: MediaKind, url: &str, description: Option<&str>) -> Attachment {
        Attachment {
            kind,
            url: url.to_string(),
            description: description.map(str::to_string),
        }
    }

    fn post(
        social: &InMemorySocialClient,
        id: &str,
        attachments: Vec<Attachment>,
        visibility: Visibility,
        spoiler: &str,
    ) -> Status {
        for a in &attachments {
            social.seed_media(&a.url, vec![0u8; 16]);
        }
        let account = crate::domain::Account {
            id: AccountId::new("req"),
            acct: "requester".to_string(),
            bot: false,
            note: String::new(),
            created_at: Utc::now() - Duration::days(200),
        };
        let status = Status {
            id: StatusId::new(id),
            account,
            content: String::new(),
            language: Some("en".to_string()),
            visibility,
            spoiler_text: spoiler.to_string(),
            in_reply_to_id: None,
            media_attachments: attachments,
        };
        social.seed_status(status.clone());
        status
    }

    #[tokio::test]
    async fn single_image_posts_generated_text_with_mention_and_attribution() {
        let f = fixture(FixedCaptioner::new("A red bird on a wire."));
        let original = post(
            &f.social,
            "p1",
            vec![attachment(MediaKind::Image, "https://m.example/a.png", None)],
            Visibility::Public,
            "",
        );

        f.pipeline.clone().run(original.clone(), original).await;

        assert_eq!(f.captioner.call_count(), 1);
        let posted = f.social.posted();
        assert_eq!(posted.len(), 1);
        let reply = &posted[0];
        assert!(reply.content.starts_with("@requester "));
        assert!(reply.content.contains("A red bird on a wire."));
        assert!(reply.content.contains("Described by @katari using Hosted"));
        assert_eq!(reply.in_reply_to_id, Some(StatusId::new("p1")));

        // Bookkeeping after a successful post.
        assert_eq!(f.replies.len().await, 1);
        assert_eq!(f.reminders.len().await, 1);
        let events: Vec<String> = f.metrics.recorded().into_iter().map(|e| e.event_type).collect();
        assert!(events.contains(&"request".to_string()));
        assert!(events.contains(&"successful_generation".to_string()));
    }

    #[tokio::test]
    async fn three_attachments_yield_one_reply_with_three_fragments() {
        let f = fixture(FixedCaptioner::new("described"));
        let original = post(
            &f.social,
            "p1",
            vec![
                attachment(MediaKind::Image, "https://m.example/a.png", None),
                attachment(MediaKind::Image, "https://m.example/b.jpg", None),
                attachment(MediaKind::Audio, "https://m.example/c.mp3", None),
            ],
            Visibility::Public,
            "",
        );

        f.pipeline.clone().run(original.clone(), original).await;

        let posted = f.social.posted();
        assert_eq!(posted.len(), 1);
        let body = &posted[0].content;
        assert_eq!(body.matches('―').count(), 2); // three fragments, two separators
        assert_eq!(body.matches("Described by").count(), 1);
        assert_eq!(f.captioner.call_count(), 3);
    }

    #[tokio::test]
    async fn rate_limited_task_contributes_fragment_without_generation() {
        let f = fixture_with(FixedCaptioner::new("unused"), |config| {
            config.rate_limit.max_per_minute = 0;
            config.rate_limit.shadow_ban_threshold = 50;
        });
        let original = post(
            &f.social,
            "p1",
            vec![attachment(MediaKind::Image, "https://m.example/a.png", None)],
            Visibility::Public,
            "",
        );

        f.pipeline.clone().run(original.clone(), original).await;

        assert_eq!(f.captioner.call_count(), 0);
        let reply = &f.social.posted()[0];
        assert!(reply.content.contains("too many requests"));
        let events: Vec<String> = f.metrics.recorded().into_iter().map(|e| e.event_type).collect();
        assert!(events.contains(&"rate_limit_hit".to_string()));
    }

    #[tokio::test]
    async fn already_described_notice_appears_at_most_once() {
        let f = fixture(FixedCaptioner::new("described"));
        let original = post(
            &f.social,
            "p1",
            vec![
                attachment(MediaKind::Image, "https://m.example/a.png", Some("hand written")),
                attachment(MediaKind::Image, "https://m.example/b.png", Some("also written")),
                attachment(MediaKind::Image, "https://m.example/c.png", None),
            ],
            Visibility::Public,
            "",
        );

        f.pipeline.clone().run(original.clone(), original).await;

        let body = &f.social.posted()[0].content;
        let notice = Locales::builtin().response(Some("en"), "already_has_description");
        assert_eq!(body.matches(notice.as_str()).count(), 1);
        // Only the undescribed attachment reached the backend.
        assert_eq!(f.captioner.call_count(), 1);
    }

    #[tokio::test]
    async fn multimedia_without_backend_support_is_unsupported() {
        let f = fixture(FixedCaptioner::new("unused").without_multimedia());
        let original = post(
            &f.social,
            "p1",
            vec![attachment(MediaKind::Video, "https://m.example/v.mp4", None)],
            Visibility::Public,
            "",
        );

        f.pipeline.clone().run(original.clone(), original).await;

        assert_eq!(f.captioner.call_count(), 0);
        let notice = Locales::builtin().response(Some("en"), "unsupported_file");
        assert!(f.social.posted()[0].content.contains(notice.as_str()));
    }

    #[tokio::test]
    async fn backend_failure_maps_to_localized_fallback() {
        let f = fixture(FixedCaptioner::failing());
        let original = post(
            &f.social,
            "p1",
            vec![attachment(MediaKind::Image, "https://m.example/a.png", None)],
            Visibility::Public,
            "",
        );

        f.pipeline.clone().run(original.clone(), original).await;

        let fallback = Locales::builtin().response(Some("en"), "alt_text_error");
        assert!(f.social.posted()[0].content.contains(fallback.as_str()));
        // Reminder bookkeeping still happens for fallback replies.
        assert_eq!(f.reminders.len().await, 1);
    }

    #[tokio::test]
    async fn reply_visibility_is_the_stricter_of_policy_and_original() {
        let f = fixture(FixedCaptioner::new("described")); // policy: unlisted
        let original = post(
            &f.social,
            "p1",
            vec![attachment(MediaKind::Image, "https://m.example/a.png", None)],
            Visibility::Private,
            "",
        );

        f.pipeline.clone().run(original.clone(), original).await;
        assert_eq!(f.social.posted()[0].visibility, Visibility::Private);
    }

    #[tokio::test]
    async fn content_warning_is_carried_with_re_prefix() {
        let f = fixture(FixedCaptioner::new("described"));
        let original = post(
            &f.social,
            "p1",
            vec![attachment(MediaKind::Image, "https://m.example/a.png", None)],
            Visibility::Public,
            "eye contact",
        );

        f.pipeline.clone().run(original.clone(), original).await;
        assert_eq!(f.social.posted()[0].spoiler_text, "re: eye contact");

        assert_eq!(carry_content_warning("re: already"), "re: already");
        assert_eq!(carry_content_warning(""), "");
    }

    #[test]
    fn post_processing_strips_boilerplate_and_escapes_mentions() {
        let f = fixture(FixedCaptioner::new("unused"));
        assert_eq!(
            f.pipeline
                .post_process("Here's alt text describing the image: a cat, by @artist"),
            "a cat, by [@]artist"
        );
        assert_eq!(
            f.pipeline.post_process("  Here's alt text for the video: waves  "),
            "waves"
        );
    }

    #[test]
    fn format_is_derived_from_the_url() {
        assert_eq!(format_from_url("https://m.example/photo.PNG"), "png");
        assert_eq!(format_from_url("https://m.example/clip.mp4"), "mp4");
        assert_eq!(format_from_url("https://m.example/noext"), "bin");
    }
}
