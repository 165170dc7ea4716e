//! Bot - 取り込みループとイベントハンドラ
//!
//! イベントは到着順に1件ずつ処理します。ただし生成パイプラインの起動は
//! spawn して in-flight 集合に入れるので、ある投稿の fan-out barrier が
//! 次のイベントの取り込みを塞ぐことはありません。

use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::consent::{ConsentTracker, Resolution};
use crate::domain::{
    Account, MediaKind, NewStatus, Notification, Status, StatusId, StreamEvent,
};
use crate::limiter::RateLimiter;
use crate::locales::Locales;
use crate::metrics::MetricsManager;
use crate::pipeline::GenerationPipeline;
use crate::ports::{Captioner, SocialClient};
use crate::reminders::ReminderTracker;
use crate::replies::ReplyTracker;
use crate::summary::EventLog;
use crate::text::strip_html;

pub struct Bot {
    pub(crate) config: Config,
    pub(crate) me: Account,
    pub(crate) social: Arc<dyn SocialClient>,
    pub(crate) captioner: Arc<dyn Captioner>,
    pub(crate) locales: Arc<Locales>,
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) consent: Arc<ConsentTracker>,
    pub(crate) replies: Arc<ReplyTracker>,
    pub(crate) reminders: Arc<ReminderTracker>,
    pub(crate) metrics: Arc<MetricsManager>,
    pub(crate) event_log: Arc<EventLog>,
    pub(crate) pipeline: Arc<GenerationPipeline>,
    /// Spawned generation pipelines; joined on drain/shutdown.
    inflight: Mutex<JoinSet<()>>,
}

impl Bot {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: Config,
        me: Account,
        social: Arc<dyn SocialClient>,
        captioner: Arc<dyn Captioner>,
        locales: Arc<Locales>,
        limiter: Arc<RateLimiter>,
        consent: Arc<ConsentTracker>,
        replies: Arc<ReplyTracker>,
        reminders: Arc<ReminderTracker>,
        metrics: Arc<MetricsManager>,
        event_log: Arc<EventLog>,
        pipeline: Arc<GenerationPipeline>,
    ) -> Self {
        Self {
            config,
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
            inflight: Mutex::new(JoinSet::new()),
        }
    }

    /// Main ingestion loop: one event at a time, in arrival order.
    pub async fn run(&self, mut events: mpsc::Receiver<StreamEvent>) {
        info!("ingestion loop started");
        while let Some(event) = events.recv().await {
            self.dispatch(event).await;
        }
        info!("event stream closed, draining in-flight work");
        self.drain().await;
    }

    pub async fn dispatch(&self, event: StreamEvent) {
        match event {
            StreamEvent::Mention(notification) => self.handle_mention(notification).await,
            StreamEvent::Follow(account) => self.handle_follow(account).await,
            StreamEvent::Update(status) => self.handle_update(status).await,
            StreamEvent::Delete(status_id) => {
                self.replies.on_delete(self.social.as_ref(), &status_id).await;
            }
            StreamEvent::Error(message) => warn!(message = %message, "stream error event"),
        }
    }

    /// Wait for every spawned pipeline to finish.
    pub async fn drain(&self) {
        let mut inflight = self.inflight.lock().await;
        while let Some(result) = inflight.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "pipeline task panicked");
            }
        }
    }

    /// Launch the pipeline without blocking the ingestion loop.
    async fn spawn_pipeline(&self, original: Status, request: Status) {
        let mut inflight = self.inflight.lock().await;
        // Reap whatever already finished so the set does not grow unbounded.
        while inflight.try_join_next().is_some() {}
        inflight.spawn(self.pipeline.clone().run(original, request));
    }

    async fn handle_mention(&self, notification: Notification) {
        // Admin commands ride on ordinary mentions.
        if !self.config.rate_limit.admin_contact_handle.is_empty()
            && format!("@{}", notification.account.acct) == self.config.rate_limit.admin_contact_handle
        {
            self.handle_admin_command(&notification.status).await;
        }

        // A mention that replies to one of our consent asks is a consent
        // response: mention -> consent ask (parent) -> original (grandparent).
        if let Some(parent_id) = notification.status.in_reply_to_id.clone() {
            match self.social.get_status(&parent_id).await {
                Ok(parent) => {
                    if let Some(grandparent_id) = parent.in_reply_to_id.clone()
                        && self.consent.is_pending(&grandparent_id).await
                    {
                        self.handle_consent_response(grandparent_id, notification.status)
                            .await;
                        return;
                    }
                }
                Err(e) => debug!(parent = %parent_id, error = %e, "could not fetch mention parent"),
            }
        }

        self.handle_description_request(notification).await;
    }

    /// The ordinary mention flow: somebody asked us to describe a post.
    async fn handle_description_request(&self, notification: Notification) {
        if self.is_dni(&notification.account) {
            debug!(account = %notification.account.acct, "skipping DNI account");
            return;
        }

        let Some(original_id) = notification.status.in_reply_to_id.clone() else {
            // Bare mention with nothing to describe.
            return;
        };

        let original = match self.social.get_status(&original_id).await {
            Ok(original) => original,
            Err(e) => {
                warn!(original = %original_id, error = %e, "could not fetch original post");
                return;
            }
        };

        if original.media_attachments.is_empty() {
            return;
        }

        let requester_is_author = original.account.id == notification.account.id;
        if requester_is_author || !self.config.behavior.ask_for_consent {
            self.spawn_pipeline(original, notification.status).await;
        } else {
            self.request_consent(original, notification).await;
        }
    }

    /// Ask the author for permission to describe their post.
    async fn request_consent(&self, original: Status, notification: Notification) {
        let needs_description = original
            .media_attachments
            .iter()
            .any(|attachment| !attachment.has_description() && self.media_eligible(attachment.kind));
        if !needs_description {
            return;
        }

        // `begin` refusing means a request is already pending; asking again
        // would just spam the author.
        if !self
            .consent
            .begin(original.id.clone(), notification.status.id.clone())
            .await
        {
            return;
        }

        let message = format!(
            "@{} {}",
            original.account.acct,
            self.locales
                .response(notification.status.language.as_deref(), "consent_request")
                .replace("{requester}", &format!("@{}", notification.account.acct)),
        );
        let ask = NewStatus {
            text: message,
            in_reply_to_id: Some(original.id.clone()),
            visibility: original.visibility,
            language: notification.status.language.clone(),
            spoiler_text: String::new(),
        };
        if let Err(e) = self.social.post_status(ask).await {
            error!(original = %original.id, error = %e, "failed to post consent request");
        }
    }

    async fn handle_consent_response(&self, original_id: StatusId, response: Status) {
        let original = match self.social.get_status(&original_id).await {
            Ok(original) => original,
            Err(e) => {
                warn!(original = %original_id, error = %e, "could not fetch post for consent response");
                return;
            }
        };

        let resolution = self
            .consent
            .resolve(
                &original_id,
                &original.account.id,
                &response.account.id,
                &response.content,
            )
            .await;

        match resolution {
            Resolution::Granted => {
                self.metrics.log_consent_request(&original.account.id, true);
                self.spawn_pipeline(original, response).await;
            }
            Resolution::Denied => {
                self.metrics.log_consent_request(&original.account.id, false);
            }
            Resolution::Unauthorized => {}
        }
    }

    /// `unban <accountId>` from the configured admin handle.
    async fn handle_admin_command(&self, status: &Status) {
        let text = strip_html(&status.content).to_lowercase();
        let parts: Vec<&str> = text.split_whitespace().collect();
        if parts.len() != 3 || parts[1] != "unban" {
            return;
        }

        let target = crate::domain::AccountId::new(parts[2]);
        self.limiter.unban(&target).await;
        self.metrics.log_unban(&target);
        info!(%target, "admin unbanned account");

        let confirmation = NewStatus {
            text: format!(
                "{} User {} has been unbanned and added to the whitelist.",
                self.config.rate_limit.admin_contact_handle, target
            ),
            in_reply_to_id: Some(status.id.clone()),
            visibility: crate::domain::Visibility::Direct,
            language: None,
            spoiler_text: String::new(),
        };
        if let Err(e) = self.social.post_status(confirmation).await {
            error!(error = %e, "failed to confirm unban");
        }
    }

    async fn handle_follow(&self, account: Account) {
        if !self.config.behavior.follow_back {
            return;
        }
        if let Err(e) = self.social.follow(&account.id).await {
            error!(account = %account.acct, error = %e, "failed to follow back");
            return;
        }
        info!(account = %account.acct, "followed back");
        self.event_log.log_event("new_follower");
        self.metrics.log_follow(&account.id);
    }

    /// A new post on the timeline: describe it if its media lacks
    /// descriptions, or credit the author if they wrote their own.
    async fn handle_update(&self, status: Status) {
        if status.account.acct == self.me.acct {
            return;
        }

        for attachment in &status.media_attachments {
            if !self.media_eligible(attachment.kind) {
                continue;
            }
            if attachment.has_description() {
                self.event_log
                    .log_event_with_username("human_written_alt_text", &status.account.acct);
            } else {
                // The post itself is the reply target: self-request context.
                self.spawn_pipeline(status.clone(), status.clone()).await;
                break;
            }
        }
    }

    fn media_eligible(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Image => true,
            MediaKind::Video | MediaKind::Gifv | MediaKind::Audio => {
                self.captioner.supports_multimedia()
            }
            MediaKind::Unknown => false,
        }
    }

    /// Do-Not-Interact filter: ourselves, bots (when configured) and
    /// accounts whose note carries an opt-out tag.
    fn is_dni(&self, account: &Account) -> bool {
        if account.acct == self.me.acct {
            return true;
        }
        if account.bot && self.config.dni.ignore_bots {
            return true;
        }
        self.config
            .dni
            .tags
            .iter()
            .any(|tag| account.note.contains(tag.as_str()))
    }
}
