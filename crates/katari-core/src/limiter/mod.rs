//! RateLimiter - アカウント毎のレート制限と shadow ban エスカレーション
//!
//! Design:
//! - 全状態は1つの `tokio::sync::Mutex` の内側。細かいロックは使わない
//!   （ここで欲しいのは正しさで、スループットではない）。
//! - 変更があった呼び出しの末尾で毎回スナップショットを同期保存する。
//!   再起動後も ban は生きる。
//! - ban は時間では解けない。violation カウンタは毎時ゼロに戻るが、
//!   それは「次の ban までの距離」が戻るだけで、既存の ban はそのまま。
//!   解除は管理者の `unban` だけで、それは同時に永久ホワイトリスト入り。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::RateLimitConfig;
use crate::domain::{AccountId, NewStatus};
use crate::metrics::MetricsManager;
use crate::ports::{Clock, SocialClient};

/// Persisted limiter state, one record set per account.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LimiterState {
    #[serde(default)]
    minute_counts: HashMap<AccountId, u32>,
    #[serde(default)]
    hour_counts: HashMap<AccountId, u32>,
    /// Cached account creation times (fetched lazily, memoized).
    #[serde(default)]
    account_ages: HashMap<AccountId, DateTime<Utc>>,
    /// Consecutive ceiling violations since the last hourly decay.
    #[serde(default)]
    exceeded_counts: HashMap<AccountId, u32>,
    #[serde(default)]
    shadow_banned: HashSet<AccountId>,
    #[serde(default)]
    whitelist: HashSet<AccountId>,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    path: PathBuf,
    metrics: Arc<MetricsManager>,
    clock: Arc<dyn Clock>,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Load persisted state, or start fresh when the file is missing or bad.
    pub fn load(
        config: RateLimitConfig,
        path: PathBuf,
        metrics: Arc<MetricsManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = match std::fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(state) => state,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "bad limiter state file, starting fresh");
                    LimiterState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LimiterState::default(),
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to read limiter state, starting fresh");
                LimiterState::default()
            }
        };

        Self {
            config,
            path,
            metrics,
            clock,
            state: Mutex::new(state),
        }
    }

    /// Throttling check for one request by `account`.
    ///
    /// Returns whether the request may proceed. Every path that mutates
    /// state persists before returning; the shadow-banned fast path
    /// deliberately has no side effects at all.
    pub async fn allow(&self, social: &dyn SocialClient, account: &AccountId) -> bool {
        if !self.config.enabled {
            return true;
        }

        let mut state = self.state.lock().await;

        if state.shadow_banned.contains(account) && !state.whitelist.contains(account) {
            debug!(%account, "denying shadow-banned account");
            return false;
        }

        let is_new = self.classify_account(&mut state, social, account).await;
        if is_new {
            self.metrics.log_new_account_activity(account);
        }

        let (max_per_minute, max_per_hour) = if is_new {
            (
                self.config.new_account_max_per_minute,
                self.config.new_account_max_per_hour,
            )
        } else {
            (self.config.max_per_minute, self.config.max_per_hour)
        };

        let minute = state.minute_counts.get(account).copied().unwrap_or(0);
        let hour = state.hour_counts.get(account).copied().unwrap_or(0);

        if minute >= max_per_minute || hour >= max_per_hour {
            let exceeded = state.exceeded_counts.entry(account.clone()).or_default();
            *exceeded += 1;
            if *exceeded >= self.config.shadow_ban_threshold {
                self.shadow_ban(&mut state, social, account).await;
            }
            self.save(&state);
            return false;
        }

        *state.minute_counts.entry(account.clone()).or_default() += 1;
        *state.hour_counts.entry(account.clone()).or_default() += 1;
        self.save(&state);
        true
    }

    /// Is the account inside the configured new-account window?
    ///
    /// A lookup failure counts as "not new": when in doubt we fail toward
    /// the looser limit rather than punishing an account we know nothing
    /// about.
    async fn classify_account(
        &self,
        state: &mut LimiterState,
        social: &dyn SocialClient,
        account: &AccountId,
    ) -> bool {
        let created_at = match state.account_ages.get(account) {
            Some(cached) => *cached,
            None => match social.get_account(account).await {
                Ok(fetched) => {
                    state.account_ages.insert(account.clone(), fetched.created_at);
                    fetched.created_at
                }
                Err(e) => {
                    warn!(%account, error = %e, "account age lookup failed, treating as established");
                    return false;
                }
            },
        };

        self.clock.now() - created_at < Duration::days(self.config.new_account_period_days)
    }

    async fn shadow_ban(
        &self,
        state: &mut LimiterState,
        social: &dyn SocialClient,
        account: &AccountId,
    ) {
        if state.whitelist.contains(account) {
            return;
        }
        info!(%account, "shadow banning account for repeated rate limit violations");
        state.shadow_banned.insert(account.clone());
        self.metrics.log_shadow_ban(account);
        self.notify_admin(social, account).await;
    }

    async fn notify_admin(&self, social: &dyn SocialClient, account: &AccountId) {
        if self.config.admin_contact_handle.is_empty() {
            return;
        }
        let name = match social.get_account(account).await {
            Ok(fetched) => fetched.acct,
            Err(e) => {
                warn!(%account, error = %e, "could not resolve banned account for admin notice");
                account.to_string()
            }
        };
        let message = format!(
            "{} User {} has been shadow banned for exceeding rate limits.\nTo unban, reply with 'unban {}'.",
            self.config.admin_contact_handle, name, account
        );
        if let Err(e) = social.post_status(NewStatus::direct(message)).await {
            error!(error = %e, "failed to post shadow ban notification");
        }
    }

    /// Lift a ban and whitelist the account permanently.
    ///
    /// There is no un-whitelist operation on purpose: an admin vouched for
    /// the account once, and the escalation must not re-trigger.
    pub async fn unban(&self, account: &AccountId) {
        let mut state = self.state.lock().await;
        state.shadow_banned.remove(account);
        state.whitelist.insert(account.clone());
        info!(%account, "account unbanned and whitelisted");
        self.save(&state);
    }

    pub async fn is_shadow_banned(&self, account: &AccountId) -> bool {
        let state = self.state.lock().await;
        state.shadow_banned.contains(account) && !state.whitelist.contains(account)
    }

    /// Scheduled every minute: zero the per-minute counters only.
    pub async fn reset_minute_counts(&self) {
        let mut state = self.state.lock().await;
        for count in state.minute_counts.values_mut() {
            *count = 0;
        }
        self.save(&state);
    }

    /// Scheduled every hour: zero the hourly counters and decay the abuse
    /// score. Bans are untouched; decay is about future escalation only.
    pub async fn reset_hour_counts(&self) {
        let mut state = self.state.lock().await;
        for count in state.hour_counts.values_mut() {
            *count = 0;
        }
        for count in state.exceeded_counts.values_mut() {
            *count = 0;
        }
        self.save(&state);
    }

    fn save(&self, state: &LimiterState) {
        let serialized = match serde_json::to_vec_pretty(state) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to serialize limiter state");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, serialized) {
            // In-memory state stays authoritative; the next save retries.
            error!(path = %self.path.display(), error = %e, "failed to persist limiter state");
        }
    }

    #[cfg(test)]
    async fn counts(&self, account: &AccountId) -> (u32, u32, u32) {
        let state = self.state.lock().await;
        (
            state.minute_counts.get(account).copied().unwrap_or(0),
            state.hour_counts.get(account).copied().unwrap_or(0),
            state.exceeded_counts.get(account).copied().unwrap_or(0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemorySocialClient;
    use crate::ports::SystemClock;

    fn test_config() -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            max_per_minute: 2,
            max_per_hour: 10,
            new_account_max_per_minute: 1,
            new_account_max_per_hour: 2,
            new_account_period_days: 30,
            shadow_ban_threshold: 3,
            admin_contact_handle: "@admin@example.social".to_string(),
        }
    }

    fn limiter_at(path: PathBuf, config: RateLimitConfig) -> RateLimiter {
        RateLimiter::load(
            config,
            path,
            Arc::new(MetricsManager::disabled()),
            Arc::new(SystemClock),
        )
    }

    /// Social client with one established account seeded.
    fn social_with_old_account(id: &str) -> InMemorySocialClient {
        let social = InMemorySocialClient::new("katari");
        social.seed_account(id, &format!("user{id}"), Utc::now() - Duration::days(400));
        social
    }

    #[tokio::test]
    async fn two_allows_then_denial_and_one_violation() {
        let dir = tempfile::tempdir().unwrap();
        let limiter = limiter_at(dir.path().join("rl.json"), test_config());
        let social = social_with_old_account("a1");
        let account = AccountId::new("a1");

        assert!(limiter.allow(&social, &account).await);
        assert!(limiter.allow(&social, &account).await);
        assert!(!limiter.allow(&social, &account).await);

        let (minute, hour, exceeded) = limiter.counts(&account).await;
        assert_eq!((minute, hour, exceeded), (2, 2, 1));
    }

    #[tokio::test]
    async fn ban_after_threshold_and_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rl.json");
        let limiter = limiter_at(path.clone(), test_config());
        let social = social_with_old_account("a1");
        let account = AccountId::new("a1");

        limiter.allow(&social, &account).await;
        limiter.allow(&social, &account).await;
        // Exactly `shadow_ban_threshold` consecutive denials.
        for _ in 0..3 {
            assert!(!limiter.allow(&social, &account).await);
        }
        assert!(limiter.is_shadow_banned(&account).await);

        // A reload from the persisted snapshot keeps the ban.
        let reloaded = limiter_at(path, test_config());
        assert!(reloaded.is_shadow_banned(&account).await);
        assert!(!reloaded.allow(&social, &account).await);
    }

    #[tokio::test]
    async fn banned_denial_has_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let limiter = limiter_at(dir.path().join("rl.json"), test_config());
        let social = social_with_old_account("a1");
        let account = AccountId::new("a1");

        limiter.allow(&social, &account).await;
        limiter.allow(&social, &account).await;
        for _ in 0..3 {
            limiter.allow(&social, &account).await;
        }
        let before = limiter.counts(&account).await;
        assert!(!limiter.allow(&social, &account).await);
        assert_eq!(limiter.counts(&account).await, before);
    }

    #[tokio::test]
    async fn ban_notifies_admin() {
        let dir = tempfile::tempdir().unwrap();
        let limiter = limiter_at(dir.path().join("rl.json"), test_config());
        let social = social_with_old_account("a1");
        let account = AccountId::new("a1");

        limiter.allow(&social, &account).await;
        limiter.allow(&social, &account).await;
        for _ in 0..3 {
            limiter.allow(&social, &account).await;
        }

        let posted = social.posted();
        assert_eq!(posted.len(), 1);
        assert!(posted[0].content.contains("unban a1"));
        assert_eq!(posted[0].visibility, crate::domain::Visibility::Direct);
    }

    #[tokio::test]
    async fn unban_whitelists_permanently() {
        let dir = tempfile::tempdir().unwrap();
        let limiter = limiter_at(dir.path().join("rl.json"), test_config());
        let social = social_with_old_account("a1");
        let account = AccountId::new("a1");

        limiter.allow(&social, &account).await;
        limiter.allow(&social, &account).await;
        for _ in 0..3 {
            limiter.allow(&social, &account).await;
        }
        assert!(limiter.is_shadow_banned(&account).await);

        limiter.unban(&account).await;
        assert!(!limiter.is_shadow_banned(&account).await);

        // Run the whole escalation again: the whitelist blocks the ban,
        // though ceilings still throttle individual requests.
        limiter.reset_minute_counts().await;
        limiter.reset_hour_counts().await;
        limiter.allow(&social, &account).await;
        limiter.allow(&social, &account).await;
        for _ in 0..5 {
            assert!(!limiter.allow(&social, &account).await);
        }
        assert!(!limiter.is_shadow_banned(&account).await);
    }

    #[tokio::test]
    async fn minute_reset_zeroes_only_minute_counters() {
        let dir = tempfile::tempdir().unwrap();
        let limiter = limiter_at(dir.path().join("rl.json"), test_config());
        let social = social_with_old_account("a1");
        let account = AccountId::new("a1");

        limiter.allow(&social, &account).await;
        limiter.allow(&social, &account).await;
        limiter.allow(&social, &account).await; // denied, exceeded = 1

        limiter.reset_minute_counts().await;
        let (minute, hour, exceeded) = limiter.counts(&account).await;
        assert_eq!((minute, hour, exceeded), (0, 2, 1));

        limiter.reset_hour_counts().await;
        let (minute, hour, exceeded) = limiter.counts(&account).await;
        assert_eq!((minute, hour, exceeded), (0, 0, 0));
    }

    #[tokio::test]
    async fn new_accounts_get_the_stricter_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let limiter = limiter_at(dir.path().join("rl.json"), test_config());
        let social = InMemorySocialClient::new("katari");
        social.seed_account("fresh", "freshling", Utc::now() - Duration::days(2));
        let account = AccountId::new("fresh");

        // new_account_max_per_minute = 1
        assert!(limiter.allow(&social, &account).await);
        assert!(!limiter.allow(&social, &account).await);
    }

    #[tokio::test]
    async fn unknown_account_age_falls_back_to_the_looser_limit() {
        let dir = tempfile::tempdir().unwrap();
        let limiter = limiter_at(dir.path().join("rl.json"), test_config());
        // No account seeded: get_account fails, classification fails open.
        let social = InMemorySocialClient::new("katari");
        let account = AccountId::new("ghost");

        assert!(limiter.allow(&social, &account).await);
        assert!(limiter.allow(&social, &account).await);
        assert!(!limiter.allow(&social, &account).await);
    }

    #[tokio::test]
    async fn disabled_limiter_always_allows() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.enabled = false;
        let limiter = limiter_at(dir.path().join("rl.json"), config);
        let social = InMemorySocialClient::new("katari");
        let account = AccountId::new("a1");

        for _ in 0..20 {
            assert!(limiter.allow(&social, &account).await);
        }
        assert_eq!(limiter.counts(&account).await, (0, 0, 0));
    }
}
