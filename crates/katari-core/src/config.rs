//! Configuration - TOML 設定ファイルの読み込みと起動時検証
//!
//! すべてのフィールドに既定値があるので、設定ファイルが無くても起動できます。
//! 壊れた値は `load` の中の fail-fast 検証で弾きます（取り込みループが
//! 走り出してから死ぬより、起動時に死ぬ方が親切）。

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::KatariError;
use crate::domain::Visibility;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub generation: GenerationConfig,
    pub localization: LocalizationConfig,
    pub dni: DniConfig,
    pub behavior: BehaviorConfig,
    pub weekly_summary: WeeklySummaryConfig,
    pub metrics: MetricsConfig,
    pub rate_limit: RateLimitConfig,
    pub reminders: RemindersConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    pub access_token: String,
    /// The bot's own handle, without the leading `@`.
    pub username: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            access_token: String::new(),
            username: "katari".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// One of "hosted", "command", "server".
    pub provider: String,
    /// Model name understood by the selected backend.
    pub model: String,
    /// API key for the hosted backend.
    pub api_key: String,
    /// Base URL for the hosted backend or the local inference server.
    pub endpoint: String,
    /// Executable for the command-line backend.
    pub command: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "hosted".to_string(),
            model: String::new(),
            api_key: String::new(),
            endpoint: String::new(),
            command: "ollama".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalizationConfig {
    pub default_language: String,
    /// Optional translations file overlaid on the built-in English table.
    pub file: PathBuf,
}

impl Default for LocalizationConfig {
    fn default() -> Self {
        Self {
            default_language: "en".to_string(),
            file: PathBuf::from("localizations.json"),
        }
    }
}

/// Do-Not-Interact filter.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DniConfig {
    /// Accounts whose profile note contains any of these tags are skipped.
    pub tags: Vec<String>,
    pub ignore_bots: bool,
}

impl Default for DniConfig {
    fn default() -> Self {
        Self {
            tags: vec!["#nobot".to_string(), "#nokatari".to_string()],
            ignore_bots: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Minimum-visibility policy; the stricter of this and the original wins.
    pub reply_visibility: Visibility,
    pub follow_back: bool,
    pub ask_for_consent: bool,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            reply_visibility: Visibility::Unlisted,
            follow_back: true,
            ask_for_consent: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeeklySummaryConfig {
    pub enabled: bool,
    /// Weekday name, e.g. "sunday".
    pub post_day: String,
    /// Local time of day, "HH:MM".
    pub post_time: String,
    pub message_template: String,
    pub tips: Vec<String>,
}

impl Default for WeeklySummaryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            post_day: "sunday".to_string(),
            post_time: "12:00".to_string(),
            message_template: "This week I described {{alt_text_count}} pieces of media and \
                               welcomed {{new_user_count}} new followers.\n\n\
                               Top describers:\n{{leaderboard}}\n\
                               Tip of the week: {{tip_of_the_week}}"
                .to_string(),
            tips: vec![
                "Descriptions work best when they mention what matters in context.".to_string(),
                "Short and concrete beats long and flowery.".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Seconds between full snapshot rewrites.
    pub snapshot_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            snapshot_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_per_minute: u32,
    pub max_per_hour: u32,
    pub new_account_max_per_minute: u32,
    pub new_account_max_per_hour: u32,
    /// Accounts younger than this many days count as "new".
    pub new_account_period_days: i64,
    /// Consecutive violations before a shadow ban.
    pub shadow_ban_threshold: u32,
    /// Handle notified about shadow bans, with the leading `@`.
    pub admin_contact_handle: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_per_minute: 4,
            max_per_hour: 15,
            new_account_max_per_minute: 1,
            new_account_max_per_hour: 4,
            new_account_period_days: 30,
            shadow_ban_threshold: 3,
            admin_contact_handle: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemindersConfig {
    pub enabled: bool,
    /// Minutes to wait before checking whether the description was attached.
    pub delay_minutes: i64,
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding every state file.
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("."),
        }
    }
}

impl StorageConfig {
    pub fn rate_limiter_path(&self) -> PathBuf {
        self.state_dir.join("ratelimiter.json")
    }

    pub fn consent_path(&self) -> PathBuf {
        self.state_dir.join("consent_requests.json")
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.state_dir.join("metrics.json")
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.state_dir.join("event_log.ndjson")
    }
}

impl Config {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Config, KatariError> {
        let raw = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()).required(false))
            .build()
            .map_err(|e| KatariError::Config(e.to_string()))?;
        let parsed: Config = raw
            .try_deserialize()
            .map_err(|e| KatariError::Config(e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Fail-fast checks for values that would otherwise blow up much later.
    pub fn validate(&self) -> Result<(), KatariError> {
        match self.generation.provider.as_str() {
            "hosted" | "command" | "server" => {}
            other => {
                return Err(KatariError::Config(format!(
                    "unknown generation provider: {other:?} (expected hosted, command or server)"
                )));
            }
        }

        if self.weekly_summary.enabled {
            if chrono::NaiveTime::parse_from_str(&self.weekly_summary.post_time, "%H:%M").is_err() {
                return Err(KatariError::Config(format!(
                    "weekly_summary.post_time {:?} is not HH:MM",
                    self.weekly_summary.post_time
                )));
            }
            if self.weekly_summary.tips.is_empty() {
                return Err(KatariError::Config(
                    "weekly_summary.tips must not be empty when the summary is enabled".to_string(),
                ));
            }
        }

        if self.rate_limit.enabled && self.rate_limit.shadow_ban_threshold == 0 {
            return Err(KatariError::Config(
                "rate_limit.shadow_ban_threshold must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/katari.toml")).unwrap();
        assert_eq!(config.behavior.reply_visibility, Visibility::Unlisted);
        assert!(config.rate_limit.enabled);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let mut config = Config::default();
        config.generation.provider = "abacus".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_post_time_is_rejected_when_summary_enabled() {
        let mut config = Config::default();
        config.weekly_summary.enabled = true;
        config.weekly_summary.post_time = "noonish".to_string();
        assert!(config.validate().is_err());
    }
}
