//! Weekly summary - リーダーボード集計と定時投稿
//!
//! スケジューラは設定された曜日・時刻に一致する「未来の」時刻を1日ずつ
//! 繰り上げて求め、そこまで眠ってから耐久ログを集計して投稿します。
//!
//! Design:
//! - 見出しの件数もリーダーボードも、直近7日間の同じ窓で数えます
//!   （窓の方針は DESIGN.md 参照）。
//! - ログはテキストの NDJSON をその場で読み直すだけ。別プロセスが
//!   ダッシュボード用に同じファイルを読んでも干渉しません。

pub mod log;

pub use self::log::{EventLog, LogEntry};

use chrono::{DateTime, Datelike, Duration, Local, NaiveDateTime, NaiveTime, Utc, Weekday};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::WeeklySummaryConfig;
use crate::domain::{NewStatus, Visibility};
use crate::ports::SocialClient;

/// The next instant matching `post_day` and `post_time`, strictly after `now`.
///
/// Rolls forward day by day until both the weekday matches and the instant
/// lies in the future, so a summary never fires twice for the same slot.
pub fn next_scheduled_time(
    now: NaiveDateTime,
    post_day: Weekday,
    post_time: NaiveTime,
) -> NaiveDateTime {
    let mut candidate = now.date().and_time(post_time);
    while candidate.weekday() != post_day || candidate <= now {
        candidate = candidate + Duration::days(1);
    }
    candidate
}

/// Parse a weekday name, defaulting to Sunday like the rest of the config.
pub fn parse_weekday(day: &str) -> Weekday {
    match day.to_lowercase().as_str() {
        "monday" => Weekday::Mon,
        "tuesday" => Weekday::Tue,
        "wednesday" => Weekday::Wed,
        "thursday" => Weekday::Thu,
        "friday" => Weekday::Fri,
        "saturday" => Weekday::Sat,
        _ => Weekday::Sun,
    }
}

/// Headline numbers for the trailing window.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct WeeklyCounts {
    pub alt_text_count: usize,
    pub new_follower_count: usize,
}

pub fn window_counts(entries: &[LogEntry], since: DateTime<Utc>) -> WeeklyCounts {
    let mut counts = WeeklyCounts::default();
    for entry in entries {
        if entry.timestamp <= since {
            continue;
        }
        match entry.event_type.as_str() {
            "alt_text_generated" => counts.alt_text_count += 1,
            "new_follower" => counts.new_follower_count += 1,
            _ => {}
        }
    }
    counts
}

/// Top-3 accounts by `human_written_alt_text` entries within the window.
pub fn leaderboard(entries: &[LogEntry], since: DateTime<Utc>) -> Vec<(String, usize)> {
    let mut scores: HashMap<&str, usize> = HashMap::new();
    for entry in entries {
        if entry.timestamp <= since || entry.event_type != "human_written_alt_text" {
            continue;
        }
        if let Some(username) = entry.username.as_deref() {
            *scores.entry(username).or_default() += 1;
        }
    }

    let mut ranked: Vec<(String, usize)> = scores
        .into_iter()
        .map(|(name, score)| (name.to_string(), score))
        .collect();
    // Score first, name as a tie-break so the output is deterministic.
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(3);
    ranked
}

pub fn format_leaderboard(ranked: &[(String, usize)]) -> String {
    let mut out = String::new();
    for (position, (username, score)) in ranked.iter().enumerate() {
        out.push_str(&format!("{}. @{} ({} alt-texts)\n", position + 1, username, score));
    }
    out
}

pub struct WeeklySummaryScheduler {
    config: WeeklySummaryConfig,
    event_log: Arc<EventLog>,
    social: Arc<dyn SocialClient>,
}

impl WeeklySummaryScheduler {
    pub fn new(
        config: WeeklySummaryConfig,
        event_log: Arc<EventLog>,
        social: Arc<dyn SocialClient>,
    ) -> Self {
        Self {
            config,
            event_log,
            social,
        }
    }

    /// Sleep-post-reschedule loop. Runs until shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let post_day = parse_weekday(&self.config.post_day);
        let post_time = NaiveTime::parse_from_str(&self.config.post_time, "%H:%M")
            .unwrap_or_else(|_| NaiveTime::from_hms_opt(12, 0, 0).unwrap());

        loop {
            let now = Local::now().naive_local();
            let next = next_scheduled_time(now, post_day, post_time);
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next = %next, "next weekly summary scheduled");

            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(wait) => {}
            }

            self.post_summary().await;
        }
    }

    /// Aggregate the trailing week and post the summary.
    pub async fn post_summary(&self) {
        let entries = self.event_log.read_entries();
        let since = Utc::now() - Duration::days(7);

        let counts = window_counts(&entries, since);
        let ranked = leaderboard(&entries, since);

        let tip = self
            .config
            .tips
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default();

        let message = self
            .config
            .message_template
            .replace("{{alt_text_count}}", &counts.alt_text_count.to_string())
            .replace("{{new_user_count}}", &counts.new_follower_count.to_string())
            .replace("{{tip_of_the_week}}", &tip)
            .replace("{{leaderboard}}", &format_leaderboard(&ranked));

        let new_status = NewStatus {
            text: message,
            in_reply_to_id: None,
            visibility: Visibility::Public,
            language: None,
            spoiler_text: String::new(),
        };
        match self.social.post_status(new_status).await {
            Ok(posted) => info!(id = %posted.id, "weekly summary posted"),
            Err(e) => error!(error = %e, "failed to post weekly summary"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rstest::rstest;

    fn at(date: (i32, u32, u32), time: (u32, u32)) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_hms_opt(time.0, time.1, 0)
            .unwrap()
    }

    // 2026-08-03 is a Monday.
    #[rstest]
    #[case::later_same_day(at((2026, 8, 3), (9, 0)), Weekday::Mon, (12, 0), at((2026, 8, 3), (12, 0)))]
    #[case::earlier_same_day_rolls_a_week(at((2026, 8, 3), (13, 0)), Weekday::Mon, (12, 0), at((2026, 8, 10), (12, 0)))]
    #[case::exactly_now_rolls_a_week(at((2026, 8, 3), (12, 0)), Weekday::Mon, (12, 0), at((2026, 8, 10), (12, 0)))]
    #[case::other_weekday(at((2026, 8, 3), (9, 0)), Weekday::Thu, (18, 30), at((2026, 8, 6), (18, 30)))]
    fn next_time_is_strictly_in_the_future(
        #[case] now: NaiveDateTime,
        #[case] day: Weekday,
        #[case] time: (u32, u32),
        #[case] expected: NaiveDateTime,
    ) {
        let post_time = NaiveTime::from_hms_opt(time.0, time.1, 0).unwrap();
        let next = next_scheduled_time(now, day, post_time);
        assert_eq!(next, expected);
        assert!(next > now);
    }

    #[test]
    fn unknown_weekday_defaults_to_sunday() {
        assert_eq!(parse_weekday("Friday"), Weekday::Fri);
        assert_eq!(parse_weekday("someday"), Weekday::Sun);
    }

    fn entry(days_ago: i64, event_type: &str, username: Option<&str>) -> LogEntry {
        LogEntry {
            timestamp: Utc::now() - Duration::days(days_ago),
            event_type: event_type.to_string(),
            username: username.map(str::to_string),
        }
    }

    #[test]
    fn counts_are_windowed_to_the_trailing_week() {
        let entries = vec![
            entry(1, "alt_text_generated", None),
            entry(2, "alt_text_generated", None),
            entry(9, "alt_text_generated", None), // outside the window
            entry(3, "new_follower", None),
            entry(1, "rate_limit_hit", None), // unrelated event type
        ];
        let counts = window_counts(&entries, Utc::now() - Duration::days(7));
        assert_eq!(counts.alt_text_count, 2);
        assert_eq!(counts.new_follower_count, 1);
    }

    #[tokio::test]
    async fn summary_post_fills_the_template() {
        let dir = tempfile::tempdir().unwrap();
        let event_log = Arc::new(EventLog::new(true, dir.path().join("log.ndjson")));
        event_log.log_event("alt_text_generated");
        event_log.log_event("alt_text_generated");
        event_log.log_event("new_follower");
        event_log.log_event_with_username("human_written_alt_text", "ame");

        let social = Arc::new(crate::impls::InMemorySocialClient::new("katari"));
        let config = crate::config::WeeklySummaryConfig {
            enabled: true,
            message_template:
                "{{alt_text_count}} described, {{new_user_count}} new.\n{{leaderboard}}tip: {{tip_of_the_week}}"
                    .to_string(),
            tips: vec!["only one tip".to_string()],
            ..Default::default()
        };
        let scheduler = WeeklySummaryScheduler::new(config, event_log, social.clone());

        scheduler.post_summary().await;

        let posted = social.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].visibility, Visibility::Public);
        assert!(posted[0].content.contains("2 described, 1 new."));
        assert!(posted[0].content.contains("1. @ame (1 alt-texts)"));
        assert!(posted[0].content.contains("tip: only one tip"));
    }

    #[test]
    fn leaderboard_ranks_top_three() {
        let mut entries = Vec::new();
        for _ in 0..4 {
            entries.push(entry(1, "human_written_alt_text", Some("ame")));
        }
        for _ in 0..2 {
            entries.push(entry(2, "human_written_alt_text", Some("beni")));
        }
        entries.push(entry(3, "human_written_alt_text", Some("chiyo")));
        entries.push(entry(4, "human_written_alt_text", Some("daiki")));
        entries.push(entry(10, "human_written_alt_text", Some("ame"))); // outside window

        let ranked = leaderboard(&entries, Utc::now() - Duration::days(7));
        assert_eq!(
            ranked,
            vec![
                ("ame".to_string(), 4),
                ("beni".to_string(), 2),
                // chiyo and daiki tie at 1; the name breaks the tie.
                ("chiyo".to_string(), 1),
            ]
        );

        let formatted = format_leaderboard(&ranked);
        assert!(formatted.starts_with("1. @ame (4 alt-texts)\n"));
        assert!(formatted.contains("3. @chiyo (1 alt-texts)"));
    }
}
