//! BackgroundTasks - 定期処理のループ群
//!
//! - `shutdown()` を呼ぶと全ループが止まる
//! - `shutdown_and_join()` で全ループの終了を待ち、最後にメトリクスを
//!   1回だけ同期フラッシュする

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::app::bot::Bot;
use crate::summary::WeeklySummaryScheduler;

pub struct BackgroundTasks {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    bot: Arc<Bot>,
}

impl BackgroundTasks {
    /// Spawn every periodic loop the configuration enables.
    pub fn spawn(bot: Arc<Bot>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut joins = Vec::new();

        if bot.config.rate_limit.enabled {
            // Minute reset: minute counters only.
            let limiter = bot.limiter.clone();
            joins.push(spawn_ticker(
                Duration::from_secs(60),
                shutdown_rx.clone(),
                move || {
                    let limiter = limiter.clone();
                    async move { limiter.reset_minute_counts().await }
                },
            ));

            // Hour reset: hour counters and the abuse score decay.
            let limiter = bot.limiter.clone();
            joins.push(spawn_ticker(
                Duration::from_secs(3600),
                shutdown_rx.clone(),
                move || {
                    let limiter = limiter.clone();
                    async move { limiter.reset_hour_counts().await }
                },
            ));
        }

        // Reply records: sweep every 10 minutes, drop entries over an hour.
        let replies = bot.replies.clone();
        joins.push(spawn_ticker(
            Duration::from_secs(600),
            shutdown_rx.clone(),
            move || {
                let replies = replies.clone();
                async move { replies.sweep().await }
            },
        ));

        // Consent requests: hourly sweep of the 30-day expiry.
        let consent = bot.consent.clone();
        joins.push(spawn_ticker(
            Duration::from_secs(3600),
            shutdown_rx.clone(),
            move || {
                let consent = consent.clone();
                async move { consent.sweep().await }
            },
        ));

        if bot.config.reminders.enabled {
            let delay = chrono::Duration::minutes(bot.config.reminders.delay_minutes);
            let checker = bot.clone();
            joins.push(spawn_ticker(
                Duration::from_secs(60),
                shutdown_rx.clone(),
                move || {
                    let checker = checker.clone();
                    async move {
                        checker
                            .reminders
                            .run_once(
                                checker.social.as_ref(),
                                &checker.metrics,
                                &checker.locales,
                                delay,
                            )
                            .await
                    }
                },
            ));
        }

        if bot.metrics.is_enabled() {
            let metrics = bot.metrics.clone();
            let interval = Duration::from_secs(bot.config.metrics.snapshot_interval_secs.max(1));
            joins.push(spawn_ticker(interval, shutdown_rx.clone(), move || {
                let metrics = metrics.clone();
                async move { metrics.flush() }
            }));
        }

        if bot.config.weekly_summary.enabled {
            let scheduler = Arc::new(WeeklySummaryScheduler::new(
                bot.config.weekly_summary.clone(),
                bot.event_log.clone(),
                bot.social.clone(),
            ));
            joins.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));
        }

        Self {
            shutdown_tx,
            joins,
            bot,
        }
    }

    /// Request shutdown for every loop.
    pub fn shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown, wait for all loops, then flush metrics one last time.
    pub async fn shutdown_and_join(self) {
        self.shutdown();
        for join in self.joins {
            let _ = join.await;
        }
        self.bot.metrics.flush();
    }
}

/// Run `work` every `period` until shutdown is signalled.
fn spawn_ticker<F, Fut>(
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    work: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = tokio::time::sleep(period) => work().await,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::builder::BotBuilder;
    use crate::config::Config;
    use crate::impls::{FixedCaptioner, InMemorySocialClient};

    #[tokio::test]
    async fn shutdown_joins_all_loops_and_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.state_dir = dir.path().to_path_buf();
        config.metrics.enabled = true;

        let bot = BotBuilder::new(config)
            .social(Arc::new(InMemorySocialClient::new("katari")))
            .captioner(Arc::new(FixedCaptioner::new("x")))
            .build()
            .await
            .unwrap();

        bot.metrics.log_request(&crate::domain::AccountId::new("a1"));

        let tasks = BackgroundTasks::spawn(bot.clone());
        tasks.shutdown_and_join().await;

        // The final flush wrote the snapshot even though no interval passed.
        let snapshot = std::fs::read_to_string(dir.path().join("metrics.json")).unwrap();
        assert!(snapshot.contains("request"));
    }
}
