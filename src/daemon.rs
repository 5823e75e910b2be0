//! Long-running scheduler loop.
//!
//! Ticks at a fixed cadence, checks at most one destination per tick, and
//! flushes the conditional cache in between. SIGINT/SIGTERM (Ctrl-C on
//! Windows) stops the loop; an in-flight check cycle is cancelled, its
//! source tasks are drained, and the caches are flushed before returning.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};

use crate::app::{AppContext, Result};
use crate::scheduler::{TickOutcome, DEFAULT_TICK};

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub tick: Duration,
    /// Minimum time between conditional-cache writes.
    pub flush_interval: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            flush_interval: Duration::from_secs(30),
        }
    }
}

impl DaemonConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            tick: Duration::from_secs(config.scheduler.tick_secs.max(1)),
            flush_interval: Duration::from_secs(config.cache.conditional_flush_secs),
        }
    }
}

/// Daemon runner
pub struct Daemon {
    ctx: Arc<AppContext>,
    config: DaemonConfig,
    shutdown: Arc<Notify>,
}

impl Daemon {
    pub fn new(ctx: Arc<AppContext>, config: DaemonConfig) -> Self {
        Self {
            ctx,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Handle that stops the loop when notified.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    fn spawn_signal_handler(&self) {
        let shutdown = self.shutdown.clone();

        #[cfg(unix)]
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};

            let (Ok(mut sigterm), Ok(mut sigint)) =
                (signal(SignalKind::terminate()), signal(SignalKind::interrupt()))
            else {
                tracing::error!("Failed to install signal handlers");
                return;
            };
            tokio::select! {
                _ = sigterm.recv() => {},
                _ = sigint.recv() => {},
            }
            tracing::info!("Shutdown signal received");
            shutdown.notify_one();
        });

        #[cfg(windows)]
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
                shutdown.notify_one();
            }
        });
    }

    /// Run until a shutdown signal arrives.
    pub async fn run(&self) -> Result<()> {
        self.spawn_signal_handler();

        let mut scheduler = self.ctx.scheduler();
        tracing::info!(
            destinations = scheduler.destinations().len(),
            tick = %crate::config::format_duration(self.config.tick),
            pid = std::process::id(),
            "Tributary started"
        );

        let mut timer = interval(self.config.tick);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_flush = Instant::now();

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                _ = timer.tick() => {}
            }

            let outcome = scheduler
                .tick_until(Instant::now(), self.shutdown.notified())
                .await;

            if let TickOutcome::Checked(report) = outcome {
                if report.interrupted {
                    break;
                }
                tracing::debug!(destination = report.destination, delivered = report.delivered(), "Tick done");
                if last_flush.elapsed() >= self.config.flush_interval {
                    self.flush();
                    last_flush = Instant::now();
                }
            }
        }

        tracing::info!("Tributary shutting down");
        self.flush();
        Ok(())
    }

    fn flush(&self) {
        if let Err(e) = self.ctx.flush_conditional() {
            tracing::error!("Failed to persist conditional cache: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_config_from_settings() {
        let mut config = Config::default();
        config.scheduler.tick_secs = 0;
        config.cache.conditional_flush_secs = 90;

        let daemon = DaemonConfig::from_config(&config);
        assert_eq!(daemon.tick, Duration::from_secs(1));
        assert_eq!(daemon.flush_interval, Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop_and_flushes() {
        let ctx = Arc::new(AppContext::in_memory(Config::default()).unwrap());
        ctx.conditional.update(
            &crate::fetcher::ValidatorKey::new(0, "https://example.com/feed"),
            crate::fetcher::ConditionalEntry {
                etag: Some("\"x\"".into()),
                last_modified: None,
            },
        );

        let daemon = Daemon::new(
            ctx.clone(),
            DaemonConfig {
                tick: Duration::from_millis(10),
                flush_interval: Duration::from_secs(3600),
            },
        );
        // Stored permit: the loop sees it on its first select.
        daemon.shutdown_handle().notify_one();
        daemon.run().await.unwrap();

        use crate::store::Store;
        assert_eq!(ctx.store.load_conditional().unwrap().len(), 1);
    }
}
