use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::dedup::select_new;
use crate::domain::{Destination, Source};
use crate::fetcher::{ConditionalCache, ValidatorKey};
use crate::notify::Notifier;
use crate::parser::{ParserPipeline, Resolution};
use crate::store::Store;

pub const DEFAULT_WORKERS: usize = 4;

/// Knobs for one check cycle.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub workers: usize,
    pub request_delay: Duration,
    /// Used instead of `request_delay` for video feeds.
    pub video_request_delay: Duration,
    pub request_jitter: Duration,
    pub max_seen: usize,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            request_delay: Duration::from_millis(500),
            video_request_delay: Duration::from_millis(2000),
            request_jitter: Duration::from_millis(500),
            max_seen: crate::dedup::DEFAULT_MAX_SEEN,
        }
    }
}

impl CycleSettings {
    pub fn from_config(config: &Config) -> Self {
        let s = &config.scheduler;
        Self {
            workers: s.workers.max(1),
            request_delay: Duration::from_millis(s.request_delay_ms),
            video_request_delay: Duration::from_millis(s.video_request_delay_ms),
            request_jitter: Duration::from_millis(s.request_jitter_ms),
            max_seen: config.cache.max_seen,
        }
    }

    /// No pauses between requests.
    pub fn immediate(workers: usize, max_seen: usize) -> Self {
        Self {
            workers: workers.max(1),
            request_delay: Duration::ZERO,
            video_request_delay: Duration::ZERO,
            request_jitter: Duration::ZERO,
            max_seen,
        }
    }

    fn delay_for(&self, source: &Source) -> Duration {
        let base = if source.is_video_feed() {
            self.video_request_delay
        } else {
            self.request_delay
        };
        let jitter_ms = self.request_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    /// Items went through selection; `failed` deliveries stay unseen.
    Delivered {
        new: usize,
        delivered: usize,
        failed: usize,
    },
    NotModified,
    CoolingDown,
    /// Fetched fine, but no parser found anything.
    NoItems,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct SourceReport {
    pub url: String,
    pub outcome: SourceOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub destination: usize,
    /// In source order. Sources cut short by cancellation are missing.
    pub sources: Vec<SourceReport>,
    /// The cycle was cancelled before every source finished.
    pub interrupted: bool,
}

impl CycleReport {
    pub fn delivered(&self) -> usize {
        self.sources
            .iter()
            .map(|s| match s.outcome {
                SourceOutcome::Delivered { delivered, .. } => delivered,
                _ => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| matches!(s.outcome, SourceOutcome::Failed(_)))
            .count()
    }
}

/// Drops a source's conditional validators unless the cycle for that
/// source committed. Covers early returns and tasks aborted at shutdown:
/// the next fetch then gets a full body instead of a 304 hiding
/// undelivered items.
struct ValidatorGuard {
    key: ValidatorKey,
    cache: Arc<ConditionalCache>,
    committed: bool,
}

impl ValidatorGuard {
    fn new(key: ValidatorKey, cache: Arc<ConditionalCache>) -> Self {
        Self {
            key,
            cache,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for ValidatorGuard {
    fn drop(&mut self) {
        if !self.committed {
            self.cache.remove(&self.key);
        }
    }
}

/// Runs fetch → parse → dedup → deliver for every source of a destination.
#[derive(Clone)]
pub struct CheckCycle {
    pipeline: Arc<ParserPipeline>,
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    conditional: Arc<ConditionalCache>,
    settings: CycleSettings,
}

/// Destination fields a source task needs.
#[derive(Clone)]
struct Target {
    index: usize,
    handle: String,
    send_limit: usize,
}

impl CheckCycle {
    pub fn new(
        pipeline: Arc<ParserPipeline>,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        conditional: Arc<ConditionalCache>,
        settings: CycleSettings,
    ) -> Self {
        Self {
            pipeline,
            store,
            notifier,
            conditional,
            settings,
        }
    }

    pub fn settings(&self) -> &CycleSettings {
        &self.settings
    }

    /// Check every source with at most `workers` in flight.
    pub async fn run(&self, destination: &Destination) -> CycleReport {
        self.run_until(destination, std::future::pending()).await
    }

    /// Like [`CheckCycle::run`], but stops early once `cancel` resolves.
    /// Unfinished sources are aborted and fully unwound before this
    /// returns, so their validators are already dropped when the caller
    /// persists the conditional cache.
    pub async fn run_until(&self, destination: &Destination, cancel: impl Future<Output = ()>) -> CycleReport {
        let semaphore = Arc::new(Semaphore::new(self.settings.workers.max(1)));
        let target = Target {
            index: destination.index,
            handle: destination.target.clone(),
            send_limit: destination.send_limit,
        };

        let mut tasks = JoinSet::new();
        for (position, source) in destination.sources.iter().cloned().enumerate() {
            let cycle = self.clone();
            let semaphore = semaphore.clone();
            let target = target.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (
                        position,
                        SourceReport {
                            url: source.url.clone(),
                            outcome: SourceOutcome::Failed("worker pool closed".into()),
                        },
                    );
                };
                let outcome = cycle.check_source(&target, &source).await;
                (
                    position,
                    SourceReport {
                        url: source.url,
                        outcome,
                    },
                )
            });
        }

        tokio::pin!(cancel);
        let mut interrupted = false;
        let mut reports = Vec::with_capacity(destination.sources.len());
        loop {
            tokio::select! {
                biased;
                _ = &mut cancel => {
                    tracing::info!(destination = destination.index, pending = tasks.len(), "Check cycle cancelled");
                    tasks.shutdown().await;
                    interrupted = true;
                    break;
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok(report)) => reports.push(report),
                    Some(Err(e)) => {
                        tracing::error!(destination = destination.index, "Source task failed: {}", e);
                    }
                    None => break,
                },
            }
        }
        reports.sort_by_key(|(position, _)| *position);

        let report = CycleReport {
            destination: destination.index,
            sources: reports.into_iter().map(|(_, r)| r).collect(),
            interrupted,
        };
        tracing::info!(
            destination = %destination.display_name(),
            sources = report.sources.len(),
            delivered = report.delivered(),
            failures = report.failures(),
            "Check cycle complete"
        );
        report
    }

    async fn check_source(&self, target: &Target, source: &Source) -> SourceOutcome {
        let delay = self.settings.delay_for(source);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let guard = ValidatorGuard::new(ValidatorKey::new(target.index, &source.url), self.conditional.clone());
        let resolution = self.pipeline.resolve_for(source, target.index).await;

        if resolution.items.is_empty() {
            let outcome = empty_outcome(&resolution);
            match &outcome {
                SourceOutcome::CoolingDown => {
                    tracing::debug!(url = %source.url, "Host cooling down; source skipped")
                }
                SourceOutcome::Failed(reason) => {
                    tracing::warn!(url = %source.url, reason = %reason, "Source check failed")
                }
                _ => tracing::debug!(url = %source.url, ?outcome, "Nothing to deliver"),
            }
            guard.commit();
            return outcome;
        }

        let seen = match self.store.load_seen(target.index, &source.url, self.settings.max_seen) {
            Ok(seen) => seen,
            Err(e) => {
                tracing::error!(url = %source.url, "Failed to load seen ids: {}", e);
                return SourceOutcome::Failed(e.to_string());
            }
        };

        let selection = select_new(&seen, resolution.items, target.send_limit);
        if selection.is_empty() {
            guard.commit();
            return SourceOutcome::Delivered {
                new: 0,
                delivered: 0,
                failed: 0,
            };
        }

        let mut failed = HashSet::new();
        for item in &selection.to_deliver {
            if let Err(e) = self.notifier.deliver(&target.handle, item).await {
                tracing::warn!(url = %source.url, id = %item.id, "Delivery failed: {}", e);
                failed.insert(item.id.clone());
            }
        }

        let updated = selection.commit(&seen, &failed);
        if let Err(e) = self.store.save_seen(target.index, &source.url, &updated) {
            tracing::error!(url = %source.url, "Failed to save seen ids: {}", e);
            return SourceOutcome::Failed(e.to_string());
        }

        let delivered = selection.to_deliver.len() - failed.len();
        tracing::info!(
            url = %source.url,
            new = selection.new_ids.len(),
            delivered,
            "Delivered new items"
        );

        if failed.is_empty() {
            guard.commit();
        }
        SourceOutcome::Delivered {
            new: selection.new_ids.len(),
            delivered,
            failed: failed.len(),
        }
    }
}

fn empty_outcome(resolution: &Resolution) -> SourceOutcome {
    if resolution.not_modified {
        SourceOutcome::NotModified
    } else if resolution.cooling_down() {
        SourceOutcome::CoolingDown
    } else if let Some(e) = &resolution.fetch_error {
        SourceOutcome::Failed(e.to_string())
    } else if !resolution.errors.is_empty() && resolution.errors.len() == resolution.attempted.len() {
        let reasons: Vec<String> = resolution
            .errors
            .iter()
            .map(|(parser, reason)| format!("{}: {}", parser, reason))
            .collect();
        SourceOutcome::Failed(reasons.join("; "))
    } else {
        SourceOutcome::NoItems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FetchError;

    #[test]
    fn test_delay_for_video_feeds() {
        let settings = CycleSettings {
            request_jitter: Duration::ZERO,
            ..CycleSettings::default()
        };
        assert_eq!(settings.delay_for(&Source::new("https://example.com/rss")), Duration::from_millis(500));
        assert_eq!(
            settings.delay_for(&Source::new("https://www.youtube.com/feeds/videos.xml?channel_id=x")),
            Duration::from_millis(2000)
        );

        let jittered = CycleSettings::default().delay_for(&Source::new("https://example.com/rss"));
        assert!(jittered >= Duration::from_millis(500) && jittered <= Duration::from_millis(1000));
    }

    #[test]
    fn test_empty_outcome_classification() {
        let not_modified = Resolution {
            not_modified: true,
            ..Default::default()
        };
        assert_eq!(empty_outcome(&not_modified), SourceOutcome::NotModified);

        let cooling = Resolution {
            fetch_error: Some(FetchError::HostCoolingDown {
                host: "h".into(),
                remaining: Duration::from_secs(5),
            }),
            ..Default::default()
        };
        assert_eq!(empty_outcome(&cooling), SourceOutcome::CoolingDown);

        let all_failed = Resolution {
            attempted: vec!["a".into()],
            errors: vec![("a".into(), "bad".into())],
            ..Default::default()
        };
        assert_eq!(empty_outcome(&all_failed), SourceOutcome::Failed("a: bad".into()));

        let quiet = Resolution {
            attempted: vec!["a".into(), "b".into()],
            errors: vec![("a".into(), "bad".into())],
            ..Default::default()
        };
        assert_eq!(empty_outcome(&quiet), SourceOutcome::NoItems);
    }

    #[test]
    fn test_guard_drops_validators_unless_committed() {
        let cache = Arc::new(ConditionalCache::new());
        let entry = crate::fetcher::ConditionalEntry {
            etag: Some("e".into()),
            last_modified: None,
        };

        let a = ValidatorKey::new(0, "https://example.com/a");
        let b = ValidatorKey::new(0, "https://example.com/b");
        let other = ValidatorKey::new(1, "https://example.com/a");

        cache.update(&a, entry.clone());
        cache.update(&other, entry.clone());
        drop(ValidatorGuard::new(a.clone(), cache.clone()));
        assert!(cache.get(&a).is_none());
        assert!(cache.get(&other).is_some());

        cache.update(&b, entry);
        ValidatorGuard::new(b.clone(), cache.clone()).commit();
        assert!(cache.get(&b).is_some());
    }
}
