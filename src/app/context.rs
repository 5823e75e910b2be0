use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::app::error::{Result, TributaryError};
use crate::config::Config;
use crate::fetcher::{ConditionalCache, Fetcher, HostBreaker, HttpFetcher};
use crate::normalizer::Normalizer;
use crate::notify::{Notifier, TargetNotifier, WebhookNotifier};
use crate::parser::{Parser, ParserPipeline};
use crate::scheduler::{CheckCycle, CycleSettings, Scheduler};
use crate::store::sqlite::SqliteStore;
use crate::store::Store;

pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub breaker: Arc<HostBreaker>,
    pub conditional: Arc<ConditionalCache>,
    pub fetcher: Arc<dyn Fetcher>,
    pub pipeline: Arc<ParserPipeline>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_parsers(config, Vec::new())
    }

    /// Like [`AppContext::new`], with extra parsers merged into the
    /// pipeline.
    pub fn with_parsers(config: Config, parsers: Vec<Arc<dyn Parser>>) -> Result<Self> {
        let db_path = match &config.cache.path {
            Some(p) => p.clone(),
            None => Self::default_db_path()?,
        };
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let store = Arc::new(SqliteStore::new(&db_path)?);
        tracing::debug!(path = %db_path.display(), "Opened cache database");
        Self::assemble(config, store, parsers)
    }

    pub fn in_memory(config: Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        Self::assemble(config, store, Vec::new())
    }

    fn assemble(config: Config, store: Arc<SqliteStore>, parsers: Vec<Arc<dyn Parser>>) -> Result<Self> {
        let fetch = &config.fetch;
        let breaker = Arc::new(HostBreaker::new(
            Duration::from_secs(fetch.cooldown_ceiling_secs),
            Duration::from_millis(fetch.cooldown_jitter_ms),
        ));

        let conditional = Arc::new(ConditionalCache::from_entries(store.load_conditional()?));
        tracing::debug!(entries = conditional.len(), "Loaded conditional cache");

        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(
            fetch.clone(),
            breaker.clone(),
            conditional.clone(),
        )?);

        let mut pipeline = ParserPipeline::with_builtins(fetcher.clone(), Normalizer::new(), &config);
        pipeline.register_all(parsers);

        let notify = &config.notify;
        let webhook = WebhookNotifier::new()
            .with_timeout(notify.webhook_timeout_secs)
            .with_retries(notify.webhook_retries)
            .with_backoff(Duration::from_millis(notify.webhook_backoff_ms));
        let notifier: Arc<dyn Notifier> = Arc::new(TargetNotifier::new(webhook));

        Ok(Self {
            config,
            store,
            breaker,
            conditional,
            fetcher,
            pipeline: Arc::new(pipeline),
            notifier,
        })
    }

    pub fn scheduler(&self) -> Scheduler {
        let cycle = CheckCycle::new(
            self.pipeline.clone(),
            self.store.clone(),
            self.notifier.clone(),
            self.conditional.clone(),
            CycleSettings::from_config(&self.config),
        );
        Scheduler::new(self.config.destinations(), cycle)
    }

    /// Persist the conditional cache if it changed. Returns whether a write
    /// happened.
    pub fn flush_conditional(&self) -> Result<bool> {
        let Some(entries) = self.conditional.take_dirty() else {
            return Ok(false);
        };
        if let Err(e) = self.store.save_conditional(&entries) {
            self.conditional.mark_dirty();
            return Err(e);
        }
        tracing::debug!(entries = entries.len(), "Flushed conditional cache");
        Ok(true)
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| TributaryError::Config("Could not find data directory".into()))?;
        let tributary_dir = data_dir.join("tributary");
        std::fs::create_dir_all(&tributary_dir)?;
        Ok(tributary_dir.join("tributary.db"))
    }
}
