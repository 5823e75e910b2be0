//! Ordered fallback pipeline of format-specific parsers.
//!
//! Parsers run in ascending priority; the first applicable parser that
//! returns a non-empty list wins. A failing or panicking parser is logged
//! and the next one is tried, so `resolve` never fails.

pub mod discord;
pub mod freshrss;
pub mod html_meta;
pub mod json_api;
pub mod regex_xml;
pub mod syndication;
pub mod youtube;

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;

use crate::app::{Result, TributaryError};
use crate::config::Config;
use crate::domain::{Item, Source};
use crate::fetcher::{AcceptProfile, FetchError, FetchOptions, FetchResponse, Fetcher};
use crate::normalizer::{Normalizer, RawEntry};

pub use discord::DiscordParser;
pub use freshrss::FreshRssParser;
pub use html_meta::HtmlMetaParser;
pub use json_api::JsonApiParser;
pub use regex_xml::RegexXmlParser;
pub use syndication::SyndicationParser;
pub use youtube::YouTubeParser;

/// Priority given to registered parsers that don't pick one.
pub const DEFAULT_PRIORITY: i32 = 50;

#[async_trait]
pub trait Parser: Send + Sync {
    fn name(&self) -> &str;

    /// Lower runs first.
    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    fn applicable(&self, _source: &Source) -> bool {
        true
    }

    /// Items found for `ctx.source()`. An empty list hands over to the
    /// next parser.
    async fn parse(&self, ctx: &ParseContext) -> Result<Vec<Item>>;
}

pub(crate) fn parse_failed(parser: &str, reason: impl ToString) -> TributaryError {
    TributaryError::ParseFailed {
        parser: parser.to_string(),
        reason: reason.to_string(),
    }
}

type Memo = HashMap<(String, AcceptProfile), std::result::Result<Arc<FetchResponse>, FetchError>>;

/// State shared by the parsers of one resolution.
///
/// Responses are memoized per (URL, accept profile), so parsers asking for
/// the same document cost one request. Only the first request for a URL
/// carries conditional headers; a later one under another profile must
/// get a full body to parse. Validators belong to the destination the
/// context is scoped to; an unscoped context never sends or stores them.
pub struct ParseContext {
    source: Source,
    scope: Option<usize>,
    fetcher: Arc<dyn Fetcher>,
    normalizer: Normalizer,
    now: DateTime<Utc>,
    responses: Mutex<Memo>,
    requested: Mutex<HashSet<String>>,
    not_modified: Mutex<bool>,
    fetch_error: Mutex<Option<FetchError>>,
}

impl ParseContext {
    pub fn new(source: Source, fetcher: Arc<dyn Fetcher>, normalizer: Normalizer, now: DateTime<Utc>) -> Self {
        Self {
            source,
            scope: None,
            fetcher,
            normalizer,
            now,
            responses: Mutex::new(HashMap::new()),
            requested: Mutex::new(HashSet::new()),
            not_modified: Mutex::new(false),
            fetch_error: Mutex::new(None),
        }
    }

    /// Resolve on behalf of `destination`, using its conditional validators.
    pub fn scoped(mut self, destination: usize) -> Self {
        self.scope = Some(destination);
        self
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Fallback timestamp for entries without a date.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn normalize(&self, raws: Vec<RawEntry>) -> Vec<Item> {
        self.normalizer.normalize_all(raws, self.now)
    }

    /// Fetch the source URL itself.
    pub async fn fetch(&self, accept: AcceptProfile) -> Result<Arc<FetchResponse>> {
        let url = self.source.url.clone();
        self.fetch_url(&url, FetchOptions::accept(accept)).await
    }

    pub async fn fetch_url(&self, url: &str, mut options: FetchOptions) -> Result<Arc<FetchResponse>> {
        let key = (url.to_string(), options.accept);
        if let Some(cached) = lock(&self.responses).get(&key) {
            return cached.clone().map_err(TributaryError::from);
        }

        let first_request = lock(&self.requested).insert(url.to_string());
        options.conditional &= first_request;
        if options.scope.is_none() {
            options.scope = self.scope;
        }

        let outcome = self.fetcher.fetch(url, &options).await.map(Arc::new);
        match &outcome {
            Ok(response) if response.not_modified => *lock(&self.not_modified) = true,
            Ok(_) => {}
            Err(e) => {
                lock(&self.fetch_error).get_or_insert_with(|| e.clone());
            }
        }
        lock(&self.responses).insert(key, outcome.clone());
        outcome.map_err(TributaryError::from)
    }

    /// True once any request answered 304.
    pub fn not_modified(&self) -> bool {
        *lock(&self.not_modified)
    }

    fn first_fetch_error(&self) -> Option<FetchError> {
        lock(&self.fetch_error).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Outcome of one resolution, with enough detail for logging and tests.
#[derive(Debug, Default)]
pub struct Resolution {
    pub items: Vec<Item>,
    /// Parser that produced `items`.
    pub parser: Option<String>,
    /// Parsers that ran, in order.
    pub attempted: Vec<String>,
    /// (parser, error) for every parser that failed or panicked.
    pub errors: Vec<(String, String)>,
    pub not_modified: bool,
    /// First fetch failure seen during the resolution.
    pub fetch_error: Option<FetchError>,
}

impl Resolution {
    pub fn cooling_down(&self) -> bool {
        matches!(self.fetch_error, Some(FetchError::HostCoolingDown { .. }))
    }
}

struct Registered {
    parser: Arc<dyn Parser>,
    builtin: bool,
}

pub struct ParserPipeline {
    parsers: Vec<Registered>,
    fetcher: Arc<dyn Fetcher>,
    normalizer: Normalizer,
}

impl ParserPipeline {
    /// Empty pipeline; see [`ParserPipeline::with_builtins`].
    pub fn new(fetcher: Arc<dyn Fetcher>, normalizer: Normalizer) -> Self {
        Self {
            parsers: Vec::new(),
            fetcher,
            normalizer,
        }
    }

    /// Every built-in parser. Credentials come from the `[discord]` and
    /// `[freshrss]` sections of `config`.
    pub fn with_builtins(fetcher: Arc<dyn Fetcher>, normalizer: Normalizer, config: &Config) -> Self {
        let mut pipeline = Self::new(fetcher, normalizer);
        let discord = &config.discord;
        let builtins: Vec<Arc<dyn Parser>> = vec![
            Arc::new(YouTubeParser),
            Arc::new(FreshRssParser::new(&config.freshrss)),
            Arc::new(SyndicationParser),
            Arc::new(DiscordParser::new(discord.token.clone(), discord.message_limit)),
            Arc::new(JsonApiParser),
            Arc::new(RegexXmlParser),
            Arc::new(HtmlMetaParser),
        ];
        for parser in builtins {
            pipeline.insert(parser, true);
        }
        pipeline
    }

    /// Add an externally supplied parser. At equal priority it runs before
    /// the built-ins and after parsers registered earlier.
    pub fn register(&mut self, parser: Arc<dyn Parser>) {
        tracing::debug!(parser = parser.name(), priority = parser.priority(), "Registered parser");
        self.insert(parser, false);
    }

    pub fn register_all(&mut self, parsers: impl IntoIterator<Item = Arc<dyn Parser>>) {
        for parser in parsers {
            self.register(parser);
        }
    }

    fn insert(&mut self, parser: Arc<dyn Parser>, builtin: bool) {
        self.parsers.push(Registered { parser, builtin });
        // Stable: equal keys keep registration order.
        self.parsers
            .sort_by_key(|r| (r.parser.priority(), r.builtin));
    }

    pub fn parsers(&self) -> impl Iterator<Item = &Arc<dyn Parser>> {
        self.parsers.iter().map(|r| &r.parser)
    }

    pub async fn resolve(&self, source: &Source) -> Vec<Item> {
        self.resolve_detailed(source).await.items
    }

    /// Resolve without conditional requests.
    pub async fn resolve_detailed(&self, source: &Source) -> Resolution {
        self.run(self.context(source), source).await
    }

    /// Resolve for one destination: its stored validators are sent, and a
    /// 304 ends the resolution.
    pub async fn resolve_for(&self, source: &Source, destination: usize) -> Resolution {
        self.run(self.context(source).scoped(destination), source).await
    }

    fn context(&self, source: &Source) -> ParseContext {
        ParseContext::new(
            source.clone(),
            self.fetcher.clone(),
            self.normalizer.clone(),
            Utc::now(),
        )
    }

    async fn run(&self, ctx: ParseContext, source: &Source) -> Resolution {
        let mut resolution = Resolution::default();

        for parser in self.parsers().filter(|p| p.applicable(source)) {
            let name = parser.name().to_string();
            resolution.attempted.push(name.clone());

            let outcome = AssertUnwindSafe(parser.parse(&ctx)).catch_unwind().await;
            match outcome {
                Ok(Ok(items)) if !items.is_empty() => {
                    tracing::debug!(url = %source.url, parser = %name, count = items.len(), "Resolved");
                    resolution.items = items;
                    resolution.parser = Some(name);
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::debug!(url = %source.url, parser = %name, error = %e, "Parser failed");
                    resolution.errors.push((name, e.to_string()));
                }
                Err(_) => {
                    tracing::warn!(url = %source.url, parser = %name, "Parser panicked");
                    resolution.errors.push((name, "panicked".to_string()));
                }
            }

            if ctx.not_modified() {
                tracing::debug!(url = %source.url, "Not modified; skipping remaining parsers");
                break;
            }
        }

        resolution.not_modified = ctx.not_modified();
        resolution.fetch_error = ctx.first_fetch_error();
        resolution
    }
}
