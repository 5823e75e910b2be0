pub mod breaker;
pub mod conditional;
pub mod http_fetcher;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use thiserror::Error;

pub use breaker::{FailureKind, HostBreaker, HostState};
pub use conditional::{ConditionalCache, ConditionalEntry, ValidatorKey};
pub use http_fetcher::HttpFetcher;

/// Which kind of document the caller hopes to get back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AcceptProfile {
    #[default]
    Auto,
    Xml,
    Json,
    Html,
}

impl AcceptProfile {
    pub fn header_value(self) -> &'static str {
        match self {
            Self::Auto => {
                "application/rss+xml,application/atom+xml,application/xml,application/json;q=0.9,*/*;q=0.8"
            }
            Self::Xml => "application/rss+xml,application/atom+xml,application/xml;q=0.9,*/*;q=0.8",
            Self::Json => "application/feed+json,application/json,text/json;q=0.9,*/*;q=0.8",
            Self::Html => "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub accept: AcceptProfile,
    /// Extra request headers, applied after the base and per-host ones.
    pub headers: Vec<(String, String)>,
    /// Send `If-None-Match`/`If-Modified-Since` from the conditional cache.
    pub conditional: bool,
    /// Destination whose validators are sent and refreshed. Without one the
    /// request is unconditional and leaves the cache alone.
    pub scope: Option<usize>,
    /// Form fields. A non-empty form turns the request into a POST.
    pub form: Vec<(String, String)>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            accept: AcceptProfile::Auto,
            headers: Vec::new(),
            conditional: true,
            scope: None,
            form: Vec::new(),
        }
    }
}

impl FetchOptions {
    pub fn accept(accept: AcceptProfile) -> Self {
        Self {
            accept,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// HTTP 304: success with an empty body.
    pub not_modified: bool,
}

impl FetchResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("host {host} is cooling down for another {}s", .remaining.as_secs())]
    HostCoolingDown { host: String, remaining: Duration },

    #[error("fetch of {url} failed ({}): {reason}", .status.map(|s| s.to_string()).unwrap_or_else(|| "no status".into()))]
    FetchFailed {
        url: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchResponse, FetchError>;
}
