use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    REFERER, RETRY_AFTER, USER_AGENT,
};
use reqwest::{Client, StatusCode};
use url::Url;

use crate::app::Result;
use crate::config::FetchConfig;
use crate::fetcher::{
    ConditionalCache, FailureKind, FetchError, FetchOptions, FetchResponse, Fetcher, HostBreaker,
    ValidatorKey,
};

pub struct HttpFetcher {
    client: Client,
    config: FetchConfig,
    breaker: Arc<HostBreaker>,
    cache: Arc<ConditionalCache>,
}

impl HttpFetcher {
    pub fn new(
        config: FetchConfig,
        breaker: Arc<HostBreaker>,
        cache: Arc<ConditionalCache>,
    ) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .brotli(true)
            .user_agent(config.user_agent.clone());

        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
            tracing::info!(proxy, "Outbound proxy enabled");
        }

        Ok(Self {
            client: builder.build()?,
            config,
            breaker,
            cache,
        })
    }

    pub fn breaker(&self) -> &Arc<HostBreaker> {
        &self.breaker
    }

    pub fn conditional_cache(&self) -> &Arc<ConditionalCache> {
        &self.cache
    }

    /// Base headers, then per-host overrides, then caller headers, then the
    /// rotated identity.
    fn build_headers(&self, url: &Url, options: &FetchOptions, identity: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(options.accept.header_value()));
        insert_header(&mut headers, ACCEPT_LANGUAGE.as_str(), &self.config.accept_language);
        insert_header(&mut headers, REFERER.as_str(), &url.origin().ascii_serialization());

        let host = url.host_str().unwrap_or_default();
        for rule in self.config.host_headers.iter().filter(|r| r.matches(host)) {
            for (name, value) in &rule.headers {
                insert_header(&mut headers, name, value);
            }
        }

        for (name, value) in &options.headers {
            insert_header(&mut headers, name, value);
        }

        if let Some(key) = validator_key(url.as_str(), options).filter(|_| options.conditional) {
            if let Some(entry) = self.cache.get(&key) {
                if let Some(etag) = &entry.etag {
                    insert_header(&mut headers, IF_NONE_MATCH.as_str(), etag);
                }
                if let Some(last_modified) = &entry.last_modified {
                    insert_header(&mut headers, IF_MODIFIED_SINCE.as_str(), last_modified);
                }
            }
        }

        if let Some(identity) = identity {
            insert_header(&mut headers, USER_AGENT.as_str(), identity);
        }

        headers
    }

    async fn pause_before_retry(&self) {
        let (min, max) = (self.config.retry_delay_min_ms, self.config.retry_delay_max_ms);
        if max == 0 {
            return;
        }
        let ms = rand::rng().random_range(min.min(max)..=max);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

fn validator_key(url: &str, options: &FetchOptions) -> Option<ValidatorKey> {
    if !options.form.is_empty() {
        return None;
    }
    options.scope.map(|destination| ValidatorKey::new(destination, url))
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => tracing::debug!(name, "Skipping invalid header"),
    }
}

/// `Retry-After` as delta-seconds or an HTTP date.
pub fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

fn classify_transport_error(err: &reqwest::Error) -> FailureKind {
    if err.is_timeout() {
        FailureKind::Timeout
    } else {
        FailureKind::Network
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> std::result::Result<FetchResponse, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::UnsupportedScheme(parsed.scheme().to_string()));
        }
        let host = parsed.host_str().unwrap_or_default().to_string();

        let identities = std::iter::once(None).chain(
            self.config
                .fallback_user_agents
                .iter()
                .map(|ua| Some(ua.as_str())),
        );

        let mut last_failure: Option<(FailureKind, String)> = None;

        for (attempt, identity) in identities.enumerate() {
            // Re-checked before every attempt: a concurrent fetch may have
            // tripped the breaker meanwhile.
            self.breaker.check(&host, Instant::now())?;

            if attempt > 0 {
                tracing::warn!(url, attempt, identity = identity.unwrap_or_default(), "Retrying with rotated identity");
                self.pause_before_retry().await;
            }

            let headers = self.build_headers(&parsed, options, identity);
            let request = if options.form.is_empty() {
                self.client.get(parsed.clone())
            } else {
                self.client.post(parsed.clone()).form(&options.form)
            };
            let response = match request.headers(headers).send().await {
                Ok(response) => response,
                Err(e) => {
                    last_failure = Some((classify_transport_error(&e), e.to_string()));
                    continue;
                }
            };

            let status = response.status();

            if status == StatusCode::NOT_MODIFIED {
                self.breaker.record_success(&host);
                tracing::debug!(url, "Not modified");
                return Ok(FetchResponse {
                    status: status.as_u16(),
                    headers: response.headers().clone(),
                    body: Vec::new(),
                    not_modified: true,
                });
            }

            if status.is_success() {
                let headers = response.headers().clone();
                match response.bytes().await {
                    Ok(body) => {
                        self.breaker.record_success(&host);
                        if let Some(key) = validator_key(url, options) {
                            self.cache.update_from_headers(&key, &headers);
                        }
                        tracing::debug!(url, status = status.as_u16(), bytes = body.len(), "Fetched");
                        return Ok(FetchResponse {
                            status: status.as_u16(),
                            headers,
                            body: body.to_vec(),
                            not_modified: false,
                        });
                    }
                    Err(e) => {
                        last_failure = Some((classify_transport_error(&e), e.to_string()));
                        continue;
                    }
                }
            }

            let failure = FailureKind::Status {
                code: status.as_u16(),
                retry_after: parse_retry_after(response.headers(), Utc::now()),
            };

            if failure.is_hard_reject() {
                self.breaker.record_failure(&host, &failure, Instant::now());
                return Err(FetchError::FetchFailed {
                    url: url.to_string(),
                    status: Some(status.as_u16()),
                    reason: "rejected by host".to_string(),
                });
            }

            last_failure = Some((failure, format!("HTTP {}", status)));
        }

        let (failure, reason) =
            last_failure.unwrap_or((FailureKind::Network, "no attempt made".to_string()));
        self.breaker.record_failure(&host, &failure, Instant::now());
        tracing::error!(url, reason = %reason, "All attempts failed");

        Err(FetchError::FetchFailed {
            url: url.to_string(),
            status: failure.status_code(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostHeaders;
    use crate::fetcher::{AcceptProfile, ConditionalEntry};

    fn fetcher(config: FetchConfig) -> HttpFetcher {
        HttpFetcher::new(
            config,
            Arc::new(HostBreaker::default()),
            Arc::new(ConditionalCache::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_retry_after_seconds_and_date() {
        let now = Utc::now();
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("120"));
        assert_eq!(parse_retry_after(&headers, now), Some(Duration::from_secs(120)));

        let later = (now + chrono::Duration::seconds(90)).to_rfc2822();
        headers.insert(RETRY_AFTER, HeaderValue::from_str(&later).unwrap());
        let parsed = parse_retry_after(&headers, now).unwrap();
        assert!(parsed <= Duration::from_secs(90) && parsed >= Duration::from_secs(89));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers, now), None);
    }

    #[test]
    fn test_header_layering() {
        let config = FetchConfig {
            host_headers: vec![HostHeaders {
                host: "example.com".into(),
                headers: [("Sec-GPC".to_string(), "1".to_string())].into_iter().collect(),
            }],
            ..FetchConfig::default()
        };
        let fetcher = fetcher(config);
        fetcher.cache.update(
            &ValidatorKey::new(0, "https://www.example.com/rss"),
            ConditionalEntry {
                etag: Some("\"abc\"".into()),
                last_modified: None,
            },
        );

        let url = Url::parse("https://www.example.com/rss").unwrap();
        let options = FetchOptions {
            scope: Some(0),
            ..FetchOptions::accept(AcceptProfile::Html)
        };
        let headers = fetcher.build_headers(&url, &options, Some("Rotated/1.0"));

        assert_eq!(headers[ACCEPT], AcceptProfile::Html.header_value());
        assert_eq!(headers[REFERER], "https://www.example.com");
        assert_eq!(headers["sec-gpc"], "1");
        assert_eq!(headers[IF_NONE_MATCH], "\"abc\"");
        assert_eq!(headers[USER_AGENT], "Rotated/1.0");

        let unconditional = FetchOptions {
            conditional: false,
            ..options.clone()
        };
        let headers = fetcher.build_headers(&url, &unconditional, None);
        assert!(headers.get(IF_NONE_MATCH).is_none());
        assert!(headers.get(USER_AGENT).is_none());

        let other_destination = FetchOptions {
            scope: Some(1),
            ..options.clone()
        };
        let headers = fetcher.build_headers(&url, &other_destination, None);
        assert!(headers.get(IF_NONE_MATCH).is_none());

        let unscoped = FetchOptions::accept(AcceptProfile::Html);
        let headers = fetcher.build_headers(&url, &unscoped, None);
        assert!(headers.get(IF_NONE_MATCH).is_none());
    }

    #[tokio::test]
    async fn test_rejects_unsupported_scheme() {
        let fetcher = fetcher(FetchConfig::default());
        let err = fetcher
            .fetch("ftp://example.com/feed", &FetchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::UnsupportedScheme("ftp".into()));
        assert!(fetcher.breaker.state("example.com").is_none());
    }
}
