use std::sync::Arc;
use std::time::{Duration, Instant};

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tributary::config::FetchConfig;
use tributary::fetcher::{
    ConditionalCache, FetchError, FetchOptions, Fetcher, HostBreaker, HttpFetcher, ValidatorKey,
};

const HOST: &str = "127.0.0.1";

fn config() -> FetchConfig {
    FetchConfig {
        fallback_user_agents: vec!["Fallback/1.0".into()],
        retry_delay_min_ms: 0,
        retry_delay_max_ms: 0,
        ..FetchConfig::default()
    }
}

fn fetcher(config: FetchConfig) -> (HttpFetcher, Arc<HostBreaker>, Arc<ConditionalCache>) {
    let breaker = Arc::new(HostBreaker::new(Duration::from_secs(3600), Duration::ZERO));
    let cache = Arc::new(ConditionalCache::new());
    let fetcher = HttpFetcher::new(config, breaker.clone(), cache.clone()).unwrap();
    (fetcher, breaker, cache)
}

fn for_destination(destination: usize) -> FetchOptions {
    FetchOptions {
        scope: Some(destination),
        ..FetchOptions::default()
    }
}

#[tokio::test]
async fn test_success_stores_validators() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .insert_header("Last-Modified", "Mon, 01 Jan 2024 00:00:00 GMT")
                .set_body_string("<rss/>"),
        )
        .mount(&server)
        .await;

    let (fetcher, breaker, cache) = fetcher(config());
    let url = format!("{}/feed", server.uri());
    fetcher.fetch(&url, &FetchOptions::default()).await.unwrap();
    assert!(cache.is_empty());

    let response = fetcher.fetch(&url, &for_destination(0)).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "<rss/>");
    assert!(cache.get(&ValidatorKey::new(1, &url)).is_none());
    let entry = cache.get(&ValidatorKey::new(0, &url)).unwrap();
    assert_eq!(entry.etag.as_deref(), Some("\"v1\""));
    assert_eq!(entry.last_modified.as_deref(), Some("Mon, 01 Jan 2024 00:00:00 GMT"));
    assert!(breaker.state(HOST).is_none());
}

#[tokio::test]
async fn test_conditional_request_and_not_modified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .and(header("if-none-match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"v1\"").set_body_string("<rss/>"))
        .expect(3)
        .mount(&server)
        .await;

    let (fetcher, breaker, _cache) = fetcher(config());
    let url = format!("{}/feed", server.uri());

    let first = fetcher.fetch(&url, &for_destination(0)).await.unwrap();
    assert!(!first.not_modified);

    let second = fetcher.fetch(&url, &for_destination(0)).await.unwrap();
    assert!(second.not_modified);
    assert!(second.body.is_empty());
    // A 304 is a success, not a strike.
    assert!(breaker.state(HOST).is_none());

    let unconditional = FetchOptions {
        conditional: false,
        ..for_destination(0)
    };
    let third = fetcher.fetch(&url, &unconditional).await.unwrap();
    assert!(!third.not_modified);

    // Another destination has no validators of its own yet.
    let other = fetcher.fetch(&url, &for_destination(1)).await.unwrap();
    assert!(!other.not_modified);
}

#[tokio::test]
async fn test_rate_limit_honours_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
        .expect(1)
        .mount(&server)
        .await;

    let (fetcher, breaker, _cache) = fetcher(config());
    let url = format!("{}/feed", server.uri());

    let err = fetcher.fetch(&url, &FetchOptions::default()).await.unwrap_err();
    assert!(matches!(err, FetchError::FetchFailed { status: Some(429), .. }));

    let state = breaker.state(HOST).unwrap();
    assert_eq!(state.strike_count, 1);
    let remaining = state.remaining(Instant::now()).unwrap();
    assert!(remaining > Duration::from_secs(110) && remaining <= Duration::from_secs(120));

    // Short-circuited without touching the network.
    let err = fetcher.fetch(&url, &FetchOptions::default()).await.unwrap_err();
    assert!(matches!(err, FetchError::HostCoolingDown { .. }));
}

#[tokio::test]
async fn test_server_error_rotates_identity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("user-agent", "Fallback/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let (fetcher, breaker, _cache) = fetcher(config());
    let response = fetcher
        .fetch(&format!("{}/feed", server.uri()), &FetchOptions::default())
        .await
        .unwrap();

    assert_eq!(response.text(), "ok");
    assert!(breaker.state(HOST).is_none());
}

#[tokio::test]
async fn test_exhausted_identities_trip_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let (fetcher, breaker, _cache) = fetcher(config());
    let url = format!("{}/feed", server.uri());

    let err = fetcher.fetch(&url, &FetchOptions::default()).await.unwrap_err();
    assert!(matches!(err, FetchError::FetchFailed { status: Some(503), .. }));
    assert_eq!(breaker.state(HOST).unwrap().strike_count, 1);

    let err = fetcher.fetch(&url, &FetchOptions::default()).await.unwrap_err();
    assert!(matches!(err, FetchError::HostCoolingDown { .. }));
}

#[tokio::test]
async fn test_forbidden_skips_rotation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let (fetcher, breaker, _cache) = fetcher(config());
    let err = fetcher
        .fetch(&format!("{}/feed", server.uri()), &FetchOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::FetchFailed { status: Some(403), .. }));
    assert!(breaker.state(HOST).unwrap().remaining(Instant::now()).is_some());
}
