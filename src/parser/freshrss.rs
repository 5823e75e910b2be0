//! Items from a FreshRSS instance, read through its Fever API.
//!
//! Sources look like `freshrss://all`, `freshrss://feed/<id>`,
//! `freshrss://group/<id>` or `freshrss://saved`. Every API call is a form
//! POST carrying the Fever key from the `[freshrss]` config section.

use async_trait::async_trait;
use chrono::DateTime;
use md5::{Digest, Md5};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::app::Result;
use crate::config::FreshRssConfig;
use crate::domain::{Item, Source};
use crate::fetcher::{AcceptProfile, FetchOptions};
use crate::normalizer::RawEntry;
use crate::parser::{parse_failed, ParseContext, Parser};

/// Saved items fetched per check.
const SAVED_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeverQuery {
    All,
    Feed(String),
    Group(String),
    Saved,
}

impl FeverQuery {
    pub fn from_source(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("freshrss://")?.trim_end_matches('/');
        let (kind, id) = match rest.split_once('/') {
            Some((kind, id)) => (kind, Some(id)),
            None => (rest, None),
        };
        let id = id.filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()));

        match (kind, id) {
            ("all", None) => Some(Self::All),
            ("saved", None) => Some(Self::Saved),
            ("feed", Some(id)) => Some(Self::Feed(id.to_string())),
            ("group", Some(id)) => Some(Self::Group(id.to_string())),
            _ => None,
        }
    }
}

/// Fever ids arrive as numbers or strings depending on the server.
fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FeverResponse {
    auth: i64,
    feeds: Vec<FeverFeed>,
    feeds_groups: Vec<FeedsGroup>,
    items: Vec<FeverItem>,
    saved_item_ids: String,
}

#[derive(Debug, Deserialize)]
struct FeverFeed {
    #[serde(deserialize_with = "lenient_id")]
    id: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct FeedsGroup {
    #[serde(deserialize_with = "lenient_id")]
    group_id: String,
    #[serde(default)]
    feed_ids: String,
}

#[derive(Debug, Deserialize)]
struct FeverItem {
    #[serde(deserialize_with = "lenient_id")]
    id: String,
    #[serde(default, deserialize_with = "lenient_id")]
    feed_id: String,
    title: Option<String>,
    author: Option<String>,
    html: Option<String>,
    url: Option<String>,
    created_on_time: Option<i64>,
}

/// Fever key: the configured one, else md5 of `username:password`.
pub fn api_key(config: &FreshRssConfig) -> Option<String> {
    let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());

    non_empty(&config.fever_key).or_else(|| {
        let (user, pass) = (non_empty(&config.username)?, non_empty(&config.password)?);
        Some(hex::encode(Md5::digest(format!("{}:{}", user, pass).as_bytes())))
    })
}

pub struct FreshRssParser {
    /// `<instance>/api/fever.php`
    endpoint: Option<String>,
    api_key: Option<String>,
}

impl FreshRssParser {
    pub fn new(config: &FreshRssConfig) -> Self {
        let endpoint = config
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(|u| format!("{}/api/fever.php", u.trim_end_matches('/')));
        Self {
            endpoint,
            api_key: api_key(config),
        }
    }

    async fn call(&self, ctx: &ParseContext, endpoint: &str, key: &str, query: &str) -> Result<FeverResponse> {
        let options = FetchOptions {
            accept: AcceptProfile::Json,
            conditional: false,
            form: vec![("api_key".to_string(), key.to_string())],
            ..FetchOptions::default()
        };
        let response = ctx.fetch_url(&format!("{}?api&{}", endpoint, query), options).await?;

        let parsed: FeverResponse =
            serde_json::from_slice(&response.body).map_err(|e| parse_failed(self.name(), e))?;
        if parsed.auth == 0 {
            return Err(parse_failed(self.name(), "Fever API rejected the key"));
        }
        Ok(parsed)
    }

    async fn items(&self, ctx: &ParseContext, endpoint: &str, key: &str, query: FeverQuery) -> Result<Vec<FeverItem>> {
        let items_query = match query {
            FeverQuery::All => "items".to_string(),
            FeverQuery::Feed(id) => format!("items&feed_ids={}", id),
            FeverQuery::Group(id) => {
                let groups = self.call(ctx, endpoint, key, "feeds&groups").await?;
                let Some(group) = groups.feeds_groups.into_iter().find(|g| g.group_id == id) else {
                    tracing::warn!(group = %id, "FreshRSS group not found");
                    return Ok(Vec::new());
                };
                format!("items&feed_ids={}", group.feed_ids)
            }
            FeverQuery::Saved => {
                let saved = self.call(ctx, endpoint, key, "saved_item_ids").await?.saved_item_ids;
                let ids: Vec<&str> = saved
                    .split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .take(SAVED_LIMIT)
                    .collect();
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                format!("items&with_ids={}", ids.join(","))
            }
        };
        Ok(self.call(ctx, endpoint, key, &items_query).await?.items)
    }
}

fn to_raw(item: FeverItem, feeds: &[FeverFeed]) -> RawEntry {
    let feed_title = feeds
        .iter()
        .find(|f| f.id == item.feed_id)
        .map(|f| f.title.clone())
        .filter(|t| !t.is_empty());

    RawEntry {
        id: Some(format!("freshrss-{}", item.id)),
        title: item.title,
        link: item.url,
        html: item.html,
        published: item.created_on_time.and_then(|t| DateTime::from_timestamp(t, 0)),
        author: feed_title.or(item.author),
        tags: vec!["freshrss".to_string()],
        ..Default::default()
    }
}

#[async_trait]
impl Parser for FreshRssParser {
    fn name(&self) -> &str {
        "freshrss"
    }

    fn priority(&self) -> i32 {
        15
    }

    fn applicable(&self, source: &Source) -> bool {
        self.endpoint.is_some() && self.api_key.is_some() && FeverQuery::from_source(&source.url).is_some()
    }

    async fn parse(&self, ctx: &ParseContext) -> Result<Vec<Item>> {
        let (Some(endpoint), Some(key), Some(query)) = (
            self.endpoint.as_deref(),
            self.api_key.as_deref(),
            FeverQuery::from_source(&ctx.source().url),
        ) else {
            return Ok(Vec::new());
        };

        let feeds = self.call(ctx, endpoint, key, "feeds").await?.feeds;
        let mut items = self.items(ctx, endpoint, key, query).await?;
        items.retain(|item| item.url.as_deref().is_some_and(|u| !u.trim().is_empty()));
        items.sort_by_key(|item| std::cmp::Reverse(item.created_on_time.unwrap_or(0)));

        let raws = items.into_iter().map(|item| to_raw(item, &feeds)).collect();
        Ok(ctx.normalize(raws))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::testing::StubFetcher;
    use std::sync::Arc;

    const API: &str = "https://rss.example.com/api/fever.php";

    const FEEDS: &str = r#"{"api_version":3,"auth":1,"feeds":[
        {"id":7,"title":"Example Blog"},{"id":8,"title":"Other"}]}"#;

    const ITEMS: &str = r#"{"api_version":3,"auth":1,"items":[
        {"id":"101","feed_id":7,"title":"Older","author":"ann","url":"https://blog.example/older",
         "html":"<p>First <img src=\"https://blog.example/a.png\"></p>","created_on_time":1704103200},
        {"id":"102","feed_id":8,"title":"Newer","url":"https://other.example/newer",
         "html":"<p>Second</p>","created_on_time":1704189600},
        {"id":"103","feed_id":7,"title":"No link","html":"x","created_on_time":1704200000}]}"#;

    fn config() -> FreshRssConfig {
        FreshRssConfig {
            url: Some("https://rss.example.com/".into()),
            fever_key: Some("k3y".into()),
            ..FreshRssConfig::default()
        }
    }

    fn context(source: &str, fetcher: Arc<StubFetcher>) -> ParseContext {
        ParseContext::new(
            Source::new(source),
            fetcher,
            crate::normalizer::Normalizer::new(),
            chrono::Utc::now(),
        )
    }

    #[test]
    fn test_query_from_source() {
        assert_eq!(FeverQuery::from_source("freshrss://all"), Some(FeverQuery::All));
        assert_eq!(FeverQuery::from_source("freshrss://saved/"), Some(FeverQuery::Saved));
        assert_eq!(FeverQuery::from_source("freshrss://feed/12"), Some(FeverQuery::Feed("12".into())));
        assert_eq!(FeverQuery::from_source("freshrss://group/3"), Some(FeverQuery::Group("3".into())));
        assert_eq!(FeverQuery::from_source("freshrss://feed/"), None);
        assert_eq!(FeverQuery::from_source("freshrss://group/abc"), None);
        assert_eq!(FeverQuery::from_source("freshrss://starred"), None);
        assert_eq!(FeverQuery::from_source("https://rss.example.com"), None);
    }

    #[test]
    fn test_api_key_from_credentials() {
        assert_eq!(api_key(&config()).as_deref(), Some("k3y"));

        let derived = FreshRssConfig {
            username: Some("alice".into()),
            password: Some("secret".into()),
            ..FreshRssConfig::default()
        };
        assert_eq!(api_key(&derived).as_deref(), Some("6f622058968bb90757e6c6ed79e5df81"));

        let incomplete = FreshRssConfig {
            username: Some("alice".into()),
            ..FreshRssConfig::default()
        };
        assert_eq!(api_key(&incomplete), None);
    }

    #[test]
    fn test_applicable_only_when_configured() {
        let source = Source::new("freshrss://all");
        assert!(FreshRssParser::new(&config()).applicable(&source));
        assert!(!FreshRssParser::new(&config()).applicable(&Source::new("https://example.com/rss")));
        assert!(!FreshRssParser::new(&FreshRssConfig::default()).applicable(&source));
    }

    #[tokio::test]
    async fn test_all_items_newest_first() {
        let fetcher = Arc::new(
            StubFetcher::new()
                .with(&format!("{}?api&feeds", API), "application/json", FEEDS)
                .with(&format!("{}?api&items", API), "application/json", ITEMS),
        );
        let ctx = context("freshrss://all", fetcher.clone());
        let items = FreshRssParser::new(&config()).parse(&ctx).await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Newer");
        assert_eq!(items[0].id, "freshrss-102");
        assert_eq!(items[0].author.as_deref(), Some("Other"));
        assert_eq!(items[1].title, "Older");
        assert_eq!(items[1].author.as_deref(), Some("Example Blog"));
        assert_eq!(items[1].snippet, "First");
        assert_eq!(items[1].media.as_deref(), Some("https://blog.example/a.png"));
        assert_eq!(items[1].timestamp.timestamp(), 1704103200);
        assert!(items[1].tags.contains("freshrss"));

        let requests = fetcher.requests.lock().unwrap();
        assert!(requests.iter().all(|(_, options)| {
            options.form == vec![("api_key".to_string(), "k3y".to_string())] && !options.conditional
        }));
    }

    #[tokio::test]
    async fn test_group_resolves_feed_ids() {
        let groups = r#"{"auth":1,"groups":[{"id":4,"title":"Tech"}],
            "feeds_groups":[{"group_id":4,"feed_ids":"7,8"}]}"#;
        let fetcher = Arc::new(
            StubFetcher::new()
                .with(&format!("{}?api&feeds", API), "application/json", FEEDS)
                .with(&format!("{}?api&feeds&groups", API), "application/json", groups)
                .with(&format!("{}?api&items&feed_ids=7,8", API), "application/json", ITEMS),
        );
        let items = FreshRssParser::new(&config())
            .parse(&context("freshrss://group/4", fetcher.clone()))
            .await
            .unwrap();
        assert_eq!(items.len(), 2);

        let missing = FreshRssParser::new(&config())
            .parse(&context("freshrss://group/9", fetcher))
            .await
            .unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_saved_items_capped() {
        let ids: Vec<String> = (1..=60).map(|i| i.to_string()).collect();
        let saved = format!(r#"{{"auth":1,"saved_item_ids":"{}"}}"#, ids.join(","));
        let expected = format!("{}?api&items&with_ids={}", API, ids[..SAVED_LIMIT].join(","));
        let fetcher = Arc::new(
            StubFetcher::new()
                .with(&format!("{}?api&feeds", API), "application/json", FEEDS)
                .with(&format!("{}?api&saved_item_ids", API), "application/json", &saved)
                .with(&expected, "application/json", ITEMS),
        );
        let items = FreshRssParser::new(&config())
            .parse(&context("freshrss://saved", fetcher))
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_key_is_an_error() {
        let fetcher = Arc::new(StubFetcher::new().with(
            &format!("{}?api&feeds", API),
            "application/json",
            r#"{"api_version":3,"auth":0}"#,
        ));
        let err = FreshRssParser::new(&config())
            .parse(&context("freshrss://all", fetcher))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rejected"));
    }
}
