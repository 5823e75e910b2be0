use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::app::Result;
use crate::domain::Item;
use crate::fetcher::AcceptProfile;
use crate::normalizer::{text::date_from_number, RawEntry};
use crate::parser::{parse_failed, ParseContext, Parser};

const LIST_KEYS: &[&str] = &["items", "posts", "data", "entries", "results", "articles"];

const TITLE_KEYS: &[&str] = &["title", "name", "headline"];
const LINK_KEYS: &[&str] = &["url", "link", "href", "permalink"];
const TEXT_KEYS: &[&str] = &["summary", "description", "excerpt", "content_text"];
const HTML_KEYS: &[&str] = &["content", "content_html", "body", "text", "html"];
const DATE_KEYS: &[&str] = &["date", "published_at", "published", "pubDate", "updated_at", "created_at", "timestamp"];
const IMAGE_KEYS: &[&str] = &["image", "thumbnail", "media_url", "image_url", "cover", "banner_image"];
const ID_KEYS: &[&str] = &["id", "guid", "uuid", "slug"];

/// Arbitrary JSON endpoints that hold a list of post-like objects.
pub struct JsonApiParser;

/// The array of entries in a JSON document, if there is one.
fn find_entries(root: &Value) -> Option<&Vec<Value>> {
    match root {
        Value::Array(entries) => Some(entries),
        Value::Object(map) => LIST_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .or_else(|| {
                map.get("feed")
                    .and_then(|feed| feed.get("entries"))
                    .and_then(Value::as_array)
            }),
        _ => None,
    }
}

fn string_at(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        // {"rendered": "..."} as served by WordPress
        Value::Object(inner) => inner
            .get("rendered")
            .or_else(|| inner.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    })
}

fn author_of(map: &Map<String, Value>) -> Option<String> {
    ["author", "user", "creator"]
        .iter()
        .find_map(|key| match map.get(*key)? {
            Value::String(s) => Some(s.clone()),
            Value::Object(inner) => ["name", "username", "display_name"]
                .iter()
                .find_map(|k| inner.get(*k).and_then(Value::as_str))
                .map(str::to_string),
            _ => None,
        })
}

fn tags_of(map: &Map<String, Value>) -> Vec<String> {
    ["tags", "categories"]
        .iter()
        .filter_map(|key| map.get(*key).and_then(Value::as_array))
        .flatten()
        .filter_map(|tag| match tag {
            Value::String(s) => Some(s.clone()),
            Value::Object(inner) => inner.get("name").and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .collect()
}

fn to_raw(map: &Map<String, Value>) -> RawEntry {
    let numeric_date = DATE_KEYS
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_i64))
        .and_then(date_from_number);

    RawEntry {
        id: string_at(map, ID_KEYS),
        title: string_at(map, TITLE_KEYS),
        link: string_at(map, LINK_KEYS),
        text: string_at(map, TEXT_KEYS),
        html: string_at(map, HTML_KEYS),
        thumbnail: string_at(map, IMAGE_KEYS),
        enclosure: None,
        published: numeric_date,
        date: string_at(map, DATE_KEYS),
        author: author_of(map),
        tags: tags_of(map),
    }
}

#[async_trait]
impl Parser for JsonApiParser {
    fn name(&self) -> &str {
        "json-api"
    }

    fn priority(&self) -> i32 {
        40
    }

    async fn parse(&self, ctx: &ParseContext) -> Result<Vec<Item>> {
        let response = ctx.fetch(AcceptProfile::Json).await?;
        if response.not_modified {
            return Ok(Vec::new());
        }

        let root: Value = serde_json::from_slice(&response.body).map_err(|e| parse_failed(self.name(), e))?;
        let Some(entries) = find_entries(&root) else {
            return Ok(Vec::new());
        };

        let raws: Vec<RawEntry> = entries
            .iter()
            .filter_map(Value::as_object)
            .map(to_raw)
            // Objects with nothing to show are not posts
            .filter(|raw| raw.title.is_some() || raw.link.is_some())
            .collect();

        Ok(ctx.normalize(raws))
    }
}
