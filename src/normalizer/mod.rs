pub mod text;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use html_escape::decode_html_entities;

use crate::domain::Item;

pub use text::{first_inline_image, normalize_link, parse_date, strip_html, truncate_chars};

pub const DEFAULT_SNIPPET_LEN: usize = 500;
const UNTITLED: &str = "(untitled)";

/// Source record as a parser found it, before shaping.
///
/// Every field is optional; empty strings are treated as absent.
#[derive(Debug, Clone, Default)]
pub struct RawEntry {
    pub id: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    /// Plain-text description, preferred for the snippet.
    pub text: Option<String>,
    /// Long-form markup; snippet fallback and last resort for media.
    pub html: Option<String>,
    /// Dedicated thumbnail, the best media candidate.
    pub thumbnail: Option<String>,
    pub enclosure: Option<String>,
    pub published: Option<DateTime<Utc>>,
    /// Unparsed date string, used when `published` is absent.
    pub date: Option<String>,
    pub author: Option<String>,
    pub tags: Vec<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Clone)]
pub struct Normalizer {
    snippet_len: usize,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self::with_snippet_len(DEFAULT_SNIPPET_LEN)
    }

    pub fn with_snippet_len(snippet_len: usize) -> Self {
        Self { snippet_len }
    }

    /// Shape one raw entry. `now` stands in for a missing timestamp.
    pub fn normalize(&self, raw: RawEntry, now: DateTime<Utc>) -> Item {
        let html = non_empty(raw.html);

        let title = non_empty(raw.title)
            .map(|t| strip_html(&t))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNTITLED.to_string());

        let link = non_empty(raw.link).map(|l| decode_html_entities(&l).to_string());

        let snippet_source = non_empty(raw.text).or_else(|| html.clone()).unwrap_or_default();
        let snippet = truncate_chars(&strip_html(&snippet_source), self.snippet_len);

        let media = non_empty(raw.thumbnail)
            .or_else(|| non_empty(raw.enclosure))
            .or_else(|| html.as_deref().and_then(first_inline_image));

        let parsed = raw
            .published
            .or_else(|| raw.date.as_deref().and_then(parse_date));
        let (timestamp, timestamp_estimated) = match parsed {
            Some(ts) => (ts, false),
            None => (now, true),
        };

        let id = non_empty(raw.id)
            .or_else(|| link.as_deref().map(normalize_link))
            .unwrap_or_else(|| Item::content_id(&title, &snippet));

        let author = non_empty(raw.author).map(|a| strip_html(&a)).filter(|a| !a.is_empty());

        let tags: BTreeSet<String> = raw
            .tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        Item {
            id,
            title,
            link,
            snippet,
            timestamp,
            timestamp_estimated,
            media,
            author,
            tags,
        }
    }

    pub fn normalize_all(&self, raws: Vec<RawEntry>, now: DateTime<Utc>) -> Vec<Item> {
        raws.into_iter().map(|raw| self.normalize(raw, now)).collect()
    }
}
