//! Last-resort parser for feeds too broken for a real XML parser.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use regex::Regex;

use crate::app::Result;
use crate::domain::Item;
use crate::fetcher::AcceptProfile;
use crate::normalizer::{text::clean_cdata, RawEntry};
use crate::parser::{ParseContext, Parser};

static RE_ITEM: OnceLock<Regex> = OnceLock::new();
static RE_ENTRY: OnceLock<Regex> = OnceLock::new();
static RE_ATOM_LINK: OnceLock<Regex> = OnceLock::new();
static RE_MEDIA_URL: OnceLock<Regex> = OnceLock::new();
static RE_ENCLOSURE: OnceLock<Regex> = OnceLock::new();
static RE_CATEGORY: OnceLock<Regex> = OnceLock::new();
static RE_TAGS: OnceLock<Mutex<HashMap<String, Regex>>> = OnceLock::new();

pub struct RegexXmlParser;

/// Inner text of the first `<tag>` element, CDATA unwrapped.
fn get_tag(block: &str, tag: &str) -> Option<String> {
    tag_regex(tag)?
        .captures(block)
        .and_then(|c| c.get(1))
        .map(|m| clean_cdata(m.as_str()))
        .filter(|s| !s.is_empty())
}

/// Element pattern for `tag`, compiled on first use.
fn tag_regex(tag: &str) -> Option<Regex> {
    let mut cache = RE_TAGS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    if let Some(re) = cache.get(tag) {
        return Some(re.clone());
    }
    let pattern = format!(r"(?is)<{0}(?:\s[^>]*)?>(.*?)</{0}>", regex::escape(tag));
    let re = Regex::new(&pattern).ok()?;
    cache.insert(tag.to_string(), re.clone());
    Some(re)
}

fn first_tag(block: &str, tags: &[&str]) -> Option<String> {
    tags.iter().find_map(|tag| get_tag(block, tag))
}

fn capture(re: &Regex, block: &str) -> Option<String> {
    re.captures(block)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn inner_blocks<'a>(re: &Regex, xml: &'a str) -> Vec<&'a str> {
    re.captures_iter(xml)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

/// `<item>` bodies, or `<entry>` bodies when there are no items.
fn blocks(xml: &str) -> Vec<&str> {
    let item = RE_ITEM.get_or_init(|| Regex::new(r"(?is)<item\b[^>]*>(.*?)</item>").expect("item regex"));
    let entry = RE_ENTRY.get_or_init(|| Regex::new(r"(?is)<entry\b[^>]*>(.*?)</entry>").expect("entry regex"));

    let items = inner_blocks(item, xml);
    if items.is_empty() {
        inner_blocks(entry, xml)
    } else {
        items
    }
}

fn parse_block(block: &str) -> RawEntry {
    let atom_link = RE_ATOM_LINK.get_or_init(|| {
        Regex::new(r#"(?is)<link\b[^>]*?\bhref\s*=\s*["']([^"']+)["']"#).expect("atom link regex")
    });
    let media_url = RE_MEDIA_URL.get_or_init(|| {
        Regex::new(r#"(?is)<media:(?:thumbnail|content)\b[^>]*?\burl\s*=\s*["']([^"']+)["']"#)
            .expect("media regex")
    });
    let enclosure = RE_ENCLOSURE.get_or_init(|| {
        Regex::new(r#"(?is)<enclosure\b[^>]*?\burl\s*=\s*["']([^"']+)["']"#).expect("enclosure regex")
    });
    let category = RE_CATEGORY.get_or_init(|| {
        Regex::new(r#"(?is)<category\b(?:[^>]*?\bterm\s*=\s*["']([^"']+)["'][^>]*/?>|[^>]*>(.*?)</category>)"#)
            .expect("category regex")
    });

    let link = get_tag(block, "link").or_else(|| capture(atom_link, block));
    let tags = category
        .captures_iter(block)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| clean_cdata(m.as_str()))
        .collect();

    let text = first_tag(block, &["description", "summary"]);
    // Descriptions often carry the markup, and with it the only image
    let html = first_tag(block, &["content:encoded", "content"]).or_else(|| text.clone());

    RawEntry {
        id: first_tag(block, &["guid", "id"]),
        title: get_tag(block, "title"),
        link,
        text,
        html,
        thumbnail: capture(media_url, block),
        enclosure: capture(enclosure, block),
        published: None,
        date: first_tag(block, &["pubDate", "published", "updated", "dc:date"]),
        author: first_tag(block, &["dc:creator", "author"]),
        tags,
    }
}

#[async_trait]
impl Parser for RegexXmlParser {
    fn name(&self) -> &str {
        "regex-xml"
    }

    fn priority(&self) -> i32 {
        60
    }

    async fn parse(&self, ctx: &ParseContext) -> Result<Vec<Item>> {
        let response = ctx.fetch(AcceptProfile::Xml).await?;
        if response.not_modified {
            return Ok(Vec::new());
        }

        let body = response.text();
        let raws = blocks(&body)
            .into_iter()
            .map(parse_block)
            .filter(|raw| raw.title.is_some() || raw.link.is_some())
            .collect();
        Ok(ctx.normalize(raws))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::testing::{run, StubFetcher};

    const URL: &str = "https://broken.example/rss";

    // Unescaped ampersand and an unclosed <br> make this invalid XML.
    const BROKEN_RSS: &str = r#"<rss><channel><title>Broken & Co</title>
<item>
  <title><![CDATA[Fish & Chips]]></title>
  <link>https://broken.example/fish?utm_source=rss</link>
  <description><![CDATA[<p>Tasty<br> <img src="https://broken.example/fish.jpg"></p>]]></description>
  <pubDate>Tue, 02 Jan 2024 08:00:00 GMT</pubDate>
  <dc:creator>Chef</dc:creator>
  <category>food</category>
</item>
<item>
  <title>Second</title>
  <guid isPermaLink="false">second-guid</guid>
  <enclosure url="https://broken.example/second.png" type="image/png"/>
</item>
</channel></rss>"#;

    const BROKEN_ATOM: &str = r#"<feed><entry>
  <title>Atom & stuff</title>
  <link rel="alternate" href="https://broken.example/atom"/>
  <updated>2024-01-03T00:00:00Z</updated>
  <media:thumbnail url="https://broken.example/a.jpg"/>
  <category term="news"/>
</entry></feed>"#;

    #[tokio::test]
    async fn test_broken_rss_items() {
        let items = run(&RegexXmlParser, StubFetcher::new().with(URL, "text/xml", BROKEN_RSS), URL)
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Fish & Chips");
        assert_eq!(items[0].id, "https://broken.example/fish");
        assert_eq!(items[0].snippet, "Tasty");
        assert_eq!(items[0].media.as_deref(), Some("https://broken.example/fish.jpg"));
        assert_eq!(items[0].author.as_deref(), Some("Chef"));
        assert!(items[0].tags.contains("food"));
        assert!(!items[0].timestamp_estimated);

        assert_eq!(items[1].id, "second-guid");
        assert_eq!(items[1].media.as_deref(), Some("https://broken.example/second.png"));
    }

    #[tokio::test]
    async fn test_broken_atom_entries() {
        let items = run(&RegexXmlParser, StubFetcher::new().with(URL, "text/xml", BROKEN_ATOM), URL)
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].link.as_deref(), Some("https://broken.example/atom"));
        assert_eq!(items[0].media.as_deref(), Some("https://broken.example/a.jpg"));
        assert!(items[0].tags.contains("news"));
    }

    #[test]
    fn test_tag_pattern_reused() {
        assert_eq!(get_tag("<dc:subject>a</dc:subject>", "dc:subject").as_deref(), Some("a"));
        assert_eq!(get_tag("<dc:subject x=\"1\">b</dc:subject>", "dc:subject").as_deref(), Some("b"));
        assert!(get_tag("<dc:subjects>c</dc:subjects>", "dc:subject").is_none());

        let cache = RE_TAGS.get().unwrap().lock().unwrap();
        assert!(cache.contains_key("dc:subject"));
    }

    #[tokio::test]
    async fn test_no_blocks_is_empty() {
        let items = run(&RegexXmlParser, StubFetcher::new().with(URL, "text/html", "<html></html>"), URL)
            .await
            .unwrap();
        assert!(items.is_empty());
    }
}
