//! Text, link and date helpers shared by every parser.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use html_escape::decode_html_entities;
use regex::Regex;
use url::Url;

static RE_CDATA: OnceLock<Regex> = OnceLock::new();
static RE_BLOCKS: OnceLock<Regex> = OnceLock::new();
static RE_TAGS: OnceLock<Regex> = OnceLock::new();
static RE_WS: OnceLock<Regex> = OnceLock::new();
static RE_IMG: OnceLock<Regex> = OnceLock::new();

const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid", "igshid", "ref_src"];

/// Remove `<![CDATA[...]]>` wrappers, keeping their contents.
pub fn clean_cdata(s: &str) -> String {
    let re = RE_CDATA.get_or_init(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("cdata regex"));
    re.replace_all(s, "$1").trim().to_string()
}

/// Markup-free, entity-decoded, whitespace-collapsed text.
pub fn strip_html(s: &str) -> String {
    let s = clean_cdata(s);
    let blocks = RE_BLOCKS.get_or_init(|| {
        Regex::new(r"(?is)<script\b[^>]*>.*?</script>|<style\b[^>]*>.*?</style>")
            .expect("script/style regex")
    });
    let tags = RE_TAGS.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("tag regex"));
    let ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));

    let without_blocks = blocks.replace_all(&s, " ");
    let without_tags = tags.replace_all(&without_blocks, " ");
    let decoded = decode_html_entities(&without_tags);
    ws.replace_all(&decoded, " ").trim().to_string()
}

/// Cut `s` to at most `max` characters, marking the cut with `...`.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{}...", cut.trim_end())
}

/// `src` of the first `<img>` in a chunk of markup.
pub fn first_inline_image(html: &str) -> Option<String> {
    let re = RE_IMG.get_or_init(|| {
        Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).expect("img regex")
    });
    re.captures(html)
        .and_then(|c| c.get(1))
        .map(|m| decode_html_entities(m.as_str()).trim().to_string())
        .filter(|s| !s.is_empty())
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Canonical form of a link used for identity: fragment and tracking
/// parameters removed. Unparseable input is returned trimmed.
pub fn normalize_link(link: &str) -> String {
    let trimmed = link.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    url.to_string()
}

/// Parse the date formats seen in feeds and APIs.
pub fn parse_date(input: &str) -> Option<DateTime<Utc>> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    if s.chars().all(|c| c.is_ascii_digit()) {
        let n: i64 = s.parse().ok()?;
        return if s.len() <= 10 {
            DateTime::from_timestamp(n, 0)
        } else {
            DateTime::from_timestamp_millis(n)
        };
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Unix timestamp (seconds or milliseconds) from a JSON number.
pub fn date_from_number(n: i64) -> Option<DateTime<Utc>> {
    if n.unsigned_abs() < 10_000_000_000 {
        DateTime::from_timestamp(n, 0)
    } else {
        DateTime::from_timestamp_millis(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_strip_html_removes_markup_and_scripts() {
        let html = "<p>Hello <b>world</b></p><script>alert(1)</script><style>p{}</style>\n\n&amp; more";
        assert_eq!(strip_html(html), "Hello world & more");
    }

    #[test]
    fn test_strip_html_keeps_cdata_contents() {
        assert_eq!(strip_html("<![CDATA[<p>Inside</p>]]>"), "Inside");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "żółw".repeat(10);
        let out = truncate_chars(&s, 5);
        assert_eq!(out, "żółwż...");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn test_first_inline_image() {
        let html = r#"<div><img class="x" src="https://img.example.com/a.png" alt=""><img src="b.png"></div>"#;
        assert_eq!(first_inline_image(html), Some("https://img.example.com/a.png".into()));
        assert_eq!(first_inline_image("<p>none</p>"), None);
    }

    #[test]
    fn test_normalize_link_strips_tracking_and_fragment() {
        assert_eq!(
            normalize_link("https://example.com/post?id=7&utm_source=rss&utm_medium=feed#comments"),
            "https://example.com/post?id=7"
        );
        assert_eq!(
            normalize_link("https://example.com/post?fbclid=abc"),
            "https://example.com/post"
        );
        assert_eq!(normalize_link("  not a url "), "not a url");
    }

    #[test]
    fn test_parse_date_formats() {
        let rfc2822 = parse_date("Mon, 01 Jan 2024 10:30:00 GMT").unwrap();
        assert_eq!((rfc2822.year(), rfc2822.hour(), rfc2822.minute()), (2024, 10, 30));

        let rfc3339 = parse_date("2024-01-01T10:30:00+02:00").unwrap();
        assert_eq!(rfc3339.hour(), 8);

        let naive = parse_date("2024-03-05 12:00:00").unwrap();
        assert_eq!((naive.month(), naive.day()), (3, 5));

        let day = parse_date("2024-03-05").unwrap();
        assert_eq!(day.hour(), 0);

        assert_eq!(parse_date("1700000000").unwrap().timestamp(), 1_700_000_000);
        assert_eq!(parse_date("1700000000000").unwrap().timestamp(), 1_700_000_000);
        assert!(parse_date("yesterday").is_none());
        assert!(parse_date("").is_none());
    }

    #[test]
    fn test_date_from_number() {
        assert_eq!(date_from_number(1_700_000_000).unwrap().timestamp(), 1_700_000_000);
        assert_eq!(date_from_number(1_700_000_000_123).unwrap().timestamp(), 1_700_000_000);
        assert!(date_from_number(i64::MIN).is_none());
    }
}
