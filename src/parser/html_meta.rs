use async_trait::async_trait;
use scraper::{Html, Selector};
use url::Url;

use crate::app::Result;
use crate::domain::Item;
use crate::fetcher::AcceptProfile;
use crate::normalizer::RawEntry;
use crate::parser::{ParseContext, Parser};

/// Treats an HTML page as a single item described by its metadata.
pub struct HtmlMetaParser;

fn meta_content(document: &Html, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|sel| {
        let selector = Selector::parse(sel).ok()?;
        document
            .select(&selector)
            .filter_map(|el| el.value().attr("content").or_else(|| el.value().attr("href")))
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
    })
}

fn page_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Resolve `href` against the page URL.
fn absolute(base: &str, href: String) -> String {
    Url::parse(base)
        .and_then(|b| b.join(&href))
        .map(|u| u.to_string())
        .unwrap_or(href)
}

/// Extract the page entry. `scraper::Html` is not `Send`, so this stays
/// synchronous.
pub(crate) fn extract(page_url: &str, html: &str) -> Option<RawEntry> {
    let document = Html::parse_document(html);

    let title = meta_content(&document, &["meta[property='og:title']", "meta[name='twitter:title']"])
        .or_else(|| page_title(&document));
    let description = meta_content(
        &document,
        &[
            "meta[property='og:description']",
            "meta[name='description']",
            "meta[name='twitter:description']",
        ],
    );
    if title.is_none() && description.is_none() {
        return None;
    }

    let link = meta_content(&document, &["meta[property='og:url']", "link[rel='canonical']"])
        .map(|href| absolute(page_url, href))
        .unwrap_or_else(|| page_url.to_string());
    let image = meta_content(
        &document,
        &[
            "meta[property='og:image']",
            "meta[property='og:image:url']",
            "meta[name='twitter:image']",
        ],
    )
    .map(|href| absolute(page_url, href));

    Some(RawEntry {
        title,
        link: Some(link),
        text: description,
        thumbnail: image,
        date: meta_content(
            &document,
            &["meta[property='article:published_time']", "meta[name='date']"],
        ),
        author: meta_content(&document, &["meta[name='author']", "meta[property='article:author']"]),
        tags: meta_content(&document, &["meta[name='keywords']"])
            .map(|k| k.split(',').map(|t| t.trim().to_string()).collect())
            .unwrap_or_default(),
        ..Default::default()
    })
}

#[async_trait]
impl Parser for HtmlMetaParser {
    fn name(&self) -> &str {
        "html-meta"
    }

    fn priority(&self) -> i32 {
        70
    }

    async fn parse(&self, ctx: &ParseContext) -> Result<Vec<Item>> {
        let response = ctx.fetch(AcceptProfile::Html).await?;
        if response.not_modified {
            return Ok(Vec::new());
        }

        let raw = extract(&ctx.source().url, &response.text());
        Ok(ctx.normalize(raw.into_iter().collect()))
    }
}
