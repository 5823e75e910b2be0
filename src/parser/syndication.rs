use async_trait::async_trait;
use chrono::Utc;
use feed_rs::model::{Entry, Feed, MediaObject};
use feed_rs::parser::{Builder, ParseFeedError};

use crate::app::Result;
use crate::domain::Item;
use crate::fetcher::AcceptProfile;
use crate::normalizer::RawEntry;
use crate::parser::{parse_failed, ParseContext, Parser};

/// RSS 0.9x/1.0/2.0, Atom and JSON Feed documents.
pub struct SyndicationParser;

#[async_trait]
impl Parser for SyndicationParser {
    fn name(&self) -> &str {
        "syndication"
    }

    fn priority(&self) -> i32 {
        20
    }

    async fn parse(&self, ctx: &ParseContext) -> Result<Vec<Item>> {
        let response = ctx.fetch(AcceptProfile::Auto).await?;
        if response.not_modified {
            return Ok(Vec::new());
        }

        let feed = parse_feed(&response.body).map_err(|e| parse_failed(self.name(), e))?;

        let raws = feed.entries.iter().map(raw_entry).collect();
        Ok(ctx.normalize(raws))
    }
}

/// Parse a feed document. Entries without an id of their own get an empty
/// one, so the normalizer derives it from the cleaned-up link.
pub(crate) fn parse_feed(body: &[u8]) -> std::result::Result<Feed, ParseFeedError> {
    Builder::new()
        .id_generator(|_links, _title, _base| String::new())
        .build()
        .parse(body)
}

/// Map a feed-rs entry onto the normalizer's input.
pub(crate) fn raw_entry(entry: &Entry) -> RawEntry {
    let link = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
        .or_else(|| entry.links.first())
        .map(|l| l.href.clone());

    RawEntry {
        id: Some(entry.id.clone()),
        title: entry.title.as_ref().map(|t| t.content.clone()),
        link,
        text: entry
            .summary
            .as_ref()
            .map(|s| s.content.clone())
            .or_else(|| media_description(&entry.media)),
        html: entry.content.as_ref().and_then(|c| c.body.clone()),
        thumbnail: media_thumbnail(&entry.media),
        enclosure: media_image(&entry.media),
        published: entry
            .published
            .or(entry.updated)
            .map(|dt| dt.with_timezone(&Utc)),
        date: None,
        author: entry.authors.first().map(|a| a.name.clone()),
        tags: entry.categories.iter().map(|c| c.term.clone()).collect(),
    }
}

pub(crate) fn media_thumbnail(media: &[MediaObject]) -> Option<String> {
    media
        .iter()
        .flat_map(|m| m.thumbnails.iter())
        .map(|t| t.image.uri.clone())
        .next()
}

pub(crate) fn media_description(media: &[MediaObject]) -> Option<String> {
    media
        .iter()
        .find_map(|m| m.description.as_ref())
        .map(|d| d.content.clone())
}

/// First media attachment that is (or may be) an image.
fn media_image(media: &[MediaObject]) -> Option<String> {
    media
        .iter()
        .flat_map(|m| m.content.iter())
        .filter(|c| {
            c.content_type
                .as_ref()
                .map_or(true, |mime| mime.ty() == "image")
        })
        .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
}
