use async_trait::async_trait;

use crate::app::Result;
use crate::domain::{Item, Source};
use crate::fetcher::AcceptProfile;
use crate::parser::syndication::{parse_feed, raw_entry};
use crate::parser::{parse_failed, ParseContext, Parser};

const VIDEO_ID_PREFIX: &str = "yt:video:";

/// YouTube channel/playlist Atom feeds (`youtube.com/feeds/videos.xml`).
pub struct YouTubeParser;

fn thumbnail_for(video_id: &str) -> String {
    format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", video_id)
}

#[async_trait]
impl Parser for YouTubeParser {
    fn name(&self) -> &str {
        "youtube"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn applicable(&self, source: &Source) -> bool {
        source.url.contains("youtube.com/feeds/")
    }

    async fn parse(&self, ctx: &ParseContext) -> Result<Vec<Item>> {
        let response = ctx.fetch(AcceptProfile::Xml).await?;
        if response.not_modified {
            return Ok(Vec::new());
        }

        let feed = parse_feed(&response.body).map_err(|e| parse_failed(self.name(), e))?;

        let raws = feed
            .entries
            .iter()
            .map(|entry| {
                let mut raw = raw_entry(entry);
                let video_id = entry
                    .id
                    .strip_prefix(VIDEO_ID_PREFIX)
                    .unwrap_or(&entry.id)
                    .to_string();

                if !video_id.is_empty() {
                    if raw.link.is_none() {
                        raw.link = Some(format!("https://www.youtube.com/watch?v={}", video_id));
                    }
                    if raw.thumbnail.is_none() {
                        raw.thumbnail = Some(thumbnail_for(&video_id));
                    }
                    raw.id = Some(video_id);
                }
                raw.tags.push("video".to_string());
                raw
            })
            .collect();

        Ok(ctx.normalize(raws))
    }
}
