//! Chat messages from a Discord channel.
//!
//! Sources look like `discord://<channel_id>`, a channel page
//! (`https://discord.com/channels/<guild>/<channel>`) or the messages API
//! URL itself. A token from the `[discord]` config section is required.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::app::Result;
use crate::domain::{Item, Source};
use crate::fetcher::{AcceptProfile, FetchOptions};
use crate::normalizer::{truncate_chars, RawEntry};
use crate::parser::{parse_failed, ParseContext, Parser};

const TITLE_LEN: usize = 80;

fn is_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    pub guild: Option<String>,
    pub channel: String,
}

impl ChannelRef {
    pub fn from_source(url: &str) -> Option<Self> {
        if let Some(rest) = url.strip_prefix("discord://") {
            let channel = rest.split(['/', '?']).next().unwrap_or_default();
            return is_id(channel).then(|| Self {
                guild: None,
                channel: channel.to_string(),
            });
        }

        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?;
        if host != "discord.com" && !host.ends_with(".discord.com") {
            return None;
        }
        let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            // /channels/<guild>/<channel>[/<message>]
            ["channels", guild, channel, ..] if is_id(channel) => Some(Self {
                guild: Some(guild.to_string()).filter(|g| g != "@me"),
                channel: channel.to_string(),
            }),
            // /api/v9/channels/<channel>/messages
            ["api", .., "channels", channel, "messages"] if is_id(channel) => Some(Self {
                guild: None,
                channel: channel.to_string(),
            }),
            _ => None,
        }
    }

    fn messages_url(&self, limit: u32) -> String {
        format!(
            "https://discord.com/api/v9/channels/{}/messages?limit={}",
            self.channel, limit
        )
    }

    fn guild_or_dm(&self) -> &str {
        self.guild.as_deref().unwrap_or("@me")
    }
}

#[derive(Debug, Deserialize)]
struct Message {
    id: String,
    #[serde(default)]
    content: String,
    timestamp: Option<String>,
    guild_id: Option<String>,
    author: Option<Author>,
    #[serde(default)]
    attachments: Vec<Attachment>,
    #[serde(default)]
    embeds: Vec<Embed>,
}

#[derive(Debug, Deserialize)]
struct Author {
    username: Option<String>,
    global_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Attachment {
    url: String,
    content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Embed {
    title: Option<String>,
    description: Option<String>,
    thumbnail: Option<EmbedMedia>,
    image: Option<EmbedMedia>,
}

#[derive(Debug, Deserialize)]
struct EmbedMedia {
    url: String,
}

pub struct DiscordParser {
    token: Option<String>,
    limit: u32,
}

impl DiscordParser {
    pub fn new(token: Option<String>, limit: u32) -> Self {
        Self {
            token: token.filter(|t| !t.trim().is_empty()),
            limit: limit.clamp(1, 100),
        }
    }

    fn to_raw(&self, channel: &ChannelRef, msg: Message) -> RawEntry {
        let author = msg
            .author
            .as_ref()
            .and_then(|a| a.global_name.clone().or_else(|| a.username.clone()));

        let content = msg.content.trim();
        let title = if !content.is_empty() {
            truncate_chars(&content.replace('\n', " "), TITLE_LEN)
        } else if let Some(title) = msg.embeds.iter().find_map(|e| e.title.clone()) {
            title
        } else {
            format!("Message from {}", author.as_deref().unwrap_or("unknown"))
        };

        let text = std::iter::once(content.to_string())
            .chain(msg.embeds.iter().filter_map(|e| e.description.clone()))
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        let image_attachment = msg
            .attachments
            .iter()
            .find(|a| a.content_type.as_deref().is_some_and(|t| t.starts_with("image/")))
            .map(|a| a.url.clone());
        let embed_image = msg
            .embeds
            .iter()
            .find_map(|e| e.thumbnail.as_ref().or(e.image.as_ref()))
            .map(|m| m.url.clone());

        let guild = msg.guild_id.as_deref().unwrap_or(channel.guild_or_dm());

        RawEntry {
            link: Some(format!(
                "https://discord.com/channels/{}/{}/{}",
                guild, channel.channel, msg.id
            )),
            id: Some(msg.id),
            title: Some(title),
            text: Some(text),
            thumbnail: image_attachment,
            enclosure: embed_image,
            date: msg.timestamp,
            author,
            tags: vec!["discord".to_string()],
            ..Default::default()
        }
    }
}

#[async_trait]
impl Parser for DiscordParser {
    fn name(&self) -> &str {
        "discord"
    }

    fn priority(&self) -> i32 {
        25
    }

    fn applicable(&self, source: &Source) -> bool {
        self.token.is_some() && ChannelRef::from_source(&source.url).is_some()
    }

    async fn parse(&self, ctx: &ParseContext) -> Result<Vec<Item>> {
        let (Some(token), Some(channel)) = (&self.token, ChannelRef::from_source(&ctx.source().url)) else {
            return Ok(Vec::new());
        };

        let options = FetchOptions {
            accept: AcceptProfile::Json,
            headers: vec![
                ("Authorization".to_string(), token.clone()),
                (
                    "Referer".to_string(),
                    format!("https://discord.com/channels/{}/{}", channel.guild_or_dm(), channel.channel),
                ),
                ("X-Discord-Locale".to_string(), "en-US".to_string()),
            ],
            conditional: false,
            ..FetchOptions::default()
        };
        let response = ctx.fetch_url(&channel.messages_url(self.limit), options).await?;

        let messages: Vec<Message> = serde_json::from_slice(&response.body)
            .map_err(|e| parse_failed(self.name(), e))?;

        let raws = messages
            .into_iter()
            .map(|msg| self.to_raw(&channel, msg))
            .collect();
        Ok(ctx.normalize(raws))
    }
}
