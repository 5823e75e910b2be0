use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One pollable endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
}

impl Source {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn is_video_feed(&self) -> bool {
        self.url.contains("youtube.com")
    }
}

/// A delivery target with its own sources and schedule.
#[derive(Debug, Clone)]
pub struct Destination {
    /// Position in the configuration; part of the persisted SeenSet key.
    pub index: usize,
    pub name: String,
    /// Handle passed to the notifier (webhook URL, `log`, ...).
    pub target: String,
    pub sources: Vec<Source>,
    pub interval: Duration,
    pub send_limit: usize,
}

impl Destination {
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("destination #{}", self.index + 1)
        } else {
            self.name.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_feed_detection() {
        assert!(Source::new("https://www.youtube.com/feeds/videos.xml?channel_id=x").is_video_feed());
        assert!(!Source::new("https://example.com/rss").is_video_feed());
    }
}
