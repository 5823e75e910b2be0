use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Canonical content record produced by every parser.
///
/// Items are built once by the normalizer and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub link: Option<String>,
    pub snippet: String,
    pub timestamp: DateTime<Utc>,
    /// Set when the source carried no usable date and `timestamp` is the
    /// time of parsing.
    pub timestamp_estimated: bool,
    pub media: Option<String>,
    pub author: Option<String>,
    pub tags: BTreeSet<String>,
}

impl Item {
    /// Deterministic id for entries with neither a source id nor a link.
    pub fn content_id(title: &str, snippet: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(title.as_bytes());
        hasher.update([0u8]);
        hasher.update(snippet.as_bytes());
        hex::encode(hasher.finalize())
    }
}
