pub mod sqlite;

use std::collections::HashMap;

use crate::app::Result;
use crate::dedup::SeenSet;
use crate::fetcher::{ConditionalEntry, ValidatorKey};

pub use sqlite::SqliteStore;

/// Persisted SeenSet size for one (destination, source) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenCount {
    pub destination: usize,
    pub source_url: String,
    pub count: usize,
}

pub trait Store: Send + Sync {
    // SeenSet operations
    fn load_seen(&self, destination: usize, source_url: &str, capacity: usize) -> Result<SeenSet>;
    fn save_seen(&self, destination: usize, source_url: &str, seen: &SeenSet) -> Result<()>;
    fn seen_counts(&self) -> Result<Vec<SeenCount>>;

    // Conditional-request cache, per (destination, source)
    fn load_conditional(&self) -> Result<HashMap<ValidatorKey, ConditionalEntry>>;
    fn save_conditional(&self, entries: &HashMap<ValidatorKey, ConditionalEntry>) -> Result<()>;
}
