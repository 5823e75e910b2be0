use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use reqwest::header::{HeaderMap, HeaderName, ETAG, LAST_MODIFIED};
use serde::{Deserialize, Serialize};

/// Validators are kept per destination: a 304 only means "nothing new"
/// relative to what that destination last fetched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValidatorKey {
    pub destination: usize,
    pub url: String,
}

impl ValidatorKey {
    /// The URL is stored in its parsed form so `http://host` and
    /// `http://host/` share validators.
    pub fn new(destination: usize, url: impl Into<String>) -> Self {
        let url = url.into();
        let url = match url::Url::parse(&url) {
            Ok(parsed) => parsed.to_string(),
            Err(_) => url,
        };
        Self { destination, url }
    }
}

/// Last known validators for one source URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalEntry {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl ConditionalEntry {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let header = |name: HeaderName| {
            headers
                .get(&name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        let entry = Self {
            etag: header(ETAG),
            last_modified: header(LAST_MODIFIED),
        };
        (!entry.is_empty()).then_some(entry)
    }

    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// In-memory conditional-request cache with a dirty flag for debounced
/// persistence.
#[derive(Default)]
pub struct ConditionalCache {
    entries: Mutex<HashMap<ValidatorKey, ConditionalEntry>>,
    dirty: AtomicBool,
}

impl ConditionalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: HashMap<ValidatorKey, ConditionalEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            dirty: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ValidatorKey, ConditionalEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &ValidatorKey) -> Option<ConditionalEntry> {
        self.lock().get(key).cloned()
    }

    /// Record validators from a 2xx response. Responses without either
    /// header leave the entry untouched.
    pub fn update_from_headers(&self, key: &ValidatorKey, headers: &HeaderMap) {
        if let Some(entry) = ConditionalEntry::from_headers(headers) {
            self.update(key, entry);
        }
    }

    pub fn update(&self, key: &ValidatorKey, entry: ConditionalEntry) {
        let mut entries = self.lock();
        if entries.get(key) != Some(&entry) {
            entries.insert(key.clone(), entry);
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    /// Forget a source's validators so its next fetch is unconditional.
    pub fn remove(&self, key: &ValidatorKey) {
        if self.lock().remove(key).is_some() {
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Snapshot for persistence; clears the dirty flag. Returns `None` when
    /// nothing changed since the last call.
    pub fn take_dirty(&self) -> Option<HashMap<ValidatorKey, ConditionalEntry>> {
        let entries = self.lock();
        if self.dirty.swap(false, Ordering::SeqCst) {
            Some(entries.clone())
        } else {
            None
        }
    }

    /// Put the dirty flag back after a failed write.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn key(url: &str) -> ValidatorKey {
        ValidatorKey::new(0, url)
    }

    #[test]
    fn test_update_from_headers() {
        let cache = ConditionalCache::new();
        let mut headers = HeaderMap::new();
        headers.insert(ETAG, HeaderValue::from_static("\"v1\""));
        cache.update_from_headers(&key("https://example.com/feed"), &headers);

        let entry = cache.get(&key("https://example.com/feed")).unwrap();
        assert_eq!(entry.etag.as_deref(), Some("\"v1\""));
        assert!(entry.last_modified.is_none());
        assert!(cache.is_dirty());
        assert!(cache.get(&ValidatorKey::new(1, "https://example.com/feed")).is_none());
    }

    #[test]
    fn test_headers_without_validators_ignored() {
        let cache = ConditionalCache::new();
        cache.update_from_headers(&key("https://example.com/feed"), &HeaderMap::new());
        assert!(cache.is_empty());
        assert!(!cache.is_dirty());
    }

    #[test]
    fn test_take_dirty_clears_flag() {
        let cache = ConditionalCache::new();
        cache.update(
            &key("u"),
            ConditionalEntry {
                etag: Some("a".into()),
                last_modified: None,
            },
        );
        assert_eq!(cache.take_dirty().unwrap().len(), 1);
        assert!(cache.take_dirty().is_none());

        // Same value again is not a change
        cache.update(
            &key("u"),
            ConditionalEntry {
                etag: Some("a".into()),
                last_modified: None,
            },
        );
        assert!(!cache.is_dirty());
    }

    #[test]
    fn test_remove_marks_dirty() {
        let mut entries = HashMap::new();
        entries.insert(
            key("u"),
            ConditionalEntry {
                etag: None,
                last_modified: Some("Mon, 01 Jan 2024 00:00:00 GMT".into()),
            },
        );
        let cache = ConditionalCache::from_entries(entries);
        assert!(!cache.is_dirty());

        cache.remove(&key("missing"));
        assert!(!cache.is_dirty());

        cache.remove(&key("u"));
        assert!(cache.get(&key("u")).is_none());
        assert!(cache.is_dirty());
    }
}
