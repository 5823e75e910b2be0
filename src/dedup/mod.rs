//! Bounded per-(destination, source) record of delivered ids and the
//! selection of what to deliver next.
//!
//! Items come in roughly newest-first. Everything whose id is not in the
//! SeenSet counts as new, regardless of where it sits in the list, so a
//! source that reorders entries between polls never causes redelivery.

use std::collections::{HashSet, VecDeque};

use crate::domain::Item;

pub const DEFAULT_MAX_SEEN: usize = 500;

/// Insertion-ordered, newest-first set of delivered ids, capped at
/// `capacity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenSet {
    ids: VecDeque<String>,
    capacity: usize,
}

impl SeenSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Build from stored ids (newest first), dropping duplicates and
    /// anything beyond `capacity`.
    pub fn from_ids(ids: impl IntoIterator<Item = String>, capacity: usize) -> Self {
        let mut set = Self::new(capacity);
        let mut seen = HashSet::new();
        for id in ids {
            if set.ids.len() >= set.capacity {
                break;
            }
            if seen.insert(id.clone()) {
                set.ids.push_back(id);
            }
        }
        set
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|seen| seen == id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.ids.iter()
    }

    /// Prepend `new_ids` (newest first) and evict the oldest past capacity.
    fn with_prepended(&self, new_ids: &[String]) -> Self {
        let ids = new_ids
            .iter()
            .chain(self.ids.iter().filter(|id| !new_ids.contains(id)))
            .take(self.capacity)
            .cloned()
            .collect();
        Self {
            ids,
            capacity: self.capacity,
        }
    }
}

/// What a check cycle should deliver for one source.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// At most `send_limit` items, oldest first.
    pub to_deliver: Vec<Item>,
    /// Ids of every new item, newest first, including the ones left out by
    /// `send_limit`.
    pub new_ids: Vec<String>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.new_ids.is_empty()
    }

    /// SeenSet after delivery. Ids in `failed` stay out so the next cycle
    /// retries them.
    pub fn commit(&self, seen: &SeenSet, failed: &HashSet<String>) -> SeenSet {
        let kept: Vec<String> = self
            .new_ids
            .iter()
            .filter(|id| !failed.contains(*id))
            .cloned()
            .collect();
        seen.with_prepended(&kept)
    }
}

/// Filter `items` against `seen` and pick the newest `send_limit` of the
/// new ones, returned oldest first.
pub fn select_new(seen: &SeenSet, items: Vec<Item>, send_limit: usize) -> Selection {
    let mut batch_ids = HashSet::new();
    let mut fresh: Vec<Item> = items
        .into_iter()
        .filter(|item| !seen.contains(&item.id))
        .filter(|item| batch_ids.insert(item.id.clone()))
        .collect();

    // Stable: items with equal (or estimated) timestamps keep source order.
    fresh.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let new_ids = fresh.iter().map(|item| item.id.clone()).collect();

    let mut to_deliver: Vec<Item> = fresh.into_iter().take(send_limit).collect();
    to_deliver.reverse();

    Selection { to_deliver, new_ids }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::BTreeSet;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn item(id: &str, hour: u32) -> Item {
        Item {
            id: id.to_string(),
            title: id.to_uppercase(),
            link: None,
            snippet: String::new(),
            timestamp: at(hour),
            timestamp_estimated: false,
            media: None,
            author: None,
            tags: BTreeSet::new(),
        }
    }

    fn ids(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_send_limit_marks_all_new_seen() {
        let seen = SeenSet::from_ids(vec!["c".to_string()], 10);
        let selection = select_new(&seen, vec![item("a", 3), item("b", 2), item("c", 1)], 1);

        assert_eq!(ids(&selection.to_deliver), vec!["a"]);
        assert_eq!(selection.new_ids, vec!["a", "b"]);

        let updated = selection.commit(&seen, &HashSet::new());
        assert!(updated.contains("a"));
        assert!(updated.contains("b"));
        assert_eq!(updated.iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_delivery_order_is_oldest_first() {
        let seen = SeenSet::new(10);
        // Parser output in arbitrary order
        let selection = select_new(&seen, vec![item("mid", 2), item("old", 1), item("new", 3)], 5);
        assert_eq!(ids(&selection.to_deliver), vec!["old", "mid", "new"]);
    }

    #[test]
    fn test_identical_second_cycle_delivers_nothing() {
        let batch = || vec![item("a", 3), item("b", 2)];
        let seen = SeenSet::new(10);

        let first = select_new(&seen, batch(), 5);
        assert_eq!(first.to_deliver.len(), 2);
        let seen = first.commit(&seen, &HashSet::new());

        let second = select_new(&seen, batch(), 5);
        assert!(second.is_empty());
        assert!(second.to_deliver.is_empty());
    }

    #[test]
    fn test_reordered_source_not_redelivered() {
        let seen = SeenSet::new(10);
        let first = select_new(&seen, vec![item("a", 2), item("b", 1)], 5);
        let seen = first.commit(&seen, &HashSet::new());

        // "b" moved ahead of a brand-new item
        let second = select_new(&seen, vec![item("b", 1), item("x", 3), item("a", 2)], 5);
        assert_eq!(ids(&second.to_deliver), vec!["x"]);
    }

    #[test]
    fn test_failed_delivery_not_marked() {
        let seen = SeenSet::new(10);
        let selection = select_new(&seen, vec![item("a", 2), item("b", 1)], 5);
        let failed: HashSet<String> = ["b".to_string()].into_iter().collect();

        let updated = selection.commit(&seen, &failed);
        assert!(updated.contains("a"));
        assert!(!updated.contains("b"));

        let retry = select_new(&updated, vec![item("a", 2), item("b", 1)], 5);
        assert_eq!(ids(&retry.to_deliver), vec!["b"]);
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let mut seen = SeenSet::new(3);
        for round in 0..5u32 {
            let batch: Vec<Item> = (0..4u32)
                .map(|i| item(&format!("r{}-{}", round, i), i))
                .collect();
            seen = select_new(&seen, batch, 2).commit(&seen, &HashSet::new());
            assert!(seen.len() <= 3);
        }
        // Newest ids of the last round survive
        assert!(seen.contains("r4-3"));
        assert!(!seen.contains("r0-3"));
    }

    #[test]
    fn test_duplicate_ids_in_batch() {
        let seen = SeenSet::new(10);
        let selection = select_new(&seen, vec![item("a", 2), item("a", 2), item("b", 1)], 5);
        assert_eq!(ids(&selection.to_deliver), vec!["b", "a"]);
        assert_eq!(selection.new_ids.len(), 2);
    }

    #[test]
    fn test_from_ids_dedupes_and_truncates() {
        let seen = SeenSet::from_ids(
            ["a", "b", "a", "c", "d"].iter().map(|s| s.to_string()),
            3,
        );
        assert_eq!(seen.iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(seen.capacity(), 3);
    }
}
