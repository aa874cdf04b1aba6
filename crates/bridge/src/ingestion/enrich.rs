// SPDX-License-Identifier: Apache-2.0

//! Bounded `external_user_id` → `internal_user_id` lookup cache, refreshed
//! wholesale from the cloud (spec §4.4 step 4). Stale reads are tolerated; a
//! miss leaves the event's `internal_user_id` empty rather than blocking.

use std::sync::Mutex;

use indexmap::IndexMap;

const DEFAULT_CAPACITY: usize = 50_000;

pub struct EnrichmentCache {
    capacity: usize,
    entries: Mutex<IndexMap<String, String>>,
}

impl EnrichmentCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, entries: Mutex::new(IndexMap::new()) }
    }

    pub fn lookup(&self, external_user_id: &str) -> Option<String> {
        #[allow(clippy::unwrap_used)]
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.get(external_user_id).cloned()
    }

    /// Replace the whole cache with a fresh pull from the cloud.
    pub fn refresh(&self, mapping: impl IntoIterator<Item = (String, String)>) {
        #[allow(clippy::unwrap_used)]
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.clear();
        for (external_id, internal_id) in mapping {
            if entries.len() >= self.capacity {
                entries.shift_remove_index(0);
            }
            entries.insert(external_id, internal_id);
        }
    }

    pub fn len(&self) -> usize {
        #[allow(clippy::unwrap_used)]
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EnrichmentCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_then_lookup_hits() {
        let cache = EnrichmentCache::new();
        cache.refresh([("ext1".to_owned(), "int1".to_owned())]);
        assert_eq!(cache.lookup("ext1"), Some("int1".to_owned()));
    }

    #[test]
    fn miss_returns_none() {
        let cache = EnrichmentCache::new();
        assert_eq!(cache.lookup("nobody"), None);
    }

    #[test]
    fn capacity_is_enforced_on_refresh() {
        let cache = EnrichmentCache::with_capacity(1);
        cache.refresh([("a".to_owned(), "1".to_owned()), ("b".to_owned(), "2".to_owned())]);
        assert_eq!(cache.len(), 1);
    }
}
