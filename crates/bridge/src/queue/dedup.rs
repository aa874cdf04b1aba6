// SPDX-License-Identifier: Apache-2.0

//! Bounded LRU dedup window, per spec §4.2/§4.4.
//!
//! Default capacity 10k entries, 24h TTL. Used both by the ingestion
//! pipeline (a cheap pre-check) and by the durable queue itself (the
//! authoritative reject on `append`).

use std::collections::HashMap;
use std::time::Duration;

use indexmap::IndexMap;

const DEFAULT_CAPACITY: usize = 10_000;
const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Insertion-ordered map used as an LRU: eviction walks from the front.
pub struct DedupWindow {
    capacity: usize,
    ttl: Duration,
    entries: IndexMap<String, u64>,
}

impl DedupWindow {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    pub fn with_limits(capacity: usize, ttl: Duration) -> Self {
        Self { capacity, ttl, entries: IndexMap::new() }
    }

    /// Returns `true` if `event_id` was already present (and thus a
    /// duplicate); otherwise inserts it and returns `false`.
    pub fn check_and_insert(&mut self, event_id: &str, now_ms: u64) -> bool {
        self.evict_expired(now_ms);

        if self.entries.contains_key(event_id) {
            return true;
        }

        if self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
        }
        self.entries.insert(event_id.to_owned(), now_ms);
        false
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.entries.contains_key(event_id)
    }

    fn evict_expired(&mut self, now_ms: u64) {
        let ttl_ms = self.ttl.as_millis() as u64;
        while let Some((_, &inserted_at)) = self.entries.first() {
            if now_ms.saturating_sub(inserted_at) > ttl_ms {
                self.entries.shift_remove_index(0);
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rebuild from a recovered snapshot (startup replay).
    pub fn seed(&mut self, seen: HashMap<String, u64>) {
        let mut pairs: Vec<(String, u64)> = seen.into_iter().collect();
        pairs.sort_by_key(|(_, ts)| *ts);
        for (id, ts) in pairs {
            if self.entries.len() >= self.capacity {
                self.entries.shift_remove_index(0);
            }
            self.entries.insert(id, ts);
        }
    }
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_insert_of_same_id_is_duplicate() {
        let mut window = DedupWindow::new();
        assert!(!window.check_and_insert("e1", 1000));
        assert!(window.check_and_insert("e1", 1001));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut window = DedupWindow::with_limits(2, Duration::from_secs(3600));
        window.check_and_insert("a", 1);
        window.check_and_insert("b", 2);
        window.check_and_insert("c", 3);
        assert!(!window.contains("a"));
        assert!(window.contains("b"));
        assert!(window.contains("c"));
    }

    #[test]
    fn ttl_expires_old_entries() {
        let mut window = DedupWindow::with_limits(100, Duration::from_millis(500));
        window.check_and_insert("old", 0);
        assert!(!window.check_and_insert("new", 1000));
        assert!(!window.contains("old"));
    }
}
