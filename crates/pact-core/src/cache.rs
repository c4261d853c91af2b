//! Action cache — bounded LRU of completed dispatch results.
//!
//! Keyed by the full action id `<local>/<tx>`. Both successes and
//! failures are stored, so a retried inbound message carrying the
//! same `id$` replays the identical `(err, result)` tuple without
//! invoking the handler: at-most-once semantics within one process.

use crate::actmeta::ActMeta;
use crate::error::ActError;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// One completed dispatch, replayable verbatim.
#[derive(Clone)]
pub struct CacheEntry {
    /// The delivered tuple, error or result.
    pub result: Result<Value, ActError>,
    /// Metadata of the action that ran, when resolution succeeded.
    pub actmeta: Option<Arc<ActMeta>>,
    /// Completion time, milliseconds since epoch.
    pub when: u64,
}

struct Slot {
    entry: CacheEntry,
    tick: u64,
}

/// Bounded LRU over action ids.
///
/// Recency is tracked with a lazy queue: every access appends a
/// `(key, tick)` marker and eviction skips markers whose tick is
/// stale, keeping both operations O(1) amortized.
pub struct ActCache {
    active: bool,
    cap: usize,
    map: HashMap<String, Slot>,
    order: VecDeque<(String, u64)>,
    tick: u64,
}

impl ActCache {
    /// Creates a cache. With `active` unset, `set` is a no-op and
    /// `get` always misses.
    #[must_use]
    pub fn new(active: bool, cap: usize) -> Self {
        Self {
            active,
            cap: cap.max(1),
            map: HashMap::new(),
            order: VecDeque::new(),
            tick: 0,
        }
    }

    /// `true` when caching is enabled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// `true` when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the stored tuple for `key`, refreshing its recency.
    pub fn get(&mut self, key: &str) -> Option<CacheEntry> {
        if !self.active {
            return None;
        }
        self.tick += 1;
        let tick = self.tick;
        let slot = self.map.get_mut(key)?;
        slot.tick = tick;
        self.order.push_back((key.to_string(), tick));
        Some(slot.entry.clone())
    }

    /// Stores a completed dispatch under `key`. No-op when caching is
    /// disabled. The oldest entries are evicted beyond capacity.
    pub fn set(&mut self, key: impl Into<String>, entry: CacheEntry) {
        if !self.active {
            return;
        }
        let key = key.into();
        self.tick += 1;
        let tick = self.tick;
        self.order.push_back((key.clone(), tick));
        self.map.insert(key, Slot { entry, tick });
        self.evict();
    }

    fn evict(&mut self) {
        while self.map.len() > self.cap {
            let Some((key, tick)) = self.order.pop_front() else {
                return;
            };
            // Stale marker: the key was touched again later.
            let current = self.map.get(&key).map(|s| s.tick);
            if current == Some(tick) {
                self.map.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(n: u64) -> CacheEntry {
        CacheEntry {
            result: Ok(json!({ "n": n })),
            actmeta: None,
            when: n,
        }
    }

    #[test]
    fn get_returns_stored_tuple() {
        let mut cache = ActCache::new(true, 8);
        cache.set("a/t", entry(1));

        let hit = cache.get("a/t").expect("stored entry should be found");
        assert_eq!(hit.result.expect("stored Ok should replay"), json!({"n": 1}));
        assert!(cache.get("b/t").is_none());
    }

    #[test]
    fn failures_replay_too() {
        let mut cache = ActCache::new(true, 8);
        cache.set(
            "x/t",
            CacheEntry {
                result: Err(crate::error::ActError::timeout("x/t", 50)),
                actmeta: None,
                when: 0,
            },
        );
        let hit = cache.get("x/t").expect("stored failure should be found");
        assert!(hit.result.is_err());
    }

    #[test]
    fn inactive_cache_is_a_no_op() {
        let mut cache = ActCache::new(false, 8);
        cache.set("a/t", entry(1));
        assert!(cache.is_empty());
        assert!(cache.get("a/t").is_none());
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = ActCache::new(true, 2);
        cache.set("a", entry(1));
        cache.set("b", entry(2));
        cache.set("c", entry(3));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn get_refreshes_recency() {
        let mut cache = ActCache::new(true, 2);
        cache.set("a", entry(1));
        cache.set("b", entry(2));
        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get("a").is_some());
        cache.set("c", entry(3));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn overwrite_same_key_keeps_one_entry() {
        let mut cache = ActCache::new(true, 2);
        cache.set("a", entry(1));
        cache.set("a", entry(2));
        assert_eq!(cache.len(), 1);
        let hit = cache.get("a").expect("overwritten entry should be found");
        assert_eq!(hit.result.expect("Ok"), json!({"n": 2}));
    }
}
