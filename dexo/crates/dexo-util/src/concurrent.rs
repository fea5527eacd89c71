//! Concurrent occurrence counters.
//!
//! [`ConcurrentCounter`] is a sharded map from keys to counts. Each shard is
//! guarded independently by `DashMap`, so many threads can bump different
//! keys without contending on a single lock, and increments of the same key
//! are serialized by its shard: no update is ever lost.

use dashmap::DashMap;
use std::hash::Hash;

/// A concurrent associative counter
///
/// # Example
///
/// ```
/// use dexo_util::ConcurrentCounter;
///
/// let counter = ConcurrentCounter::new();
/// counter.increment("monitor-enter");
/// counter.add("monitor-enter", 2);
/// assert_eq!(counter.get(&"monitor-enter"), 3);
/// ```
pub struct ConcurrentCounter<K: Eq + Hash> {
    map: DashMap<K, usize>,
}

impl<K: Eq + Hash> ConcurrentCounter<K> {
    pub fn new() -> Self {
        Self { map: DashMap::new() }
    }

    /// Add one occurrence of `key`
    #[inline]
    pub fn increment(&self, key: K) {
        self.add(key, 1);
    }

    /// Add `n` occurrences of `key`
    pub fn add(&self, key: K, n: usize) {
        *self.map.entry(key).or_insert(0) += n;
    }

    /// Current count for `key`, zero if it was never seen
    pub fn get(&self, key: &K) -> usize {
        self.map.get(key).map_or(0, |count| *count)
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Sum of all counts
    pub fn total(&self) -> usize {
        self.map.iter().map(|entry| *entry.value()).sum()
    }
}

impl<K: Eq + Hash + Ord + Clone> ConcurrentCounter<K> {
    /// Snapshot of all entries, most frequent first, equal counts in key
    /// order
    pub fn snapshot(&self) -> Vec<(K, usize)> {
        let mut entries: Vec<(K, usize)> = self
            .map
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }
}

impl<K: Eq + Hash> Default for ConcurrentCounter<K> {
    fn default() -> Self {
        Self::new()
    }
}
