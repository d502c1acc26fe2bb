//! A bounded, weighted cache with an approximate LRU eviction policy.
//!
//! Implements the [Clock](https://en.wikipedia.org/wiki/Page_replacement_algorithm#Clock)
//! replacement policy, which is a lightweight approximation of LRU. Entries are kept in a circular
//! list and `hand` is the index of the next entry within it to examine for replacement. When an
//! entry needs to be evicted, we start the search at `hand`, searching for the first entry with a
//! false reference bit, and setting any skipped entry's reference bit to false along the way.
//!
//! Reads only set a reference bit (an atomic), so lookups can proceed through a shared reference
//! while inserts require exclusive access.
//!
//! The cache is bounded both by the number of entries and by the sum of the weights of its
//! entries (typically their size in bytes). Entries are only ever removed by eviction or by
//! [Clock::purge].

use std::{
    collections::HashMap,
    hash::Hash,
    sync::atomic::{AtomicBool, Ordering},
};

struct Entry<K, V> {
    key: K,
    value: V,
    weight: usize,

    /// A bit indicating whether this entry was recently referenced.
    referenced: AtomicBool,
}

/// A weighted cache implementing the Clock replacement policy.
pub struct Clock<K: Hash + Eq + Clone, V> {
    /// Maps each cached key to the index of its `entries` slot.
    ///
    /// # Invariants
    ///
    /// Each `index` entry maps to exactly one `entries` slot, and that slot always has a matching
    /// key.
    index: HashMap<K, usize>,

    /// The cached entries.
    entries: Vec<Entry<K, V>>,

    /// The clock hand index into `entries`.
    hand: usize,

    /// The sum of the weights of all cached entries.
    weight: usize,

    max_weight: usize,
    max_entries: usize,
}

impl<K: Hash + Eq + Clone, V> Clock<K, V> {
    /// Create a cache holding at most `max_entries` entries with a total weight of at most
    /// `max_weight`.
    ///
    /// # Panics
    ///
    /// Panics if either bound is zero.
    pub fn new(max_weight: usize, max_entries: usize) -> Self {
        assert!(max_weight > 0);
        assert!(max_entries > 0);
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
            hand: 0,
            weight: 0,
            max_weight,
            max_entries,
        }
    }

    /// Returns the cached value for `key`, if any.
    pub fn get(&self, key: &K) -> Option<&V> {
        let idx = self.index.get(key)?;
        let entry = &self.entries[*idx];
        entry.referenced.store(true, Ordering::Relaxed);
        Some(&entry.value)
    }

    /// Returns whether `key` is cached (without marking it as referenced).
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Cache `value` for `key`, evicting entries as needed.
    ///
    /// Returns `false` if the entry is heavier than the whole cache (and was not cached).
    pub fn insert(&mut self, key: K, value: V, weight: usize) -> bool {
        // Drop any previous value, so it is never served alongside the new weight
        self.remove(&key);
        if weight > self.max_weight {
            return false;
        }
        while self.entries.len() >= self.max_entries || self.weight + weight > self.max_weight {
            self.evict();
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push(Entry {
            key,
            value,
            weight,
            referenced: AtomicBool::new(true),
        });
        self.weight += weight;
        true
    }

    /// Remove all entries.
    pub fn purge(&mut self) {
        self.index.clear();
        self.entries.clear();
        self.hand = 0;
        self.weight = 0;
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the sum of the weights of all cached entries.
    pub fn weight(&self) -> usize {
        self.weight
    }

    fn remove(&mut self, key: &K) {
        if let Some(idx) = self.index.get(key).copied() {
            self.remove_at(idx);
        }
    }

    fn remove_at(&mut self, idx: usize) {
        let entry = self.entries.swap_remove(idx);
        assert!(self.index.remove(&entry.key).is_some());
        self.weight -= entry.weight;
        if let Some(moved) = self.entries.get(idx) {
            self.index.insert(moved.key.clone(), idx);
        }
        if self.hand >= self.entries.len() {
            self.hand = 0;
        }
    }

    fn evict(&mut self) {
        while self.entries[self.hand].referenced.load(Ordering::Relaxed) {
            self.entries[self.hand]
                .referenced
                .store(false, Ordering::Relaxed);
            self.hand = (self.hand + 1) % self.entries.len();
        }
        self.remove_at(self.hand);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get() {
        let mut cache = Clock::new(100, 10);
        assert!(cache.is_empty());
        assert!(cache.insert(1u64, "one", 10));
        assert!(cache.insert(2u64, "two", 20));
        assert_eq!(cache.get(&1), Some(&"one"));
        assert_eq!(cache.get(&3), None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.weight(), 30);

        // Replacing an entry updates its weight
        assert!(cache.insert(1u64, "uno", 5));
        assert_eq!(cache.get(&1), Some(&"uno"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.weight(), 25);
    }

    #[test]
    fn test_evict_by_count() {
        let mut cache = Clock::new(1_000, 3);
        for i in 0..3u64 {
            cache.insert(i, i, 1);
        }

        // All entries are referenced, so the hand sweeps once and evicts the first
        cache.insert(3, 3, 1);
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&0));
        assert!(cache.contains(&1));
        assert!(cache.contains(&2));
        assert!(cache.contains(&3));

        // Referencing an entry gives it a second chance
        assert_eq!(cache.get(&1), Some(&1));
        cache.insert(4, 4, 1);
        assert!(cache.contains(&1));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_evict_by_weight() {
        let mut cache = Clock::new(10, 100);
        cache.insert(1u64, (), 4);
        cache.insert(2u64, (), 4);
        cache.insert(3u64, (), 4);
        assert!(cache.weight() <= 10);
        assert!(cache.contains(&3));
        assert_eq!(cache.len(), 2);

        // A heavy entry may evict several light ones
        cache.insert(4u64, (), 9);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.weight(), 9);
        assert!(cache.contains(&4));
    }

    #[test]
    fn test_oversized() {
        let mut cache = Clock::new(10, 100);
        cache.insert(1u64, (), 5);
        assert!(!cache.insert(2u64, (), 11));
        assert!(!cache.contains(&2));
        assert!(cache.contains(&1));

        // Replacing with an oversized value removes the previous one
        assert!(!cache.insert(1u64, (), 11));
        assert!(cache.is_empty());
        assert_eq!(cache.weight(), 0);
    }

    #[test]
    fn test_purge() {
        let mut cache = Clock::new(100, 100);
        for i in 0..10u64 {
            cache.insert(i, i, 1);
        }
        cache.purge();
        assert!(cache.is_empty());
        assert_eq!(cache.weight(), 0);
        assert_eq!(cache.get(&1), None);

        // The cache remains usable after a purge
        cache.insert(1, 1, 1);
        assert_eq!(cache.get(&1), Some(&1));
    }

    #[test]
    fn test_index_consistency() {
        let mut cache = Clock::new(50, 8);
        for i in 0..1_000u64 {
            cache.insert(i, i, (i % 7 + 1) as usize);
            if i % 3 == 0 {
                cache.get(&(i / 2));
            }
            assert!(cache.len() <= 8);
            assert!(cache.weight() <= 50);
            for (key, idx) in cache.index.iter() {
                assert_eq!(cache.entries[*idx].key, *key);
            }
            assert_eq!(cache.index.len(), cache.entries.len());
        }
    }
}
