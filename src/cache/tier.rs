//! LRU Tier
//!
//! One bounded, recency-ordered tier of the memory cache. Entries are kept in
//! an `IndexMap` whose order is the LRU order: front is least recently used,
//! back is most recently used.

use crate::cache::entry::CacheEntry;
use crate::media::{Priority, ResourceKey};
use indexmap::IndexMap;

/// A single capacity-bounded tier
#[derive(Debug)]
pub struct LruTier {
    priority: Priority,
    capacity: usize,
    entries: IndexMap<ResourceKey, CacheEntry>,
}

impl LruTier {
    pub fn new(priority: Priority, capacity: usize) -> Self {
        Self {
            priority,
            capacity,
            entries: IndexMap::with_capacity(capacity.min(1024)),
        }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Look up an entry and move it to the MRU end
    pub fn touch(&mut self, key: &ResourceKey) -> Option<&CacheEntry> {
        let mut entry = self.entries.shift_remove(key)?;
        entry.record_access();
        let (index, _) = self.entries.insert_full(key.clone(), entry);
        self.entries.get_index(index).map(|(_, e)| e)
    }

    /// Append an entry at the MRU end, replacing any entry under the same key
    pub fn push(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        let previous = self.entries.shift_remove(&entry.key);
        self.entries.insert(entry.key.clone(), entry);
        previous
    }

    /// Remove an entry, preserving the order of the rest
    pub fn remove(&mut self, key: &ResourceKey) -> Option<CacheEntry> {
        self.entries.shift_remove(key)
    }

    /// Remove the least recently used entry
    pub fn pop_lru(&mut self) -> Option<CacheEntry> {
        self.entries.shift_remove_index(0).map(|(_, entry)| entry)
    }

    /// Pop LRU entries until the tier fits its capacity
    pub fn evict_overflow(&mut self) -> Vec<CacheEntry> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            match self.pop_lru() {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }
        evicted
    }

    /// Drop every entry, returning how many were removed
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Keys in LRU → MRU order
    pub fn keys(&self) -> Vec<ResourceKey> {
        self.entries.keys().cloned().collect()
    }

    /// Approximate decoded bytes held by this tier
    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes()).sum()
    }
}
