//! Cache Entry Types
//!
//! Entries owned by the memory cache and the record handed to the eviction
//! callback when one leaves the `high` tier.

use crate::media::{Image, Priority, ResourceKey};
use chrono::{DateTime, Utc};
use url::Url;

// =============================================================================
// Cache Entry
// =============================================================================

/// A cached image with recency metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Key this entry is stored under
    pub key: ResourceKey,
    /// Source URL of the image
    pub url: Url,
    /// The decoded image
    pub image: Image,
    /// Tier currently holding this entry
    pub priority: Priority,
    /// Time when entry was first cached
    pub created_at: DateTime<Utc>,
    /// Time when entry was last read or written
    pub last_accessed: DateTime<Utc>,
    /// Number of cache hits served by this entry
    pub access_count: u64,
}

impl CacheEntry {
    /// Create a new entry
    pub fn new(key: ResourceKey, url: Url, image: Image, priority: Priority) -> Self {
        let now = Utc::now();
        Self {
            key,
            url,
            image,
            priority,
            created_at: now,
            last_accessed: now,
            access_count: 0,
        }
    }

    /// Record a hit
    pub fn record_access(&mut self) {
        self.last_accessed = Utc::now();
        self.access_count += 1;
    }

    /// Replace the payload in place, keeping creation time and hit count
    pub fn refresh(&mut self, url: Url, image: Image, priority: Priority) {
        self.url = url;
        self.image = image;
        self.priority = priority;
        self.last_accessed = Utc::now();
    }

    /// Approximate decoded size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.image.approx_bytes()
    }
}

// =============================================================================
// Evicted Entry
// =============================================================================

/// An entry pushed out of the `high` tier by capacity pressure
#[derive(Debug, Clone)]
pub struct EvictedEntry {
    pub key: ResourceKey,
    pub url: Url,
    pub image: Image,
    pub priority: Priority,
}

impl From<CacheEntry> for EvictedEntry {
    fn from(entry: CacheEntry) -> Self {
        Self {
            key: entry.key,
            url: entry.url,
            image: entry.image,
            priority: entry.priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_image;

    #[test]
    fn test_entry_access() {
        let url = Url::parse("https://cdn.example.com/a.png").unwrap();
        let mut entry = CacheEntry::new(ResourceKey::new("a"), url, sample_image(2, 2), Priority::Low);
        let created = entry.created_at;

        assert_eq!(entry.access_count, 0);
        entry.record_access();
        entry.record_access();
        assert_eq!(entry.access_count, 2);
        assert!(entry.last_accessed >= created);
        assert_eq!(entry.size_bytes(), 16);
    }

    #[test]
    fn test_refresh_keeps_history() {
        let url = Url::parse("https://cdn.example.com/a.png").unwrap();
        let mut entry = CacheEntry::new(ResourceKey::new("a"), url.clone(), sample_image(2, 2), Priority::Low);
        entry.record_access();
        let created = entry.created_at;

        entry.refresh(url, sample_image(4, 4), Priority::High);
        assert_eq!(entry.priority, Priority::High);
        assert_eq!(entry.created_at, created);
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.image.width(), 4);

        let evicted = EvictedEntry::from(entry);
        assert_eq!(evicted.key.as_str(), "a");
        assert_eq!(evicted.priority, Priority::High);
    }
}
