//! Cache Metrics
//!
//! Cache-line aligned per-tier counters, updated while the cache lock is held
//! but readable without it.

use crate::media::Priority;
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Cache Line Size
// =============================================================================

/// Cache line size for alignment (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

// =============================================================================
// Per-Tier Metrics (Cache-Line Aligned)
// =============================================================================

/// Metrics for a single priority tier, aligned to prevent false sharing
#[repr(C, align(64))]
#[derive(Debug)]
pub struct CacheTierMetrics {
    /// Number of lookups served by this tier
    pub hits: AtomicU64,
    /// Number of entries written into this tier
    pub insertions: AtomicU64,
    /// Number of entries evicted by capacity pressure
    pub evictions: AtomicU64,
    /// Number of entries moved here from the other tier
    pub migrations: AtomicU64,
    /// Number of entries currently stored
    pub entry_count: AtomicU64,
    /// Approximate decoded bytes currently stored
    pub bytes_stored: AtomicU64,
    /// Last update timestamp (Unix millis)
    pub last_update_ms: AtomicU64,
    _padding: [u8; 8],
}

const _: () = assert!(std::mem::size_of::<CacheTierMetrics>() <= CACHE_LINE_SIZE);

impl Default for CacheTierMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheTierMetrics {
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            insertions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            migrations: AtomicU64::new(0),
            entry_count: AtomicU64::new(0),
            bytes_stored: AtomicU64::new(0),
            last_update_ms: AtomicU64::new(0),
            _padding: [0; 8],
        }
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    /// Record an entry being added
    #[inline]
    pub fn record_put(&self, size_bytes: u64) {
        self.insertions.fetch_add(1, Ordering::Relaxed);
        self.entry_count.fetch_add(1, Ordering::Relaxed);
        self.bytes_stored.fetch_add(size_bytes, Ordering::Relaxed);
        self.touch();
    }

    /// Record an entry being removed
    #[inline]
    pub fn record_remove(&self, size_bytes: u64) {
        let _ = self
            .entry_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
        let _ = self
            .bytes_stored
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(size_bytes))
            });
        self.touch();
    }

    #[inline]
    pub fn record_eviction(&self, size_bytes: u64) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.record_remove(size_bytes);
    }

    #[inline]
    pub fn record_migration(&self) {
        self.migrations.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset entry_count and bytes_stored after a tier is cleared
    #[inline]
    pub fn reset_storage(&self) {
        self.entry_count.store(0, Ordering::Relaxed);
        self.bytes_stored.store(0, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    fn touch(&self) {
        self.last_update_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Release);
    }

    pub fn snapshot(&self) -> TierMetricsSnapshot {
        TierMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            migrations: self.migrations.load(Ordering::Relaxed),
            entry_count: self.entry_count.load(Ordering::Relaxed),
            bytes_stored: self.bytes_stored.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// Point-in-time snapshot of tier metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TierMetricsSnapshot {
    pub hits: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub migrations: u64,
    pub entry_count: u64,
    pub bytes_stored: u64,
}

/// Point-in-time snapshot of the whole cache
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheMetricsSnapshot {
    pub high: TierMetricsSnapshot,
    pub low: TierMetricsSnapshot,
    /// Lookups that missed both tiers
    pub misses: u64,
}

impl CacheMetricsSnapshot {
    pub fn tier(&self, priority: Priority) -> &TierMetricsSnapshot {
        match priority {
            Priority::High => &self.high,
            Priority::Low => &self.low,
        }
    }

    pub fn total_hits(&self) -> u64 {
        self.high.hits + self.low.hits
    }

    /// Hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.total_hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.total_hits() as f64 / total as f64
        }
    }
}

// =============================================================================
// Cache Metrics
// =============================================================================

/// Counters for both tiers plus global misses
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub high: CacheTierMetrics,
    pub low: CacheTierMetrics,
    pub misses: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tier(&self, priority: Priority) -> &CacheTierMetrics {
        match priority {
            Priority::High => &self.high,
            Priority::Low => &self.low,
        }
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            high: self.high.snapshot(),
            low: self.low.snapshot(),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
