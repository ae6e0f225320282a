//! Durable Storage
//!
//! Byte-level persistence of encoded images keyed by resource identifier,
//! independent of the memory cache. Failures never cross this boundary as
//! errors: they degrade to `None` / `false`, which the manager reads as
//! "try the next tier" or "did not take effect".

mod disk;
mod memory;

pub use disk::{DiskStorage, DiskStorageConfig};
pub use memory::MemoryStorage;

use crate::media::Image;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

// =============================================================================
// Storage Trait
// =============================================================================

/// Asynchronous key-value image store
///
/// Implementations own their location exclusively; two instances must never
/// share one root.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Cheap existence check
    fn has(&self, url: &Url) -> bool;

    /// Read and decode; absent and undecodable records are both `None`
    async fn get(&self, url: &Url) -> Option<Image>;

    /// Encode and write atomically
    async fn put(&self, image: &Image, url: &Url) -> bool;

    /// Clear generation; advanced by every `clear_all`
    fn generation(&self) -> u64 {
        0
    }

    /// Write unless a `clear_all` began after `generation` was read
    ///
    /// A write dropped this way returns `false`.
    async fn put_at_generation(&self, image: &Image, url: &Url, generation: u64) -> bool {
        let _ = generation;
        self.put(image, url).await
    }

    /// Delete one record
    async fn remove(&self, url: &Url) -> bool;

    /// Remove every record, leaving an empty store
    async fn clear_all(&self) -> bool;

    /// Total bytes held; proportional to record count
    async fn current_size(&self) -> u64;

    /// Operation counters
    fn counters(&self) -> StorageCountersSnapshot;
}

// =============================================================================
// Counters
// =============================================================================

/// Per-instance operation counters
#[derive(Debug, Default)]
pub struct StorageCounters {
    pub has_checks: AtomicU64,
    pub reads: AtomicU64,
    pub read_hits: AtomicU64,
    pub writes: AtomicU64,
    pub write_failures: AtomicU64,
    pub removals: AtomicU64,
}

impl StorageCounters {
    #[inline]
    pub fn record_has(&self) {
        self.has_checks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_read(&self, hit: bool) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.read_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_write(&self, ok: bool) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.write_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StorageCountersSnapshot {
        StorageCountersSnapshot {
            has_checks: self.has_checks.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            read_hits: self.read_hits.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`StorageCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageCountersSnapshot {
    pub has_checks: u64,
    pub reads: u64,
    pub read_hits: u64,
    pub writes: u64,
    pub write_failures: u64,
    pub removals: u64,
}

impl StorageCountersSnapshot {
    /// Total calls of any kind
    pub fn total_calls(&self) -> u64 {
        self.has_checks + self.reads + self.writes + self.removals
    }
}
