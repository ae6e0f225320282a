//! In-Memory Storage
//!
//! `DashMap`-backed [`Storage`] holding encoded records. Nothing survives the
//! process; used for ephemeral managers and tests.

use crate::media::{Image, ResourceKey};
use crate::providers::{CompressionProvider, IdentifierProvider, PngCompression, Sha256Identifier};
use crate::storage::{Storage, StorageCounters, StorageCountersSnapshot};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Encoded records keyed by resource identifier
pub struct MemoryStorage {
    records: DashMap<ResourceKey, Bytes>,
    identifier: Arc<dyn IdentifierProvider>,
    codec: Arc<dyn CompressionProvider>,
    /// Clear generation; held while inserting so a clear cannot interleave
    generation: Mutex<u64>,
    counters: StorageCounters,
}

impl MemoryStorage {
    /// SHA-256 keys and PNG records
    pub fn new() -> Self {
        Self::with_providers(Arc::new(Sha256Identifier), Arc::new(PngCompression))
    }

    pub fn with_providers(
        identifier: Arc<dyn IdentifierProvider>,
        codec: Arc<dyn CompressionProvider>,
    ) -> Self {
        Self {
            records: DashMap::new(),
            identifier,
            codec,
            generation: Mutex::new(0),
            counters: StorageCounters::default(),
        }
    }

    /// Number of records held
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Overwrite a record with raw bytes
    pub fn insert_raw(&self, url: &Url, bytes: impl Into<Bytes>) {
        self.records.insert(self.identifier.identifier(url), bytes.into());
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn has(&self, url: &Url) -> bool {
        self.counters.record_has();
        self.records.contains_key(&self.identifier.identifier(url))
    }

    async fn get(&self, url: &Url) -> Option<Image> {
        let key = self.identifier.identifier(url);
        let bytes = self.records.get(&key).map(|r| r.value().clone());
        let image = bytes.and_then(|b| self.codec.decode(&b));
        self.counters.record_read(image.is_some());
        image
    }

    async fn put(&self, image: &Image, url: &Url) -> bool {
        self.put_at_generation(image, url, self.generation()).await
    }

    fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    async fn put_at_generation(&self, image: &Image, url: &Url, generation: u64) -> bool {
        let ok = match self.codec.encode(image) {
            Some(bytes) => {
                let current = self.generation.lock();
                if generation < *current {
                    false
                } else {
                    self.records
                        .insert(self.identifier.identifier(url), Bytes::from(bytes));
                    true
                }
            }
            None => false,
        };
        self.counters.record_write(ok);
        debug!(url = %url, ok, "Stored image in memory storage");
        ok
    }

    async fn remove(&self, url: &Url) -> bool {
        self.counters.record_removal();
        self.records
            .remove(&self.identifier.identifier(url))
            .is_some()
    }

    async fn clear_all(&self) -> bool {
        let mut generation = self.generation.lock();
        *generation += 1;
        self.records.clear();
        true
    }

    async fn current_size(&self) -> u64 {
        self.records.iter().map(|r| r.value().len() as u64).sum()
    }

    fn counters(&self) -> StorageCountersSnapshot {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_image;

    fn url(id: &str) -> Url {
        Url::parse(&format!("https://img.example.com/{}.png", id)).unwrap()
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let storage = MemoryStorage::new();
        let image = sample_image(5, 4);

        assert!(!storage.has(&url("a")));
        assert!(storage.put(&image, &url("a")).await);
        assert!(storage.has(&url("a")));
        assert_eq!(storage.len(), 1);
        assert!(storage.current_size().await > 0);

        let loaded = storage.get(&url("a")).await.unwrap();
        assert!(loaded.same_pixels(&image));

        assert!(storage.remove(&url("a")).await);
        assert!(!storage.remove(&url("a")).await);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_miss() {
        let storage = MemoryStorage::new();
        storage.insert_raw(&url("bad"), &b"garbage"[..]);
        assert!(storage.has(&url("bad")));
        assert!(storage.get(&url("bad")).await.is_none());
    }

    #[tokio::test]
    async fn test_write_issued_before_clear_is_dropped() {
        let storage = MemoryStorage::new();
        let stale = storage.generation();
        assert!(storage.clear_all().await);

        assert!(!storage.put_at_generation(&sample_image(2, 2), &url("a"), stale).await);
        assert!(storage.is_empty());
        assert!(storage.put(&sample_image(2, 2), &url("a")).await);
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_and_counters() {
        let storage = MemoryStorage::new();
        storage.put(&sample_image(1, 1), &url("a")).await;
        storage.put(&sample_image(1, 1), &url("b")).await;
        storage.get(&url("a")).await;
        storage.get(&url("zzz")).await;

        assert!(storage.clear_all().await);
        assert_eq!(storage.current_size().await, 0);

        let counters = storage.counters();
        assert_eq!(counters.writes, 2);
        assert_eq!(counters.reads, 2);
        assert_eq!(counters.read_hits, 1);
    }
}
