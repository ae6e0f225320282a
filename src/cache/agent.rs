//! Cache Agent
//!
//! Thread-safe two-priority LRU memory cache. Both tiers live behind one
//! mutex so LRU bookkeeping and map mutation are never observed torn. No
//! operation performs I/O while the lock is held, and the eviction callback
//! runs only after it has been released.

use crate::cache::entry::{CacheEntry, EvictedEntry};
use crate::cache::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::cache::tier::LruTier;
use crate::config::CacheConfig;
use crate::media::{Image, Priority, ResourceKey};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Invoked for each entry evicted from the `high` tier
pub type EvictionCallback = Arc<dyn Fn(EvictedEntry) + Send + Sync>;

// =============================================================================
// Limits
// =============================================================================

/// Entry-count capacity per tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub high_capacity: usize,
    pub low_capacity: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            high_capacity: 64,
            low_capacity: 128,
        }
    }
}

impl From<&CacheConfig> for CacheLimits {
    fn from(config: &CacheConfig) -> Self {
        Self {
            high_capacity: config.high_capacity,
            low_capacity: config.low_capacity,
        }
    }
}

// =============================================================================
// Guarded State
// =============================================================================

#[derive(Debug)]
struct CacheState {
    high: LruTier,
    low: LruTier,
}

impl CacheState {
    fn tier(&self, priority: Priority) -> &LruTier {
        match priority {
            Priority::High => &self.high,
            Priority::Low => &self.low,
        }
    }

    fn tier_mut(&mut self, priority: Priority) -> &mut LruTier {
        match priority {
            Priority::High => &mut self.high,
            Priority::Low => &mut self.low,
        }
    }

    /// A key lives in at most one tier
    fn locate(&self, key: &ResourceKey) -> Option<Priority> {
        Priority::all()
            .iter()
            .copied()
            .find(|p| self.tier(*p).contains(key))
    }
}

// =============================================================================
// Cache Agent
// =============================================================================

/// Two-priority LRU memory cache
pub struct CacheAgent {
    state: Mutex<CacheState>,
    limits: CacheLimits,
    on_evict: Option<EvictionCallback>,
    metrics: CacheMetrics,
}

impl CacheAgent {
    /// Create a cache with the given limits and optional `high` eviction hook
    pub fn new(limits: CacheLimits, on_evict: Option<EvictionCallback>) -> Self {
        info!(
            high_capacity = limits.high_capacity,
            low_capacity = limits.low_capacity,
            "Cache agent initialized"
        );
        Self {
            state: Mutex::new(CacheState {
                high: LruTier::new(Priority::High, limits.high_capacity),
                low: LruTier::new(Priority::Low, limits.low_capacity),
            }),
            limits,
            on_evict,
            metrics: CacheMetrics::new(),
        }
    }

    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    /// Look up an image, refreshing its recency within its current tier
    pub fn get(&self, key: &ResourceKey) -> Option<Image> {
        let mut state = self.state.lock();
        for priority in Priority::all() {
            if let Some(entry) = state.tier_mut(*priority).touch(key) {
                self.metrics.tier(*priority).record_hit();
                debug!(key = %key, tier = %priority, "Cache hit");
                return Some(entry.image.clone());
            }
        }
        self.metrics.record_miss();
        None
    }

    /// Check presence without touching recency
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.state.lock().locate(key).is_some()
    }

    /// Tier currently holding a key
    pub fn priority_of(&self, key: &ResourceKey) -> Option<Priority> {
        self.state.lock().locate(key)
    }

    /// Insert or update an entry
    ///
    /// An existing key with a different priority migrates to the new tier's
    /// MRU end. The target tier is then trimmed from its LRU end until it fits;
    /// entries trimmed from `high` are passed to the eviction callback once the
    /// lock is released.
    pub fn set(&self, key: ResourceKey, url: Url, image: Image, priority: Priority) {
        let evicted = {
            let mut state = self.state.lock();

            let existing = state
                .locate(&key)
                .and_then(|from| state.tier_mut(from).remove(&key).map(|e| (from, e)));

            let entry = match existing {
                Some((from, mut entry)) => {
                    self.metrics.tier(from).record_remove(entry.size_bytes());
                    if from != priority {
                        self.metrics.tier(priority).record_migration();
                        debug!(key = %key, from = %from, to = %priority, "Migrated cache entry");
                    }
                    entry.refresh(url, image, priority);
                    entry
                }
                None => CacheEntry::new(key.clone(), url, image, priority),
            };

            self.metrics.tier(priority).record_put(entry.size_bytes());
            let tier = state.tier_mut(priority);
            tier.push(entry);

            let overflow = tier.evict_overflow();
            for victim in &overflow {
                self.metrics.tier(priority).record_eviction(victim.size_bytes());
                debug!(key = %victim.key, tier = %priority, "Evicted cache entry");
            }
            overflow
        };

        if priority != Priority::High {
            return;
        }
        if let Some(callback) = &self.on_evict {
            for victim in evicted {
                callback(EvictedEntry::from(victim));
            }
        }
    }

    /// Remove a key from whichever tier holds it
    pub fn remove(&self, key: &ResourceKey) -> bool {
        let mut state = self.state.lock();
        let Some(priority) = state.locate(key) else {
            return false;
        };
        match state.tier_mut(priority).remove(key) {
            Some(entry) => {
                self.metrics.tier(priority).record_remove(entry.size_bytes());
                true
            }
            None => false,
        }
    }

    /// Clear one tier, or both with `None`; returns entries removed
    pub fn clear(&self, priority: Option<Priority>) -> usize {
        let targets: &[Priority] = match &priority {
            Some(p) => std::slice::from_ref(p),
            None => Priority::all(),
        };

        let mut state = self.state.lock();
        let mut removed = 0;
        for p in targets {
            removed += state.tier_mut(*p).clear();
            self.metrics.tier(*p).reset_storage();
        }
        drop(state);

        let label = priority.map_or_else(|| "all".to_string(), |p| p.to_string());
        info!(tier = %label, removed, "Cache cleared");
        removed
    }

    /// Number of entries in a tier
    pub fn count(&self, priority: Priority) -> usize {
        self.state.lock().tier(priority).len()
    }

    /// Total entries in both tiers
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.high.len() + state.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of a tier in LRU → MRU order
    pub fn keys(&self, priority: Priority) -> Vec<ResourceKey> {
        self.state.lock().tier(priority).keys()
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl std::fmt::Debug for CacheAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAgent")
            .field("limits", &self.limits)
            .field("high", &self.count(Priority::High))
            .field("low", &self.count(Priority::Low))
            .finish()
    }
}
