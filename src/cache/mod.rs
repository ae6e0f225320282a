//! Two-Priority Memory Cache
//!
//! Bounded in-memory LRU cache of decoded images with two tiers:
//! - **High**: survives until explicitly cleared; evictions are handed to a
//!   callback so the owner can persist them
//! - **Low**: disposable, dropped first under memory pressure
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          CacheAgent                           │
//! │                  (one parking_lot::Mutex)                     │
//! ├───────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────┐   ┌─────────────────────────┐    │
//! │  │     LruTier (high)      │   │     LruTier (low)       │    │
//! │  │  IndexMap, LRU → MRU    │   │  IndexMap, LRU → MRU    │    │
//! │  └────────────┬────────────┘   └─────────────────────────┘    │
//! │               │ overflow                                      │
//! │               ▼                                               │
//! │      EvictionCallback (runs after unlock)                     │
//! ├───────────────────────────────────────────────────────────────┤
//! │  CacheMetrics: cache-line aligned per-tier counters           │
//! └───────────────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod entry;
pub mod metrics;
pub mod tier;

pub use agent::{CacheAgent, CacheLimits, EvictionCallback};
pub use entry::{CacheEntry, EvictedEntry};
pub use metrics::{CacheMetricsSnapshot, TierMetricsSnapshot};
pub use tier::LruTier;
