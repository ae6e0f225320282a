//! Media Resource Manager
//!
//! Resolves images from the fastest tier holding them: a two-priority memory
//! cache, durable storage on disk, or the network. Concurrent requests for the
//! same URL share one download, whose result is written back into the faster
//! tiers before every requester is notified.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            MediaManager                                 │
//! │              resolve / force_reload / prefetch / cancel                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │   1. cache          2. storage              3. network                  │
//! │  ┌─────────────┐   ┌──────────────────┐   ┌──────────────────────────┐  │
//! │  │ CacheAgent  │   │ Storage          │   │ NetworkAgent             │  │
//! │  │ high │ low  │   │ (disk | memory)  │   │ dedup + FIFO admission   │  │
//! │  │ LRU  │ LRU  │   │ one I/O worker   │   │ waiters fan-out          │  │
//! │  └──────┬──────┘   └────────▲─────────┘   └────────────┬─────────────┘  │
//! │         │ high evictions    │ write-through            │ write-back     │
//! │         └───────────────────┴──────────────────────────┘                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  Providers: identifier (SHA-256) · path layout · codec (PNG / JPEG)     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  EventBus (broadcast) ──► ObserverRegistry (one task per observer)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`manager`]: Tier orchestration, write-back policy, statistics
//! - [`cache`]: Two-priority LRU memory cache
//! - [`storage`]: Durable record store (disk and in-memory)
//! - [`network`]: Deduplicating download scheduler and transports
//! - [`providers`]: Identifier, path layout and codec providers
//! - [`events`] / [`observer`]: Notification fan-out
//! - [`config`] / [`retry`]: Configuration and the opt-in retry layer
//! - [`error`]: Error types and handling

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod media;
pub mod network;
pub mod observer;
pub mod providers;
pub mod retry;
pub mod storage;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use cache::{CacheAgent, CacheLimits, CacheMetricsSnapshot, EvictedEntry};
pub use config::{CacheConfig, CodecConfig, ManagerConfig, NetworkConfig, RetryConfig, StorageConfig};
pub use error::{Error, ErrorKind, Result};
pub use events::{EventBus, MediaEvent};
pub use manager::{
    parse_resource_url, Collaborators, ManagerStats, MediaManager, Resolution, ResolveRequest,
};
pub use media::{CallerId, Image, Priority, ResolvedFrom, ResourceKey};
pub use network::{
    DownloadRequest, DownloadTicket, HttpTransport, NetworkAgent, ProgressCallback, TaskState,
    Transport,
};
pub use observer::{Observer, ObserverHandle};
pub use providers::{
    CompressionProvider, IdentifierProvider, PathLayout, PathProvider, StorageFormat,
};
pub use storage::{DiskStorage, MemoryStorage, Storage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
