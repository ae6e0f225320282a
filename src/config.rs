//! Manager Configuration
//!
//! Plain data handed to [`MediaManager`](crate::manager::MediaManager) at
//! construction. Every section has defaults, so a partial YAML document is a
//! valid configuration.

use crate::error::{Error, Result};
use crate::providers::{PathLayout, StorageFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Top-Level Configuration
// =============================================================================

/// Complete configuration of a manager instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub cache: CacheConfig,
    pub storage: StorageConfig,
    pub network: NetworkConfig,
    pub codec: CodecConfig,
    pub retry: RetryConfig,
    /// Capacity of the event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            storage: StorageConfig::default(),
            network: NetworkConfig::default(),
            codec: CodecConfig::default(),
            retry: RetryConfig::default(),
            event_channel_capacity: 1024,
        }
    }
}

impl ManagerConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: ManagerConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Reject values the components cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.network.max_concurrent_downloads == 0 {
            return Err(Error::Configuration(
                "network.max_concurrent_downloads must be at least 1".into(),
            ));
        }
        if self.network.queue_timeout_ms == Some(0) {
            return Err(Error::Configuration(
                "network.queue_timeout_ms must be at least 1 (omit it to disable)".into(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::Configuration(
                "event_channel_capacity must be at least 1".into(),
            ));
        }
        if !(1..=100).contains(&self.codec.jpeg_quality) {
            return Err(Error::Configuration(format!(
                "codec.jpeg_quality must be within 1..=100, got {}",
                self.codec.jpeg_quality
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Configuration(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(Error::Configuration(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.retry.multiplier
            )));
        }
        if self.storage.root_path.as_os_str().is_empty() {
            return Err(Error::Configuration("storage.root_path is empty".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Cache Section
// =============================================================================

/// In-memory cache limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entries in the `high` tier
    pub high_capacity: usize,
    /// Maximum entries in the `low` tier
    pub low_capacity: usize,
    /// Write `high` entries to storage when they are evicted from memory
    pub persist_evicted_high: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            high_capacity: 64,
            low_capacity: 128,
            persist_evicted_high: true,
        }
    }
}

// =============================================================================
// Storage Section
// =============================================================================

/// On-disk storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory; owned exclusively by one manager
    pub root_path: PathBuf,
    /// fsync each record before it becomes visible
    pub sync_writes: bool,
    pub path_layout: PathLayout,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_path: std::env::temp_dir().join("media-resource-cache"),
            sync_writes: false,
            path_layout: PathLayout::default(),
        }
    }
}

// =============================================================================
// Network Section
// =============================================================================

/// Download scheduler and HTTP client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Transfers running at once; further tasks queue FIFO
    pub max_concurrent_downloads: usize,
    /// Drop tasks that waited in the queue longer than this
    pub queue_timeout_ms: Option<u64>,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 4,
            queue_timeout_ms: None,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            user_agent: format!("{}/{}", crate::NAME, crate::VERSION),
        }
    }
}

impl NetworkConfig {
    pub fn queue_timeout(&self) -> Option<Duration> {
        self.queue_timeout_ms.map(Duration::from_millis)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// =============================================================================
// Codec Section
// =============================================================================

/// Encoding of records written to storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub format: StorageFormat,
    pub jpeg_quality: u8,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            format: StorageFormat::Png,
            jpeg_quality: 85,
        }
    }
}

// =============================================================================
// Retry Section
// =============================================================================

/// Backoff policy for [`MediaManager::resolve_with_retry`](crate::manager::MediaManager::resolve_with_retry)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval_ms: 200,
            max_interval_ms: 5000,
            multiplier: 2.0,
        }
    }
}
