//! Media Domain Types
//!
//! Decoded images, resource keys, priorities and caller identities shared by
//! every tier.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Error;

// =============================================================================
// Image
// =============================================================================

/// A decoded image, cheap to clone and share between tiers and waiters
#[derive(Clone)]
pub struct Image {
    inner: Arc<DynamicImage>,
}

impl Image {
    /// Wrap a decoded image
    pub fn new(image: DynamicImage) -> Self {
        Self {
            inner: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.inner.width()
    }

    pub fn height(&self) -> u32 {
        self.inner.height()
    }

    /// Borrow the underlying decoded image
    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.inner
    }

    /// Approximate decoded footprint in bytes (RGBA8)
    pub fn approx_bytes(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height()) * 4
    }

    /// Pixel-exact comparison after normalizing both sides to RGBA8
    pub fn same_pixels(&self, other: &Image) -> bool {
        self.width() == other.width()
            && self.height() == other.height()
            && self.inner.to_rgba8().as_raw() == other.inner.to_rgba8().as_raw()
    }

    /// Check whether both handles share the same decoded allocation
    pub fn ptr_eq(&self, other: &Image) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl From<DynamicImage> for Image {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("color", &self.inner.color())
            .finish()
    }
}

// =============================================================================
// Priority
// =============================================================================

/// Cache tier tag and download priority
///
/// `High` entries are persisted to storage when evicted from memory; `Low`
/// entries are disposable and dropped first under memory pressure.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Low,
    High,
}

impl Priority {
    /// Both priorities, in the order statistics are reported
    pub fn all() -> &'static [Priority] {
        &[Priority::High, Priority::Low]
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::High => write!(f, "high"),
        }
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "high" => Ok(Priority::High),
            other => Err(Error::InvalidInput(format!("unknown priority: {}", other))),
        }
    }
}

// =============================================================================
// Resource Key
// =============================================================================

/// Stable identifier of a resource, derived from its URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Caller Identity
// =============================================================================

static NEXT_CALLER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a requester, used to scope cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallerId(u64);

impl CallerId {
    /// Allocate a process-unique caller id
    pub fn next() -> Self {
        Self(NEXT_CALLER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "caller-{}", self.0)
    }
}

// =============================================================================
// Resolution Source
// =============================================================================

/// Tier that satisfied a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvedFrom {
    Cache,
    Storage,
    Network,
}

impl ResolvedFrom {
    pub fn from_cache(&self) -> bool {
        matches!(self, ResolvedFrom::Cache)
    }

    pub fn from_storage(&self) -> bool {
        matches!(self, ResolvedFrom::Storage)
    }
}

impl fmt::Display for ResolvedFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedFrom::Cache => write!(f, "cache"),
            ResolvedFrom::Storage => write!(f, "storage"),
            ResolvedFrom::Network => write!(f, "network"),
        }
    }
}
