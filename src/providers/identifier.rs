//! Resource Identifiers
//!
//! Deterministic mapping from a URL to the key used by every tier.

use crate::media::ResourceKey;
use sha2::{Digest, Sha256};
use url::Url;

/// Maps a URL to a stable, collision-resistant key
pub trait IdentifierProvider: Send + Sync {
    /// Derive the key for a URL; the same URL always yields the same key
    fn identifier(&self, url: &Url) -> ResourceKey;
}

/// Lowercase hex SHA-256 digest of the full URL string
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Identifier;

impl IdentifierProvider for Sha256Identifier {
    fn identifier(&self, url: &Url) -> ResourceKey {
        let digest = Sha256::digest(url.as_str().as_bytes());
        ResourceKey::new(hex::encode(digest))
    }
}
