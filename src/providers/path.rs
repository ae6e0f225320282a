//! Storage Path Layout
//!
//! Decides where a resource lives relative to the storage root.

use crate::media::ResourceKey;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

/// Maps a resource to its location under the storage root
pub trait PathProvider: Send + Sync {
    /// Path of the record relative to the storage root
    fn relative_path(&self, url: &Url, key: &ResourceKey) -> PathBuf;

    /// Ordered subdirectory components to create before writing
    fn directory_structure(&self, url: &Url) -> Vec<String>;
}

/// Path layout selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathLayout {
    /// Every record directly under the root
    Flat,
    /// One subdirectory per URL host
    #[default]
    Host,
}

impl PathLayout {
    pub fn provider(&self) -> std::sync::Arc<dyn PathProvider> {
        match self {
            PathLayout::Flat => std::sync::Arc::new(FlatPathProvider),
            PathLayout::Host => std::sync::Arc::new(HostPathProvider),
        }
    }
}

// =============================================================================
// Flat Layout
// =============================================================================

/// Stores every record directly under the root, named by its key
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatPathProvider;

impl PathProvider for FlatPathProvider {
    fn relative_path(&self, _url: &Url, key: &ResourceKey) -> PathBuf {
        PathBuf::from(key.as_str())
    }

    fn directory_structure(&self, _url: &Url) -> Vec<String> {
        Vec::new()
    }
}

// =============================================================================
// Host Layout
// =============================================================================

/// Groups records by the (sanitized) host of their URL
#[derive(Debug, Clone, Copy, Default)]
pub struct HostPathProvider;

impl HostPathProvider {
    fn host_component(url: &Url) -> String {
        let host = url.host_str().unwrap_or("_local");
        let sanitized: String = host
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect();

        // "." and ".." must never become directory names
        if sanitized.trim_matches('.').is_empty() {
            "_local".to_string()
        } else {
            sanitized
        }
    }
}

impl PathProvider for HostPathProvider {
    fn relative_path(&self, url: &Url, key: &ResourceKey) -> PathBuf {
        let mut path: PathBuf = self.directory_structure(url).into_iter().collect();
        path.push(key.as_str());
        path
    }

    fn directory_structure(&self, url: &Url) -> Vec<String> {
        vec![Self::host_component(url)]
    }
}
