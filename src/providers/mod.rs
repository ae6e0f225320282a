//! Pluggable Resource Providers
//!
//! Stateless collaborators that map a URL to a stable key, a storage-relative
//! path, and an encoded byte representation:
//!
//! - [`IdentifierProvider`]: URL → [`ResourceKey`](crate::media::ResourceKey)
//! - [`PathProvider`]: URL + key → relative path and directory structure
//! - [`CompressionProvider`]: decoded image ⇄ bytes

mod codec;
mod identifier;
mod path;

pub use codec::{CompressionProvider, JpegCompression, PngCompression, StorageFormat};
pub use identifier::{IdentifierProvider, Sha256Identifier};
pub use path::{FlatPathProvider, HostPathProvider, PathLayout, PathProvider};
