//! Image Codecs
//!
//! Encode decoded images to bytes for storage and decode them back. Decoding
//! sniffs the container format, so any provider reads records written by any
//! other.

use crate::media::Image;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;

// =============================================================================
// Codec Trait
// =============================================================================

/// Byte encoding of images; failures are `None`, never panics
pub trait CompressionProvider: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Encode an image
    fn encode(&self, image: &Image) -> Option<Vec<u8>>;

    /// Decode bytes of any supported format
    fn decode(&self, data: &[u8]) -> Option<Image> {
        decode_any(data)
    }
}

/// Decode PNG or JPEG bytes, returning `None` for anything else
pub fn decode_any(data: &[u8]) -> Option<Image> {
    if data.is_empty() {
        return None;
    }
    match image::load_from_memory(data) {
        Ok(decoded) => Some(Image::new(decoded)),
        Err(e) => {
            tracing::debug!(len = data.len(), error = %e, "Failed to decode image bytes");
            None
        }
    }
}

// =============================================================================
// Storage Format
// =============================================================================

/// Codec selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    #[default]
    Png,
    Jpeg,
}

impl StorageFormat {
    /// Build the provider for this format
    pub fn provider(&self, jpeg_quality: u8) -> Arc<dyn CompressionProvider> {
        match self {
            StorageFormat::Png => Arc::new(PngCompression),
            StorageFormat::Jpeg => Arc::new(JpegCompression::with_quality(jpeg_quality)),
        }
    }
}

// =============================================================================
// PNG Codec
// =============================================================================

/// Lossless PNG encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct PngCompression;

impl CompressionProvider for PngCompression {
    fn name(&self) -> &'static str {
        "png"
    }

    fn encode(&self, image: &Image) -> Option<Vec<u8>> {
        let mut buf = Vec::new();
        match image
            .as_dynamic()
            .write_with_encoder(PngEncoder::new(&mut buf))
        {
            Ok(()) => Some(buf),
            Err(e) => {
                tracing::warn!(error = %e, "PNG encoding failed");
                None
            }
        }
    }
}

// =============================================================================
// JPEG Codec
// =============================================================================

/// Lossy JPEG encoding; alpha is dropped
#[derive(Debug, Clone, Copy)]
pub struct JpegCompression {
    quality: u8,
}

impl JpegCompression {
    pub fn new() -> Self {
        Self { quality: 85 }
    }

    /// Quality is clamped to 1..=100
    pub fn with_quality(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl Default for JpegCompression {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionProvider for JpegCompression {
    fn name(&self) -> &'static str {
        "jpeg"
    }

    fn encode(&self, image: &Image) -> Option<Vec<u8>> {
        let rgb = DynamicImage::ImageRgb8(image.as_dynamic().to_rgb8());
        let mut cursor = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut cursor, self.quality);
        match rgb.write_with_encoder(encoder) {
            Ok(()) => Some(cursor.into_inner()),
            Err(e) => {
                tracing::warn!(error = %e, quality = self.quality, "JPEG encoding failed");
                None
            }
        }
    }
}
