//! Decoded image model

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::strategy::StrategyKind;

/// Bytes per pixel assumed when an image does not say otherwise (RGBA8)
pub const DEFAULT_BYTES_PER_PIXEL: u8 = 4;

/// Container/encoding of a fetched payload, as far as sniffing can tell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// DICOM Part 10 file
    Dicom,
    /// PNG
    Png,
    /// JPEG (JFIF/EXIF)
    Jpeg,
    /// GIF
    Gif,
    /// BMP
    Bmp,
    /// WebP
    Webp,
    /// Not recognized
    #[default]
    Unknown,
}

impl PayloadFormat {
    /// Plain raster formats the generic decoder understands
    pub const fn is_raster(&self) -> bool {
        matches!(self, Self::Png | Self::Jpeg | Self::Gif | Self::Bmp | Self::Webp)
    }

    /// Get the display name
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Dicom => "DICOM",
            Self::Png => "PNG",
            Self::Jpeg => "JPEG",
            Self::Gif => "GIF",
            Self::Bmp => "BMP",
            Self::Webp => "WebP",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Encoding information carried alongside the pixels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Format of the payload that was decoded
    pub format: PayloadFormat,
    /// DICOM transfer syntax UID, when known
    pub transfer_syntax: Option<String>,
    /// Size of the encoded payload in bytes
    pub encoded_bytes: u64,
    /// Strategy that produced the image
    pub strategy: Option<StrategyKind>,
    /// Number of frames/slices in the source object
    pub frames: Option<u32>,
    /// Free-form header fields (modality, descriptions, ...)
    pub extra: BTreeMap<String, String>,
}

/// A displayable image produced by a successful acquisition.
///
/// Owned by the cache entry that holds it and shared read-only (behind an
/// `Arc`) with callers.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bytes per pixel of `pixels`
    pub bytes_per_pixel: u8,
    /// Row-major pixel buffer
    pub pixels: Vec<u8>,
    /// Encoding details
    pub metadata: ImageMetadata,
}

impl DecodedImage {
    /// Create an RGBA8 image.
    pub fn rgba8(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            bytes_per_pixel: DEFAULT_BYTES_PER_PIXEL,
            pixels,
            metadata: ImageMetadata::default(),
        }
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: ImageMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Estimated in-memory footprint: `width * height * bytes_per_pixel`.
    pub fn estimated_size(&self) -> u64 {
        let bpp = if self.bytes_per_pixel == 0 {
            DEFAULT_BYTES_PER_PIXEL
        } else {
            self.bytes_per_pixel
        };
        u64::from(self.width) * u64::from(self.height) * u64::from(bpp)
    }
}
