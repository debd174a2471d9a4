//! Decode capability.
//!
//! Pixel decoding lives behind [`ImageDecoder`] so the engine can be paired
//! with whatever backend the viewer renders with. [`RasterDecoder`] covers the
//! plain web formats through the `image` crate.

use image::ImageFormat;

use super::payload;
use crate::error::StrategyError;
use crate::models::{DecodedImage, ImageMetadata, PayloadFormat};

/// Turns raw payload bytes into a displayable image.
///
/// Strategies call this inline on the task that fetched the bytes.
pub trait ImageDecoder: Send + Sync {
    /// Decode `bytes`; `hint` is the format the caller expects, if known.
    fn decode(&self, bytes: &[u8], hint: Option<PayloadFormat>) -> Result<DecodedImage, StrategyError>;
}

/// Decoder for PNG, JPEG, GIF, BMP and WebP payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterDecoder;

impl RasterDecoder {
    const fn image_format(format: PayloadFormat) -> Option<ImageFormat> {
        match format {
            PayloadFormat::Png => Some(ImageFormat::Png),
            PayloadFormat::Jpeg => Some(ImageFormat::Jpeg),
            PayloadFormat::Gif => Some(ImageFormat::Gif),
            PayloadFormat::Bmp => Some(ImageFormat::Bmp),
            PayloadFormat::Webp => Some(ImageFormat::WebP),
            PayloadFormat::Dicom | PayloadFormat::Unknown => None,
        }
    }
}

impl ImageDecoder for RasterDecoder {
    fn decode(&self, bytes: &[u8], hint: Option<PayloadFormat>) -> Result<DecodedImage, StrategyError> {
        let sniffed = payload::sniff(bytes);
        let format = match (sniffed, hint) {
            (PayloadFormat::Unknown, Some(hint)) => hint,
            (sniffed, _) => sniffed,
        };

        let Some(image_format) = Self::image_format(format) else {
            return Err(StrategyError::Unsupported {
                reason: format!("{format} payloads need a dedicated decoder"),
            });
        };

        let image = image::load_from_memory_with_format(bytes, image_format).map_err(|e| {
            StrategyError::Decode {
                message: e.to_string(),
            }
        })?;

        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        let metadata = ImageMetadata {
            format,
            encoded_bytes: bytes.len() as u64,
            frames: Some(1),
            ..ImageMetadata::default()
        };

        Ok(DecodedImage::rgba8(width, height, rgba.into_raw()).with_metadata(metadata))
    }
}
