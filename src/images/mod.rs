//! Decoded image storage and the decode capability.
//!
//! This module holds the byte-bounded [`ImageCache`], the [`ImageDecoder`]
//! seam behind which pixel decoding happens, and the payload sniffing the
//! strategies use to decide whether a fetched body is worth decoding.

mod cache;
mod decoder;
pub mod payload;

pub use cache::{CacheEntry, CacheStats, ImageCache};
pub use decoder::{ImageDecoder, RasterDecoder};
