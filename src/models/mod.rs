//! Data models for image acquisition

mod attempt;
mod identifier;
mod image;
mod scheme;
mod study;

pub use attempt::{BatchOutcome, FailedImage, LoadAttemptRecord, LoadedImage};
pub use identifier::{ImageIdentifier, InvalidIdentifier};
pub use image::{DEFAULT_BYTES_PER_PIXEL, DecodedImage, ImageMetadata, PayloadFormat};
pub use scheme::Scheme;
pub use study::{
    RecoveryOption, StudyLoadResult, StudyLoadState, StudyProgress, StudyStatus,
};
