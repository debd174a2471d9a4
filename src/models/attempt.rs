//! Load attempt records and batch outcomes

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{DecodedImage, ImageIdentifier};
use crate::error::{AcquisitionError, ErrorKind};
use crate::strategy::StrategyKind;

/// One attempt of the strategy chain, kept for diagnostics only
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadAttemptRecord {
    /// 1-based attempt number within a load
    pub attempt_number: u32,
    /// When the attempt finished
    pub timestamp: DateTime<Utc>,
    /// Whether it produced an image
    pub success: bool,
    /// Failure bucket, when it failed
    pub error_kind: Option<ErrorKind>,
    /// Strategy that succeeded, when it succeeded
    pub strategy: Option<StrategyKind>,
    /// Wall time of the attempt
    pub duration_ms: u64,
}

/// A successfully loaded image within a batch
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Which image
    pub identifier: ImageIdentifier,
    /// The shared decoded image
    pub image: Arc<DecodedImage>,
}

/// A failed image within a batch
#[derive(Debug, Clone)]
pub struct FailedImage {
    /// Which image
    pub identifier: ImageIdentifier,
    /// Why it failed
    pub error: AcquisitionError,
}

/// Result of loading many identifiers; one failure never aborts the batch
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Loaded images, in input order
    pub successful: Vec<LoadedImage>,
    /// Failures, in input order
    pub failed: Vec<FailedImage>,
}
