//! Study load state and results

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{FailedImage, LoadedImage};
use crate::error::ErrorReport;

/// Lifecycle of a study load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StudyStatus {
    /// Created, nothing requested yet
    #[default]
    Pending,
    /// Identifiers are being loaded
    Loading,
    /// Every identifier loaded
    Completed,
    /// Some images loaded, some failed
    PartiallyCompleted,
    /// No image loaded
    Failed,
}

impl StudyStatus {
    /// Whether the load has settled
    pub const fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyCompleted | Self::Failed)
    }
}

/// Aggregate progress of one study load
#[derive(Debug, Clone, Serialize)]
pub struct StudyLoadState {
    /// Study being loaded
    pub study_id: String,
    /// Current lifecycle status
    pub status: StudyStatus,
    /// Number of identifiers requested
    pub total_count: usize,
    /// Identifiers loaded so far
    pub loaded_count: usize,
    /// Identifiers failed so far
    pub failed_count: usize,
    /// When loading started
    pub started_at: DateTime<Utc>,
    /// When loading settled
    pub finished_at: Option<DateTime<Utc>>,
    /// Whether a critical error stopped the loop early
    pub aborted: bool,
    /// Structured reports for every failure
    pub errors: Vec<ErrorReport>,
}

impl StudyLoadState {
    /// Create a pending state
    pub fn new(study_id: &str, total_count: usize) -> Self {
        Self {
            study_id: study_id.to_string(),
            status: StudyStatus::Pending,
            total_count,
            loaded_count: 0,
            failed_count: 0,
            started_at: Utc::now(),
            finished_at: None,
            aborted: false,
            errors: Vec::new(),
        }
    }

    /// Identifiers that have settled either way
    pub const fn settled_count(&self) -> usize {
        self.loaded_count + self.failed_count
    }

    /// Settle the state from its counters
    pub fn finalize(&mut self) {
        self.status = match (self.loaded_count, self.failed_count) {
            (0, _) => StudyStatus::Failed,
            (_, 0) if !self.aborted => StudyStatus::Completed,
            _ => StudyStatus::PartiallyCompleted,
        };
        self.finished_at = Some(Utc::now());
    }
}

/// Snapshot handed to progress observers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudyProgress {
    /// Images loaded so far
    pub loaded: usize,
    /// Images failed so far
    pub failed: usize,
    /// Images requested
    pub total: usize,
    /// Settled share, 0-100
    pub percentage: f64,
    /// Identifier that just settled
    pub current_id: String,
    /// Estimated time remaining
    pub eta_ms: u64,
}

/// Action the caller can offer when a study fails to load
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum RecoveryOption {
    /// Try loading the study again
    Retry,
    /// Open whatever is already cached
    UseCached {
        /// Number of the study's images present in the cache
        available: usize,
    },
    /// Open the viewer without images (metadata only)
    DegradedViewer,
    /// File a report with the first failure attached
    ReportIssue {
        /// First failure of the load
        report: Option<ErrorReport>,
    },
}

/// Outcome of a study load
#[derive(Debug, Clone)]
pub enum StudyLoadResult {
    /// At least one image loaded (`Completed` or `PartiallyCompleted`)
    Loaded {
        /// Loaded images in identifier order
        images: Vec<LoadedImage>,
        /// Failed images in identifier order
        errors: Vec<FailedImage>,
        /// Final state
        state: StudyLoadState,
    },
    /// Nothing loaded; a controlled failure with recovery choices
    Failed {
        /// Diagnostic summary
        message: String,
        /// Actions to offer
        recovery_options: Vec<RecoveryOption>,
        /// Final state
        state: StudyLoadState,
    },
}

impl StudyLoadResult {
    /// Whether the caller got images
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Loaded { .. })
    }

    /// Final state of the load
    pub const fn state(&self) -> &StudyLoadState {
        match self {
            Self::Loaded { state, .. } | Self::Failed { state, .. } => state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_status() {
        let mut state = StudyLoadState::new("s", 3);
        state.loaded_count = 3;
        state.finalize();
        assert_eq!(state.status, StudyStatus::Completed);

        let mut state = StudyLoadState::new("s", 3);
        state.loaded_count = 2;
        state.failed_count = 1;
        state.finalize();
        assert_eq!(state.status, StudyStatus::PartiallyCompleted);

        let mut state = StudyLoadState::new("s", 3);
        state.failed_count = 3;
        state.finalize();
        assert_eq!(state.status, StudyStatus::Failed);
        assert!(state.status.is_final());
    }

    #[test]
    fn test_aborted_load_is_partial() {
        let mut state = StudyLoadState::new("s", 5);
        state.loaded_count = 2;
        state.aborted = true;
        state.finalize();
        assert_eq!(state.status, StudyStatus::PartiallyCompleted);
    }
}
