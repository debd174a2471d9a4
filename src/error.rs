//! Error taxonomy for image acquisition.
//!
//! Strategy-level failures ([`StrategyError`]) are caught inside the chain and
//! become diagnostics; the engine surfaces exactly one [`AcquisitionError`] per
//! failed load. Both are `Clone` so a single in-flight result can be handed to
//! every caller waiting on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::ImageIdentifier;
use crate::strategy::StrategyKind;

/// Failure of a single strategy attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyError {
    /// Transport-level failure (connection refused, reset, DNS, ...)
    #[error("network error: {message}")]
    Network { message: String },

    /// The server answered with a non-2xx status
    #[error("HTTP {status}")]
    Http { status: u16 },

    /// The attempt exceeded its deadline
    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// Payload was fetched but the decoder rejected it
    #[error("decode failed: {message}")]
    Decode { message: String },

    /// Payload was fetched but is in an encoding this strategy cannot handle
    #[error("unsupported payload: {reason}")]
    Unsupported { reason: String },

    /// The strategy cannot run in the current configuration
    #[error("strategy unavailable: {reason}")]
    Unavailable { reason: String },

    /// The caller cancelled the load
    #[error("cancelled")]
    Cancelled,
}

impl StrategyError {
    /// Whether repeating the same strategy could plausibly succeed.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Http { status } => matches!(*status, 408 | 429 | 500..=599),
            Self::Decode { .. } | Self::Unsupported { .. } | Self::Unavailable { .. } => false,
            Self::Cancelled => false,
        }
    }

    /// Taxonomy bucket for this failure.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } | Self::Http { .. } => ErrorKind::Network,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Decode { .. } | Self::Unsupported { .. } => ErrorKind::Decode,
            Self::Unavailable { .. } => ErrorKind::Configuration,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// One failed strategy inside a chain run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyFailure {
    /// Strategy that failed
    pub strategy: StrategyKind,
    /// Why it failed
    #[serde(serialize_with = "display")]
    pub error: StrategyError,
}

fn display<S: serde::Serializer>(error: &StrategyError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(error)
}

/// Error surfaced to callers of the acquisition engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    /// Transport failure after all retries
    #[error("network error loading {identifier}: {message}")]
    Network {
        identifier: ImageIdentifier,
        message: String,
    },

    /// Payload could not be decoded
    #[error("could not decode {identifier}: {message}")]
    Decode {
        identifier: ImageIdentifier,
        message: String,
    },

    /// Load exceeded its deadline
    #[error("timed out loading {identifier} after {after_ms}ms")]
    Timeout {
        identifier: ImageIdentifier,
        after_ms: u64,
    },

    /// Fast-fail: the identifier's circuit breaker is open
    #[error("circuit open for {identifier}, retry in {retry_after_ms}ms")]
    CircuitOpen {
        identifier: ImageIdentifier,
        retry_after_ms: u64,
    },

    /// A batch or study was requested with no identifiers
    #[error("no image identifiers supplied")]
    NoIdentifiers,

    /// Every strategy in the chain failed
    #[error("all {} strategies failed for {identifier}", failures.len())]
    AllStrategiesFailed {
        identifier: ImageIdentifier,
        failures: Vec<StrategyFailure>,
    },

    /// The chain has no strategies to try
    #[error("no loading strategies configured")]
    NoStrategies,

    /// The caller cancelled the load
    #[error("load of {identifier} cancelled")]
    Cancelled { identifier: ImageIdentifier },
}

impl AcquisitionError {
    /// Taxonomy bucket for this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::NoIdentifiers => ErrorKind::NoIdentifiers,
            Self::AllStrategiesFailed { .. } => ErrorKind::AggregateStrategyFailure,
            Self::NoStrategies => ErrorKind::Configuration,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Whether another attempt of the whole chain is worthwhile.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::AllStrategiesFailed { failures, .. } => {
                failures.iter().any(|f| f.error.is_retryable())
            }
            _ => false,
        }
    }

    /// Critical errors stop a study load instead of moving to the next image.
    pub const fn is_critical(&self) -> bool {
        matches!(self, Self::NoStrategies | Self::Cancelled { .. })
    }

    /// Identifier this error concerns, if any.
    pub const fn identifier(&self) -> Option<&ImageIdentifier> {
        match self {
            Self::Network { identifier, .. }
            | Self::Decode { identifier, .. }
            | Self::Timeout { identifier, .. }
            | Self::CircuitOpen { identifier, .. }
            | Self::AllStrategiesFailed { identifier, .. }
            | Self::Cancelled { identifier } => Some(identifier),
            Self::NoIdentifiers | Self::NoStrategies => None,
        }
    }

    /// Collapse a failed chain run into one error.
    ///
    /// A single failure keeps its specific kind; several become
    /// [`AcquisitionError::AllStrategiesFailed`].
    pub fn from_failures(identifier: &ImageIdentifier, mut failures: Vec<StrategyFailure>) -> Self {
        let identifier = identifier.clone();
        if failures.len() != 1 {
            if failures.is_empty() {
                return Self::NoStrategies;
            }
            return Self::AllStrategiesFailed {
                identifier,
                failures,
            };
        }
        let failure = failures.remove(0);
        match failure.error {
            StrategyError::Timeout { after_ms } => Self::Timeout {
                identifier,
                after_ms,
            },
            StrategyError::Cancelled => Self::Cancelled { identifier },
            err @ (StrategyError::Decode { .. } | StrategyError::Unsupported { .. }) => {
                Self::Decode {
                    identifier,
                    message: err.to_string(),
                }
            }
            err @ (StrategyError::Network { .. } | StrategyError::Http { .. }) => Self::Network {
                identifier,
                message: err.to_string(),
            },
            err @ StrategyError::Unavailable { .. } => Self::AllStrategiesFailed {
                identifier,
                failures: vec![StrategyFailure {
                    strategy: failure.strategy,
                    error: err,
                }],
            },
        }
    }

    /// Build the structured report pushed to error sinks.
    pub fn report(&self) -> ErrorReport {
        let diagnostic = match self {
            Self::AllStrategiesFailed { failures, .. } => Some(
                failures
                    .iter()
                    .map(|f| format!("{}: {}", f.strategy, f.error))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            _ => None,
        };

        ErrorReport {
            id: Uuid::new_v4(),
            kind: self.kind(),
            message: self.to_string(),
            identifier: self.identifier().map(ToString::to_string),
            diagnostic,
            occurred_at: Utc::now(),
        }
    }
}

/// Taxonomy of acquisition failures, stable for UI and telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Transport failure, retryable
    Network,
    /// Payload fetched but undecodable
    Decode,
    /// Fast-fail while the circuit breaker is open
    CircuitOpen,
    /// Deadline exceeded, retryable
    Timeout,
    /// Input contract violation
    NoIdentifiers,
    /// Every strategy in the chain failed
    AggregateStrategyFailure,
    /// Nothing to try, or a strategy is not configured
    Configuration,
    /// Cancelled by the caller
    Cancelled,
}

/// Structured error object for error sinks.
///
/// The core never formats user-facing strings; `message` is diagnostic text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    /// Unique report id
    pub id: Uuid,
    /// Error bucket
    pub kind: ErrorKind,
    /// Diagnostic message
    pub message: String,
    /// Identifier the error concerns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Per-strategy detail for aggregate failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    /// When the error was reported
    pub occurred_at: DateTime<Utc>,
}
