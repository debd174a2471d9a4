//! Events published by the acquisition engine

use std::time::Duration;

use serde::Serialize;

use crate::error::ErrorReport;
use crate::models::ImageIdentifier;
use crate::strategy::StrategyKind;

/// Observable outcome of engine work.
///
/// Delivered over a broadcast channel; subscribers that fall behind lose the
/// oldest events, the engine never blocks on them.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum AcquisitionEvent {
    /// An image was acquired from the network and cached
    Loaded {
        /// Which image
        identifier: ImageIdentifier,
        /// Chain runs it took
        attempts: u32,
        /// Strategy that produced it
        strategy: Option<StrategyKind>,
    },
    /// An identifier with recorded failures loaded successfully
    Recovered {
        /// Which image
        identifier: ImageIdentifier,
        /// Consecutive failures before this success
        previous_failures: u32,
    },
    /// A chain run failed and another attempt is scheduled
    AttemptFailed {
        /// Which image
        identifier: ImageIdentifier,
        /// Attempt that failed
        attempt: u32,
        /// Backoff before the next attempt
        #[serde(serialize_with = "millis::serialize")]
        retry_in: Duration,
        /// What went wrong
        report: ErrorReport,
    },
    /// A load failed for good
    Failed {
        /// What went wrong
        report: ErrorReport,
    },
    /// The identifier's circuit breaker opened
    CircuitOpened {
        /// Which image
        identifier: ImageIdentifier,
    },
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(duration.as_millis() as u64)
    }
}
