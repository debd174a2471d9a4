//! Per-identifier circuit breaker.
//!
//! Closed → open once `failure_threshold` consecutive failures are recorded.
//! There is no timer: the first `is_open` check after the cooldown has elapsed
//! lets exactly one probe through (half-open). The probe's outcome decides
//! the next state: success closes the circuit, failure reopens it at once.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::models::ImageIdentifier;

/// Breaker position for one identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests fail fast
    Open,
    /// One probe is outstanding
    HalfOpen,
}

#[derive(Debug, Clone)]
struct BreakerEntry {
    consecutive_failures: u32,
    last_failure_at: Instant,
    state: CircuitState,
    probe_started_at: Option<Instant>,
}

/// Failure counters keyed by identifier
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    entries: Mutex<HashMap<ImageIdentifier, BreakerEntry>>,
}

impl CircuitBreaker {
    /// Create a breaker table
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<ImageIdentifier, BreakerEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether requests for `id` should fail fast.
    ///
    /// When the cooldown has elapsed this call moves the circuit to half-open
    /// and returns `false` once; the caller owns the probe.
    pub fn is_open(&self, id: &ImageIdentifier) -> bool {
        let now = Instant::now();
        let cooldown = self.config.cooldown();
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(id) else {
            return false;
        };

        match entry.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                if now.duration_since(entry.last_failure_at) > cooldown {
                    tracing::debug!("Circuit half-open for {id}, allowing probe");
                    entry.state = CircuitState::HalfOpen;
                    entry.consecutive_failures = 0;
                    entry.probe_started_at = Some(now);
                    false
                } else {
                    true
                }
            }
            CircuitState::HalfOpen => {
                // A probe that never reported back must not wedge the circuit.
                let stale = entry
                    .probe_started_at
                    .is_none_or(|started| now.duration_since(started) > cooldown);
                if stale {
                    entry.probe_started_at = Some(now);
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Record a failed acquisition. Returns `true` if this opened the circuit.
    pub fn record_failure(&self, id: &ImageIdentifier) -> bool {
        let now = Instant::now();
        let threshold = self.config.failure_threshold.max(1);
        let mut entries = self.entries();
        let entry = entries.entry(id.clone()).or_insert(BreakerEntry {
            consecutive_failures: 0,
            last_failure_at: now,
            state: CircuitState::Closed,
            probe_started_at: None,
        });

        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        entry.last_failure_at = now;

        let was_open = entry.state == CircuitState::Open;
        if entry.state == CircuitState::HalfOpen || entry.consecutive_failures >= threshold {
            entry.state = CircuitState::Open;
            entry.probe_started_at = None;
        }

        let opened = !was_open && entry.state == CircuitState::Open;
        if opened {
            tracing::warn!(
                "Circuit opened for {id} after {} consecutive failures",
                entry.consecutive_failures
            );
        }
        opened
    }

    /// Record a successful acquisition; closes the circuit unconditionally.
    pub fn record_success(&self, id: &ImageIdentifier) {
        self.entries().remove(id);
    }

    /// Current position for `id`
    pub fn state(&self, id: &ImageIdentifier) -> CircuitState {
        self.entries()
            .get(id)
            .map_or(CircuitState::Closed, |entry| entry.state)
    }

    /// Consecutive failures recorded for `id`
    pub fn failures(&self, id: &ImageIdentifier) -> u32 {
        self.entries()
            .get(id)
            .map_or(0, |entry| entry.consecutive_failures)
    }

    /// Time until an open circuit admits a probe
    pub fn retry_after(&self, id: &ImageIdentifier) -> Option<Duration> {
        let entries = self.entries();
        let entry = entries.get(id)?;
        (entry.state == CircuitState::Open).then(|| {
            self.config
                .cooldown()
                .saturating_sub(entry.last_failure_at.elapsed())
        })
    }

    /// Forget every identifier
    pub fn reset(&self) {
        self.entries().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> ImageIdentifier {
        ImageIdentifier::parse("wadouri:https://pacs.example/wado?objectUID=1").unwrap()
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown_secs: 60,
        })
    }

    #[test]
    fn test_unknown_identifier_is_closed() {
        assert!(!breaker().is_open(&id()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_resets_on_success() {
        let breaker = breaker();
        let id = id();

        assert!(!breaker.record_failure(&id));
        assert!(!breaker.record_failure(&id));
        assert!(!breaker.is_open(&id));
        assert!(breaker.record_failure(&id));
        assert!(breaker.is_open(&id));
        assert_eq!(breaker.failures(&id), 3);

        breaker.record_success(&id);
        assert!(!breaker.is_open(&id));
        assert_eq!(breaker.failures(&id), 0);
        assert_eq!(breaker.state(&id), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_after_cooldown() {
        let breaker = breaker();
        let id = id();
        for _ in 0..3 {
            breaker.record_failure(&id);
        }

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(breaker.is_open(&id));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!breaker.is_open(&id), "probe allowed once cooldown elapsed");
        assert!(breaker.is_open(&id), "only one probe at a time");
        assert_eq!(breaker.state(&id), CircuitState::HalfOpen);
        assert_eq!(breaker.failures(&id), 0);

        assert!(breaker.record_failure(&id), "failed probe reopens immediately");
        assert!(breaker.is_open(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_probe_closes() {
        let breaker = breaker();
        let id = id();
        for _ in 0..3 {
            breaker.record_failure(&id);
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!breaker.is_open(&id));
        breaker.record_success(&id);
        assert!(!breaker.is_open(&id));
        assert!(!breaker.is_open(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_counts_down() {
        let breaker = breaker();
        let id = id();
        for _ in 0..3 {
            breaker.record_failure(&id);
        }
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(breaker.retry_after(&id), Some(Duration::from_secs(40)));
    }
}
