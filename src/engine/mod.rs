//! Image acquisition engine.
//!
//! `load` runs: in-flight join → cache lookup → circuit breaker gate →
//! admission → strategy chain with retry → cache insert → events. The cache,
//! breaker table and in-flight map are owned here; callers only read them.

mod events;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use futures::stream::{self, StreamExt};
use tokio::sync::{Semaphore, broadcast};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{AcquisitionError, ErrorKind};
use crate::images::{CacheStats, ImageCache, ImageDecoder};
use crate::models::{
    BatchOutcome, DecodedImage, FailedImage, ImageIdentifier, LoadAttemptRecord, LoadedImage,
};
use crate::resilience::{CircuitBreaker, RetryPolicy};
use crate::strategy::{StrategyChain, StrategyKind};
use crate::transport::Transport;

pub use events::AcquisitionEvent;

/// Buffered events per subscriber before the oldest are dropped
const EVENT_CAPACITY: usize = 256;

type LoadResult = Result<Arc<DecodedImage>, AcquisitionError>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

/// Scheduling hint for a load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// On screen now
    High,
    /// Requested by the user
    #[default]
    Normal,
    /// Speculative (preloading)
    Low,
}

/// Per-call load options
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Scheduling hint
    pub priority: Priority,
    /// Overrides every strategy's deadline
    pub timeout: Option<Duration>,
    /// Cancels this caller's wait. A shared acquisition keeps running
    /// while any other caller still waits on it.
    pub cancel: Option<CancellationToken>,
}

impl LoadOptions {
    /// Options with a priority
    pub fn with_priority(priority: Priority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    /// Attach a cancellation token
    pub fn cancellable(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

struct InFlight {
    op: u64,
    load: WeakShared<BoxFuture<'static, LoadResult>>,
}

struct EngineInner {
    cache: ImageCache,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    chain: StrategyChain,
    in_flight: Mutex<HashMap<ImageIdentifier, InFlight>>,
    admission: Arc<Semaphore>,
    max_concurrent: usize,
    events: broadcast::Sender<AcquisitionEvent>,
    attempts: Mutex<HashMap<ImageIdentifier, VecDeque<LoadAttemptRecord>>>,
    attempt_log_limit: usize,
    next_op: AtomicU64,
    shutdown: CancellationToken,
}

impl EngineInner {
    fn in_flight(&self) -> MutexGuard<'_, HashMap<ImageIdentifier, InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: AcquisitionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn record_attempt(
        &self,
        id: &ImageIdentifier,
        attempt: u32,
        elapsed: Duration,
        outcome: Result<Option<StrategyKind>, ErrorKind>,
    ) {
        let record = LoadAttemptRecord {
            attempt_number: attempt,
            timestamp: Utc::now(),
            success: outcome.is_ok(),
            error_kind: outcome.err(),
            strategy: outcome.ok().flatten(),
            duration_ms: elapsed.as_millis() as u64,
        };

        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        let log = attempts.entry(id.clone()).or_default();
        log.push_back(record);
        while log.len() > self.attempt_log_limit.max(1) {
            log.pop_front();
        }
    }
}

/// Removes the in-flight entry when the acquisition settles or is dropped.
struct InFlightGuard {
    inner: Arc<EngineInner>,
    id: ImageIdentifier,
    op: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight();
        if in_flight.get(&self.id).is_some_and(|entry| entry.op == self.op) {
            in_flight.remove(&self.id);
        }
    }
}

/// Central coordinator for image acquisition.
///
/// Cheap to clone; clones share the cache, breaker and in-flight map.
#[derive(Clone)]
pub struct AcquisitionEngine {
    inner: Arc<EngineInner>,
}

impl AcquisitionEngine {
    /// Create an engine with the configured chain
    pub fn new(config: &Config, transport: Arc<dyn Transport>, decoder: Arc<dyn ImageDecoder>) -> Self {
        let chain = StrategyChain::from_config(&config.acquisition, transport, decoder);
        Self::with_chain(config, chain)
    }

    /// Create an engine around a prepared chain
    pub fn with_chain(config: &Config, chain: StrategyChain) -> Self {
        let max_concurrent = config.acquisition.max_concurrent.max(1);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(EngineInner {
                cache: ImageCache::new(config.cache.clone()),
                breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
                retry: RetryPolicy::new(config.retry.clone()),
                chain,
                in_flight: Mutex::new(HashMap::new()),
                admission: Arc::new(Semaphore::new(max_concurrent)),
                max_concurrent,
                events,
                attempts: Mutex::new(HashMap::new()),
                attempt_log_limit: config.acquisition.attempt_log_limit,
                next_op: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Acquire one image.
    ///
    /// Concurrent calls for the same identifier share one acquisition.
    pub async fn load(&self, id: &ImageIdentifier, options: LoadOptions) -> LoadResult {
        let load = match self.start_or_join(id, &options) {
            Ok(load) => load,
            Err(settled) => return settled,
        };

        match options.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    result = load => result,
                    () = token.cancelled() => Err(AcquisitionError::Cancelled {
                        identifier: id.clone(),
                    }),
                }
            }
            None => load.await,
        }
    }

    /// Returns the shared acquisition to await, or an immediate result
    /// (cache hit / circuit open).
    fn start_or_join(&self, id: &ImageIdentifier, options: &LoadOptions) -> Result<SharedLoad, LoadResult> {
        let inner = &self.inner;
        let mut in_flight = inner.in_flight();

        if let Some(load) = in_flight.get(id).and_then(|entry| entry.load.upgrade()) {
            tracing::debug!("Joining in-flight load of {id}");
            return Ok(load);
        }

        if let Some(image) = inner.cache.get(id) {
            return Err(Ok(image));
        }

        if inner.breaker.is_open(id) {
            let retry_after = inner.breaker.retry_after(id).unwrap_or_default();
            let error = AcquisitionError::CircuitOpen {
                identifier: id.clone(),
                retry_after_ms: retry_after.as_millis() as u64,
            };
            tracing::debug!("{error}");
            inner.emit(AcquisitionEvent::Failed {
                report: error.report(),
            });
            return Err(Err(error));
        }

        // The acquisition only sees engine-owned cancellation; each caller
        // races its own token in `load`
        let op = inner.next_op.fetch_add(1, Ordering::Relaxed);
        let load = acquire(
            Arc::clone(inner),
            id.clone(),
            op,
            options.priority,
            options.timeout,
        )
        .boxed()
        .shared();
        if let Some(weak) = load.downgrade() {
            in_flight.insert(id.clone(), InFlight { op, load: weak });
        }
        Ok(load)
    }

    /// Acquire many images with bounded concurrency.
    ///
    /// Results keep input order; one failure never aborts the batch.
    pub async fn load_many(&self, ids: &[ImageIdentifier], options: LoadOptions) -> BatchOutcome {
        let results: Vec<(ImageIdentifier, LoadResult)> = stream::iter(ids.iter().cloned())
            .map(|id| {
                let engine = self.clone();
                let options = options.clone();
                async move {
                    let result = engine.load(&id, options).await;
                    (id, result)
                }
            })
            .buffered(self.inner.max_concurrent)
            .collect()
            .await;

        let mut outcome = BatchOutcome::default();
        for (identifier, result) in results {
            match result {
                Ok(image) => outcome.successful.push(LoadedImage { identifier, image }),
                Err(error) => outcome.failed.push(FailedImage { identifier, error }),
            }
        }
        outcome
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<AcquisitionEvent> {
        self.inner.events.subscribe()
    }

    /// The decoded image cache
    pub fn cache(&self) -> &ImageCache {
        &self.inner.cache
    }

    /// Cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Free cache memory; see [`ImageCache::clear`]
    pub fn clear_cache(&self, aggressive: bool) -> usize {
        self.inner.cache.clear(aggressive)
    }

    /// The circuit breaker table
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    /// Whether an acquisition for `id` is running
    pub fn is_in_flight(&self, id: &ImageIdentifier) -> bool {
        self.inner.in_flight().contains_key(id)
    }

    /// Number of running acquisitions
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight().len()
    }

    /// Admission slots not currently held
    pub fn available_slots(&self) -> usize {
        self.inner.admission.available_permits()
    }

    /// Maximum concurrent acquisitions
    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Cancel every running acquisition and refuse new ones.
    ///
    /// Cache hits are still served.
    pub fn shutdown(&self) {
        tracing::debug!("Shutting down acquisition engine");
        self.inner.shutdown.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) was called
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Recent attempts for `id`, oldest first
    pub fn attempt_log(&self, id: &ImageIdentifier) -> Vec<LoadAttemptRecord> {
        self.inner
            .attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// One acquisition: admission, then the chain with retry.
///
/// Stops early on engine shutdown, or when every waiter has dropped the
/// shared future.
async fn acquire(
    inner: Arc<EngineInner>,
    id: ImageIdentifier,
    op: u64,
    priority: Priority,
    timeout: Option<Duration>,
) -> LoadResult {
    let _guard = InFlightGuard {
        inner: Arc::clone(&inner),
        id: id.clone(),
        op,
    };
    let cancel = inner.shutdown.clone();

    let _permit = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            return Err(AcquisitionError::Cancelled { identifier: id });
        }
        permit = Arc::clone(&inner.admission).acquire_owned() => permit.ok(),
    };

    tracing::debug!("Acquiring {id} ({priority:?} priority)");

    let mut attempt = 0;
    loop {
        attempt += 1;
        let started = Instant::now();
        let result = inner.chain.load(&id, timeout, &cancel).await;
        let elapsed = started.elapsed();

        let error = match result {
            Ok(image) => {
                let strategy = image.metadata.strategy;
                inner.record_attempt(&id, attempt, elapsed, Ok(strategy));

                let image = Arc::new(image);
                let previous_failures = inner.breaker.failures(&id);
                inner.cache.put(&id, Arc::clone(&image), None);
                inner.breaker.record_success(&id);

                inner.emit(AcquisitionEvent::Loaded {
                    identifier: id.clone(),
                    attempts: attempt,
                    strategy,
                });
                if previous_failures > 0 {
                    tracing::info!("Recovered {id} after {previous_failures} failures");
                    inner.emit(AcquisitionEvent::Recovered {
                        identifier: id.clone(),
                        previous_failures,
                    });
                }
                return Ok(image);
            }
            Err(error) => error,
        };

        inner.record_attempt(&id, attempt, elapsed, Err(error.kind()));

        if matches!(error, AcquisitionError::Cancelled { .. }) {
            tracing::debug!("Load of {id} cancelled");
            return Err(error);
        }

        let opened = inner.breaker.record_failure(&id);
        if opened {
            inner.emit(AcquisitionEvent::CircuitOpened {
                identifier: id.clone(),
            });
        }

        if opened || !error.is_retryable() || !inner.retry.should_retry(attempt) {
            tracing::warn!("Giving up on {id} after {attempt} attempts: {error}");
            inner.emit(AcquisitionEvent::Failed {
                report: error.report(),
            });
            return Err(error);
        }

        let delay = inner.retry.delay(attempt);
        tracing::debug!("Attempt {attempt} for {id} failed, retrying in {delay:?}: {error}");
        inner.emit(AcquisitionEvent::AttemptFailed {
            identifier: id.clone(),
            attempt,
            retry_in: delay,
            report: error.report(),
        });

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(AcquisitionError::Cancelled { identifier: id });
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
}
