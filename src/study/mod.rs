//! Study loading: fan-out over every image of one study with progress,
//! partial failure and a recovery menu when nothing loads.

use std::ops::ControlFlow;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::StudyConfig;
use crate::engine::{AcquisitionEngine, LoadOptions, Priority};
use crate::error::AcquisitionError;
use crate::models::{
    DecodedImage, FailedImage, ImageIdentifier, LoadedImage, RecoveryOption, StudyLoadResult,
    StudyLoadState, StudyProgress, StudyStatus,
};

/// Loads studies through a shared engine
#[derive(Clone)]
pub struct StudyLoader {
    engine: AcquisitionEngine,
    high_priority_count: usize,
}

impl StudyLoader {
    /// Create a study loader
    pub fn new(engine: AcquisitionEngine, config: &StudyConfig) -> Self {
        Self {
            engine,
            high_priority_count: config.high_priority_count,
        }
    }

    /// The engine this loader drives
    pub const fn engine(&self) -> &AcquisitionEngine {
        &self.engine
    }

    /// Load every image of a study.
    ///
    /// The first few identifiers load one at a time at high priority so the
    /// first image shows quickly; the rest load concurrently. `on_progress`
    /// runs after each identifier settles. Zero loaded images is returned as
    /// [`StudyLoadResult::Failed`], not as an error.
    pub async fn load_study<F>(
        &self,
        study_id: &str,
        ids: &[ImageIdentifier],
        cancel: &CancellationToken,
        on_progress: F,
    ) -> Result<StudyLoadResult, AcquisitionError>
    where
        F: FnMut(&StudyProgress),
    {
        if ids.is_empty() {
            return Err(AcquisitionError::NoIdentifiers);
        }

        tracing::info!("Loading study {study_id} ({} images)", ids.len());

        let mut run = StudyRun::new(study_id, ids.len(), on_progress);
        let options = |priority| LoadOptions::with_priority(priority).cancellable(cancel.clone());

        let split = self.high_priority_count.min(ids.len());
        let (leading, rest) = ids.split_at(split);

        let mut flow = ControlFlow::Continue(());
        for id in leading {
            let result = self.engine.load(id, options(Priority::High)).await;
            flow = run.settle(id, result);
            if flow.is_break() {
                break;
            }
        }

        if flow.is_continue() {
            let mut results = stream::iter(rest)
                .map(|id| {
                    let options = options(Priority::Normal);
                    async move { (id, self.engine.load(id, options).await) }
                })
                .buffered(self.engine.max_concurrent());

            while let Some((id, result)) = results.next().await {
                if run.settle(id, result).is_break() {
                    break;
                }
            }
        }

        Ok(self.finish(ids, run))
    }

    fn finish<F>(&self, ids: &[ImageIdentifier], run: StudyRun<F>) -> StudyLoadResult {
        let StudyRun {
            mut state,
            images,
            errors,
            ..
        } = run;
        state.finalize();

        tracing::info!(
            "Study {} {:?}: {} loaded, {} failed",
            state.study_id,
            state.status,
            state.loaded_count,
            state.failed_count
        );

        if state.status != StudyStatus::Failed {
            return StudyLoadResult::Loaded {
                images,
                errors,
                state,
            };
        }

        let available = ids
            .iter()
            .filter(|id| self.engine.cache().contains(id))
            .count();
        let first = state.errors.first().cloned();
        let message = match &first {
            Some(report) => format!(
                "No images could be loaded for study {} ({} failed; first error: {})",
                state.study_id, state.failed_count, report.message
            ),
            None => format!("No images could be loaded for study {}", state.study_id),
        };

        StudyLoadResult::Failed {
            message,
            recovery_options: vec![
                RecoveryOption::Retry,
                RecoveryOption::UseCached { available },
                RecoveryOption::DegradedViewer,
                RecoveryOption::ReportIssue { report: first },
            ],
            state,
        }
    }
}

/// Accumulates results of one study load
struct StudyRun<F> {
    state: StudyLoadState,
    images: Vec<LoadedImage>,
    errors: Vec<FailedImage>,
    started: Instant,
    on_progress: F,
}

impl<F> StudyRun<F>
where
    F: FnMut(&StudyProgress),
{
    fn new(study_id: &str, total: usize, on_progress: F) -> Self {
        let mut state = StudyLoadState::new(study_id, total);
        state.status = StudyStatus::Loading;
        Self {
            state,
            images: Vec::with_capacity(total),
            errors: Vec::new(),
            started: Instant::now(),
            on_progress,
        }
    }

    fn settle(
        &mut self,
        id: &ImageIdentifier,
        result: Result<Arc<DecodedImage>, AcquisitionError>,
    ) -> ControlFlow<()> {
        let flow = match result {
            Ok(image) => {
                self.state.loaded_count += 1;
                self.images.push(LoadedImage {
                    identifier: id.clone(),
                    image,
                });
                ControlFlow::Continue(())
            }
            Err(error) => {
                tracing::warn!("Study {}: {id} failed: {error}", self.state.study_id);
                self.state.failed_count += 1;
                self.state.errors.push(error.report());
                let critical = error.is_critical();
                self.errors.push(FailedImage {
                    identifier: id.clone(),
                    error,
                });
                if critical {
                    self.state.aborted = true;
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }
        };

        let progress = self.progress(id);
        (self.on_progress)(&progress);
        flow
    }

    fn progress(&self, id: &ImageIdentifier) -> StudyProgress {
        let total = self.state.total_count;
        let settled = self.state.settled_count();
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        let eta_ms = if settled == 0 {
            0
        } else {
            elapsed_ms / settled as u64 * total.saturating_sub(settled) as u64
        };

        StudyProgress {
            loaded: self.state.loaded_count,
            failed: self.state.failed_count,
            total,
            percentage: settled as f64 / total as f64 * 100.0,
            current_id: id.to_string(),
            eta_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::{Config, RetryConfig};
    use crate::strategy::StrategyKind;
    use crate::testing::{ScriptedTransport, StubDecoder, png_bytes};

    fn id(n: u32) -> ImageIdentifier {
        ImageIdentifier::parse(&format!("https://pacs.example/study/{n}.png")).unwrap()
    }

    fn loader(transport: &Arc<ScriptedTransport>, high_priority_count: usize) -> StudyLoader {
        let mut config = Config {
            retry: RetryConfig {
                max_attempts: 1,
                jitter: false,
                ..RetryConfig::default()
            },
            ..Config::default()
        };
        config.acquisition.strategies = vec![StrategyKind::PrimaryDecoder];
        config.study.high_priority_count = high_priority_count;

        let engine = AcquisitionEngine::new(&config, transport.clone(), Arc::new(StubDecoder));
        StudyLoader::new(engine, &config.study)
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_load_reports_progress_in_order() {
        let transport = Arc::new(ScriptedTransport::new());
        for n in 0..5 {
            transport.respond(id(n).url(), 200, png_bytes(2, 2));
        }
        let ids: Vec<_> = (0..5).map(id).collect();

        let mut progress = Vec::new();
        let result = loader(&transport, 2)
            .load_study("study-1", &ids, &CancellationToken::new(), |p| {
                progress.push(p.clone());
            })
            .await
            .unwrap();

        let StudyLoadResult::Loaded { images, errors, state } = result else {
            panic!("expected loaded study");
        };
        assert_eq!(state.status, StudyStatus::Completed);
        assert!(errors.is_empty());
        let order: Vec<_> = images.iter().map(|i| i.identifier.clone()).collect();
        assert_eq!(order, ids);

        assert_eq!(progress.len(), 5);
        assert_eq!(progress[0].current_id, ids[0].to_string());
        assert!((progress[4].percentage - 100.0).abs() < f64::EPSILON);
        assert_eq!(progress[4].eta_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eta_from_elapsed_rate() {
        let transport = Arc::new(ScriptedTransport::new());
        for n in 0..3 {
            transport.respond(id(n).url(), 200, png_bytes(1, 1));
        }
        transport.set_delay(Duration::from_secs(1));
        let ids: Vec<_> = (0..3).map(id).collect();

        let mut etas = Vec::new();
        loader(&transport, 3)
            .load_study("s", &ids, &CancellationToken::new(), |p| etas.push(p.eta_ms))
            .await
            .unwrap();

        assert_eq!(etas, vec![2000, 1000, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leading_images_load_sequentially() {
        let transport = Arc::new(ScriptedTransport::new());
        for n in 0..5 {
            transport.respond(id(n).url(), 200, png_bytes(1, 1));
        }
        transport.set_delay(Duration::from_secs(1));
        let ids: Vec<_> = (0..5).map(id).collect();

        let started = Instant::now();
        loader(&transport, 2)
            .load_study("s", &ids, &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        // two one-by-one, then three together
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_is_success_with_errors() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(id(0).url(), 200, png_bytes(1, 1));
        transport.respond(id(2).url(), 200, png_bytes(1, 1));
        let ids: Vec<_> = (0..3).map(id).collect();

        let result = loader(&transport, 1)
            .load_study("s", &ids, &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.state().status, StudyStatus::PartiallyCompleted);
        let StudyLoadResult::Loaded { images, errors, .. } = result else {
            unreachable!()
        };
        assert_eq!(images.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].identifier, id(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_in_both_phases_keep_the_study_going() {
        let transport = Arc::new(ScriptedTransport::new());
        for n in [0, 2, 4] {
            transport.respond(id(n).url(), 200, png_bytes(1, 1));
        }
        let ids: Vec<_> = (0..5).map(id).collect();

        let mut progress = Vec::new();
        let result = loader(&transport, 2)
            .load_study("s", &ids, &CancellationToken::new(), |p| {
                progress.push((p.loaded, p.failed));
            })
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.state().status, StudyStatus::PartiallyCompleted);
        let StudyLoadResult::Loaded { images, errors, .. } = result else {
            unreachable!()
        };
        let loaded: Vec<_> = images.iter().map(|i| i.identifier.clone()).collect();
        assert_eq!(loaded, vec![id(0), id(2), id(4)]);
        let failed: Vec<_> = errors.iter().map(|e| e.identifier.clone()).collect();
        assert_eq!(failed, vec![id(1), id(3)]);
        assert_eq!(progress, vec![(1, 0), (1, 1), (2, 1), (2, 2), (3, 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewer_cancel_of_shared_image_does_not_abort_study() {
        let transport = Arc::new(ScriptedTransport::new());
        for n in 0..3 {
            transport.respond(id(n).url(), 200, png_bytes(1, 1));
        }
        transport.set_delay(Duration::from_secs(1));
        let ids: Vec<_> = (0..3).map(id).collect();
        let loader = loader(&transport, 1);

        // The viewer starts image 0 on its own and gives up on it
        let viewer_cancel = CancellationToken::new();
        let viewer = tokio::spawn({
            let engine = loader.engine().clone();
            let options = LoadOptions::default().cancellable(viewer_cancel.clone());
            async move {
                let key = id(0);
                engine.load(&key, options).await
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        tokio::spawn({
            let viewer_cancel = viewer_cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                viewer_cancel.cancel();
            }
        });
        let result = loader
            .load_study("s", &ids, &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert!(viewer.await.unwrap().is_err());
        assert_eq!(result.state().status, StudyStatus::Completed);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_failure_offers_recovery() {
        let transport = Arc::new(ScriptedTransport::new());
        let ids: Vec<_> = (0..3).map(id).collect();

        let result = loader(&transport, 1)
            .load_study("s", &ids, &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        let StudyLoadResult::Failed {
            message,
            recovery_options,
            state,
        } = result
        else {
            panic!("expected failed study");
        };
        assert_eq!(state.status, StudyStatus::Failed);
        assert_eq!(state.failed_count, 3);
        assert!(message.contains("No images could be loaded"));
        assert_eq!(recovery_options[0], RecoveryOption::Retry);
        assert!(recovery_options.contains(&RecoveryOption::UseCached { available: 0 }));
        assert!(recovery_options.contains(&RecoveryOption::DegradedViewer));
        assert!(matches!(
            recovery_options.last(),
            Some(RecoveryOption::ReportIssue { report: Some(_) })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_the_loop() {
        let transport = Arc::new(ScriptedTransport::new());
        for n in 0..4 {
            transport.respond(id(n).url(), 200, png_bytes(1, 1));
        }
        let ids: Vec<_> = (0..4).map(id).collect();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = loader(&transport, 2)
            .load_study("s", &ids, &cancel, |_| {})
            .await
            .unwrap();

        let state = result.state();
        assert!(state.aborted);
        assert_eq!(state.failed_count, 1);
        assert_eq!(state.status, StudyStatus::Failed);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_study_is_an_error() {
        let transport = Arc::new(ScriptedTransport::new());
        let err = loader(&transport, 3)
            .load_study("s", &[], &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err, AcquisitionError::NoIdentifiers);
    }
}
