//! Best-effort cache warming around the current viewing position

use std::collections::HashSet;
use std::ops::RangeInclusive;

use tokio::task::JoinHandle;

use crate::config::PreloadConfig;
use crate::engine::{AcquisitionEngine, LoadOptions, Priority};
use crate::models::ImageIdentifier;

/// Indices to warm around `current`: `window` ahead, `window / 2` behind,
/// clamped to `len`. `None` when `current` is out of range.
pub fn window(current: usize, len: usize, window: usize) -> Option<RangeInclusive<usize>> {
    if current >= len {
        return None;
    }
    let start = current.saturating_sub(window / 2);
    let end = current.saturating_add(window).min(len - 1);
    Some(start..=end)
}

/// Background loads started by one preload call
#[derive(Debug, Default)]
pub struct PreloadBatch {
    /// Identifiers that were scheduled, nearest first
    pub scheduled: Vec<ImageIdentifier>,
    handles: Vec<JoinHandle<()>>,
}

impl PreloadBatch {
    /// Number of scheduled loads
    pub fn len(&self) -> usize {
        self.scheduled.len()
    }

    /// Whether nothing needed warming
    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty()
    }

    /// Wait for every scheduled load to settle
    pub async fn wait(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Warms the cache around a viewing position
#[derive(Clone)]
pub struct Preloader {
    engine: AcquisitionEngine,
    window_size: usize,
}

impl Preloader {
    /// Create a preloader
    pub fn new(engine: AcquisitionEngine, config: &PreloadConfig) -> Self {
        Self {
            engine,
            window_size: config.window_size,
        }
    }

    /// Preload around `current_index` with the configured window
    pub fn preload(&self, current_index: usize, ids: &[ImageIdentifier]) -> PreloadBatch {
        self.preload_window(current_index, ids, self.window_size)
    }

    /// Preload around `current_index`.
    ///
    /// Already cached or in-flight identifiers are skipped. Loads run as
    /// detached low-priority tasks; their failures are logged and dropped.
    /// Must be called from within a tokio runtime.
    pub fn preload_window(
        &self,
        current_index: usize,
        ids: &[ImageIdentifier],
        window_size: usize,
    ) -> PreloadBatch {
        let Some(range) = window(current_index, ids.len(), window_size) else {
            return PreloadBatch::default();
        };

        // Current image, then forward, then backward (nearest first)
        let forward = current_index..=*range.end();
        let backward = (*range.start()..current_index).rev();

        let mut seen = HashSet::new();
        let mut batch = PreloadBatch::default();
        for index in forward.chain(backward) {
            let id = &ids[index];
            if !seen.insert(id)
                || self.engine.cache().contains(id)
                || self.engine.is_in_flight(id)
            {
                continue;
            }

            let engine = self.engine.clone();
            let task_id = id.clone();
            batch.handles.push(tokio::spawn(async move {
                let options = LoadOptions::with_priority(Priority::Low);
                if let Err(e) = engine.load(&task_id, options).await {
                    tracing::warn!("Preload of {task_id} failed: {e}");
                }
            }));
            batch.scheduled.push(id.clone());
        }

        if !batch.is_empty() {
            tracing::debug!(
                "Preloading {} images around index {current_index}",
                batch.len()
            );
        }
        batch
    }
}
