//! Byte-bounded cache for decoded images.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::models::{DecodedImage, ImageIdentifier};

/// Cache entry for an image
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The decoded image
    pub image: Arc<DecodedImage>,
    /// When the entry was inserted
    pub inserted_at: Instant,
    /// Last access timestamp (for LRU eviction)
    pub last_accessed_at: Instant,
    /// Cache hits served by this entry
    pub access_count: u64,
    /// Bytes accounted to this entry
    pub size_bytes: u64,
    /// Logical clock value of the last touch; breaks timestamp ties
    touched: u64,
}

/// Read-only cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    /// Bytes currently accounted
    pub total_size: u64,
    /// Configured bound
    pub max_size: u64,
    /// Number of cached images
    pub item_count: usize,
    /// Hits over total `get` calls (0 when nothing was asked)
    pub hit_rate: f64,
    /// Cache hits
    pub hits: u64,
    /// Cache misses
    pub misses: u64,
    /// Entries evicted to make room
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<ImageIdentifier, CacheEntry>,
    current_size: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    clock: u64,
}

impl CacheInner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, id: &ImageIdentifier) -> Option<CacheEntry> {
        let entry = self.entries.remove(id)?;
        self.current_size = self.current_size.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Least-accessed first, then least recently accessed.
    fn eviction_victim(&self) -> Option<ImageIdentifier> {
        self.entries
            .iter()
            .min_by_key(|(_, e)| (e.access_count, e.last_accessed_at, e.touched))
            .map(|(id, _)| id.clone())
    }

    /// Evict until usage is at most `target` and `incoming` more bytes fit
    /// under `max`, or the cache is empty.
    fn evict_until(&mut self, target: u64, incoming: u64, max: u64) -> usize {
        let mut evicted = 0;
        while self.current_size > target || self.current_size.saturating_add(incoming) > max {
            let Some(victim) = self.eviction_victim() else {
                break;
            };
            if let Some(entry) = self.remove(&victim) {
                tracing::debug!("Evicted {victim} ({} bytes)", entry.size_bytes);
                evicted += 1;
            }
        }
        self.evictions += evicted as u64;
        evicted
    }

    fn clear(&mut self) -> usize {
        let evicted = self.entries.len();
        self.entries.clear();
        self.current_size = 0;
        self.evictions += evicted as u64;
        evicted
    }
}

/// Thread-safe image cache.
///
/// Invariant after every mutation: the summed `size_bytes` of all entries
/// equals the accounted size, which never exceeds `max_size_bytes`.
#[derive(Clone)]
pub struct ImageCache {
    inner: Arc<Mutex<CacheInner>>,
    config: Arc<CacheConfig>,
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl ImageCache {
    /// Create a new image cache.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner::default())),
            config: Arc::new(config),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn eviction_target(&self) -> u64 {
        let ratio = self.config.eviction_target.clamp(0.0, 1.0);
        (self.config.max_size_bytes as f64 * ratio) as u64
    }

    /// Get a decoded image from cache, counting the access.
    pub fn get(&self, id: &ImageIdentifier) -> Option<Arc<DecodedImage>> {
        let mut cache = self.lock();
        let now = Instant::now();
        let touched = cache.tick();
        if let Some(entry) = cache.entries.get_mut(id) {
            entry.access_count += 1;
            entry.last_accessed_at = now;
            entry.touched = touched;
            let image = Arc::clone(&entry.image);
            cache.hits += 1;
            Some(image)
        } else {
            cache.misses += 1;
            None
        }
    }

    /// Store a decoded image in the cache.
    ///
    /// `size_bytes` defaults to `width * height * bytes_per_pixel`. Returns
    /// `false` if the image alone is larger than the cache.
    pub fn put(&self, id: &ImageIdentifier, image: Arc<DecodedImage>, size_bytes: Option<u64>) -> bool {
        let size = size_bytes.unwrap_or_else(|| image.estimated_size());
        let max = self.config.max_size_bytes;
        let mut cache = self.lock();

        cache.remove(id);

        if size > max {
            tracing::warn!("Not caching {id}: {size} bytes exceeds cache size {max}");
            return false;
        }

        if cache.current_size + size > max {
            let evicted = if self.config.aggressive_eviction {
                cache.clear()
            } else {
                cache.evict_until(self.eviction_target(), size, max)
            };
            tracing::debug!("Cache full, evicted {evicted} entries");
        }

        let now = Instant::now();
        let touched = cache.tick();
        cache.current_size += size;
        cache.entries.insert(
            id.clone(),
            CacheEntry {
                image,
                inserted_at: now,
                last_accessed_at: now,
                access_count: 0,
                size_bytes: size,
                touched,
            },
        );
        true
    }

    /// Check if an image is cached (does not count as an access).
    pub fn contains(&self, id: &ImageIdentifier) -> bool {
        self.lock().entries.contains_key(id)
    }

    /// Snapshot of an entry without touching it.
    pub fn peek(&self, id: &ImageIdentifier) -> Option<CacheEntry> {
        self.lock().entries.get(id).cloned()
    }

    /// Drop one entry.
    pub fn remove(&self, id: &ImageIdentifier) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Free memory. Aggressive mode drops everything; otherwise usage is
    /// trimmed to the eviction target. Returns the number of entries evicted.
    pub fn clear(&self, aggressive: bool) -> usize {
        let mut cache = self.lock();
        if aggressive {
            cache.clear()
        } else {
            cache.evict_until(self.eviction_target(), 0, self.config.max_size_bytes)
        }
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStats {
        let cache = self.lock();
        let lookups = cache.hits + cache.misses;
        CacheStats {
            total_size: cache.current_size,
            max_size: self.config.max_size_bytes,
            item_count: cache.entries.len(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                cache.hits as f64 / lookups as f64
            },
            hits: cache.hits,
            misses: cache.misses,
            evictions: cache.evictions,
        }
    }

    /// Get the number of cached images.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}
