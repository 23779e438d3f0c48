//! In-memory LRU image cache bounded by decoded size.

use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, PixelBuffer};

/// Fraction of available memory given to the cache.
pub const MEMORY_CACHE_DIVISOR: u64 = 8;

/// In-memory LRU cache for decoded images.
///
/// Capacity is a weight budget in kilobytes; an entry weighs its pixel bytes
/// divided by 1024. Inserting never evicts the entry being inserted, so a
/// single image larger than the whole budget is kept and the budget is
/// exceeded until the next insertion pushes it out.
///
/// Lookups are synchronous so the memory-hit path never suspends.
pub struct MemoryImageCache {
    inner: Mutex<Inner>,
    capacity_kb: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

struct Inner {
    entries: LruCache<CacheKey, PixelBuffer>,
    weight_kb: usize,
}

impl MemoryImageCache {
    /// Creates a new cache with the given budget in kilobytes.
    #[must_use]
    pub fn new(capacity_kb: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                weight_kb: 0,
            }),
            capacity_kb,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache sized to 1/8 of `available_bytes`.
    #[must_use]
    pub fn for_available_memory(available_bytes: u64) -> Self {
        let capacity_kb = available_bytes / 1024 / MEMORY_CACHE_DIVISOR;
        Self::new(usize::try_from(capacity_kb).unwrap_or(usize::MAX))
    }

    /// Gets an image and marks it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<PixelBuffer> {
        let mut inner = self.inner.lock();
        if let Some(buffer) = inner.entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            Some(buffer.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    /// Peeks at an image without promoting it in the LRU.
    pub fn peek(&self, key: &CacheKey) -> Option<PixelBuffer> {
        self.inner.lock().entries.peek(key).cloned()
    }

    /// Returns true if the key is cached.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.lock().entries.contains(key)
    }

    /// Stores an image, evicting least recently used entries while over budget.
    pub fn put(&self, key: CacheKey, buffer: PixelBuffer) {
        let weight = buffer.weight_kb();
        let mut inner = self.inner.lock();

        if let Some(old) = inner.entries.put(key.clone(), buffer) {
            inner.weight_kb -= old.weight_kb();
        }
        inner.weight_kb += weight;
        debug!(key = %key, weight_kb = weight, total_kb = inner.weight_kb, "Stored image in memory cache");

        while inner.weight_kb > self.capacity_kb && inner.entries.len() > 1 {
            let Some((evicted_key, evicted)) = inner.entries.pop_lru() else {
                break;
            };
            inner.weight_kb -= evicted.weight_kb();
            debug!(key = %evicted_key, weight_kb = evicted.weight_kb(), "Evicted image from memory cache");
        }

        if inner.weight_kb > self.capacity_kb {
            debug!(
                key = %key,
                weight_kb = weight,
                capacity_kb = self.capacity_kb,
                "Single image exceeds memory cache budget, keeping it"
            );
        }
    }

    /// Number of cached images.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total weight of cached images in kilobytes.
    pub fn weight_kb(&self) -> usize {
        self.inner.lock().weight_kb
    }

    /// Configured budget in kilobytes.
    #[must_use]
    pub const fn capacity_kb(&self) -> usize {
        self.capacity_kb
    }

    /// Drops every cached image.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.weight_kb = 0;
        debug!("Cleared memory image cache");
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let inner = self.inner.lock();
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: inner.entries.len(),
            weight_kb: inner.weight_kb,
            capacity_kb: self.capacity_kb,
        }
    }
}

impl std::fmt::Debug for MemoryImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryImageCache")
            .field("capacity_kb", &self.capacity_kb)
            .finish_non_exhaustive()
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Current weight in kilobytes.
    pub weight_kb: usize,
    /// Budget in kilobytes.
    pub capacity_kb: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images, {}/{} KB, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.weight_kb, self.capacity_kb, self.hit_rate, self.hits, self.misses
        )
    }
}
