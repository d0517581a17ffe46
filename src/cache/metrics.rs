use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tracks cache effectiveness and compute cost for shading requests
#[derive(Debug, Default)]
pub struct ShadingMetrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    evictions: AtomicU64,
    bypasses: AtomicU64,
    gpu_fallbacks: AtomicU64,
    computes: AtomicU64,
    total_compute_nanos: AtomicU64,
    last_compute_time: RwLock<Option<Duration>>,
}

impl ShadingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cache hit
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache miss
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one entry evicted to stay within budget
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a result returned uncached because it exceeded the budget
    pub fn record_bypass(&self) {
        self.bypasses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a GPU request served by the CPU
    pub fn record_gpu_fallback(&self) {
        self.gpu_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long a compute took
    pub fn record_compute_time(&self, duration: Duration) {
        self.computes.fetch_add(1, Ordering::Relaxed);
        self.total_compute_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        *self.last_compute_time.write() = Some(duration);
    }

    /// Get the cache hit rate as a percentage
    pub fn cache_hit_rate(&self) -> f32 {
        let hits = self.cache_hits.load(Ordering::Relaxed) as f32;
        let misses = self.cache_misses.load(Ordering::Relaxed) as f32;

        if hits + misses > 0.0 {
            hits / (hits + misses) * 100.0
        } else {
            0.0
        }
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn bypasses(&self) -> u64 {
        self.bypasses.load(Ordering::Relaxed)
    }

    pub fn gpu_fallbacks(&self) -> u64 {
        self.gpu_fallbacks.load(Ordering::Relaxed)
    }

    /// Number of computes that ran to completion or failure
    pub fn computes(&self) -> u64 {
        self.computes.load(Ordering::Relaxed)
    }

    /// Duration of the most recent compute
    pub fn last_compute_time(&self) -> Option<Duration> {
        *self.last_compute_time.read()
    }

    /// Mean compute duration, if anything was computed
    pub fn average_compute_time(&self) -> Option<Duration> {
        let count = self.computes();
        if count == 0 {
            return None;
        }
        let total = self.total_compute_nanos.load(Ordering::Relaxed);
        Some(Duration::from_nanos(total / count))
    }
}

/// A thread-safe wrapper around ShadingMetrics
#[derive(Debug, Clone, Default)]
pub struct ShadingMetricsHandle(Arc<ShadingMetrics>);

impl ShadingMetricsHandle {
    /// Create a new metrics handle
    pub fn new() -> Self {
        Self(Arc::new(ShadingMetrics::new()))
    }

    /// Get a reference to the underlying metrics
    pub fn inner(&self) -> &ShadingMetrics {
        &self.0
    }
}

impl std::ops::Deref for ShadingMetricsHandle {
    type Target = ShadingMetrics;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
