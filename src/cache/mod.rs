//! Projection caching with LRU eviction policy
//!
//! This module memoizes projection results, together with the GPU buffers
//! that produced them, under a fixed memory budget. Each key is computed at
//! most once at a time: concurrent requests for a key that is already being
//! computed wait for that compute and share its outcome.

pub mod metrics;

use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use xxhash_rust::xxh3::Xxh3;

use crate::error::{Result, ShadingError, Warning};
use crate::gpu::GpuResourceHandle;
use crate::mesh::MeshId;
use crate::orchestrator::ComputePath;
use crate::projection::ProjectionResult;
use crate::settings::ProjectionSettings;
use metrics::ShadingMetricsHandle;

/// Identity of one cached projection
///
/// Covers every setting that changes the output. The thread count only
/// changes how the work is split, so it is not part of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(pub u64);

impl CacheKey {
    pub fn new(mesh: MeshId, settings: &ProjectionSettings) -> Self {
        let mut hasher = Xxh3::new();
        mesh.0.hash(&mut hasher);
        settings.scale().to_bits().hash(&mut hasher);
        settings.blend_factor().to_bits().hash(&mut hasher);
        settings.use_gpu().hash(&mut hasher);
        Self(hasher.finish())
    }
}

/// A computed projection and, for GPU results, the device buffers behind it
#[derive(Debug, Clone)]
pub struct CachedProjection {
    pub result: Arc<ProjectionResult>,
    pub path: ComputePath,
    pub gpu: Option<GpuResourceHandle>,
    /// Conditions raised while computing, replayed to callers that share the compute
    pub warnings: Vec<Warning>,
}

impl CachedProjection {
    pub fn cpu(result: ProjectionResult, path: ComputePath) -> Self {
        Self {
            result: Arc::new(result),
            path,
            gpu: None,
            warnings: Vec::new(),
        }
    }

    pub fn gpu(result: ProjectionResult, handle: GpuResourceHandle) -> Self {
        Self {
            result: Arc::new(result),
            path: ComputePath::Gpu,
            gpu: Some(handle),
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: Warning) -> Self {
        self.warnings.push(warning);
        self
    }

    /// Host bytes plus device bytes
    pub fn size_in_bytes(&self) -> usize {
        self.result.size_in_bytes() + self.gpu.as_ref().map_or(0, |h| h.size_in_bytes())
    }
}

/// How a lookup was served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    /// Found resident
    Hit,
    /// Computed by this call and stored
    Miss,
    /// Computed by a concurrent call this one waited on
    Shared,
    /// Computed by this call but too large to store
    Bypassed,
}

/// Result of [`CacheManager::get_or_compute`]
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub value: CachedProjection,
    pub status: CacheStatus,
    pub warning: Option<Warning>,
}

/// Represents a cached projection with metadata
#[derive(Debug)]
struct CacheEntry {
    value: CachedProjection,
    size: usize,
    last_access: Instant,
}

/// Outcome slot for a compute in progress
#[derive(Debug, Default)]
struct InFlight {
    outcome: Mutex<Option<Result<CacheLookup>>>,
    ready: Condvar,
    waiters: AtomicUsize,
}

impl InFlight {
    fn wait(&self) -> Result<CacheLookup> {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.ready.wait(&mut slot);
        }
    }

    fn complete(&self, outcome: Result<CacheLookup>) {
        *self.outcome.lock() = Some(outcome);
        self.ready.notify_all();
    }
}

#[derive(Debug)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    lru: VecDeque<CacheKey>,
    in_flight: HashMap<CacheKey, Arc<InFlight>>,
    budget: usize,
}

/// Manages cached projections with LRU eviction policy
#[derive(Debug)]
pub struct CacheManager {
    state: Mutex<CacheState>,
    current_memory: AtomicUsize,
    metrics: ShadingMetricsHandle,
}

/// Publishes an aborted outcome if the compute unwinds before finishing
struct FlightGuard<'a> {
    cache: &'a CacheManager,
    key: CacheKey,
    flight: Arc<InFlight>,
    done: bool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        log::warn!("Compute for cache key {:016x} aborted", self.key.0);
        self.cache.state.lock().in_flight.remove(&self.key);
        self.flight.complete(Err(ShadingError::ComputeAborted(format!(
            "compute for key {:016x} panicked",
            self.key.0
        ))));
    }
}

impl CacheManager {
    /// Creates a new CacheManager with the specified memory budget in bytes
    pub fn new(budget: usize) -> Self {
        Self::with_metrics(budget, ShadingMetricsHandle::new())
    }

    /// Creates a CacheManager that records into an existing metrics handle
    pub fn with_metrics(budget: usize, metrics: ShadingMetricsHandle) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                lru: VecDeque::new(),
                in_flight: HashMap::new(),
                budget,
            }),
            current_memory: AtomicUsize::new(0),
            metrics,
        }
    }

    /// Gets a projection from cache or computes it if not present
    ///
    /// `compute` runs outside the cache lock and at most once per key at a
    /// time. Callers arriving while it runs block until it finishes and get
    /// its value and warning, or its error, with [`CacheStatus::Shared`].
    pub fn get_or_compute<F>(&self, key: CacheKey, compute: F) -> Result<CacheLookup>
    where
        F: FnOnce() -> Result<CachedProjection>,
    {
        let flight = {
            let mut state = self.state.lock();

            if let Some(entry) = state.entries.get_mut(&key) {
                entry.last_access = Instant::now();
                let value = entry.value.clone();
                Self::touch(&mut state.lru, key);
                self.metrics.record_cache_hit();
                log::debug!("Cache hit for {:016x}", key.0);
                return Ok(CacheLookup {
                    value,
                    status: CacheStatus::Hit,
                    warning: None,
                });
            }

            if let Some(flight) = state.in_flight.get(&key).cloned() {
                drop(state);
                log::debug!("Waiting on in-flight compute for {:016x}", key.0);
                let lookup = flight.wait()?;
                self.metrics.record_cache_hit();
                return Ok(CacheLookup {
                    status: CacheStatus::Shared,
                    ..lookup
                });
            }

            let flight = Arc::new(InFlight::default());
            state.in_flight.insert(key, Arc::clone(&flight));
            flight
        };

        self.metrics.record_cache_miss();
        log::debug!("Cache miss for {:016x}, computing", key.0);

        let mut guard = FlightGuard {
            cache: self,
            key,
            flight,
            done: false,
        };

        let start = Instant::now();
        let outcome = compute();
        self.metrics.record_compute_time(start.elapsed());

        let mut state = self.state.lock();
        state.in_flight.remove(&key);
        let lookup = outcome.map(|value| self.store(&mut state, key, value));
        drop(state);

        guard.done = true;
        guard.flight.complete(lookup.clone());
        lookup
    }

    fn store(&self, state: &mut CacheState, key: CacheKey, value: CachedProjection) -> CacheLookup {
        let size = value.size_in_bytes();

        if size > state.budget {
            self.metrics.record_bypass();
            log::warn!(
                "Memory limit exceeded: result needs {} bytes, budget is {}",
                size,
                state.budget
            );
            return CacheLookup {
                value,
                status: CacheStatus::Bypassed,
                warning: Some(Warning::MemoryLimitExceeded {
                    required: size,
                    budget: state.budget,
                }),
            };
        }

        if let Some(previous) = state.entries.remove(&key) {
            self.current_memory.fetch_sub(previous.size, Ordering::SeqCst);
            state.lru.retain(|k| *k != key);
        }

        let target = state.budget - size;
        self.evict_until(state, target);

        state.entries.insert(
            key,
            CacheEntry {
                value: value.clone(),
                size,
                last_access: Instant::now(),
            },
        );
        state.lru.push_back(key);
        self.current_memory.fetch_add(size, Ordering::SeqCst);

        CacheLookup {
            value,
            status: CacheStatus::Miss,
            warning: None,
        }
    }

    /// Evict least recently used entries until usage is within budget
    ///
    /// Returns how many entries were evicted.
    pub fn evict_if_over_budget(&self) -> usize {
        let mut state = self.state.lock();
        let budget = state.budget;
        self.evict_until(&mut state, budget)
    }

    fn evict_until(&self, state: &mut CacheState, target: usize) -> usize {
        let mut evicted = 0;
        while self.current_memory.load(Ordering::SeqCst) > target {
            let Some(oldest) = state.lru.pop_front() else {
                break;
            };
            if let Some(removed) = state.entries.remove(&oldest) {
                self.current_memory.fetch_sub(removed.size, Ordering::SeqCst);
                self.metrics.record_eviction();
                evicted += 1;
                log::trace!(
                    "Evicted {:016x} ({} bytes, idle {:?})",
                    oldest.0,
                    removed.size,
                    removed.last_access.elapsed()
                );
            }
        }
        evicted
    }

    fn touch(lru: &mut VecDeque<CacheKey>, key: CacheKey) {
        if let Some(pos) = lru.iter().position(|k| *k == key) {
            lru.remove(pos);
        }
        lru.push_back(key);
    }

    /// Clears all cached projections, dropping the cache's GPU handles
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.lru.clear();
        self.current_memory.store(0, Ordering::SeqCst);
    }

    /// Change the budget, evicting immediately if usage now exceeds it
    pub fn set_budget(&self, budget: usize) {
        let mut state = self.state.lock();
        state.budget = budget;
        self.evict_until(&mut state, budget);
    }

    pub fn budget(&self) -> usize {
        self.state.lock().budget
    }

    /// Gets the current memory usage in bytes
    pub fn memory_usage(&self) -> usize {
        self.current_memory.load(Ordering::Relaxed)
    }

    /// Number of resident entries
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is resident, without touching its LRU position
    pub fn contains(&self, key: CacheKey) -> bool {
        self.state.lock().entries.contains_key(&key)
    }

    /// Get a reference to the metrics handle
    pub fn metrics(&self) -> &ShadingMetricsHandle {
        &self.metrics
    }

    #[cfg(test)]
    fn waiting_on(&self, key: CacheKey) -> usize {
        self.state
            .lock()
            .in_flight
            .get(&key)
            .map_or(0, |f| f.waiters.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::ProjectedVertex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    fn result(len: usize) -> ProjectionResult {
        ProjectionResult::new(vec![ProjectedVertex::default(); len])
    }

    fn entry(len: usize) -> CachedProjection {
        CachedProjection::cpu(result(len), ComputePath::CpuSingle)
    }

    fn entry_size(len: usize) -> usize {
        entry(len).size_in_bytes()
    }

    #[test]
    fn test_cache_creation() {
        let cache = CacheManager::new(100 * 1024 * 1024);
        assert_eq!(cache.memory_usage(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_miss_then_hit() {
        let cache = CacheManager::new(1 << 20);
        let key = CacheKey(7);

        let first = cache.get_or_compute(key, || Ok(entry(4))).unwrap();
        assert_eq!(first.status, CacheStatus::Miss);
        assert_eq!(cache.memory_usage(), entry_size(4));

        let second = cache
            .get_or_compute(key, || panic!("must not recompute"))
            .unwrap();
        assert_eq!(second.status, CacheStatus::Hit);
        assert!(Arc::ptr_eq(&first.value.result, &second.value.result));
        assert_eq!(cache.metrics().cache_hits(), 1);
        assert_eq!(cache.metrics().cache_misses(), 1);
    }

    #[test]
    fn test_lru_eviction_order() {
        let budget = entry_size(8) * 2;
        let cache = CacheManager::new(budget);

        cache.get_or_compute(CacheKey(1), || Ok(entry(8))).unwrap();
        cache.get_or_compute(CacheKey(2), || Ok(entry(8))).unwrap();
        // refresh 1 so 2 becomes least recently used
        cache.get_or_compute(CacheKey(1), || Ok(entry(8))).unwrap();
        cache.get_or_compute(CacheKey(3), || Ok(entry(8))).unwrap();

        assert!(cache.contains(CacheKey(1)));
        assert!(!cache.contains(CacheKey(2)));
        assert!(cache.contains(CacheKey(3)));
        assert!(cache.memory_usage() <= budget);
        assert_eq!(cache.metrics().evictions(), 1);
    }

    #[test]
    fn test_oversize_entry_is_bypassed() {
        let cache = CacheManager::new(entry_size(4));
        cache.get_or_compute(CacheKey(1), || Ok(entry(4))).unwrap();

        let lookup = cache.get_or_compute(CacheKey(2), || Ok(entry(400))).unwrap();
        assert_eq!(lookup.status, CacheStatus::Bypassed);
        assert_eq!(lookup.value.result.len(), 400);
        assert!(matches!(
            lookup.warning,
            Some(Warning::MemoryLimitExceeded { .. })
        ));
        // the resident entry is untouched
        assert!(cache.contains(CacheKey(1)));
        assert!(!cache.contains(CacheKey(2)));
        assert_eq!(cache.metrics().bypasses(), 1);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let cache = CacheManager::new(1 << 20);
        let err = cache
            .get_or_compute(CacheKey(1), || Err(ShadingError::MissingData))
            .unwrap_err();
        assert_eq!(err, ShadingError::MissingData);
        assert!(!cache.contains(CacheKey(1)));

        let lookup = cache.get_or_compute(CacheKey(1), || Ok(entry(1))).unwrap();
        assert_eq!(lookup.status, CacheStatus::Miss);
    }

    #[test]
    fn test_set_budget_evicts() {
        let cache = CacheManager::new(1 << 20);
        for i in 0..4 {
            cache.get_or_compute(CacheKey(i), || Ok(entry(16))).unwrap();
        }

        cache.set_budget(entry_size(16));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(CacheKey(3)));
        assert_eq!(cache.budget(), entry_size(16));
        assert_eq!(cache.evict_if_over_budget(), 0);
    }

    #[test]
    fn test_clear() {
        let cache = CacheManager::new(1 << 20);
        cache.get_or_compute(CacheKey(1), || Ok(entry(4))).unwrap();
        cache.clear();
        assert_eq!(cache.memory_usage(), 0);
        assert!(!cache.contains(CacheKey(1)));
    }

    #[test]
    fn test_concurrent_requests_compute_once() {
        let cache = Arc::new(CacheManager::new(1 << 20));
        let computes = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let computes = Arc::clone(&computes);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_compute(CacheKey(42), || {
                            computes.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            Ok(entry(32))
                        })
                        .unwrap()
                })
            })
            .collect();

        let lookups: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(computes.load(Ordering::SeqCst), 1);
        assert_eq!(
            lookups
                .iter()
                .filter(|l| l.status == CacheStatus::Miss)
                .count(),
            1
        );
        for lookup in &lookups {
            assert!(Arc::ptr_eq(&lookup.value.result, &lookups[0].value.result));
        }
    }

    #[test]
    fn test_waiters_share_bypass_warning() {
        let cache = Arc::new(CacheManager::new(entry_size(1)));
        let barrier = Arc::new(Barrier::new(6));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_compute(CacheKey(5), || {
                            thread::sleep(Duration::from_millis(50));
                            Ok(entry(64).with_warning(Warning::GpuNotAvailable))
                        })
                        .unwrap()
                })
            })
            .collect();

        for lookup in handles.into_iter().map(|h| h.join().unwrap()) {
            assert!(matches!(lookup.status, CacheStatus::Bypassed | CacheStatus::Shared));
            assert!(matches!(
                lookup.warning,
                Some(Warning::MemoryLimitExceeded { .. })
            ));
            assert_eq!(lookup.value.warnings, vec![Warning::GpuNotAvailable]);
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn test_panicking_compute_releases_waiters() {
        let cache = Arc::new(CacheManager::new(1 << 20));
        let key = CacheKey(9);
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let leader = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache.get_or_compute(key, move || {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    panic!("compute blew up");
                })
            })
        };
        started_rx.recv().unwrap();

        let waiter = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get_or_compute(key, || Ok(entry(1))))
        };
        while cache.waiting_on(key) == 0 {
            thread::yield_now();
        }
        release_tx.send(()).unwrap();

        assert!(leader.join().is_err());
        let err = waiter.join().unwrap().unwrap_err();
        assert!(matches!(err, ShadingError::ComputeAborted(_)));

        // the slot is free again
        let lookup = cache.get_or_compute(key, || Ok(entry(1))).unwrap();
        assert_eq!(lookup.status, CacheStatus::Miss);
    }
}
