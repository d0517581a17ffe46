//! CPU worker pool for the projection fallback path
//!
//! Vertices are split into one contiguous chunk per worker, projected on a
//! rayon pool of exactly the requested size, and concatenated back in order.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::error::{Result, ShadingError};
use crate::mesh::MeshView;
use crate::projection::{project_vertices, ProjectionResult};
use crate::settings::{validate_thread_count, ProjectionSettings};

/// Split `len` items into `parts` contiguous ranges
///
/// Every range but the last holds `len / parts` items; the last one absorbs
/// the remainder. `parts` of zero is treated as one.
pub fn partition(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1);
    let chunk = len / parts;
    (0..parts)
        .map(|i| {
            let start = i * chunk;
            let end = if i + 1 == parts { len } else { start + chunk };
            start..end
        })
        .collect()
}

/// Rayon pools keyed by worker count, built on first use
#[derive(Debug, Default)]
pub struct WorkerPool {
    pools: Mutex<HashMap<usize, Arc<rayon::ThreadPool>>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool with exactly `thread_count` workers
    pub fn pool(&self, thread_count: usize) -> Result<Arc<rayon::ThreadPool>> {
        let thread_count = validate_thread_count(thread_count)?;

        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(&thread_count) {
            return Ok(Arc::clone(pool));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(thread_count)
            .thread_name(|i| format!("arcane-worker-{}", i))
            .build()
            .map_err(|e| {
                ShadingError::WorkerPool(format!("failed to create thread pool: {}", e))
            })?;
        log::debug!("Created worker pool with {} threads", thread_count);

        let pool = Arc::new(pool);
        pools.insert(thread_count, Arc::clone(&pool));
        Ok(pool)
    }

    /// Number of distinct pools built so far
    pub fn pool_count(&self) -> usize {
        self.pools.lock().len()
    }

    /// Project `mesh` across `thread_count` workers
    ///
    /// Output is identical to [`crate::projection::project`].
    pub fn parallel_project(
        &self,
        mesh: &MeshView,
        settings: &ProjectionSettings,
        thread_count: usize,
    ) -> Result<ProjectionResult> {
        let pool = self.pool(thread_count)?;
        let vertices = mesh.vertices();
        let uv_missing = mesh.uv_missing();
        let ranges = partition(vertices.len(), thread_count);

        let chunks: Vec<_> = pool.install(|| {
            ranges
                .par_iter()
                .map(|range| project_vertices(&vertices[range.clone()], settings, uv_missing))
                .collect()
        });

        Ok(chunks.into_iter().flatten().collect())
    }
}
