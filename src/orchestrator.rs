//! Request-level driver: cache, GPU path and CPU fallback
//!
//! [`ShadingOrchestrator`] is the single entry point a host calls. It looks
//! the request up in the [`CacheManager`], and on a miss runs the projection
//! on the GPU when asked to and able, otherwise on the CPU worker pool.

use std::sync::Arc;

use crate::cache::{CacheKey, CacheManager, CacheStatus, CachedProjection};
use crate::effects::EffectStack;
use crate::error::{Result, Warning};
use crate::gpu::{GpuAccelerator, GpuBackend, GpuError, GpuProjection, GpuResult, MockGpu};
use crate::mesh::analysis::{optimal_texture_scale, DEFAULT_TEXEL_DENSITY};
use crate::mesh::{sample, MeshSource, MeshView};
use crate::projection::{project, ProjectionResult};
use crate::settings::{EffectSettings, ProjectionSettings, ShadingConfig};
use crate::worker::WorkerPool;

use crate::cache::metrics::ShadingMetricsHandle;

/// Which path produced a projection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ComputePath {
    Gpu,
    /// Worker pool with more than one thread
    CpuParallel,
    /// Calling thread only
    CpuSingle,
}

/// Result of one [`ShadingOrchestrator::apply`] call
#[derive(Debug, Clone)]
pub struct ShadingOutcome {
    pub result: Arc<ProjectionResult>,
    pub path: ComputePath,
    pub cache: CacheStatus,
    /// Non-fatal conditions for the host to display
    pub warnings: Vec<Warning>,
}

impl ShadingOutcome {
    pub fn has_warning(&self, warning: &Warning) -> bool {
        self.warnings.contains(warning)
    }
}

/// Projection plus painterly shading intensity
#[derive(Debug, Clone)]
pub struct ShadedMesh {
    pub outcome: ShadingOutcome,
    /// Per-vertex intensity, parallel to the mesh vertices
    pub intensity: Vec<f32>,
}

/// Drives projection requests through the cache and the GPU or CPU path
///
/// Generic over the GPU backend; shareable across threads.
#[derive(Debug)]
pub struct ShadingOrchestrator<B: GpuBackend = MockGpu> {
    gpu: Option<GpuAccelerator<B>>,
    cache: CacheManager,
    workers: WorkerPool,
    config: ShadingConfig,
}

impl ShadingOrchestrator {
    /// Orchestrator with no GPU backend; every request runs on the CPU
    pub fn without_gpu(config: ShadingConfig) -> Self {
        Self::build(None, config)
    }
}

impl<B: GpuBackend> ShadingOrchestrator<B> {
    /// Creates an orchestrator with the given GPU backend and configuration
    pub fn new(backend: B, config: ShadingConfig) -> Self {
        Self::build(Some(GpuAccelerator::new(backend)), config)
    }

    fn build(gpu: Option<GpuAccelerator<B>>, config: ShadingConfig) -> Self {
        Self {
            gpu,
            cache: CacheManager::new(config.memory_budget),
            workers: WorkerPool::new(),
            config,
        }
    }

    /// Get the GPU accelerator, if one was configured
    pub fn gpu(&self) -> Option<&GpuAccelerator<B>> {
        self.gpu.as_ref()
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    pub fn config(&self) -> &ShadingConfig {
        &self.config
    }

    /// Get a reference to the metrics handle
    pub fn metrics(&self) -> &ShadingMetricsHandle {
        self.cache.metrics()
    }

    /// Project a mesh, serving from the cache when possible
    ///
    /// A GPU failure is not an error: the request is retried once on the
    /// CPU and the outcome carries [`Warning::GpuNotAvailable`].
    pub fn apply(&self, mesh: &MeshView, settings: &ProjectionSettings) -> Result<ShadingOutcome> {
        let mut warnings = Vec::new();
        if mesh.uv_missing() {
            warnings.push(Warning::UvMapMissing);
        }

        let key = CacheKey::new(mesh.id(), settings);
        let lookup = self
            .cache
            .get_or_compute(key, || self.compute(mesh, settings))?;

        // a resident entry reports how it was computed through `path` alone
        if lookup.status != CacheStatus::Hit {
            warnings.extend(lookup.value.warnings.iter().cloned());
        }
        warnings.extend(lookup.warning);

        Ok(ShadingOutcome {
            result: lookup.value.result,
            path: lookup.value.path,
            cache: lookup.status,
            warnings,
        })
    }

    /// Sample a host mesh and project it
    pub fn apply_source(
        &self,
        source: &dyn MeshSource,
        settings: &ProjectionSettings,
    ) -> Result<ShadingOutcome> {
        let (view, sample_warnings) = sample(source)?;
        let mut outcome = self.apply(&view, settings)?;
        for warning in sample_warnings.into_iter().rev() {
            if !outcome.warnings.contains(&warning) {
                outcome.warnings.insert(0, warning);
            }
        }
        Ok(outcome)
    }

    /// Project a mesh and run the painterly passes over it
    pub fn shade(
        &self,
        mesh: &MeshView,
        settings: &ProjectionSettings,
        effects: &EffectSettings,
    ) -> Result<ShadedMesh> {
        let outcome = self.apply(mesh, settings)?;
        let intensity = EffectStack::from_settings(effects).run(mesh, &outcome.result);
        Ok(ShadedMesh { outcome, intensity })
    }

    /// Texture scale suited to the mesh's surface area
    pub fn suggest_scale(&self, mesh: &MeshView) -> f32 {
        optimal_texture_scale(mesh, DEFAULT_TEXEL_DENSITY)
    }

    /// Drop every cached result and the GPU buffers the cache holds
    pub fn teardown(&self) {
        log::debug!(
            "Tearing down: releasing {} cached projections ({} bytes)",
            self.cache.len(),
            self.cache.memory_usage()
        );
        self.cache.clear();
    }

    fn compute(&self, mesh: &MeshView, settings: &ProjectionSettings) -> Result<CachedProjection> {
        if settings.use_gpu() {
            match self.project_gpu(mesh, settings) {
                Ok(projection) => {
                    log::debug!("Projected {} vertices on the GPU", mesh.len());
                    return Ok(CachedProjection::gpu(projection.result, projection.handle));
                }
                Err(e) => {
                    log::warn!("GPU not available: {}", e);
                    self.cache.metrics().record_gpu_fallback();
                    return Ok(self
                        .project_cpu(mesh, settings)?
                        .with_warning(Warning::GpuNotAvailable));
                }
            }
        }

        self.project_cpu(mesh, settings)
    }

    fn project_gpu(
        &self,
        mesh: &MeshView,
        settings: &ProjectionSettings,
    ) -> GpuResult<GpuProjection> {
        match &self.gpu {
            Some(gpu) => gpu.project_gpu(mesh, settings),
            None => Err(GpuError::Unavailable("no GPU backend configured".to_string())),
        }
    }

    fn project_cpu(
        &self,
        mesh: &MeshView,
        settings: &ProjectionSettings,
    ) -> Result<CachedProjection> {
        let threads = settings.thread_count();
        if threads > 1 {
            log::debug!("Projecting {} vertices on {} workers", mesh.len(), threads);
            let result = self.workers.parallel_project(mesh, settings, threads)?;
            Ok(CachedProjection::cpu(result, ComputePath::CpuParallel))
        } else {
            log::debug!("Projecting {} vertices on the calling thread", mesh.len());
            Ok(CachedProjection::cpu(
                project(mesh, settings),
                ComputePath::CpuSingle,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tests::quad;
    use crate::effects::BASE_INTENSITY;
    use crate::mesh::OwnedMesh;
    use crate::projection::GPU_PARITY_TOLERANCE;

    fn settings(use_gpu: bool, threads: usize) -> ProjectionSettings {
        ProjectionSettings::builder()
            .use_gpu(use_gpu)
            .thread_count(threads)
            .build()
            .unwrap()
    }

    #[test]
    fn test_orchestrator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ShadingOrchestrator>();
    }

    #[test]
    fn test_gpu_path_when_available() {
        let orchestrator = ShadingOrchestrator::new(MockGpu::new(), ShadingConfig::default());
        let (view, _) = sample(&quad()).unwrap();

        let outcome = orchestrator.apply(&view, &settings(true, 4)).unwrap();
        assert_eq!(outcome.path, ComputePath::Gpu);
        assert_eq!(outcome.cache, CacheStatus::Miss);
        assert!(outcome.warnings.is_empty());
        assert!(outcome
            .result
            .approx_eq(&project(&view, &settings(true, 4)), GPU_PARITY_TOLERANCE));
    }

    #[test]
    fn test_falls_back_to_cpu_with_warning() {
        let orchestrator =
            ShadingOrchestrator::new(MockGpu::unavailable(), ShadingConfig::default());
        let (view, _) = sample(&quad()).unwrap();

        let outcome = orchestrator.apply(&view, &settings(true, 4)).unwrap();
        assert_eq!(outcome.path, ComputePath::CpuParallel);
        assert_eq!(outcome.warnings, vec![Warning::GpuNotAvailable]);
        assert_eq!(orchestrator.metrics().gpu_fallbacks(), 1);
    }

    #[test]
    fn test_single_thread_runs_inline() {
        let orchestrator = ShadingOrchestrator::without_gpu(ShadingConfig::default());
        let (view, _) = sample(&quad()).unwrap();

        let outcome = orchestrator.apply(&view, &settings(false, 1)).unwrap();
        assert_eq!(outcome.path, ComputePath::CpuSingle);
        assert!(outcome.warnings.is_empty());
        assert_eq!(orchestrator.workers().pool_count(), 0);
    }

    #[test]
    fn test_second_apply_hits_cache() {
        let orchestrator = ShadingOrchestrator::new(MockGpu::new(), ShadingConfig::default());
        let (view, _) = sample(&quad()).unwrap();

        let first = orchestrator.apply(&view, &settings(true, 4)).unwrap();
        let second = orchestrator.apply(&view, &settings(true, 4)).unwrap();
        assert_eq!(second.cache, CacheStatus::Hit);
        assert_eq!(second.path, ComputePath::Gpu);
        assert!(Arc::ptr_eq(&first.result, &second.result));
        assert_eq!(orchestrator.gpu().map(|g| g.backend().dispatch_count()), Some(1));
    }

    #[test]
    fn test_uv_missing_warned_every_apply() {
        let orchestrator = ShadingOrchestrator::without_gpu(ShadingConfig::default());
        let mut mesh = quad();
        mesh.uvs = None;

        for _ in 0..2 {
            let outcome = orchestrator.apply_source(&mesh, &settings(false, 2)).unwrap();
            assert_eq!(outcome.warnings, vec![Warning::UvMapMissing]);
        }
    }

    #[test]
    fn test_uv_missing_at_zero_blend_is_pure_triplanar() {
        let orchestrator = ShadingOrchestrator::without_gpu(ShadingConfig::default());
        let mut mesh = quad();
        mesh.positions[2] = [0.5, 0.5, 0.3];
        mesh.uvs = None;

        let blend = |factor: f32| {
            ProjectionSettings::builder()
                .use_gpu(false)
                .blend_factor(factor)
                .build()
                .unwrap()
        };
        let uv_only = orchestrator.apply_source(&mesh, &blend(0.0)).unwrap();
        let triplanar = orchestrator.apply_source(&mesh, &blend(1.0)).unwrap();

        assert_eq!(uv_only.warnings, vec![Warning::UvMapMissing]);
        assert_eq!(uv_only.cache, CacheStatus::Miss);
        assert_eq!(*uv_only.result, *triplanar.result);
        assert_ne!(uv_only.result[2].uv, [1.0, 1.0]);
    }

    #[test]
    fn test_teardown_releases_gpu_buffers() {
        let orchestrator = ShadingOrchestrator::new(MockGpu::new(), ShadingConfig::default());
        let (view, _) = sample(&quad()).unwrap();

        orchestrator.apply(&view, &settings(true, 4)).unwrap();
        let backend = orchestrator.gpu().map(|g| g.backend().clone()).unwrap();
        assert_eq!(backend.live_buffers(), 2);

        orchestrator.teardown();
        assert_eq!(backend.live_buffers(), 0);
        assert_eq!(orchestrator.cache().memory_usage(), 0);
    }

    #[test]
    fn test_shade_adds_effects() {
        let orchestrator = ShadingOrchestrator::without_gpu(ShadingConfig::default());
        let effects = EffectSettings::default();

        // flat and facing the viewer: nothing to add
        let (flat, _) = sample(&quad()).unwrap();
        let shaded = orchestrator.shade(&flat, &settings(false, 1), &effects).unwrap();
        assert_eq!(shaded.intensity.len(), flat.len());
        assert!(shaded.intensity.iter().all(|i| (*i - BASE_INTENSITY).abs() < 1e-6));

        // a fold with one vertex turned edge-on to the viewer
        let (fold, _) = sample(&OwnedMesh {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            normals: Some(vec![[0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]]),
            uvs: None,
            indices: Some(vec![0, 1, 2]),
        })
        .unwrap();
        let shaded = orchestrator.shade(&fold, &settings(false, 1), &effects).unwrap();
        assert!(shaded.intensity.iter().all(|i| *i > BASE_INTENSITY));
        // full rim light plus the peak edge highlight
        assert!((shaded.intensity[1] - (BASE_INTENSITY + 2.0)).abs() < 1e-5);
    }

    #[test]
    fn test_suggest_scale_in_range() {
        let orchestrator = ShadingOrchestrator::without_gpu(ShadingConfig::default());
        let (view, _) = sample(&quad()).unwrap();
        // unit quad: sqrt(1024 / 1) clamps to 10
        assert_eq!(orchestrator.suggest_scale(&view), 10.0);

        let (points, _) = sample(&OwnedMesh {
            positions: vec![[0.0; 3]],
            ..Default::default()
        })
        .unwrap();
        assert_eq!(orchestrator.suggest_scale(&points), 1.0);
    }
}
