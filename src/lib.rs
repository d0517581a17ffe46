//! arcane_shading - Triplanar/UV blended texture projection
//!
//! # Features
//! - Triplanar projection blended with authored UVs, per vertex
//! - GPU compute path behind a backend trait (wgpu, mock)
//! - Multi-threaded CPU fallback with identical output
//! - Bounded LRU result cache with refcounted GPU resources
//! - Painterly rim light and edge highlight passes
//!
//! # Quick Start
//!
//! ```ignore
//! use arcane_shading::{MockGpu, OwnedMesh, ProjectionSettings, ShadingConfig, ShadingOrchestrator};
//!
//! let orchestrator = ShadingOrchestrator::new(MockGpu::new(), ShadingConfig::default());
//! let settings = ProjectionSettings::builder().blend_factor(0.7).build()?;
//! let outcome = orchestrator.apply_source(&mesh, &settings)?;
//! for warning in &outcome.warnings {
//!     println!("{}", warning);
//! }
//! ```
//!
//! # Feature Flags
//!
//! - `gpu-wgpu`: Enable the wgpu compute backend
//! - `serde`: Serialize/Deserialize for settings and config

// Core modules
pub mod cache;
pub mod gpu;
pub mod mesh;
pub mod orchestrator;
pub mod projection;
pub mod worker;

// Support modules
pub mod effects;
pub mod settings;

// Error types
mod error;
pub use error::{Result, ShadingError, Warning};

// Re-export main types from cache
pub use cache::metrics::{ShadingMetrics, ShadingMetricsHandle};
pub use cache::{CacheKey, CacheLookup, CacheManager, CacheStatus, CachedProjection};

// Re-export GPU types
pub use gpu::mock::MockGpu;
#[cfg(feature = "gpu-wgpu")]
pub use gpu::wgpu_backend::WgpuBackend;
pub use gpu::{
    BackendKind, BufferUsage, GpuAccelerator, GpuBackend, GpuError, GpuProjection,
    GpuResourceHandle, GpuResult,
};

// Re-export mesh and projection types
pub use mesh::{sample, MeshId, MeshSource, MeshView, OwnedMesh, SampledVertex};
pub use projection::{project, ProjectedVertex, ProjectionResult, GPU_PARITY_TOLERANCE};

// Re-export orchestration types
pub use orchestrator::{ComputePath, ShadedMesh, ShadingOrchestrator, ShadingOutcome};
pub use settings::{EffectSettings, ProjectionSettings, ShadingConfig};
pub use worker::WorkerPool;

// Re-export effect types
pub use effects::{EdgeHighlightPass, EffectStack, RimLightPass, ShaderPass};

// Version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
