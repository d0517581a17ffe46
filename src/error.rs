//! Error and warning types for arcane_shading

use thiserror::Error;

use crate::gpu::GpuError;
use crate::settings::{MAX_THREADS, MIN_THREADS};

/// Main error type for shading requests
///
/// Every variant except [`ShadingError::GpuUnavailable`] aborts the request.
/// GPU unavailability is recovered by the orchestrator with a single CPU retry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShadingError {
    #[error("Mesh has no position data")]
    MissingData,

    #[error("Invalid mesh data: {0}")]
    InvalidMesh(String),

    #[error("GPU not available: {0}")]
    GpuUnavailable(#[from] GpuError),

    #[error("Thread count invalid: {0} (expected {min}..={max})", min = MIN_THREADS, max = MAX_THREADS)]
    InvalidThreadCount(usize),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Compute aborted: {0}")]
    ComputeAborted(String),
}

impl ShadingError {
    /// Short message suitable for display in the host UI
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::MissingData => "Mesh has no position data",
            Self::InvalidMesh(_) => "Mesh data invalid",
            Self::GpuUnavailable(_) => "GPU not available",
            Self::InvalidThreadCount(_) => "Thread count invalid",
            Self::InvalidSettings(_) => "Settings invalid",
            Self::WorkerPool(_) => "Worker pool failed",
            Self::ComputeAborted(_) => "Computation aborted",
        }
    }

    /// Whether the orchestrator recovers from this error on its own
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::GpuUnavailable(_))
    }
}

/// Non-fatal conditions surfaced to the host alongside a successful result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// The mesh carries no UV layer; output is pure triplanar
    UvMapMissing,
    /// The GPU path was requested but the CPU path produced the result
    GpuNotAvailable,
    /// The result was larger than the whole cache budget and was not cached
    MemoryLimitExceeded { required: usize, budget: usize },
}

impl Warning {
    /// Message shown as-is by the host
    pub fn message(&self) -> &'static str {
        match self {
            Self::UvMapMissing => "UV map missing",
            Self::GpuNotAvailable => "GPU not available",
            Self::MemoryLimitExceeded { .. } => "Memory limit exceeded",
        }
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Result type alias for shading operations
pub type Result<T> = std::result::Result<T, ShadingError>;
