//! GPU acceleration layer
//!
//! This module provides a backend-agnostic trait for the projection compute
//! kernel and the [`GpuAccelerator`] that drives it. Backends only move bytes
//! and run the kernel; packing, unpacking and resource lifetime live here.

pub mod kernel;
pub mod mock;
pub mod resource;
#[cfg(feature = "gpu-wgpu")]
pub mod wgpu_backend;

use std::fmt::Debug;
use std::sync::Arc;

use thiserror::Error;

use crate::mesh::MeshView;
use crate::projection::ProjectionResult;
use crate::settings::ProjectionSettings;
use kernel::{GpuProjected, ProjectionParams};

pub use mock::MockGpu;
pub use resource::GpuResourceHandle;
#[cfg(feature = "gpu-wgpu")]
pub use wgpu_backend::WgpuBackend;

/// Error type for GPU operations
///
/// Every variant means the GPU path cannot produce this result; callers fall
/// back to the CPU.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    #[error("No usable GPU backend: {0}")]
    Unavailable(String),

    #[error("Buffer allocation failed: {0}")]
    AllocationFailed(String),

    #[error("Buffer upload failed: {0}")]
    UploadFailed(String),

    #[error("Kernel dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("Readback failed: {0}")]
    ReadbackFailed(String),

    #[error("Invalid buffer size: {0}")]
    InvalidSize(usize),

    #[error("Device lost")]
    DeviceLost,

    #[error("Out of memory")]
    OutOfMemory,
}

/// Result type for GPU operations
pub type GpuResult<T> = Result<T, GpuError>;

/// Family of compute backend behind a [`GpuBackend`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Apple Metal
    Metal,
    /// NVIDIA OptiX/CUDA
    Optix,
    Vulkan,
    /// wgpu picking whatever native API the platform offers
    WebGpu,
    /// In-memory test backend
    Mock,
}

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Kernel input, written from the host
    Storage,
    /// Kernel output, read back to the host
    Output,
}

/// Compute backend able to run the projection kernel
///
/// Backends own no policy: they report availability, move bytes and run the
/// kernel over buffers laid out as [`kernel::GpuVertex`] in and [`GpuProjected`] out.
pub trait GpuBackend: Send + Sync + Debug + 'static {
    /// Buffer type for this backend
    type Buffer: Send + Sync + Debug + 'static;

    /// Which backend family this is
    fn kind(&self) -> BackendKind;

    /// Check driver/device health right now
    ///
    /// Called on every request; implementations must not cache a positive answer.
    fn probe(&self) -> bool;

    /// Allocate a device buffer of `size` bytes
    fn allocate_buffer(&self, size: usize, usage: BufferUsage) -> GpuResult<Self::Buffer>;

    /// Copy host bytes into a buffer at `offset`
    fn upload(&self, buffer: &Self::Buffer, offset: usize, data: &[u8]) -> GpuResult<()>;

    /// Run the projection kernel over `params.vertex_count` vertices
    fn dispatch_projection(
        &self,
        input: &Self::Buffer,
        output: &Self::Buffer,
        params: &ProjectionParams,
    ) -> GpuResult<()>;

    /// Copy a buffer's full contents back to the host
    fn read_back(&self, buffer: &Self::Buffer) -> GpuResult<Vec<u8>>;

    /// Free a buffer
    fn release_buffer(&self, buffer: Self::Buffer);

    /// Name of this backend (for logging)
    fn backend_name(&self) -> &'static str;
}

/// Output of a GPU projection: the result and the device buffers behind it
#[derive(Debug, Clone)]
pub struct GpuProjection {
    pub result: ProjectionResult,
    pub handle: GpuResourceHandle,
}

/// Buffers that are released together when dropped
#[derive(Debug)]
struct BufferSet<B: GpuBackend> {
    backend: Arc<B>,
    buffers: Vec<B::Buffer>,
    bytes: usize,
}

impl<B: GpuBackend> BufferSet<B> {
    fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            buffers: Vec::new(),
            bytes: 0,
        }
    }

    fn allocate(&mut self, size: usize, usage: BufferUsage) -> GpuResult<usize> {
        let buffer = self.backend.allocate_buffer(size, usage)?;
        self.buffers.push(buffer);
        self.bytes += size;
        Ok(self.buffers.len() - 1)
    }
}

impl<B: GpuBackend> Drop for BufferSet<B> {
    fn drop(&mut self) {
        for buffer in self.buffers.drain(..) {
            self.backend.release_buffer(buffer);
        }
    }
}

/// Runs projections on a GPU backend
#[derive(Debug)]
pub struct GpuAccelerator<B: GpuBackend> {
    backend: Arc<B>,
}

impl<B: GpuBackend> Clone for GpuAccelerator<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: GpuBackend> GpuAccelerator<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Get a reference to the backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Probe the backend; never cached
    pub fn is_available(&self) -> bool {
        self.backend.probe()
    }

    /// Project a mesh on the GPU
    ///
    /// The returned handle owns the device buffers; they are freed when the
    /// last clone of it is dropped. On error every buffer allocated so far is
    /// released before returning.
    pub fn project_gpu(
        &self,
        mesh: &MeshView,
        settings: &ProjectionSettings,
    ) -> GpuResult<GpuProjection> {
        if !self.backend.probe() {
            return Err(GpuError::Unavailable(format!(
                "{} backend did not respond",
                self.backend.backend_name()
            )));
        }

        let vertices = kernel::pack_vertices(mesh);
        let params = ProjectionParams::new(settings, mesh);
        let input_bytes: &[u8] = bytemuck::cast_slice(&vertices);
        let output_size = vertices.len() * std::mem::size_of::<GpuProjected>();

        let mut set = BufferSet::new(Arc::clone(&self.backend));
        let input = set.allocate(input_bytes.len(), BufferUsage::Storage)?;
        let output = set.allocate(output_size, BufferUsage::Output)?;

        self.backend.upload(&set.buffers[input], 0, input_bytes)?;
        self.backend
            .dispatch_projection(&set.buffers[input], &set.buffers[output], &params)?;
        let bytes = self.backend.read_back(&set.buffers[output])?;

        let result = kernel::unpack_projected(&bytes, vertices.len())?;

        log::debug!(
            "{} projected {} vertices ({} device bytes)",
            self.backend.backend_name(),
            result.len(),
            set.bytes
        );

        let handle = GpuResourceHandle::new(set.bytes, self.backend.backend_name(), move || {
            drop(set);
        });

        Ok(GpuProjection { result, handle })
    }
}
