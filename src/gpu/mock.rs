//! Mock GPU implementation for testing
//!
//! Provides a mock GPU that stores buffers in memory and executes the
//! projection kernel on the CPU, without requiring actual GPU hardware.
//! Availability and dispatch failures can be injected at runtime.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::kernel::{self, GpuVertex, ProjectionParams};
use super::{BackendKind, BufferUsage, GpuBackend, GpuError, GpuResult};

/// Counter for generating unique buffer IDs
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug)]
struct MockState {
    available: AtomicBool,
    fail_dispatch: AtomicBool,
    allocated_bytes: AtomicU64,
    live_buffers: AtomicUsize,
    dispatch_count: AtomicUsize,
    probe_count: AtomicUsize,
}

/// Mock GPU device for testing
///
/// Clones share state, so a test can keep one clone to flip failure switches
/// and inspect counters while the accelerator owns another.
#[derive(Clone, Debug)]
pub struct MockGpu {
    state: Arc<MockState>,
}

impl Default for MockGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGpu {
    /// Create a new, available mock GPU device
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                available: AtomicBool::new(true),
                fail_dispatch: AtomicBool::new(false),
                allocated_bytes: AtomicU64::new(0),
                live_buffers: AtomicUsize::new(0),
                dispatch_count: AtomicUsize::new(0),
                probe_count: AtomicUsize::new(0),
            }),
        }
    }

    /// Mock GPU whose probe always fails
    pub fn unavailable() -> Self {
        let gpu = Self::new();
        gpu.set_available(false);
        gpu
    }

    /// Toggle what `probe` reports
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    /// Make every dispatch fail while still probing as available
    pub fn set_fail_dispatch(&self, fail: bool) {
        self.state.fail_dispatch.store(fail, Ordering::SeqCst);
    }

    /// Get total allocated memory (for testing)
    pub fn allocated_bytes(&self) -> u64 {
        self.state.allocated_bytes.load(Ordering::SeqCst)
    }

    /// Buffers allocated and not yet released
    pub fn live_buffers(&self) -> usize {
        self.state.live_buffers.load(Ordering::SeqCst)
    }

    /// Kernel dispatches attempted, including failed ones
    pub fn dispatch_count(&self) -> usize {
        self.state.dispatch_count.load(Ordering::SeqCst)
    }

    /// Times `probe` has been called
    pub fn probe_count(&self) -> usize {
        self.state.probe_count.load(Ordering::SeqCst)
    }
}

/// Mock buffer that stores data in memory
#[derive(Clone, Debug)]
pub struct MockBuffer {
    /// Unique identifier
    pub id: u64,
    /// Buffer data
    pub data: Arc<parking_lot::RwLock<Vec<u8>>>,
    /// Buffer usage
    pub usage: BufferUsage,
}

impl MockBuffer {
    /// Create a new zero-filled mock buffer
    pub fn new(size: usize, usage: BufferUsage) -> Self {
        Self {
            id: next_id(),
            data: Arc::new(parking_lot::RwLock::new(vec![0u8; size])),
            usage,
        }
    }

    /// Get the size of the buffer
    pub fn size(&self) -> usize {
        self.data.read().len()
    }

    /// Read buffer data
    pub fn read_data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl GpuBackend for MockGpu {
    type Buffer = MockBuffer;

    fn kind(&self) -> BackendKind {
        BackendKind::Mock
    }

    fn probe(&self) -> bool {
        self.state.probe_count.fetch_add(1, Ordering::SeqCst);
        self.state.available.load(Ordering::SeqCst)
    }

    fn allocate_buffer(&self, size: usize, usage: BufferUsage) -> GpuResult<Self::Buffer> {
        if size == 0 {
            return Err(GpuError::InvalidSize(size));
        }

        self.state
            .allocated_bytes
            .fetch_add(size as u64, Ordering::SeqCst);
        self.state.live_buffers.fetch_add(1, Ordering::SeqCst);
        Ok(MockBuffer::new(size, usage))
    }

    fn upload(&self, buffer: &Self::Buffer, offset: usize, data: &[u8]) -> GpuResult<()> {
        let mut buf_data = buffer.data.write();

        if offset + data.len() > buf_data.len() {
            return Err(GpuError::UploadFailed(format!(
                "Data exceeds buffer size: offset={}, data_len={}, buffer_size={}",
                offset,
                data.len(),
                buf_data.len()
            )));
        }

        buf_data[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn dispatch_projection(
        &self,
        input: &Self::Buffer,
        output: &Self::Buffer,
        params: &ProjectionParams,
    ) -> GpuResult<()> {
        self.state.dispatch_count.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_dispatch.load(Ordering::SeqCst) {
            return Err(GpuError::DispatchFailed("injected mock failure".to_string()));
        }
        if !self.state.available.load(Ordering::SeqCst) {
            return Err(GpuError::DeviceLost);
        }

        let vertices: Vec<GpuVertex> = input
            .data
            .read()
            .chunks_exact(std::mem::size_of::<GpuVertex>())
            .map(bytemuck::pod_read_unaligned)
            .collect();
        if vertices.len() < params.vertex_count as usize {
            return Err(GpuError::DispatchFailed(format!(
                "input holds {} vertices, kernel expects {}",
                vertices.len(),
                params.vertex_count
            )));
        }

        let projected = kernel::run_projection(&vertices, params);
        self.upload(output, 0, bytemuck::cast_slice(&projected))
    }

    fn read_back(&self, buffer: &Self::Buffer) -> GpuResult<Vec<u8>> {
        Ok(buffer.read_data())
    }

    fn release_buffer(&self, buffer: Self::Buffer) {
        let size = buffer.size() as u64;
        self.state.allocated_bytes.fetch_sub(size, Ordering::SeqCst);
        self.state.live_buffers.fetch_sub(1, Ordering::SeqCst);
    }

    fn backend_name(&self) -> &'static str {
        "Mock"
    }
}
