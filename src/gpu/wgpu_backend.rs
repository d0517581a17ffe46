//! wgpu compute backend
//!
//! Runs [`PROJECTION_WGSL`] on whatever native API wgpu selects (Vulkan,
//! Metal, DX12). Initialization blocks on the async wgpu calls with pollster.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use wgpu::util::DeviceExt;

use super::kernel::{ProjectionParams, PROJECTION_WGSL};
use super::{BackendKind, BufferUsage, GpuBackend, GpuError, GpuResult};

/// Device buffer owned by [`WgpuBackend`]
#[derive(Debug)]
pub struct WgpuBuffer {
    buffer: wgpu::Buffer,
    size: usize,
    usage: BufferUsage,
}

impl WgpuBuffer {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

/// Compute backend on a wgpu device
#[derive(Debug)]
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    lost: Arc<AtomicBool>,
    adapter_name: String,
}

/// Reject a buffer the device could not create or bind as storage
fn check_buffer_size(size: usize, limits: &wgpu::Limits) -> GpuResult<()> {
    let max = limits
        .max_buffer_size
        .min(limits.max_storage_buffer_binding_size as u64);
    if size == 0 || size as u64 > max {
        return Err(GpuError::InvalidSize(size));
    }
    Ok(())
}

/// Reject a dispatch wider than the device allows in one dimension
fn check_workgroups(count: u32, limits: &wgpu::Limits) -> GpuResult<()> {
    if count > limits.max_compute_workgroups_per_dimension {
        return Err(GpuError::DispatchFailed(format!(
            "{} workgroups exceeds device limit of {}",
            count, limits.max_compute_workgroups_per_dimension
        )));
    }
    Ok(())
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl WgpuBackend {
    /// Request an adapter and device and build the projection pipeline
    pub fn new() -> GpuResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| GpuError::Unavailable("no compatible adapter".to_string()))?;
        let adapter_name = adapter.get_info().name;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("arcane-shading device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| GpuError::Unavailable(e.to_string()))?;

        let lost = Arc::new(AtomicBool::new(false));
        let lost_flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            log::warn!("GPU device lost ({:?}): {}", reason, message);
            lost_flag.store(true, Ordering::SeqCst);
        });

        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("projection kernel"),
            source: wgpu::ShaderSource::Wgsl(PROJECTION_WGSL.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("projection bind group layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("projection pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("projection pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader_module,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        log::info!("wgpu backend ready on {}", adapter_name);

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            lost,
            adapter_name,
        })
    }

    /// Name reported by the adapter
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn check_device(&self) -> GpuResult<()> {
        if self.lost.load(Ordering::SeqCst) {
            Err(GpuError::DeviceLost)
        } else {
            Ok(())
        }
    }
}

impl GpuBackend for WgpuBackend {
    type Buffer = WgpuBuffer;

    fn kind(&self) -> BackendKind {
        BackendKind::WebGpu
    }

    fn probe(&self) -> bool {
        !self.lost.load(Ordering::SeqCst)
    }

    fn allocate_buffer(&self, size: usize, usage: BufferUsage) -> GpuResult<Self::Buffer> {
        check_buffer_size(size, &self.device.limits())?;
        self.check_device()?;

        let wgpu_usage = match usage {
            BufferUsage::Storage => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            BufferUsage::Output => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("projection buffer"),
            size: size as u64,
            usage: wgpu_usage,
            mapped_at_creation: false,
        });
        let oom = pollster::block_on(self.device.pop_error_scope());
        let invalid = pollster::block_on(self.device.pop_error_scope());
        if let Some(error) = oom {
            log::warn!("Buffer allocation of {} bytes failed: {}", size, error);
            return Err(GpuError::OutOfMemory);
        }
        if let Some(error) = invalid {
            return Err(GpuError::AllocationFailed(error.to_string()));
        }

        Ok(WgpuBuffer {
            buffer,
            size,
            usage,
        })
    }

    fn upload(&self, buffer: &Self::Buffer, offset: usize, data: &[u8]) -> GpuResult<()> {
        if offset + data.len() > buffer.size {
            return Err(GpuError::UploadFailed(format!(
                "Data exceeds buffer size: offset={}, data_len={}, buffer_size={}",
                offset,
                data.len(),
                buffer.size
            )));
        }
        self.check_device()?;

        self.queue.write_buffer(&buffer.buffer, offset as u64, data);
        Ok(())
    }

    fn dispatch_projection(
        &self,
        input: &Self::Buffer,
        output: &Self::Buffer,
        params: &ProjectionParams,
    ) -> GpuResult<()> {
        self.check_device()?;
        check_workgroups(params.workgroup_count(), &self.device.limits())?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let params_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("projection params"),
                contents: bytemuck::bytes_of(params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("projection bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: input.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: output.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("projection encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("projection pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(params.workgroup_count(), 1, 1);
        }

        self.queue.submit(std::iter::once(encoder.finish()));

        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(GpuError::DispatchFailed(error.to_string())),
            None => Ok(()),
        }
    }

    fn read_back(&self, buffer: &Self::Buffer) -> GpuResult<Vec<u8>> {
        self.check_device()?;

        let size = buffer.size as u64;
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("projection staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("projection readback"),
            });
        encoder.copy_buffer_to_buffer(&buffer.buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError::ReadbackFailed(error.to_string()));
        }

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|e| GpuError::ReadbackFailed(e.to_string()))?
            .map_err(|e| GpuError::ReadbackFailed(format!("{:?}", e)))?;

        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        self.check_device()?;

        Ok(bytes)
    }

    fn release_buffer(&self, buffer: Self::Buffer) {
        buffer.buffer.destroy();
    }

    fn backend_name(&self) -> &'static str {
        "wgpu"
    }
}
