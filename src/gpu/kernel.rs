//! Projection compute kernel and its buffer layouts
//!
//! The WGSL source is what hardware backends compile. [`run_projection`] is
//! the same kernel written out in scalar Rust; the mock backend executes it
//! over raw buffer bytes so GPU-path tests exercise the packed layouts.

use bytemuck::{Pod, Zeroable};

use super::{GpuError, GpuResult};
use crate::mesh::MeshView;
use crate::projection::{ProjectedVertex, ProjectionResult, WEIGHT_EPSILON};
use crate::settings::ProjectionSettings;

/// Threads per workgroup; must match `@workgroup_size` in [`PROJECTION_WGSL`]
pub const WORKGROUP_SIZE: u32 = 256;

/// Projection compute shader
pub const PROJECTION_WGSL: &str = r#"
struct Vertex {
    position: vec4<f32>,
    normal: vec4<f32>,
    uv: vec4<f32>,
};

struct Projected {
    uv: vec4<f32>,
    weights: vec4<f32>,
};

struct Params {
    scale: f32,
    blend_factor: f32,
    uv_missing: u32,
    vertex_count: u32,
};

@group(0) @binding(0) var<storage, read> vertices: array<Vertex>;
@group(0) @binding(1) var<storage, read_write> projected: array<Projected>;
@group(0) @binding(2) var<uniform> params: Params;

const WEIGHT_EPSILON: f32 = 1e-6;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if (i >= params.vertex_count) {
        return;
    }

    let v = vertices[i];
    let n = abs(v.normal.xyz);
    var w = vec3<f32>(1.0 / 3.0);
    if (n.x + n.y + n.z > WEIGHT_EPSILON) {
        let m = n / max(max(n.x, n.y), n.z);
        w = m / (m.x + m.y + m.z);
    }

    let p = v.position.xyz / params.scale;
    let tri = vec2<f32>(p.y, p.z) * w.x + vec2<f32>(p.x, p.z) * w.y + vec2<f32>(p.x, p.y) * w.z;

    var uv = tri;
    if (params.uv_missing == 0u) {
        if (params.blend_factor <= 0.0) {
            uv = v.uv.xy;
        } else if (params.blend_factor < 1.0) {
            uv = v.uv.xy * (1.0 - params.blend_factor) + tri * params.blend_factor;
        }
    }

    projected[i] = Projected(vec4<f32>(uv, 0.0, 0.0), vec4<f32>(w, 0.0));
}
"#;

/// Packed input vertex (48 bytes, 16-byte aligned members)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuVertex {
    pub position: [f32; 4],
    pub normal: [f32; 4],
    pub uv: [f32; 4],
}

/// Packed output vertex (32 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuProjected {
    /// `xy` holds the blended UV
    pub uv: [f32; 4],
    /// `xyz` holds the plane weights
    pub weights: [f32; 4],
}

/// Kernel uniforms (16 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ProjectionParams {
    pub scale: f32,
    pub blend_factor: f32,
    pub uv_missing: u32,
    pub vertex_count: u32,
}

impl ProjectionParams {
    pub fn new(settings: &ProjectionSettings, mesh: &MeshView) -> Self {
        Self {
            scale: settings.scale(),
            blend_factor: settings.blend_factor(),
            uv_missing: mesh.uv_missing() as u32,
            vertex_count: mesh.len() as u32,
        }
    }

    /// Workgroups needed to cover every vertex
    pub fn workgroup_count(&self) -> u32 {
        self.vertex_count.div_ceil(WORKGROUP_SIZE)
    }
}

/// Pack mesh vertices into the kernel input layout
pub fn pack_vertices(mesh: &MeshView) -> Vec<GpuVertex> {
    mesh.vertices()
        .iter()
        .map(|v| GpuVertex {
            position: [v.position[0], v.position[1], v.position[2], 1.0],
            normal: [v.normal[0], v.normal[1], v.normal[2], 0.0],
            uv: [v.uv[0], v.uv[1], 0.0, 0.0],
        })
        .collect()
}

/// Decode kernel output bytes
///
/// Fails if the buffer does not hold exactly `vertex_count` records.
pub fn unpack_projected(bytes: &[u8], vertex_count: usize) -> GpuResult<ProjectionResult> {
    let stride = std::mem::size_of::<GpuProjected>();
    if bytes.len() != vertex_count * stride {
        return Err(GpuError::ReadbackFailed(format!(
            "expected {} bytes for {vertex_count} vertices, got {}",
            vertex_count * stride,
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(stride)
        .map(|chunk| {
            let p: GpuProjected = bytemuck::pod_read_unaligned(chunk);
            ProjectedVertex {
                uv: [p.uv[0], p.uv[1]],
                weights: [p.weights[0], p.weights[1], p.weights[2]],
            }
        })
        .collect())
}

/// Scalar rendition of [`PROJECTION_WGSL`] for one invocation
pub fn run_invocation(v: &GpuVertex, params: &ProjectionParams) -> GpuProjected {
    let n = [v.normal[0].abs(), v.normal[1].abs(), v.normal[2].abs()];
    let w = if n[0] + n[1] + n[2] > WEIGHT_EPSILON {
        let peak = n[0].max(n[1]).max(n[2]);
        let m = [n[0] / peak, n[1] / peak, n[2] / peak];
        let sum = m[0] + m[1] + m[2];
        [m[0] / sum, m[1] / sum, m[2] / sum]
    } else {
        [1.0 / 3.0; 3]
    };

    let p = [
        v.position[0] / params.scale,
        v.position[1] / params.scale,
        v.position[2] / params.scale,
    ];
    let tri = [
        p[1] * w[0] + p[0] * w[1] + p[0] * w[2],
        p[2] * w[0] + p[2] * w[1] + p[1] * w[2],
    ];

    let b = params.blend_factor;
    let uv = if params.uv_missing != 0 || b >= 1.0 {
        tri
    } else if b <= 0.0 {
        [v.uv[0], v.uv[1]]
    } else {
        [
            v.uv[0] * (1.0 - b) + tri[0] * b,
            v.uv[1] * (1.0 - b) + tri[1] * b,
        ]
    };

    GpuProjected {
        uv: [uv[0], uv[1], 0.0, 0.0],
        weights: [w[0], w[1], w[2], 0.0],
    }
}

/// Run the kernel over a whole input buffer
pub fn run_projection(vertices: &[GpuVertex], params: &ProjectionParams) -> Vec<GpuProjected> {
    vertices
        .iter()
        .take(params.vertex_count as usize)
        .map(|v| run_invocation(v, params))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(std::mem::size_of::<GpuVertex>(), 48);
        assert_eq!(std::mem::size_of::<GpuProjected>(), 32);
        assert_eq!(std::mem::size_of::<ProjectionParams>(), 16);
    }

    #[test]
    fn test_workgroup_count() {
        let mut params = ProjectionParams {
            scale: 1.0,
            blend_factor: 0.5,
            uv_missing: 0,
            vertex_count: 256,
        };
        assert_eq!(params.workgroup_count(), 1);
        params.vertex_count = 257;
        assert_eq!(params.workgroup_count(), 2);
    }

    #[test]
    fn test_unpack_rejects_short_buffer() {
        let bytes = vec![0u8; 40];
        assert!(matches!(
            unpack_projected(&bytes, 2),
            Err(GpuError::ReadbackFailed(_))
        ));
    }

    #[test]
    fn test_invocation_on_huge_normal() {
        let v = GpuVertex {
            position: [1.0, 1.0, 1.0, 1.0],
            normal: [f32::MAX, -f32::MAX, f32::MAX, 0.0],
            uv: [0.0; 4],
        };
        let params = ProjectionParams {
            scale: 1.0,
            blend_factor: 1.0,
            uv_missing: 0,
            vertex_count: 1,
        };
        let w = run_invocation(&v, &params).weights;
        assert!(w.iter().all(|c| c.is_finite()));
        assert!((w[0] + w[1] + w[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_invocation_on_z_facing_vertex() {
        let v = GpuVertex {
            position: [2.0, 4.0, 6.0, 1.0],
            normal: [0.0, 0.0, -1.0, 0.0],
            uv: [0.25, 0.75, 0.0, 0.0],
        };
        let params = ProjectionParams {
            scale: 2.0,
            blend_factor: 1.0,
            uv_missing: 0,
            vertex_count: 1,
        };
        let out = run_invocation(&v, &params);
        assert_eq!(out.weights, [0.0, 0.0, 1.0, 0.0]);
        assert_eq!([out.uv[0], out.uv[1]], [1.0, 2.0]);
    }
}
