//! Triplanar projection blended with authored UVs
//!
//! For every vertex the absolute normal components select how much each of
//! the three axis-aligned planar projections contributes. The resulting
//! triplanar coordinate is then mixed with the mesh's own UV by the blend
//! factor.

use std::ops::Index;

use glam::{Vec2, Vec3};

use crate::mesh::{MeshView, SampledVertex};
use crate::settings::ProjectionSettings;

/// Guards the weight normalization against zero-length normals
pub const WEIGHT_EPSILON: f32 = 1e-6;

/// Largest per-component difference accepted between CPU and GPU output
pub const GPU_PARITY_TOLERANCE: f32 = 1e-4;

/// Projection output for one vertex
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProjectedVertex {
    /// Final blended texture coordinate
    pub uv: [f32; 2],
    /// Triplanar weights for the X, Y and Z planes; they sum to 1
    pub weights: [f32; 3],
}

/// Per-vertex projection output, parallel to the input [`MeshView`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProjectionResult {
    vertices: Vec<ProjectedVertex>,
}

impl ProjectionResult {
    pub fn new(vertices: Vec<ProjectedVertex>) -> Self {
        Self { vertices }
    }

    pub fn vertices(&self) -> &[ProjectedVertex] {
        &self.vertices
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProjectedVertex> {
        self.vertices.iter()
    }

    /// Host-side footprint in bytes
    pub fn size_in_bytes(&self) -> usize {
        std::mem::size_of::<Self>() + self.vertices.len() * std::mem::size_of::<ProjectedVertex>()
    }

    /// Element-wise comparison within `tolerance`
    pub fn approx_eq(&self, other: &Self, tolerance: f32) -> bool {
        self.len() == other.len()
            && self.iter().zip(other.iter()).all(|(a, b)| {
                a.uv.iter()
                    .chain(&a.weights)
                    .zip(b.uv.iter().chain(&b.weights))
                    .all(|(x, y)| (x - y).abs() <= tolerance)
            })
    }
}

impl Index<usize> for ProjectionResult {
    type Output = ProjectedVertex;

    fn index(&self, index: usize) -> &Self::Output {
        &self.vertices[index]
    }
}

impl FromIterator<ProjectedVertex> for ProjectionResult {
    fn from_iter<I: IntoIterator<Item = ProjectedVertex>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ProjectionResult {
    type Item = &'a ProjectedVertex;
    type IntoIter = std::slice::Iter<'a, ProjectedVertex>;

    fn into_iter(self) -> Self::IntoIter {
        self.vertices.iter()
    }
}

/// Normalized triplanar weights from a surface normal
///
/// A zero-length normal has no preferred axis and gets equal weights.
/// Components are scaled by the largest one before summing so huge normals
/// cannot overflow the sum.
pub fn triplanar_weights(normal: Vec3) -> Vec3 {
    let n = normal.abs();
    if n.x + n.y + n.z <= WEIGHT_EPSILON {
        return Vec3::splat(1.0 / 3.0);
    }
    let m = n / n.max_element();
    m / (m.x + m.y + m.z)
}

/// Weighted sum of the three planar projections
///
/// X plane samples (y, z), Y plane (x, z), Z plane (x, y), each divided by `scale`.
pub fn triplanar_uv(position: Vec3, weights: Vec3, scale: f32) -> Vec2 {
    let p = position / scale;
    let uv_x = Vec2::new(p.y, p.z);
    let uv_y = Vec2::new(p.x, p.z);
    let uv_z = Vec2::new(p.x, p.y);
    uv_x * weights.x + uv_y * weights.y + uv_z * weights.z
}

/// Mix the authored UV with the triplanar coordinate
///
/// The end points are returned exactly rather than through the lerp.
pub fn blend_uv(uv: Vec2, triplanar: Vec2, blend_factor: f32, uv_missing: bool) -> Vec2 {
    if uv_missing || blend_factor >= 1.0 {
        triplanar
    } else if blend_factor <= 0.0 {
        uv
    } else {
        uv * (1.0 - blend_factor) + triplanar * blend_factor
    }
}

/// Project a single vertex
#[inline]
pub fn project_vertex(
    vertex: &SampledVertex,
    settings: &ProjectionSettings,
    uv_missing: bool,
) -> ProjectedVertex {
    let weights = triplanar_weights(Vec3::from(vertex.normal));
    let triplanar = triplanar_uv(Vec3::from(vertex.position), weights, settings.scale());
    let uv = blend_uv(
        Vec2::from(vertex.uv),
        triplanar,
        settings.blend_factor(),
        uv_missing,
    );

    ProjectedVertex {
        uv: uv.to_array(),
        weights: weights.to_array(),
    }
}

/// Project a contiguous slice of vertices
///
/// This is the unit of work handed to each worker thread.
pub fn project_vertices(
    vertices: &[SampledVertex],
    settings: &ProjectionSettings,
    uv_missing: bool,
) -> Vec<ProjectedVertex> {
    vertices
        .iter()
        .map(|vertex| project_vertex(vertex, settings, uv_missing))
        .collect()
}

/// Project a whole mesh on the calling thread
pub fn project(mesh: &MeshView, settings: &ProjectionSettings) -> ProjectionResult {
    ProjectionResult::new(project_vertices(
        mesh.vertices(),
        settings,
        mesh.uv_missing(),
    ))
}
