//! Geometry sampling from host meshes
//!
//! A [`MeshView`] is an immutable snapshot of the vertex data needed for one
//! shading request. It is built once by [`sample`] from a host-provided
//! [`MeshSource`] and never mutated afterwards.

pub mod analysis;

use std::hash::Hasher;

use glam::Vec3;
use xxhash_rust::xxh3::Xxh3;

use crate::error::{Result, ShadingError, Warning};

/// Host mesh accessor
///
/// Implemented by the host application for whatever object model it uses.
/// Attribute arrays, when present, must be parallel to `positions`.
pub trait MeshSource {
    /// Vertex positions; `None` or empty when the mesh has no geometry
    fn positions(&self) -> Option<&[[f32; 3]]>;

    /// Vertex normals
    fn normals(&self) -> Option<&[[f32; 3]]> {
        None
    }

    /// Active UV layer
    fn uvs(&self) -> Option<&[[f32; 2]]> {
        None
    }

    /// Triangle list indices
    fn indices(&self) -> Option<&[u32]> {
        None
    }
}

/// Stable identity of a mesh snapshot, derived from its data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u64);

/// One sampled vertex
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SampledVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    /// Authored UV; zero when the mesh has no UV layer
    pub uv: [f32; 2],
}

/// Read-only mesh snapshot for a single request
#[derive(Debug, Clone, PartialEq)]
pub struct MeshView {
    id: MeshId,
    vertices: Vec<SampledVertex>,
    indices: Vec<u32>,
    uv_missing: bool,
}

impl MeshView {
    /// Build a view from flat attribute arrays
    ///
    /// Same rules as [`sample`]: positions are required, normals are
    /// generated when absent, and a missing UV layer sets `uv_missing`.
    pub fn from_parts(
        positions: &[[f32; 3]],
        normals: Option<&[[f32; 3]]>,
        uvs: Option<&[[f32; 2]]>,
        indices: Option<&[u32]>,
    ) -> Result<Self> {
        if positions.is_empty() {
            return Err(ShadingError::MissingData);
        }

        let vertex_count = positions.len();
        if let Some(normals) = normals {
            check_len("normals", normals.len(), vertex_count)?;
        }
        if let Some(uvs) = uvs {
            check_len("uvs", uvs.len(), vertex_count)?;
        }
        let indices = indices.map(<[u32]>::to_vec).unwrap_or_default();

        let normals = match normals {
            Some(normals) => normals.to_vec(),
            None => {
                log::debug!("No normals found, generating from {} indices", indices.len());
                generate_normals(positions, &indices)
            }
        };

        let uv_missing = uvs.is_none();
        let vertices = positions
            .iter()
            .zip(&normals)
            .enumerate()
            .map(|(i, (&position, &normal))| SampledVertex {
                position,
                normal,
                uv: uvs.map(|uvs| uvs[i]).unwrap_or_default(),
            })
            .collect::<Vec<_>>();

        let id = hash_mesh(&vertices, &indices, uv_missing);

        Ok(Self {
            id,
            vertices,
            indices,
            uv_missing,
        })
    }

    pub fn id(&self) -> MeshId {
        self.id
    }

    pub fn vertices(&self) -> &[SampledVertex] {
        &self.vertices
    }

    /// Triangle list indices; empty when the host supplied no topology
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn uv_missing(&self) -> bool {
        self.uv_missing
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Iterate over valid triangles as vertex index triples
    pub fn triangles(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        let count = self.vertices.len();
        self.indices.chunks_exact(3).filter_map(move |tri| {
            let tri = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            tri.iter().all(|&i| i < count).then_some(tri)
        })
    }
}

/// Sample a host mesh into a [`MeshView`]
///
/// Returns the non-fatal warnings raised while sampling alongside the view.
pub fn sample(source: &dyn MeshSource) -> Result<(MeshView, Vec<Warning>)> {
    let positions = source.positions().ok_or(ShadingError::MissingData)?;
    let view = MeshView::from_parts(positions, source.normals(), source.uvs(), source.indices())?;

    let mut warnings = Vec::new();
    if view.uv_missing() {
        log::warn!("Mesh {:016x} has no UV layer, using triplanar only", view.id().0);
        warnings.push(Warning::UvMapMissing);
    }

    log::debug!(
        "Sampled mesh {:016x}: {} vertices, {} indices",
        view.id().0,
        view.len(),
        view.indices().len()
    );

    Ok((view, warnings))
}

fn check_len(attribute: &str, len: usize, expected: usize) -> Result<()> {
    if len != expected {
        return Err(ShadingError::InvalidMesh(format!(
            "{attribute} has {len} entries but the mesh has {expected} vertices"
        )));
    }
    Ok(())
}

/// Area-weighted smooth normals from a triangle list
///
/// Vertices not referenced by any valid triangle keep a zero normal.
fn generate_normals(positions: &[[f32; 3]], indices: &[u32]) -> Vec<[f32; 3]> {
    let mut accum = vec![Vec3::ZERO; positions.len()];

    for chunk in indices.chunks_exact(3) {
        let i0 = chunk[0] as usize;
        let i1 = chunk[1] as usize;
        let i2 = chunk[2] as usize;

        if i0 >= positions.len() || i1 >= positions.len() || i2 >= positions.len() {
            log::warn!("Invalid vertex index in triangle {chunk:?}");
            continue;
        }

        let v0 = Vec3::from(positions[i0]);
        let v1 = Vec3::from(positions[i1]);
        let v2 = Vec3::from(positions[i2]);

        // Unnormalized cross product weights by triangle area
        let face_normal = (v1 - v0).cross(v2 - v0);
        accum[i0] += face_normal;
        accum[i1] += face_normal;
        accum[i2] += face_normal;
    }

    accum
        .into_iter()
        .map(|n| n.normalize_or_zero().to_array())
        .collect()
}

fn hash_mesh(vertices: &[SampledVertex], indices: &[u32], uv_missing: bool) -> MeshId {
    let mut hasher = Xxh3::new();
    hasher.write_usize(vertices.len());
    for vertex in vertices {
        for value in vertex
            .position
            .iter()
            .chain(&vertex.normal)
            .chain(&vertex.uv)
        {
            hasher.write_u32(value.to_bits());
        }
    }
    hasher.write(bytemuck::cast_slice(indices));
    hasher.write_u8(uv_missing as u8);
    MeshId(hasher.finish())
}

/// Plain in-memory mesh, handy for hosts that already hold flat arrays
#[derive(Debug, Clone, Default)]
pub struct OwnedMesh {
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub uvs: Option<Vec<[f32; 2]>>,
    pub indices: Option<Vec<u32>>,
}

impl MeshSource for OwnedMesh {
    fn positions(&self) -> Option<&[[f32; 3]]> {
        Some(&self.positions)
    }

    fn normals(&self) -> Option<&[[f32; 3]]> {
        self.normals.as_deref()
    }

    fn uvs(&self) -> Option<&[[f32; 2]]> {
        self.uvs.as_deref()
    }

    fn indices(&self) -> Option<&[u32]> {
        self.indices.as_deref()
    }
}
