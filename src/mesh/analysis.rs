//! Mesh measurements used for scale suggestions, edge highlighting and seam
//! detection

use std::collections::{HashMap, HashSet};

use glam::Vec3;

use super::MeshView;

/// Texel density used by [`optimal_texture_scale`] when the host has no preference
pub const DEFAULT_TEXEL_DENSITY: f32 = 1024.0;
/// Clamp range for suggested texture scales
pub const SCALE_RANGE: (f32, f32) = (0.1, 10.0);
/// UV distance above which two coincident vertices form a seam
pub const UV_SEAM_EPSILON: f32 = 1e-4;

/// Total area of all valid triangles
///
/// Returns 0.0 for meshes without topology.
pub fn surface_area(mesh: &MeshView) -> f32 {
    let vertices = mesh.vertices();
    mesh.triangles()
        .map(|[a, b, c]| {
            let v0 = Vec3::from(vertices[a].position);
            let v1 = Vec3::from(vertices[b].position);
            let v2 = Vec3::from(vertices[c].position);
            (v1 - v0).cross(v2 - v0).length() * 0.5
        })
        .sum()
}

/// Texture scale that hits `target_texel_density` over the mesh surface
///
/// Falls back to 1.0 for meshes with no measurable area.
pub fn optimal_texture_scale(mesh: &MeshView, target_texel_density: f32) -> f32 {
    let area = surface_area(mesh);
    if area <= 0.0 {
        return 1.0;
    }

    (target_texel_density / area)
        .sqrt()
        .clamp(SCALE_RANGE.0, SCALE_RANGE.1)
}

/// Per-vertex curvature estimate
///
/// Mean length of the normal difference to each edge neighbour. Vertices
/// without neighbours get 0.0.
pub fn vertex_curvature(mesh: &MeshView) -> Vec<f32> {
    let vertices = mesh.vertices();
    let mut edges: HashSet<(usize, usize)> = HashSet::new();
    for [a, b, c] in mesh.triangles() {
        for (u, v) in [(a, b), (b, c), (c, a)] {
            if u != v {
                edges.insert((u.min(v), u.max(v)));
            }
        }
    }

    let mut sums = vec![0.0f32; vertices.len()];
    let mut counts = vec![0u32; vertices.len()];
    for &(u, v) in &edges {
        let diff = (Vec3::from(vertices[u].normal) - Vec3::from(vertices[v].normal)).length();
        sums[u] += diff;
        sums[v] += diff;
        counts[u] += 1;
        counts[v] += 1;
    }

    sums.into_iter()
        .zip(counts)
        .map(|(sum, count)| if count == 0 { 0.0 } else { sum / count as f32 })
        .collect()
}

/// Vertex pairs split along a UV seam
///
/// Vertices carry one UV each, so a seam shows up as vertices at the same
/// position whose UVs differ by more than [`UV_SEAM_EPSILON`]. Pairs are
/// `[lower, higher]` and sorted. Empty when the mesh has no UV layer.
pub fn uv_seams(mesh: &MeshView) -> Vec<[usize; 2]> {
    if mesh.uv_missing() {
        return Vec::new();
    }

    let vertices = mesh.vertices();
    let mut by_position: HashMap<[u32; 3], Vec<usize>> = HashMap::new();
    for (i, v) in vertices.iter().enumerate() {
        // + 0.0 folds -0.0 into 0.0
        let key = v.position.map(|c| (c + 0.0).to_bits());
        by_position.entry(key).or_default().push(i);
    }

    let mut seams = Vec::new();
    for group in by_position.values().filter(|g| g.len() > 1) {
        for (n, &a) in group.iter().enumerate() {
            for &b in &group[n + 1..] {
                let (ua, ub) = (vertices[a].uv, vertices[b].uv);
                let distance = ((ua[0] - ub[0]).powi(2) + (ua[1] - ub[1]).powi(2)).sqrt();
                if distance > UV_SEAM_EPSILON {
                    seams.push([a.min(b), a.max(b)]);
                }
            }
        }
    }
    seams.sort_unstable();
    seams
}

/// Bin curvature values into `groups` bands, 0 being the flattest
///
/// Values are normalized against the observed min and max. When every value
/// is the same (or none is finite) all vertices land in band 0.
pub fn curvature_bands(curvature: &[f32], groups: usize) -> Vec<usize> {
    let top = groups.max(1) - 1;
    let (min, max) = curvature
        .iter()
        .filter(|c| c.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &c| {
            (lo.min(c), hi.max(c))
        });

    let range = max - min;
    if range.is_nan() || range <= 0.0 {
        return vec![0; curvature.len()];
    }

    curvature
        .iter()
        .map(|&c| {
            if !c.is_finite() {
                return 0;
            }
            let weight = (c - min) / range;
            ((weight * top as f32) as usize).min(top)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tests::quad;
    use crate::mesh::{sample, OwnedMesh};

    #[test]
    fn test_quad_area() {
        let (view, _) = sample(&quad()).unwrap();
        assert!((surface_area(&view) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_area_without_topology() {
        let mut mesh = quad();
        mesh.indices = None;
        let (view, _) = sample(&mesh).unwrap();
        assert_eq!(surface_area(&view), 0.0);
        assert_eq!(optimal_texture_scale(&view, DEFAULT_TEXEL_DENSITY), 1.0);
    }

    #[test]
    fn test_scale_is_clamped() {
        let (view, _) = sample(&quad()).unwrap();
        // sqrt(1024 / 1) = 32, clamped
        assert_eq!(optimal_texture_scale(&view, DEFAULT_TEXEL_DENSITY), 10.0);
        // sqrt(4 / 1) = 2
        assert!((optimal_texture_scale(&view, 4.0) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_flat_mesh_has_no_curvature() {
        let (view, _) = sample(&quad()).unwrap();
        assert!(vertex_curvature(&view).iter().all(|&c| c == 0.0));
    }

    #[test]
    fn test_fold_has_curvature() {
        let mesh = OwnedMesh {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            normals: Some(vec![[0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]]),
            uvs: None,
            indices: Some(vec![0, 1, 2]),
        };
        let (view, _) = sample(&mesh).unwrap();
        let curvature = vertex_curvature(&view);
        assert!(curvature[1] > curvature[0]);
        assert!(curvature[0] > 0.0);
    }

    #[test]
    fn test_uv_seams_on_split_vertices() {
        // two quads sharing an edge, duplicated with different UVs on the right side
        let mesh = OwnedMesh {
            positions: vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
                [1.0, 0.0, 0.0],
                [2.0, 0.0, 0.0],
                [2.0, 1.0, 0.0],
                [1.0, 1.0, 0.0],
            ],
            normals: Some(vec![[0.0, 0.0, 1.0]; 8]),
            uvs: Some(vec![
                [0.0, 0.0],
                [0.5, 0.0],
                [0.5, 1.0],
                [0.0, 1.0],
                [0.5, 0.0],
                [1.0, 0.0],
                [1.0, 1.0],
                [0.75, 1.0],
            ]),
            indices: Some(vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4]),
        };
        let (view, _) = sample(&mesh).unwrap();
        // 1/4 share a UV, 2/7 do not
        assert_eq!(uv_seams(&view), vec![[2, 7]]);
    }

    #[test]
    fn test_no_seams_without_uvs() {
        let mut mesh = quad();
        mesh.positions.push([0.0, 0.0, 0.0]);
        mesh.normals.as_mut().unwrap().push([0.0, 0.0, 1.0]);
        mesh.uvs = None;
        let (view, _) = sample(&mesh).unwrap();
        assert!(uv_seams(&view).is_empty());
    }

    #[test]
    fn test_curvature_bands() {
        let bands = curvature_bands(&[0.0, 0.25, 0.5, 1.0], 5);
        assert_eq!(bands, vec![0, 1, 2, 4]);
    }

    #[test]
    fn test_curvature_bands_flat_input() {
        assert_eq!(curvature_bands(&[0.3; 4], 5), vec![0; 4]);
        assert_eq!(curvature_bands(&[], 5), Vec::<usize>::new());
        assert_eq!(curvature_bands(&[0.0, 1.0], 0), vec![0, 0]);
    }
}
