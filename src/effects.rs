//! Painterly shader passes layered over a projection
//!
//! Each pass adds its contribution to a per-vertex intensity buffer that
//! starts at [`BASE_INTENSITY`].

use std::fmt::Debug;

use glam::Vec3;

use crate::mesh::analysis::vertex_curvature;
use crate::mesh::MeshView;
use crate::projection::ProjectionResult;
use crate::settings::EffectSettings;

/// Intensity of a vertex before any pass runs
pub const BASE_INTENSITY: f32 = 1.0;

/// Exponent of the Schlick fresnel approximation
const FRESNEL_POWER: i32 = 5;

/// A pass contributing to per-vertex shading intensity
pub trait ShaderPass: Send + Sync + Debug {
    /// Name of this pass (for logging)
    fn name(&self) -> &'static str;

    /// Add this pass's contribution; `intensity` is parallel to the mesh vertices
    fn apply(&self, mesh: &MeshView, projection: &ProjectionResult, intensity: &mut [f32]);
}

/// Fresnel rim light: strongest where the surface turns away from the viewer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RimLightPass {
    pub intensity: f32,
    pub view_dir: Vec3,
}

impl RimLightPass {
    /// Rim light seen from +Z
    pub fn new(intensity: f32) -> Self {
        Self {
            intensity,
            view_dir: Vec3::Z,
        }
    }

    pub fn with_view_dir(mut self, view_dir: Vec3) -> Self {
        self.view_dir = view_dir.normalize_or_zero();
        self
    }

    fn fresnel(&self, normal: Vec3) -> f32 {
        let facing = normal.normalize_or_zero().dot(self.view_dir).abs();
        (1.0 - facing).powi(FRESNEL_POWER)
    }
}

impl ShaderPass for RimLightPass {
    fn name(&self) -> &'static str {
        "rim_light"
    }

    fn apply(&self, mesh: &MeshView, _projection: &ProjectionResult, intensity: &mut [f32]) {
        for (value, vertex) in intensity.iter_mut().zip(mesh.vertices()) {
            *value += self.fresnel(Vec3::from(vertex.normal)) * self.intensity;
        }
    }
}

/// Brightens vertices on sharp creases, scaled by the mesh's peak curvature
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeHighlightPass {
    pub intensity: f32,
}

impl ShaderPass for EdgeHighlightPass {
    fn name(&self) -> &'static str {
        "edge_highlight"
    }

    fn apply(&self, mesh: &MeshView, _projection: &ProjectionResult, intensity: &mut [f32]) {
        let curvature = vertex_curvature(mesh);
        let peak = curvature.iter().copied().fold(0.0f32, f32::max);
        if peak <= 0.0 {
            return;
        }

        for (value, c) in intensity.iter_mut().zip(curvature) {
            *value += c / peak * self.intensity;
        }
    }
}

/// Ordered list of passes
#[derive(Debug, Default)]
pub struct EffectStack {
    passes: Vec<Box<dyn ShaderPass>>,
}

impl EffectStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rim light then edge highlight; passes with zero intensity are left out
    pub fn from_settings(settings: &EffectSettings) -> Self {
        let mut stack = Self::new();
        if settings.rim_light_intensity() > 0.0 {
            stack.push(RimLightPass::new(settings.rim_light_intensity()));
        }
        if settings.edge_highlight_intensity() > 0.0 {
            stack.push(EdgeHighlightPass {
                intensity: settings.edge_highlight_intensity(),
            });
        }
        stack
    }

    pub fn push(&mut self, pass: impl ShaderPass + 'static) {
        self.passes.push(Box::new(pass));
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Pass names in execution order
    pub fn names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run every pass and return the per-vertex intensity
    pub fn run(&self, mesh: &MeshView, projection: &ProjectionResult) -> Vec<f32> {
        let mut intensity = vec![BASE_INTENSITY; mesh.len()];
        for pass in &self.passes {
            log::trace!("Running shader pass {}", pass.name());
            pass.apply(mesh, projection, &mut intensity);
        }
        intensity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tests::quad;
    use crate::mesh::{sample, OwnedMesh};
    use crate::projection::project;
    use crate::settings::ProjectionSettings;

    fn folded() -> OwnedMesh {
        // two triangles meeting at a right angle along the x axis
        OwnedMesh {
            positions: vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
            ],
            normals: Some(vec![
                [0.0, 0.0, 1.0],
                [0.0, 0.0, 1.0],
                [0.0, 0.0, 1.0],
                [0.0, 1.0, 0.0],
            ]),
            uvs: None,
            indices: Some(vec![0, 1, 2, 0, 3, 1]),
        }
    }

    #[test]
    fn test_rim_light_is_zero_facing_viewer() {
        let (view, _) = sample(&quad()).unwrap();
        let projection = project(&view, &ProjectionSettings::default());
        let mut intensity = vec![BASE_INTENSITY; view.len()];

        RimLightPass::new(2.0).apply(&view, &projection, &mut intensity);
        for value in intensity {
            assert!((value - BASE_INTENSITY).abs() < 1e-6);
        }
    }

    #[test]
    fn test_rim_light_peaks_at_grazing_angle() {
        let (view, _) = sample(&quad()).unwrap();
        let projection = project(&view, &ProjectionSettings::default());
        let mut intensity = vec![0.0; view.len()];

        RimLightPass::new(1.5)
            .with_view_dir(Vec3::X)
            .apply(&view, &projection, &mut intensity);
        for value in intensity {
            assert!((value - 1.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_edge_highlight_flat_mesh_unchanged() {
        let (view, _) = sample(&quad()).unwrap();
        let projection = project(&view, &ProjectionSettings::default());
        let intensity = EffectStack::from_settings(&EffectSettings::new(0.0, 3.0).unwrap())
            .run(&view, &projection);
        assert_eq!(intensity, vec![BASE_INTENSITY; 4]);
    }

    #[test]
    fn test_edge_highlight_normalised_to_intensity() {
        let (view, _) = sample(&folded()).unwrap();
        let projection = project(&view, &ProjectionSettings::default());
        let mut intensity = vec![0.0; view.len()];

        EdgeHighlightPass { intensity: 2.0 }.apply(&view, &projection, &mut intensity);
        let peak = intensity.iter().copied().fold(0.0f32, f32::max);
        assert!((peak - 2.0).abs() < 1e-5);
        // vertex 2 only touches coplanar neighbours
        assert_eq!(intensity[2], 0.0);
    }

    #[test]
    fn test_stack_from_settings() {
        let stack = EffectStack::from_settings(&EffectSettings::default());
        assert_eq!(stack.names(), vec!["rim_light", "edge_highlight"]);

        let stack = EffectStack::from_settings(&EffectSettings::new(0.0, 0.0).unwrap());
        assert!(stack.is_empty());
    }
}
