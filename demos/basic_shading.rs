//! Basic shading example for arcane_shading

use arcane_shading::{
    EffectSettings, MockGpu, OwnedMesh, ProjectionSettings, ShadingConfig, ShadingOrchestrator,
};

/// A unit cube with per-face normals and no UV layer
fn cube() -> OwnedMesh {
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
    ];

    let mut mesh = OwnedMesh::default();
    let mut normals = Vec::new();
    let mut indices = Vec::new();
    for (normal, u, v) in faces {
        let base = mesh.positions.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            mesh.positions.push([
                0.5 * (normal[0] + su * u[0] + sv * v[0]),
                0.5 * (normal[1] + su * u[1] + sv * v[1]),
                0.5 * (normal[2] + su * u[2] + sv * v[2]),
            ]);
            normals.push(normal);
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    mesh.normals = Some(normals);
    mesh.indices = Some(indices);
    mesh
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Mock GPU device (no real hardware needed) and a 64MB cache
    let orchestrator = ShadingOrchestrator::new(
        MockGpu::new(),
        ShadingConfig::default().with_memory_budget(64 * 1024 * 1024),
    );

    println!("arcane_shading v{}", arcane_shading::VERSION);

    let mesh = cube();
    let view = arcane_shading::sample(&mesh)?.0;
    let settings = ProjectionSettings::builder()
        .scale(orchestrator.suggest_scale(&view))
        .blend_factor(0.5)
        .build()?;

    let outcome = orchestrator.apply_source(&mesh, &settings)?;
    println!(
        "Projected {} vertices via {:?} (cache: {:?})",
        outcome.result.len(),
        outcome.path,
        outcome.cache
    );
    for warning in &outcome.warnings {
        println!("warning: {}", warning);
    }

    let shaded = orchestrator.shade(&view, &settings, &EffectSettings::default())?;
    let peak = shaded.intensity.iter().copied().fold(0.0f32, f32::max);
    println!("Peak painterly intensity: {:.3}", peak);

    // Same request again is served from the cache
    let again = orchestrator.apply_source(&mesh, &settings)?;
    println!(
        "Second request: {:?}, hit rate {:.1}%",
        again.cache,
        orchestrator.metrics().cache_hit_rate()
    );

    orchestrator.teardown();
    println!("Cache memory usage after teardown: {} bytes", orchestrator.cache().memory_usage());
    Ok(())
}
