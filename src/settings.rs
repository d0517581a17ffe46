//! User-facing projection, effect and cache configuration
//!
//! All values are validated when built; a constructed [`ProjectionSettings`]
//! or [`EffectSettings`] is always in range.

use crate::error::{Result, ShadingError};

/// Smallest accepted worker thread count
pub const MIN_THREADS: usize = 1;
/// Largest accepted worker thread count
pub const MAX_THREADS: usize = 16;
/// Default worker thread count
pub const DEFAULT_THREADS: usize = 4;
/// Default blend between authored UV (0.0) and triplanar (1.0)
pub const DEFAULT_BLEND_FACTOR: f32 = 0.5;
/// Upper bound for rim light and edge highlight intensities
pub const MAX_EFFECT_INTENSITY: f32 = 5.0;
/// Default cache budget (256 MiB)
pub const DEFAULT_MEMORY_BUDGET: usize = 256 * 1024 * 1024;

/// Reject thread counts outside `MIN_THREADS..=MAX_THREADS`
pub fn validate_thread_count(thread_count: usize) -> Result<usize> {
    if (MIN_THREADS..=MAX_THREADS).contains(&thread_count) {
        Ok(thread_count)
    } else {
        Err(ShadingError::InvalidThreadCount(thread_count))
    }
}

/// Parameters of one projection request
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "ProjectionSettingsBuilder"))]
pub struct ProjectionSettings {
    scale: f32,
    blend_factor: f32,
    use_gpu: bool,
    thread_count: usize,
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        Self {
            scale: 1.0,
            blend_factor: DEFAULT_BLEND_FACTOR,
            use_gpu: true,
            thread_count: DEFAULT_THREADS,
        }
    }
}

impl ProjectionSettings {
    /// Create validated settings
    pub fn new(scale: f32, blend_factor: f32, use_gpu: bool, thread_count: usize) -> Result<Self> {
        ProjectionSettingsBuilder {
            scale,
            blend_factor,
            use_gpu,
            thread_count,
        }
        .build()
    }

    /// Start from the defaults
    pub fn builder() -> ProjectionSettingsBuilder {
        ProjectionSettingsBuilder::default()
    }

    /// Triplanar UV divisor
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// 0.0 = authored UV only, 1.0 = triplanar only
    pub fn blend_factor(&self) -> f32 {
        self.blend_factor
    }

    /// Whether the GPU path should be attempted
    pub fn use_gpu(&self) -> bool {
        self.use_gpu
    }

    /// CPU fallback parallelism
    pub fn thread_count(&self) -> usize {
        self.thread_count
    }
}

/// Builder for [`ProjectionSettings`]
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ProjectionSettingsBuilder {
    scale: f32,
    blend_factor: f32,
    use_gpu: bool,
    thread_count: usize,
}

impl Default for ProjectionSettingsBuilder {
    fn default() -> Self {
        let defaults = ProjectionSettings::default();
        Self {
            scale: defaults.scale,
            blend_factor: defaults.blend_factor,
            use_gpu: defaults.use_gpu,
            thread_count: defaults.thread_count,
        }
    }
}

impl ProjectionSettingsBuilder {
    pub fn scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn blend_factor(mut self, blend_factor: f32) -> Self {
        self.blend_factor = blend_factor;
        self
    }

    pub fn use_gpu(mut self, use_gpu: bool) -> Self {
        self.use_gpu = use_gpu;
        self
    }

    pub fn thread_count(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count;
        self
    }

    /// Validate and produce the settings
    pub fn build(self) -> Result<ProjectionSettings> {
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(ShadingError::InvalidSettings(format!(
                "scale must be a positive finite number, got {}",
                self.scale
            )));
        }
        if !(0.0..=1.0).contains(&self.blend_factor) {
            return Err(ShadingError::InvalidSettings(format!(
                "blend factor must be within [0, 1], got {}",
                self.blend_factor
            )));
        }
        validate_thread_count(self.thread_count)?;

        Ok(ProjectionSettings {
            scale: self.scale,
            blend_factor: self.blend_factor,
            use_gpu: self.use_gpu,
            thread_count: self.thread_count,
        })
    }
}

#[cfg(feature = "serde")]
impl TryFrom<ProjectionSettingsBuilder> for ProjectionSettings {
    type Error = ShadingError;

    fn try_from(builder: ProjectionSettingsBuilder) -> Result<Self> {
        builder.build()
    }
}

/// Strength of the painterly shader passes
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawEffectSettings"))]
pub struct EffectSettings {
    rim_light_intensity: f32,
    edge_highlight_intensity: f32,
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            rim_light_intensity: 1.0,
            edge_highlight_intensity: 1.0,
        }
    }
}

impl EffectSettings {
    /// Create validated effect settings; both intensities lie in `[0, 5]`
    pub fn new(rim_light_intensity: f32, edge_highlight_intensity: f32) -> Result<Self> {
        for (name, value) in [
            ("rim light intensity", rim_light_intensity),
            ("edge highlight intensity", edge_highlight_intensity),
        ] {
            if !(0.0..=MAX_EFFECT_INTENSITY).contains(&value) {
                return Err(ShadingError::InvalidSettings(format!(
                    "{name} must be within [0, {MAX_EFFECT_INTENSITY}], got {value}"
                )));
            }
        }

        Ok(Self {
            rim_light_intensity,
            edge_highlight_intensity,
        })
    }

    pub fn rim_light_intensity(&self) -> f32 {
        self.rim_light_intensity
    }

    pub fn edge_highlight_intensity(&self) -> f32 {
        self.edge_highlight_intensity
    }
}

/// Unchecked wire form of [`EffectSettings`]
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
#[serde(default)]
struct RawEffectSettings {
    rim_light_intensity: f32,
    edge_highlight_intensity: f32,
}

#[cfg(feature = "serde")]
impl Default for RawEffectSettings {
    fn default() -> Self {
        let defaults = EffectSettings::default();
        Self {
            rim_light_intensity: defaults.rim_light_intensity,
            edge_highlight_intensity: defaults.edge_highlight_intensity,
        }
    }
}

#[cfg(feature = "serde")]
impl TryFrom<RawEffectSettings> for EffectSettings {
    type Error = ShadingError;

    fn try_from(raw: RawEffectSettings) -> Result<Self> {
        EffectSettings::new(raw.rim_light_intensity, raw.edge_highlight_intensity)
    }
}

/// Orchestrator-level configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShadingConfig {
    /// Cache budget in bytes, host and device data combined
    pub memory_budget: usize,
}

impl Default for ShadingConfig {
    fn default() -> Self {
        Self {
            memory_budget: DEFAULT_MEMORY_BUDGET,
        }
    }
}

impl ShadingConfig {
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = bytes;
        self
    }
}
