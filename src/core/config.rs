//! Pipeline configuration
//!
//! Every section has a `Default` and missing JSON fields fall back to it, so a
//! config file only needs to mention what it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;

/// Deepest octree the builder accepts (4096^3 voxels).
pub const MAX_OCTREE_DEPTH: u8 = 12;

/// Voxel volume placement and fragment buffer sizing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxelConfig {
    /// World-space centre of the cubic voxel volume
    pub volume_center: [f32; 3],
    /// World-space edge length of the voxel volume
    pub volume_size: f32,
    /// Fragment buffer capacity; fragments past it are dropped for the frame
    pub fragment_capacity: u32,
}

impl Default for VoxelConfig {
    fn default() -> Self {
        Self {
            volume_center: [0.0; 3],
            volume_size: 16.0,
            fragment_capacity: 1 << 20,
        }
    }
}

/// Octree depth and node pool sizing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OctreeConfig {
    /// Maximum depth D (voxel resolution is 2^D per axis)
    pub max_depth: u8,
    /// Node pool capacity including the root
    pub node_capacity: u32,
}

impl Default for OctreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 7,
            node_capacity: 1 << 21,
        }
    }
}

/// Irradiance encoding parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IrradianceConfig {
    /// Directions sampled per voxel probe
    pub samples_per_probe: u32,
    /// Multiplier on the environment-lit albedo of surfaces hit by probe rays
    pub bounce_strength: f32,
    /// Maximum probe ray length in world units (0 = volume diagonal)
    pub max_ray_distance: f32,
    /// Texels per cube face edge when projecting the environment
    pub environment_resolution: u32,
}

impl Default for IrradianceConfig {
    fn default() -> Self {
        Self {
            samples_per_probe: 32,
            bounce_strength: 1.0,
            max_ray_distance: 0.0,
            environment_resolution: 16,
        }
    }
}

/// Screen-space reflection parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionConfig {
    /// Steps used for perfectly smooth surfaces
    pub max_steps: u32,
    /// Steps used at `max_roughness`
    pub min_steps: u32,
    /// Maximum view-space length of a reflection ray
    pub max_distance: f32,
    /// Accepted view-space depth gap between ray and depth buffer for a hit
    pub thickness: f32,
    /// Pixels rougher than this are not traced
    pub max_roughness: f32,
    /// Hits brighter than this luminance are suppressed (fireflies)
    pub luminance_threshold: f32,
    /// Fraction of the screen over which hits fade out towards the border
    pub edge_fade: f32,
    /// Fall back to octree/probe lighting when the screen-space march misses
    pub octree_fallback: bool,
    /// Octree levels the fallback climbs at roughness 1
    pub fallback_lod_levels: u8,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            max_steps: 64,
            min_steps: 8,
            max_distance: 32.0,
            thickness: 0.5,
            max_roughness: 0.8,
            luminance_threshold: 8.0,
            edge_fade: 0.1,
            octree_fallback: true,
            fallback_lod_levels: 2,
        }
    }
}

/// Work-group execution limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Largest group count accepted per grid dimension
    pub max_group_count: u32,
    /// Worker threads for the dispatcher pool (0 = rayon default)
    pub worker_threads: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_group_count: 65_535,
            worker_threads: 0,
        }
    }
}

/// Full pipeline configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub voxel: VoxelConfig,
    pub octree: OctreeConfig,
    pub irradiance: IrradianceConfig,
    pub reflection: ReflectionConfig,
    pub dispatch: DispatchConfig,
}

impl PipelineConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        log::info!("Loaded pipeline config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Check value ranges that the passes rely on.
    pub fn validate(&self) -> Result<()> {
        let depth = self.octree.max_depth;
        if depth == 0 || depth > MAX_OCTREE_DEPTH {
            return Err(Error::Config(format!(
                "octree.max_depth must be in 1..={MAX_OCTREE_DEPTH}, got {depth}"
            )));
        }
        if self.octree.node_capacity < 9 {
            return Err(Error::Config(format!(
                "octree.node_capacity must hold the root and one child batch, got {}",
                self.octree.node_capacity
            )));
        }
        if !(self.voxel.volume_size > 0.0) || !self.voxel.volume_size.is_finite() {
            return Err(Error::Config(format!(
                "voxel.volume_size must be positive, got {}",
                self.voxel.volume_size
            )));
        }
        if self.irradiance.samples_per_probe == 0 {
            return Err(Error::Config("irradiance.samples_per_probe must be non-zero".into()));
        }
        if self.irradiance.environment_resolution == 0 {
            return Err(Error::Config("irradiance.environment_resolution must be non-zero".into()));
        }
        let r = &self.reflection;
        if r.min_steps == 0 || r.min_steps > r.max_steps {
            return Err(Error::Config(format!(
                "reflection steps must satisfy 0 < min_steps <= max_steps, got {}..{}",
                r.min_steps, r.max_steps
            )));
        }
        if !(0.0..=1.0).contains(&r.max_roughness) {
            return Err(Error::Config(format!(
                "reflection.max_roughness must be in [0, 1], got {}",
                r.max_roughness
            )));
        }
        if !(0.0..0.5).contains(&r.edge_fade) {
            return Err(Error::Config(format!(
                "reflection.edge_fade must be in [0, 0.5), got {}",
                r.edge_fade
            )));
        }
        if self.dispatch.max_group_count == 0 {
            return Err(Error::Config("dispatch.max_group_count must be non-zero".into()));
        }
        Ok(())
    }
}
