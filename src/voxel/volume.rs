//! Cubic voxel volume and its coordinate spaces
//!
//! Three spaces are used: world space, grid space `[0, 2^depth)^3` where one
//! unit is one voxel, and normalized volume space `[0, 1)^3` stored in
//! fragments.

use crate::core::config::VoxelConfig;
use crate::core::types::{UVec3, Vec3};
use crate::math::aabb::Aabb;

/// Axis-aligned cube subdivided into `2^depth` voxels per axis
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoxelVolume {
    pub center: Vec3,
    pub size: f32,
    pub depth: u8,
}

impl VoxelVolume {
    pub fn new(center: Vec3, size: f32, depth: u8) -> Self {
        Self { center, size, depth }
    }

    pub fn from_config(config: &VoxelConfig, depth: u8) -> Self {
        Self::new(Vec3::from_array(config.volume_center), config.volume_size, depth)
    }

    /// Voxels per axis
    pub fn resolution(&self) -> u32 {
        1 << self.depth
    }

    /// World-space edge length of one voxel
    pub fn voxel_size(&self) -> f32 {
        self.size / self.resolution() as f32
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::cube(self.center, self.size)
    }

    pub fn min(&self) -> Vec3 {
        self.center - Vec3::splat(self.size * 0.5)
    }

    pub fn world_to_normalized(&self, p: Vec3) -> Vec3 {
        (p - self.min()) / self.size
    }

    pub fn normalized_to_world(&self, p: Vec3) -> Vec3 {
        self.min() + p * self.size
    }

    pub fn world_to_grid(&self, p: Vec3) -> Vec3 {
        self.world_to_normalized(p) * self.resolution() as f32
    }

    /// World-space centre of voxel `coord`
    pub fn voxel_center(&self, coord: UVec3) -> Vec3 {
        self.normalized_to_world((coord.as_vec3() + 0.5) / self.resolution() as f32)
    }
}
