//! Voxel fragments and the frame's fragment buffer

use bytemuck::{Pod, Zeroable};

use crate::compute::aggregator::AtomicCounter;
use crate::compute::buffer::StorageBuffer;
use crate::core::types::{UVec3, Vec3};

use super::codec;

/// One voxelized sample - exactly 24 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VoxelFragment {
    /// Voxel centre in normalized volume space, each component in [0, 1)
    pub position: [f32; 3],
    /// Packed direction (see `codec::encode_normal`)
    pub normal: u32,
    /// RGBA8 albedo
    pub color: u32,
    /// RGBA8 emissive
    pub emissive: u32,
}

impl VoxelFragment {
    pub fn new(position: Vec3, normal: Vec3, color: u32, emissive: u32) -> Self {
        Self {
            position: position.to_array(),
            normal: codec::encode_normal(normal),
            color,
            emissive,
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    pub fn normal(&self) -> Vec3 {
        codec::decode_normal(self.normal)
    }

    /// Integer voxel coordinate at a grid of `2^depth` voxels per axis
    pub fn voxel_coord(&self, depth: u8) -> UVec3 {
        let resolution = 1u32 << depth;
        let scaled = (self.position() * resolution as f32).floor();
        scaled
            .max(Vec3::ZERO)
            .as_uvec3()
            .min(UVec3::splat(resolution - 1))
    }
}

/// Fixed-capacity fragment list, reset wholesale at every rebuild
pub struct FragmentBuffer {
    fragments: StorageBuffer<VoxelFragment>,
    counter: AtomicCounter,
    capacity: u32,
}

impl FragmentBuffer {
    pub fn new(capacity: u32) -> Self {
        Self {
            fragments: StorageBuffer::new(capacity as usize),
            counter: AtomicCounter::new(0),
            capacity,
        }
    }

    /// Forget all fragments; storage is kept
    pub fn clear(&mut self) {
        self.counter.reset(0);
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Fragments actually stored
    pub fn len(&self) -> u32 {
        self.counter.clamped(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fragments requested this frame, including dropped ones
    pub fn requested(&self) -> u32 {
        self.counter.load()
    }

    /// True when fragments were dropped for lack of space
    pub fn is_saturated(&self) -> bool {
        self.requested() > self.capacity
    }

    pub fn get(&self, index: u32) -> Option<VoxelFragment> {
        (index < self.len()).then(|| self.fragments.read(index as usize))
    }

    pub fn to_vec(&self) -> Vec<VoxelFragment> {
        self.fragments.to_vec(self.len() as usize)
    }

    pub(crate) fn counter(&self) -> &AtomicCounter {
        &self.counter
    }

    pub(crate) fn storage(&self) -> &StorageBuffer<VoxelFragment> {
        &self.fragments
    }
}

impl std::fmt::Debug for FragmentBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentBuffer")
            .field("len", &self.len())
            .field("requested", &self.requested())
            .field("capacity", &self.capacity)
            .finish()
    }
}
