//! Sparse Voxel Octree node and leaf payload

use bytemuck::{Pod, Zeroable};

use crate::core::types::Vec3;
use crate::voxel::codec;

/// Node flag bits
pub mod flags {
    /// At least one fragment maps into the node (needs subdivision)
    pub const OCCUPIED: u32 = 0x8000_0000;
    /// Terminal node carrying a payload slot
    pub const LEAF: u32 = 0x4000_0000;
    /// Leaf forced by node pool exhaustion above the maximum depth
    pub const TRUNCATED: u32 = 0x2000_0000;
}

/// `LeafInfo::payload` of a filtered interior cell, which has no probe
pub const NO_PAYLOAD: u32 = u32::MAX;

/// Octree node - exactly 40 bytes
///
/// Children of one parent are allocated as a batch of 8 consecutive slots, so
/// `children[i] == children[0] + i` whenever the node is subdivided. Index 0 is
/// the root and doubles as "no child".
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct OctreeNode {
    /// Child indices by octant (bit 0 = +x, bit 1 = +y, bit 2 = +z), 0 = absent
    pub children: [u32; 8],
    /// `flags::*` bits
    pub flags: u32,
    /// Leaf payload slot, valid when `LEAF | OCCUPIED` are set
    pub payload: u32,
}

impl OctreeNode {
    /// Create an empty node
    pub const fn empty() -> Self {
        Self {
            children: [0; 8],
            flags: 0,
            payload: 0,
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.flags & flags::OCCUPIED != 0
    }

    pub fn is_leaf(&self) -> bool {
        self.flags & flags::LEAF != 0
    }

    pub fn is_truncated(&self) -> bool {
        self.flags & flags::TRUNCATED != 0
    }

    /// Occupied leaf with a payload
    pub fn is_filled_leaf(&self) -> bool {
        self.is_occupied() && self.is_leaf()
    }

    /// Has an allocated child batch
    pub fn is_subdivided(&self) -> bool {
        !self.is_leaf() && self.children[0] != 0
    }

    pub fn child(&self, octant: u8) -> Option<u32> {
        debug_assert!(octant < 8);
        match self.children[octant as usize] {
            0 => None,
            index => Some(index),
        }
    }

    /// Bitmask of octants holding a child index
    pub fn child_mask(&self) -> u8 {
        self.children
            .iter()
            .enumerate()
            .fold(0u8, |mask, (i, &c)| if c != 0 { mask | (1 << i) } else { mask })
    }
}

/// Attribute averages, each an RGBA8 running average.
///
/// Leaves hold the mean of their fragments; interior nodes hold the mean of
/// their occupied children.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct LeafPayload {
    pub color: u32,
    /// Normal mapped to [0, 1] per channel
    pub normal: u32,
    pub emissive: u32,
}

impl LeafPayload {
    pub fn attributes(&self) -> LeafAttributes {
        let (color, samples) = codec::unpack_average(self.color);
        let (normal, _) = codec::unpack_average(self.normal);
        let (emissive, _) = codec::unpack_average(self.emissive);
        LeafAttributes {
            color,
            normal: codec::unorm_to_normal(normal),
            emissive,
            samples,
        }
    }
}

/// Decoded leaf payload
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LeafAttributes {
    pub color: Vec3,
    pub normal: Vec3,
    pub emissive: Vec3,
    /// Fragments averaged in (saturates at `codec::MAX_AVERAGE_COUNT`)
    pub samples: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_size() {
        assert_eq!(std::mem::size_of::<OctreeNode>(), 40);
        assert_eq!(std::mem::size_of::<LeafPayload>(), 12);
    }

    #[test]
    fn test_flags() {
        let mut node = OctreeNode::empty();
        assert!(!node.is_occupied());
        node.flags |= flags::OCCUPIED | flags::LEAF;
        assert!(node.is_filled_leaf());
        assert!(!node.is_truncated());
        assert!(!node.is_subdivided());
    }

    #[test]
    fn test_children() {
        let mut node = OctreeNode::empty();
        node.children = std::array::from_fn(|i| 9 + i as u32);
        assert!(node.is_subdivided());
        assert_eq!(node.child(3), Some(12));
        assert_eq!(node.child_mask(), 0xFF);
        assert_eq!(OctreeNode::empty().child(0), None);
    }

    #[test]
    fn test_payload_attributes() {
        let color = AtomicU32::new(0);
        let normal = AtomicU32::new(0);
        codec::atomic_average_rgba8(&color, Vec3::new(0.2, 0.4, 0.6));
        codec::atomic_average_rgba8(&normal, codec::normal_to_unorm(Vec3::Y));

        let payload = LeafPayload {
            color: color.into_inner(),
            normal: normal.into_inner(),
            emissive: 0,
        };
        let attributes = payload.attributes();
        assert_eq!(attributes.samples, 1);
        assert!((attributes.color - Vec3::new(0.2, 0.4, 0.6)).abs().max_element() < 1.0 / 255.0);
        assert!((attributes.normal - Vec3::Y).length() < 0.02);
        assert_eq!(attributes.emissive, Vec3::ZERO);
    }
}
