//! Voxel data structures and operations

pub mod codec;
pub mod fragment;
pub mod mesh;
pub mod volume;
pub mod voxelizer;
pub mod svo;

pub use fragment::{FragmentBuffer, VoxelFragment};
pub use mesh::{DrawCall, SurfaceMaterial, Vertex};
pub use volume::VoxelVolume;
pub use voxelizer::{VoxelizeReport, Voxelizer};
pub use svo::{Octree, OctreeBuilder, OctreeNode};
