//! Sparse Voxel Octree implementation

pub mod node;
pub mod octree;
pub mod builder;

pub use node::{LeafAttributes, LeafPayload, OctreeNode};
pub use octree::{LeafInfo, Octree, RayHit};
pub use builder::{BuildInfo, BuildReport, BuildState, OctreeBuilder};
