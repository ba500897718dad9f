//! voxgi - sparse voxel octree global illumination core
//!
//! Triangles are voxelized into fragments, fragments are built into a sparse
//! octree level by level with lock-free node allocation, leaves get SH9
//! irradiance probes, and screen-space reflections fall back to the octree.

pub mod core;
pub mod math;
pub mod compute;
pub mod voxel;
pub mod irradiance;
pub mod render;
pub mod pipeline;

pub use crate::core::{Error, PipelineConfig, Result};
pub use pipeline::{FrameData, FrameReport, FrameStats, GiPipeline};
