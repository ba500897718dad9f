//! Screen-space passes and view-dependent octree queries

pub mod space;
pub mod culling;
pub mod ssr;

pub use culling::NodeCuller;
pub use ssr::{GBuffer, GBufferTexel, ReflectionBuffer, ReflectionSample, ReflectionScene, ReflectionSource, ReflectionTracer};
