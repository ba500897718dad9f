//! CPU execution of data-parallel kernels
//!
//! Storage buffers, the work-group dispatcher and the lane-group atomic
//! aggregator used by every pass that allocates from a shared counter.

pub mod buffer;
pub mod dispatch;
pub mod aggregator;

pub use buffer::StorageBuffer;
pub use dispatch::{DispatchIndirectArgs, Dispatcher, WorkGroup, GROUP_SIZE, TILE_SIZE};
pub use aggregator::{AtomicCounter, Reservation};
