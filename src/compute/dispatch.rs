//! Work-group dispatcher
//!
//! Kernels run as grids of fixed-size work groups. A dispatch hands every group
//! to the rayon pool and returns only once all of them finished, which is the
//! barrier between passes: every store made in pass `k` is visible to pass
//! `k + 1`.

use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;

use crate::core::config::DispatchConfig;
use crate::core::error::Error;
use crate::core::types::{Result, UVec3};

/// Lanes per group for one-dimensional kernels
pub const GROUP_SIZE: u32 = 64;

/// Edge length of the square tile used by two-dimensional kernels
pub const TILE_SIZE: u32 = 8;

/// Indirect dispatch record: group counts per grid dimension
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchIndirectArgs {
    pub group_count_x: u32,
    pub group_count_y: u32,
    pub group_count_z: u32,
}

impl DispatchIndirectArgs {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self {
            group_count_x: x,
            group_count_y: y,
            group_count_z: z,
        }
    }

    /// Groups needed to cover `count` lanes of a 1D kernel
    pub const fn for_items(count: u32) -> Self {
        Self::new(count.div_ceil(GROUP_SIZE), 1, 1)
    }

    /// Tiles needed to cover a `width` x `height` image, `layers` deep
    pub const fn for_tiles(width: u32, height: u32, layers: u32) -> Self {
        Self::new(width.div_ceil(TILE_SIZE), height.div_ceil(TILE_SIZE), layers)
    }

    pub fn as_uvec3(&self) -> UVec3 {
        UVec3::new(self.group_count_x, self.group_count_y, self.group_count_z)
    }

    /// Total number of groups in the grid
    pub fn total_groups(&self) -> u64 {
        self.group_count_x as u64 * self.group_count_y as u64 * self.group_count_z as u64
    }

    pub fn is_empty(&self) -> bool {
        self.total_groups() == 0
    }
}

/// One work group of a running dispatch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkGroup {
    /// Group coordinate in the grid
    pub id: UVec3,
    /// Lanes per dimension
    pub size: UVec3,
}

impl WorkGroup {
    pub fn lane_count(&self) -> u32 {
        self.size.x * self.size.y * self.size.z
    }

    /// Global invocation ids of a 1D group
    pub fn lanes(&self) -> Range<u32> {
        let first = self.id.x * self.size.x;
        first..first + self.size.x
    }

    /// Global invocation ids of the group, x fastest
    pub fn invocations(&self) -> impl Iterator<Item = UVec3> + '_ {
        let origin = self.id * self.size;
        (0..self.size.z).flat_map(move |z| {
            (0..self.size.y).flat_map(move |y| {
                (0..self.size.x).map(move |x| origin + UVec3::new(x, y, z))
            })
        })
    }
}

/// Runs kernels over grids of work groups on a dedicated thread pool
pub struct Dispatcher {
    pool: rayon::ThreadPool,
    max_group_count: u32,
}

impl Dispatcher {
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("voxgi-worker-{i}"))
            .build()
            .map_err(|e| Error::Config(format!("failed to start dispatcher pool: {e}")))?;

        log::debug!(
            "Dispatcher ready: {} workers, group limit {}",
            pool.current_num_threads(),
            config.max_group_count
        );

        Ok(Self {
            pool,
            max_group_count: config.max_group_count,
        })
    }

    /// Largest accepted group count per grid dimension
    pub fn max_group_count(&self) -> u32 {
        self.max_group_count
    }

    pub fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run a 1D kernel with `GROUP_SIZE` lanes per group
    pub fn dispatch_1d<F>(&self, label: &'static str, args: DispatchIndirectArgs, kernel: F) -> Result<()>
    where
        F: Fn(&WorkGroup) + Send + Sync,
    {
        self.dispatch(label, args, UVec3::new(GROUP_SIZE, 1, 1), kernel)
    }

    /// Run a 2D kernel with `TILE_SIZE` x `TILE_SIZE` lanes per group
    pub fn dispatch_2d<F>(&self, label: &'static str, args: DispatchIndirectArgs, kernel: F) -> Result<()>
    where
        F: Fn(&WorkGroup) + Send + Sync,
    {
        self.dispatch(label, args, UVec3::new(TILE_SIZE, TILE_SIZE, 1), kernel)
    }

    /// Run `kernel` once per group of the grid and wait for all of them.
    ///
    /// Grids wider than the group limit in any dimension are rejected before
    /// any group runs.
    pub fn dispatch<F>(
        &self,
        label: &'static str,
        args: DispatchIndirectArgs,
        group_size: UVec3,
        kernel: F,
    ) -> Result<()>
    where
        F: Fn(&WorkGroup) + Send + Sync,
    {
        let grid = args.as_uvec3();
        let widest = grid.max_element();
        if widest > self.max_group_count {
            log::warn!(
                "Rejected dispatch '{}': grid {:?} exceeds limit {}",
                label, grid, self.max_group_count
            );
            return Err(Error::DispatchRejected {
                label,
                groups: widest,
                limit: self.max_group_count,
            });
        }
        if args.is_empty() {
            log::trace!("Skipped empty dispatch '{}'", label);
            return Ok(());
        }

        let total = args.total_groups() as usize;
        let (gx, gy) = (grid.x as usize, grid.y as usize);
        log::trace!("Dispatch '{}': {} groups", label, total);

        self.pool.install(|| {
            (0..total).into_par_iter().for_each(|flat| {
                let id = UVec3::new(
                    (flat % gx) as u32,
                    ((flat / gx) % gy) as u32,
                    (flat / (gx * gy)) as u32,
                );
                kernel(&WorkGroup { id, size: group_size });
            });
        });

        Ok(())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.pool.current_num_threads())
            .field("max_group_count", &self.max_group_count)
            .finish()
    }
}
