//! CPU-side frustum culling and front-to-back leaf sorting

use crate::core::types::{UVec3, Vec3};
use crate::math::frustum::Frustum;
use crate::voxel::svo::octree::child_coord;
use crate::voxel::svo::{LeafInfo, Octree};

/// Walks an octree, skipping subtrees outside the frustum, and sorts the
/// visible leaves front-to-back.
///
/// Re-uses allocations across frames to avoid per-frame heap churn.
#[derive(Debug, Default)]
pub struct NodeCuller {
    /// Traversal stack: (node, depth, coord)
    stack: Vec<(u32, u8, UVec3)>,
    /// Leaves that passed the frustum test, unsorted
    candidates: Vec<LeafInfo>,
    /// Sort keys: (distance_squared, candidate index)
    sort_keys: Vec<(f32, usize)>,
    /// Visible leaves after culling and sorting (reused each frame)
    visible: Vec<LeafInfo>,
    /// Subtrees rejected by the last call
    culled: u32,
}

impl NodeCuller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cull `octree` against the frustum and sort visible leaves front-to-back.
    ///
    /// Returns a slice valid until the next call.
    pub fn cull_and_sort(&mut self, octree: &Octree, frustum: &Frustum, camera_pos: Vec3) -> &[LeafInfo] {
        self.stack.clear();
        self.candidates.clear();
        self.sort_keys.clear();
        self.visible.clear();
        self.culled = 0;

        if octree.root().is_occupied() {
            self.stack.push((0, 0, UVec3::ZERO));
        }

        while let Some((index, depth, coord)) = self.stack.pop() {
            let Some(node) = octree.node(index) else {
                continue;
            };
            let bounds = octree.node_bounds(depth, coord);
            if !frustum.is_node_visible(bounds.center(), bounds.half_extent()) {
                self.culled += 1;
                continue;
            }

            if node.is_filled_leaf() {
                if let Some(leaf) = octree.leaf_info(index, depth, coord) {
                    self.sort_keys
                        .push((camera_pos.distance_squared(bounds.center()), self.candidates.len()));
                    self.candidates.push(leaf);
                }
                continue;
            }
            if !node.is_subdivided() {
                continue;
            }
            for octant in 0..8u8 {
                let child = node.children[octant as usize];
                if octree.node(child).is_some_and(|c| c.is_occupied()) {
                    self.stack.push((child, depth + 1, child_coord(coord, octant)));
                }
            }
        }

        self.sort_keys.sort_by(|a, b| a.0.total_cmp(&b.0));
        self.visible
            .extend(self.sort_keys.iter().map(|&(_, i)| self.candidates[i]));
        &self.visible
    }

    /// Leaves returned by the last `cull_and_sort`
    pub fn visible(&self) -> &[LeafInfo] {
        &self.visible
    }

    pub fn visible_count(&self) -> u32 {
        self.visible.len() as u32
    }

    /// Subtrees rejected by the last `cull_and_sort`
    pub fn culled_count(&self) -> u32 {
        self.culled
    }
}
