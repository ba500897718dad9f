//! Finished sparse voxel octree
//!
//! Read-only snapshot of the builder's node pool. Nodes carry no positions;
//! a node's cell follows from its path: at depth `d` it covers grid cell
//! `coord` of a `2^d` grid over the volume.

use crate::core::types::{UVec3, Vec3};
use crate::math::aabb::Aabb;
use crate::math::frustum::Frustum;
use crate::math::ray::Ray;
use crate::voxel::volume::VoxelVolume;

use super::builder::octant_at;
use super::node::{LeafAttributes, LeafPayload, OctreeNode, NO_PAYLOAD};

/// A filled leaf (or a filtered interior cell) and where it sits
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LeafInfo {
    /// Node index
    pub node: u32,
    pub depth: u8,
    /// Cell coordinate at `depth`
    pub coord: UVec3,
    /// World-space bounds
    pub bounds: Aabb,
    /// Payload slot, `NO_PAYLOAD` for interior cells
    pub payload: u32,
    pub attributes: LeafAttributes,
}

/// Nearest leaf along a ray
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    /// Entry distance into the leaf (0 when the ray starts inside)
    pub t: f32,
    pub position: Vec3,
    pub leaf: LeafInfo,
}

/// Sparse Voxel Octree data structure
#[derive(Debug, Clone)]
pub struct Octree {
    volume: VoxelVolume,
    /// All octree nodes (root is at index 0)
    nodes: Vec<OctreeNode>,
    /// Leaf payloads indexed by `OctreeNode::payload`
    payloads: Vec<LeafPayload>,
    /// Children averages of interior nodes, indexed by node
    filtered: Vec<LeafPayload>,
}

/// Parameters shared by one traversal
struct Trace<'a> {
    ray: &'a Ray,
    max_t: f32,
    frustum: Option<&'a Frustum>,
    skip: Option<u32>,
    /// Occupied nodes at this depth count as hits
    lod: u8,
}

impl Octree {
    /// Octree holding only an empty root
    pub fn empty(volume: VoxelVolume) -> Self {
        Self::from_parts(volume, Vec::new(), Vec::new(), Vec::new())
    }

    pub(crate) fn from_parts(
        volume: VoxelVolume,
        mut nodes: Vec<OctreeNode>,
        payloads: Vec<LeafPayload>,
        mut filtered: Vec<LeafPayload>,
    ) -> Self {
        if nodes.is_empty() {
            nodes.push(OctreeNode::empty());
        }
        filtered.resize(nodes.len(), LeafPayload::default());
        Self {
            volume,
            nodes,
            payloads,
            filtered,
        }
    }

    /// Get root node
    pub fn root(&self) -> &OctreeNode {
        &self.nodes[0]
    }

    pub fn node(&self, index: u32) -> Option<&OctreeNode> {
        self.nodes.get(index as usize)
    }

    /// Get all nodes as slice (for upload)
    pub fn nodes_slice(&self) -> &[OctreeNode] {
        &self.nodes
    }

    pub fn payloads(&self) -> &[LeafPayload] {
        &self.payloads
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Filled leaves, one payload each
    pub fn leaf_count(&self) -> u32 {
        self.payloads.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn volume(&self) -> &VoxelVolume {
        &self.volume
    }

    pub fn max_depth(&self) -> u8 {
        self.volume.depth
    }

    pub fn bounds(&self) -> Aabb {
        self.volume.bounds()
    }

    /// Calculate memory usage in bytes
    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<OctreeNode>() * self.nodes.len()
            + std::mem::size_of::<LeafPayload>() * (self.payloads.len() + self.filtered.len())
    }

    /// Averaged attributes of any occupied node: the leaf payload for leaves,
    /// the mean of the occupied children otherwise
    pub fn node_attributes(&self, index: u32) -> Option<LeafAttributes> {
        let node = self.node(index)?;
        if !node.is_occupied() {
            return None;
        }
        let payload = if node.is_leaf() {
            self.payloads.get(node.payload as usize)?
        } else {
            self.filtered.get(index as usize)?
        };
        let attributes = payload.attributes();
        (attributes.samples > 0).then_some(attributes)
    }

    /// Attributes of the cell containing `normalized` at `depth`, or of the
    /// shallower leaf covering it
    pub fn sample(&self, normalized: Vec3, depth: u8) -> Option<LeafAttributes> {
        if normalized.cmplt(Vec3::ZERO).any() || normalized.cmpge(Vec3::ONE).any() {
            return None;
        }
        let max_depth = self.max_depth();
        let resolution = 1u32 << max_depth;
        let coord = (normalized * resolution as f32)
            .as_uvec3()
            .min(UVec3::splat(resolution - 1));

        let mut index = 0u32;
        for level in 0..depth.min(max_depth) {
            let node = self.node(index)?;
            if !node.is_occupied() || node.is_leaf() {
                break;
            }
            index = node.child(octant_at(coord, max_depth - 1 - level))?;
        }
        self.node_attributes(index)
    }

    /// World-space box of the cell `coord` at `depth`
    pub fn node_bounds(&self, depth: u8, coord: UVec3) -> Aabb {
        let cell = self.volume.size / (1u32 << depth) as f32;
        let min = self.volume.min() + coord.as_vec3() * cell;
        Aabb::new(min, min + Vec3::splat(cell))
    }

    /// Leaf containing a point in normalized volume space
    pub fn find_leaf(&self, normalized: Vec3) -> Option<LeafInfo> {
        if normalized.cmplt(Vec3::ZERO).any() || normalized.cmpge(Vec3::ONE).any() {
            return None;
        }

        let max_depth = self.max_depth();
        let resolution = 1u32 << max_depth;
        let coord = (normalized * resolution as f32)
            .as_uvec3()
            .min(UVec3::splat(resolution - 1));

        let mut index = 0u32;
        for depth in 0..=max_depth {
            let node = self.node(index)?;
            if node.is_filled_leaf() {
                return self.leaf_info(index, depth, coord >> (max_depth - depth) as u32);
            }
            if !node.is_occupied() || depth == max_depth {
                return None;
            }
            index = node.child(octant_at(coord, max_depth - 1 - depth))?;
        }
        None
    }

    /// Depth-first iterator over all filled leaves
    pub fn leaves(&self) -> Leaves<'_> {
        let stack = if self.root().is_occupied() {
            vec![(0, 0, UVec3::ZERO)]
        } else {
            Vec::new()
        };
        Leaves { octree: self, stack }
    }

    /// Nearest filled leaf along `ray` within `max_t`.
    ///
    /// With a frustum, subtrees outside it are skipped.
    pub fn raycast(&self, ray: &Ray, max_t: f32, frustum: Option<&Frustum>) -> Option<RayHit> {
        self.raycast_lod(ray, max_t, frustum, self.max_depth())
    }

    /// Like `raycast`, but stops at `lod`: an occupied interior node at that
    /// depth is hit as a cell carrying its filtered attributes.
    pub fn raycast_lod(&self, ray: &Ray, max_t: f32, frustum: Option<&Frustum>, lod: u8) -> Option<RayHit> {
        let trace = Trace {
            ray,
            max_t,
            frustum,
            skip: None,
            lod,
        };
        self.visit(0, 0, UVec3::ZERO, &trace)
    }

    /// Like `raycast`, ignoring leaf `origin` (rays leaving a voxel)
    pub fn raycast_from_leaf(&self, origin: u32, ray: &Ray, max_t: f32) -> Option<RayHit> {
        let trace = Trace {
            ray,
            max_t,
            frustum: None,
            skip: Some(origin),
            lod: self.max_depth(),
        };
        self.visit(0, 0, UVec3::ZERO, &trace)
    }

    fn visit(&self, index: u32, depth: u8, coord: UVec3, trace: &Trace<'_>) -> Option<RayHit> {
        let node = self.node(index)?;
        if !node.is_occupied() {
            return None;
        }

        let ray = trace.ray;
        let bounds = self.node_bounds(depth, coord);
        let (t_near, _) = ray.intersects_aabb(&bounds)?;
        if t_near > trace.max_t {
            return None;
        }
        if let Some(frustum) = trace.frustum
            && !frustum.is_node_visible(bounds.center(), bounds.half_extent())
        {
            return None;
        }

        if node.is_leaf() || depth >= trace.lod {
            if trace.skip == Some(index) {
                return None;
            }
            let t = t_near.max(0.0);
            let cell = if node.is_leaf() {
                self.leaf_info(index, depth, coord)
            } else {
                self.cell_info(index, depth, coord)
            };
            return cell.map(|leaf| RayHit {
                t,
                position: ray.at(t),
                leaf,
            });
        }
        if !node.is_subdivided() {
            return None;
        }

        // Front-to-back: order the children by entry distance
        let mut order: Vec<(f32, u8)> = (0..8u8)
            .filter_map(|octant| {
                let child = self.node(node.children[octant as usize])?;
                if !child.is_occupied() {
                    return None;
                }
                let (t, _) = ray.intersects_aabb(&bounds.child_octant(octant))?;
                Some((t, octant))
            })
            .collect();
        order.sort_by(|a, b| a.0.total_cmp(&b.0));

        order.into_iter().find_map(|(_, octant)| {
            self.visit(node.children[octant as usize], depth + 1, child_coord(coord, octant), trace)
        })
    }

    /// Filtered interior node as a hit cell
    fn cell_info(&self, index: u32, depth: u8, coord: UVec3) -> Option<LeafInfo> {
        Some(LeafInfo {
            node: index,
            depth,
            coord,
            bounds: self.node_bounds(depth, coord),
            payload: NO_PAYLOAD,
            attributes: self.node_attributes(index)?,
        })
    }

    pub(crate) fn leaf_info(&self, index: u32, depth: u8, coord: UVec3) -> Option<LeafInfo> {
        let node = self.node(index)?;
        let payload = self.payloads.get(node.payload as usize)?;
        Some(LeafInfo {
            node: index,
            depth,
            coord,
            bounds: self.node_bounds(depth, coord),
            payload: node.payload,
            attributes: payload.attributes(),
        })
    }
}

pub(crate) fn child_coord(parent: UVec3, octant: u8) -> UVec3 {
    parent * 2 + UVec3::new((octant & 1) as u32, ((octant >> 1) & 1) as u32, ((octant >> 2) & 1) as u32)
}

/// Iterator returned by `Octree::leaves`
pub struct Leaves<'a> {
    octree: &'a Octree,
    stack: Vec<(u32, u8, UVec3)>,
}

impl Iterator for Leaves<'_> {
    type Item = LeafInfo;

    fn next(&mut self) -> Option<LeafInfo> {
        while let Some((index, depth, coord)) = self.stack.pop() {
            let Some(node) = self.octree.node(index) else {
                continue;
            };
            if node.is_filled_leaf() {
                if let Some(info) = self.octree.leaf_info(index, depth, coord) {
                    return Some(info);
                }
                continue;
            }
            if !node.is_subdivided() {
                continue;
            }
            for octant in (0..8u8).rev() {
                let child = node.children[octant as usize];
                if self.octree.node(child).is_some_and(OctreeNode::is_occupied) {
                    self.stack.push((child, depth + 1, child_coord(coord, octant)));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::dispatch::Dispatcher;
    use crate::core::camera::Camera;
    use crate::core::config::{DispatchConfig, OctreeConfig};
    use crate::voxel::codec;
    use crate::voxel::fragment::{FragmentBuffer, VoxelFragment};
    use crate::voxel::svo::builder::OctreeBuilder;

    /// Depth 2 over a 4-unit cube at the origin: one voxel per world unit,
    /// grid = world + 2
    fn build(coords: &[UVec3]) -> Octree {
        let fragments = FragmentBuffer::new(coords.len().max(1) as u32);
        let base = fragments.counter().reserve(coords.len() as u32);
        for (i, coord) in coords.iter().enumerate() {
            let fragment = VoxelFragment::new(
                (coord.as_vec3() + 0.5) / 4.0,
                Vec3::Z,
                codec::pack_rgb(Vec3::new(0.2, 0.4, 0.8)),
                codec::pack_rgb(Vec3::ZERO),
            );
            fragments.storage().write(base as usize + i, &fragment);
        }

        let dispatcher = Dispatcher::new(&DispatchConfig::default()).unwrap();
        let mut builder = OctreeBuilder::new(&OctreeConfig {
            max_depth: 2,
            node_capacity: 1024,
        });
        let (octree, _) = builder
            .build(&dispatcher, &fragments, VoxelVolume::new(Vec3::ZERO, 4.0, 2))
            .unwrap();
        octree
    }

    #[test]
    fn test_empty() {
        let octree = Octree::empty(VoxelVolume::new(Vec3::ZERO, 4.0, 2));
        assert!(octree.is_empty());
        assert_eq!(octree.leaves().count(), 0);
        assert!(octree.find_leaf(Vec3::splat(0.5)).is_none());
        assert!(octree.raycast(&Ray::new(Vec3::new(0.0, 0.0, 10.0), Vec3::NEG_Z), 100.0, None).is_none());
    }

    #[test]
    fn test_node_bounds() {
        let octree = Octree::empty(VoxelVolume::new(Vec3::ZERO, 4.0, 2));
        assert_eq!(octree.node_bounds(0, UVec3::ZERO), octree.bounds());
        let cell = octree.node_bounds(2, UVec3::new(3, 0, 1));
        assert_eq!(cell.min, Vec3::new(1.0, -2.0, -1.0));
        assert_eq!(cell.max, Vec3::new(2.0, -1.0, 0.0));
    }

    #[test]
    fn test_find_leaf_and_leaves() {
        let coords = [UVec3::new(1, 1, 0), UVec3::new(1, 1, 3), UVec3::new(3, 2, 0)];
        let octree = build(&coords);

        let leaf = octree.find_leaf(Vec3::new(0.3, 0.3, 0.9)).unwrap();
        assert_eq!(leaf.coord, UVec3::new(1, 1, 3));
        assert_eq!(leaf.depth, 2);
        assert!((leaf.attributes.color - Vec3::new(0.2, 0.4, 0.8)).abs().max_element() < 1.0 / 255.0);

        assert!(octree.find_leaf(Vec3::new(0.6, 0.6, 0.6)).is_none());
        assert!(octree.find_leaf(Vec3::new(1.0, 0.5, 0.5)).is_none());
        assert!(octree.find_leaf(Vec3::new(-0.1, 0.5, 0.5)).is_none());

        let mut found: Vec<UVec3> = octree.leaves().map(|leaf| leaf.coord).collect();
        found.sort_by_key(|c| (c.x, c.y, c.z));
        assert_eq!(found, vec![coords[0], coords[1], coords[2]]);
    }

    #[test]
    fn test_raycast_nearest_leaf() {
        let octree = build(&[UVec3::new(1, 1, 0), UVec3::new(1, 1, 3)]);

        // Voxel column x, y in [-1, 0]; z = 3 spans world [1, 2]
        let down = Ray::new(Vec3::new(-0.5, -0.5, 10.0), Vec3::NEG_Z);
        let hit = octree.raycast(&down, 100.0, None).unwrap();
        assert_eq!(hit.leaf.coord, UVec3::new(1, 1, 3));
        assert!((hit.t - 8.0).abs() < 1e-4);
        assert!((hit.position.z - 2.0).abs() < 1e-4);

        let up = Ray::new(Vec3::new(-0.5, -0.5, -10.0), Vec3::Z);
        let hit = octree.raycast(&up, 100.0, None).unwrap();
        assert_eq!(hit.leaf.coord, UVec3::new(1, 1, 0));

        assert!(octree.raycast(&down, 5.0, None).is_none());
        let miss = Ray::new(Vec3::new(1.5, 1.5, 10.0), Vec3::NEG_Z);
        assert!(octree.raycast(&miss, 100.0, None).is_none());
    }

    #[test]
    fn test_raycast_lod_hits_filtered_cell() {
        let octree = build(&[UVec3::new(1, 1, 3), UVec3::new(0, 0, 2)]);
        let down = Ray::new(Vec3::new(-0.5, -0.5, 10.0), Vec3::NEG_Z);

        // Both leaves share the level-1 cell x, y in [-2, 0], z in [0, 2]
        let hit = octree.raycast_lod(&down, 100.0, None, 1).unwrap();
        assert_eq!(hit.leaf.depth, 1);
        assert_eq!(hit.leaf.coord, UVec3::new(0, 0, 1));
        assert_eq!(hit.leaf.payload, NO_PAYLOAD);
        assert!((hit.t - 8.0).abs() < 1e-4);
        assert_eq!(hit.leaf.attributes.samples, 2);
        assert!((hit.leaf.attributes.color - Vec3::new(0.2, 0.4, 0.8)).abs().max_element() < 1.0 / 255.0);

        // A ray through an empty level-2 cell of that occupied parent still hits at level 1
        let side = Ray::new(Vec3::new(-1.5, -0.5, 10.0), Vec3::NEG_Z);
        assert!(octree.raycast(&side, 100.0, None).is_none());
        assert_eq!(octree.raycast_lod(&side, 100.0, None, 1).unwrap().leaf.node, hit.leaf.node);

        let full = octree.raycast_lod(&down, 100.0, None, 2).unwrap();
        assert_eq!(full, octree.raycast(&down, 100.0, None).unwrap());
    }

    #[test]
    fn test_node_attributes() {
        let octree = build(&[UVec3::new(1, 1, 3)]);
        let root = octree.node_attributes(0).unwrap();
        assert!((root.color - Vec3::new(0.2, 0.4, 0.8)).abs().max_element() < 1.0 / 255.0);
        assert!((root.normal - Vec3::Z).length() < 0.02);

        let empty = Octree::empty(*octree.volume());
        assert!(empty.node_attributes(0).is_none());
        assert!(empty.sample(Vec3::splat(0.5), 2).is_none());
        assert!(octree.sample(Vec3::splat(1.5), 0).is_none());
    }

    #[test]
    fn test_raycast_from_leaf_skips_origin() {
        let octree = build(&[UVec3::new(1, 1, 0), UVec3::new(1, 1, 3)]);
        let origin = octree.find_leaf(Vec3::new(0.375, 0.375, 0.125)).unwrap();

        let ray = Ray::new(origin.bounds.center(), Vec3::Z);
        assert_eq!(octree.raycast(&ray, 100.0, None).unwrap().t, 0.0);

        let hit = octree.raycast_from_leaf(origin.node, &ray, 100.0).unwrap();
        assert_eq!(hit.leaf.coord, UVec3::new(1, 1, 3));
        assert!((hit.t - 2.5).abs() < 1e-4);
    }

    #[test]
    fn test_raycast_frustum_filter() {
        let octree = build(&[UVec3::new(1, 1, 3)]);
        let ray = Ray::new(Vec3::new(-0.5, -0.5, 10.0), Vec3::NEG_Z);

        let facing = Camera::look_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y).matrices();
        assert!(octree.raycast(&ray, 100.0, Some(&facing.frustum())).is_some());

        let away = Camera::look_at(Vec3::new(0.0, 0.0, 10.0), Vec3::new(0.0, 0.0, 20.0), Vec3::Y).matrices();
        assert!(octree.raycast(&ray, 100.0, Some(&away.frustum())).is_none());
    }
}
