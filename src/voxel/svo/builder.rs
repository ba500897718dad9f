//! Level-by-level parallel octree construction
//!
//! The builder runs as a state machine over depth levels, one dispatch per
//! state:
//!
//! ```text
//! Clear -> Flag(0) -> Allocate(0) -> Advance(0) -> Flag(1) -> ... -> Flag(D)
//!       -> StoreLeaves -> Filter(D - 1) -> ... -> Filter(0) -> Done
//! ```
//!
//! `Flag(L)` marks every level-L node that a fragment falls into,
//! `Allocate(L)` gives each marked node a batch of 8 children from the shared
//! node pool, and `Advance(L)` records the new level's node range together with
//! the dispatch size of the next pass in `BuildInfo`. When the pool runs dry a
//! node stays a leaf (`TRUNCATED`) and the build carries on.
//!
//! `Filter(L)` runs bottom-up once the leaves hold their averages: every
//! subdivided level-L node averages its occupied children, so coarser levels
//! can be sampled like a mip chain.

use std::mem::offset_of;
use std::sync::atomic::{AtomicBool, Ordering};

use bytemuck::{Pod, Zeroable};

use super::node::{flags, LeafPayload, OctreeNode};
use super::octree::Octree;
use crate::compute::aggregator::{AtomicCounter, Reservation};
use crate::compute::dispatch::WorkGroup;
use crate::compute::buffer::StorageBuffer;
use crate::compute::dispatch::{DispatchIndirectArgs, Dispatcher};
use crate::core::config::{OctreeConfig, MAX_OCTREE_DEPTH};
use crate::core::types::{Result, UVec3};
use crate::voxel::codec;
use crate::voxel::fragment::{FragmentBuffer, VoxelFragment};
use crate::voxel::volume::VoxelVolume;

/// Node range of one octree level and the dispatch that covers it
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BuildInfo {
    pub node_begin: u32,
    /// Pool slots in the level's range. After a partial grant this includes
    /// the unlinked tail of the last batch, which stays empty.
    pub node_count: u32,
    pub dispatch: DispatchIndirectArgs,
}

impl BuildInfo {
    fn for_range(node_begin: u32, node_count: u32) -> Self {
        Self {
            node_begin,
            node_count,
            dispatch: DispatchIndirectArgs::for_items(node_count),
        }
    }
}

/// Builder state; each call to `OctreeBuilder::step` runs one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildState {
    Clear,
    Flag(u8),
    Allocate(u8),
    Advance(u8),
    StoreLeaves,
    Filter(u8),
    Done,
}

/// Summary of a finished build
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub fragments: u32,
    /// Deepest level holding nodes
    pub depth_reached: u8,
    /// Nodes reachable from the root
    pub node_count: u32,
    /// Pool slots handed out, including unlinked ones
    pub pool_nodes: u32,
    pub leaf_count: u32,
    /// Nodes that stayed leaves because the pool was full
    pub truncated_nodes: u32,
    pub saturated: bool,
}

/// Builds an `Octree` from a fragment buffer using a fixed node pool
pub struct OctreeBuilder {
    max_depth: u8,
    capacity: u32,
    nodes: StorageBuffer<OctreeNode>,
    node_counter: AtomicCounter,
    payloads: StorageBuffer<LeafPayload>,
    payload_counter: AtomicCounter,
    levels: Vec<BuildInfo>,
    state: BuildState,
    /// Averages of interior nodes, indexed by node
    filtered: StorageBuffer<LeafPayload>,
    saturated: AtomicBool,
    truncated: AtomicCounter,
}

const FLAGS_OFFSET: usize = offset_of!(OctreeNode, flags);
const PAYLOAD_OFFSET: usize = offset_of!(OctreeNode, payload);
const CHILDREN_OFFSET: usize = offset_of!(OctreeNode, children);

impl OctreeBuilder {
    pub fn new(config: &OctreeConfig) -> Self {
        let max_depth = config.max_depth.clamp(1, MAX_OCTREE_DEPTH);
        let capacity = config.node_capacity.max(1);
        Self {
            max_depth,
            capacity,
            nodes: StorageBuffer::new(capacity as usize),
            node_counter: AtomicCounter::new(0),
            payloads: StorageBuffer::new(capacity as usize),
            payload_counter: AtomicCounter::new(0),
            levels: vec![BuildInfo::default(); max_depth as usize + 1],
            state: BuildState::Clear,
            filtered: StorageBuffer::new(capacity as usize),
            saturated: AtomicBool::new(false),
            truncated: AtomicCounter::new(0),
        }
    }

    pub fn max_depth(&self) -> u8 {
        self.max_depth
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Per-level node ranges written by `Advance`
    pub fn levels(&self) -> &[BuildInfo] {
        &self.levels
    }

    /// Nodes allocated so far, clamped to the pool
    pub fn allocated_nodes(&self) -> u32 {
        self.node_counter.clamped(self.capacity)
    }

    pub fn is_saturated(&self) -> bool {
        self.saturated.load(Ordering::Relaxed)
    }

    /// Run the whole state machine and freeze the result
    pub fn build(
        &mut self,
        dispatcher: &Dispatcher,
        fragments: &FragmentBuffer,
        volume: VoxelVolume,
    ) -> Result<(Octree, BuildReport)> {
        self.state = BuildState::Clear;
        while self.state != BuildState::Done {
            if let Err(e) = self.step(dispatcher, fragments) {
                // Restart from scratch next time
                self.state = BuildState::Clear;
                return Err(e);
            }
        }

        let octree = self.freeze(volume);
        let linked = octree
            .nodes_slice()
            .iter()
            .filter(|node| node.is_subdivided())
            .count() as u32;
        let report = BuildReport {
            fragments: fragments.len(),
            depth_reached: self.depth_reached(),
            node_count: 1 + 8 * linked,
            pool_nodes: octree.node_count() as u32,
            leaf_count: octree.leaf_count(),
            truncated_nodes: self.truncated.load(),
            saturated: self.is_saturated(),
        };

        if report.saturated {
            log::warn!(
                "Node pool exhausted ({} nodes): {} nodes truncated",
                self.capacity, report.truncated_nodes
            );
        }
        log::info!(
            "Built octree: {} nodes, {} leaves, depth {} from {} fragments",
            report.node_count, report.leaf_count, report.depth_reached, report.fragments
        );

        Ok((octree, report))
    }

    /// Execute the current state and move to the next one
    pub fn step(&mut self, dispatcher: &Dispatcher, fragments: &FragmentBuffer) -> Result<BuildState> {
        let next = match self.state {
            BuildState::Clear => {
                self.clear();
                BuildState::Flag(0)
            }
            BuildState::Flag(level) => {
                self.flag(dispatcher, fragments, level)?;
                if level == self.max_depth {
                    BuildState::StoreLeaves
                } else {
                    BuildState::Allocate(level)
                }
            }
            BuildState::Allocate(level) => {
                self.allocate(dispatcher, level)?;
                BuildState::Advance(level)
            }
            BuildState::Advance(level) => {
                if self.advance(level) == 0 {
                    BuildState::StoreLeaves
                } else {
                    BuildState::Flag(level + 1)
                }
            }
            BuildState::StoreLeaves => {
                self.store_leaves(dispatcher, fragments)?;
                match self.depth_reached() {
                    0 => BuildState::Done,
                    depth => BuildState::Filter(depth - 1),
                }
            }
            BuildState::Filter(level) => {
                self.filter(dispatcher, level)?;
                match level {
                    0 => BuildState::Done,
                    _ => BuildState::Filter(level - 1),
                }
            }
            BuildState::Done => BuildState::Done,
        };

        log::debug!("Octree build: {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(next)
    }

    fn clear(&mut self) {
        // Only the slots the previous build handed out can be dirty
        let nodes = self.node_counter.clamped(self.capacity);
        let payloads = self.payload_counter.clamped(self.capacity);
        self.nodes.clear_prefix(nodes as usize);
        self.filtered.clear_prefix(nodes as usize);
        self.payloads.clear_prefix(payloads as usize);

        // Root
        self.node_counter.reset(1);
        self.payload_counter.reset(0);

        self.levels.fill(BuildInfo::default());
        self.levels[0] = BuildInfo::for_range(0, 1);
        self.saturated.store(false, Ordering::Relaxed);
        self.truncated.reset(0);
    }

    /// Deepest level holding nodes
    fn depth_reached(&self) -> u8 {
        self.levels
            .iter()
            .rposition(|level| level.node_count > 0)
            .unwrap_or(0) as u8
    }

    fn flag(&self, dispatcher: &Dispatcher, fragments: &FragmentBuffer, level: u8) -> Result<()> {
        let count = fragments.len();
        let mark = if level == self.max_depth {
            flags::OCCUPIED | flags::LEAF
        } else {
            flags::OCCUPIED
        };

        dispatcher.dispatch_1d("octree_flag", DispatchIndirectArgs::for_items(count), |group| {
            for lane in group.lanes().filter(|&lane| lane < count) {
                let fragment = fragments.storage().read(lane as usize);
                // Paths cut short by a truncated leaf are already covered
                if let Some((node, depth)) = self.descend(&fragment, level)
                    && depth == level
                {
                    self.nodes
                        .atomic(node as usize, FLAGS_OFFSET)
                        .fetch_or(mark, Ordering::Relaxed);
                }
            }
        })
    }

    fn allocate(&self, dispatcher: &Dispatcher, level: u8) -> Result<()> {
        let info = self.levels[level as usize];

        dispatcher.dispatch_1d("octree_allocate", info.dispatch, |group| {
            let nodes: Vec<Option<u32>> = group
                .lanes()
                .map(|lane| (lane < info.node_count).then(|| info.node_begin + lane))
                .collect();
            let requests: Vec<u32> = nodes
                .iter()
                .map(|node| match node {
                    Some(index) if self.node_flags(*index) & (flags::OCCUPIED | flags::LEAF) == flags::OCCUPIED => 8,
                    _ => 0,
                })
                .collect();

            let reservations = group.reserve(&self.node_counter, &requests, self.capacity);
            let mut cut = vec![0u32; requests.len()];
            for ((node, reservation), cut) in nodes.iter().zip(reservations).zip(&mut cut) {
                let Some(index) = *node else { continue };
                match reservation {
                    Reservation::Empty => {}
                    Reservation::Granted { base, len: 8 } => {
                        for octant in 0..8 {
                            self.nodes
                                .atomic(index as usize, CHILDREN_OFFSET + octant * 4)
                                .store(base + octant as u32, Ordering::Relaxed);
                        }
                    }
                    Reservation::Granted { .. } | Reservation::Exhausted => {
                        self.nodes
                            .atomic(index as usize, FLAGS_OFFSET)
                            .fetch_or(flags::LEAF | flags::TRUNCATED, Ordering::Relaxed);
                        *cut = 1;
                    }
                }
            }
            self.count_truncated(group, &cut);
        })
    }

    fn count_truncated(&self, group: &WorkGroup, cut: &[u32]) {
        if cut.contains(&1) {
            self.saturated.store(true, Ordering::Relaxed);
            group.advance(&self.truncated, cut);
        }
    }

    /// Record the next level's range; returns its node count
    fn advance(&mut self, level: u8) -> u32 {
        let current = self.levels[level as usize];
        let allocated = self.allocated_nodes();
        let begin = current.node_begin + current.node_count;
        let count = allocated.saturating_sub(begin);

        if let Some(next) = self.levels.get_mut(level as usize + 1) {
            *next = BuildInfo::for_range(begin, count);
        }
        log::debug!("Octree level {}: {} nodes from {}", level + 1, count, begin);
        count
    }

    fn store_leaves(&self, dispatcher: &Dispatcher, fragments: &FragmentBuffer) -> Result<()> {
        let node_count = self.allocated_nodes();

        dispatcher.dispatch_1d("octree_leaf_slots", DispatchIndirectArgs::for_items(node_count), |group| {
            let requests: Vec<u32> = group
                .lanes()
                .map(|lane| {
                    let filled = lane < node_count
                        && self.node_flags(lane) & (flags::OCCUPIED | flags::LEAF)
                            == (flags::OCCUPIED | flags::LEAF);
                    filled as u32
                })
                .collect();

            let reservations = group.reserve(&self.payload_counter, &requests, self.capacity);
            for (lane, reservation) in group.lanes().zip(reservations) {
                if let Some(slot) = reservation.base() {
                    self.nodes
                        .atomic(lane as usize, PAYLOAD_OFFSET)
                        .store(slot, Ordering::Relaxed);
                }
            }
        })?;

        let count = fragments.len();
        dispatcher.dispatch_1d("octree_leaf_store", DispatchIndirectArgs::for_items(count), |group| {
            for lane in group.lanes().filter(|&lane| lane < count) {
                let fragment = fragments.storage().read(lane as usize);
                let Some((leaf, _)) = self.descend(&fragment, self.max_depth) else {
                    continue;
                };
                if self.node_flags(leaf) & flags::LEAF == 0 {
                    continue;
                }
                let slot = self
                    .nodes
                    .atomic(leaf as usize, PAYLOAD_OFFSET)
                    .load(Ordering::Relaxed) as usize;

                let (color, _) = codec::unpack_average(fragment.color);
                let (emissive, _) = codec::unpack_average(fragment.emissive);
                codec::atomic_average_rgba8(
                    self.payloads.atomic(slot, offset_of!(LeafPayload, color)),
                    color,
                );
                codec::atomic_average_rgba8(
                    self.payloads.atomic(slot, offset_of!(LeafPayload, normal)),
                    codec::normal_to_unorm(fragment.normal()),
                );
                codec::atomic_average_rgba8(
                    self.payloads.atomic(slot, offset_of!(LeafPayload, emissive)),
                    emissive,
                );
            }
        })
    }

    /// Average the occupied children of every subdivided level-`level` node
    fn filter(&self, dispatcher: &Dispatcher, level: u8) -> Result<()> {
        let info = self.levels[level as usize];

        dispatcher.dispatch_1d("octree_filter", info.dispatch, |group| {
            for lane in group.lanes().filter(|&lane| lane < info.node_count) {
                let index = (info.node_begin + lane) as usize;
                let node = self.nodes.read(index);
                if !node.is_occupied() || !node.is_subdivided() {
                    continue;
                }
                for child in node.children {
                    let Some(source) = self.filter_source(child) else {
                        continue;
                    };
                    for (offset, packed) in [
                        (offset_of!(LeafPayload, color), source.color),
                        (offset_of!(LeafPayload, normal), source.normal),
                        (offset_of!(LeafPayload, emissive), source.emissive),
                    ] {
                        let (value, _) = codec::unpack_average(packed);
                        codec::atomic_average_rgba8(self.filtered.atomic(index, offset), value);
                    }
                }
            }
        })
    }

    /// Averaged attributes a child contributes to its parent
    fn filter_source(&self, index: u32) -> Option<LeafPayload> {
        let node = self.nodes.read(index as usize);
        if !node.is_occupied() {
            return None;
        }
        let payload = if node.is_leaf() {
            self.payloads.read(node.payload as usize)
        } else {
            self.filtered.read(index as usize)
        };
        let (_, samples) = codec::unpack_average(payload.color);
        (samples > 0).then_some(payload)
    }

    /// Follow a fragment's octant path from the root down to `level`,
    /// returning the node and its depth.
    ///
    /// Stops early at a leaf (truncated nodes). `None` if the path is missing
    /// a child.
    fn descend(&self, fragment: &VoxelFragment, level: u8) -> Option<(u32, u8)> {
        let coord = fragment.voxel_coord(self.max_depth);
        let mut node = 0u32;
        for depth in 0..level {
            if self.node_flags(node) & flags::LEAF != 0 {
                return Some((node, depth));
            }
            let octant = octant_at(coord, self.max_depth - 1 - depth);
            let child = self
                .nodes
                .atomic(node as usize, CHILDREN_OFFSET + octant as usize * 4)
                .load(Ordering::Relaxed);
            if child == 0 {
                return None;
            }
            node = child;
        }
        Some((node, level))
    }

    fn node_flags(&self, index: u32) -> u32 {
        self.nodes
            .atomic(index as usize, FLAGS_OFFSET)
            .load(Ordering::Relaxed)
    }

    /// Copy the used part of the pool into a read-only octree
    fn freeze(&self, volume: VoxelVolume) -> Octree {
        let nodes = self.nodes.to_vec(self.allocated_nodes() as usize);
        let payloads = self
            .payloads
            .to_vec(self.payload_counter.clamped(self.capacity) as usize);
        let filtered = self.filtered.to_vec(nodes.len());
        Octree::from_parts(VoxelVolume { depth: self.max_depth, ..volume }, nodes, payloads, filtered)
    }
}

/// Octant of `coord` at bit `bit` (bit 0 = x, bit 1 = y, bit 2 = z)
pub(crate) fn octant_at(coord: UVec3, bit: u8) -> u8 {
    (((coord.x >> bit) & 1) | (((coord.y >> bit) & 1) << 1) | (((coord.z >> bit) & 1) << 2)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DispatchConfig;
    use crate::core::types::{Vec2, Vec3};
    use crate::voxel::mesh::{DrawCall, SurfaceMaterial, Vertex};
    use crate::voxel::voxelizer::Voxelizer;
    use std::collections::HashSet;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(&DispatchConfig {
            max_group_count: 65_535,
            worker_threads: 4,
        })
        .unwrap()
    }

    fn fragments_at(depth: u8, coords: &[UVec3], color: Vec3) -> FragmentBuffer {
        let colored: Vec<(UVec3, Vec3)> = coords.iter().map(|&coord| (coord, color)).collect();
        colored_fragments(depth, &colored)
    }

    fn colored_fragments(depth: u8, voxels: &[(UVec3, Vec3)]) -> FragmentBuffer {
        let buffer = FragmentBuffer::new(voxels.len().max(1) as u32);
        let resolution = (1u32 << depth) as f32;
        let granted = buffer.counter().reserve(voxels.len() as u32);
        for (i, (coord, color)) in voxels.iter().enumerate() {
            let position = (coord.as_vec3() + 0.5) / resolution;
            let fragment = VoxelFragment::new(position, Vec3::Y, codec::pack_rgb(*color), 0);
            buffer.storage().write(granted as usize + i, &fragment);
        }
        buffer
    }

    /// Deterministic coordinates in `[0, 2^depth)^3`
    fn scattered_coords(count: u32, depth: u8, seed: u32) -> Vec<UVec3> {
        let mut state = seed.wrapping_mul(747_796_405).wrapping_add(1);
        let mut next = move || {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 16) & ((1 << depth) - 1)
        };
        (0..count).map(|_| UVec3::new(next(), next(), next())).collect()
    }

    fn builder(depth: u8, capacity: u32) -> OctreeBuilder {
        OctreeBuilder::new(&OctreeConfig {
            max_depth: depth,
            node_capacity: capacity,
        })
    }

    #[test]
    fn test_octant_at() {
        let coord = UVec3::new(0b10, 0b01, 0b11);
        assert_eq!(octant_at(coord, 0), 0b110);
        assert_eq!(octant_at(coord, 1), 0b101);
    }

    #[test]
    fn test_empty_build_is_bare_root() {
        let fragments = FragmentBuffer::new(16);
        let volume = VoxelVolume::new(Vec3::ZERO, 2.0, 3);
        let (octree, report) = builder(3, 64).build(&dispatcher(), &fragments, volume).unwrap();

        assert!(octree.is_empty());
        assert_eq!(octree.node_count(), 1);
        assert_eq!(report.leaf_count, 0);
        assert_eq!(report.depth_reached, 0);
        assert!(!report.saturated);
    }

    #[test]
    fn test_depth_one_single_fragment() {
        let fragments = fragments_at(1, &[UVec3::new(1, 1, 1)], Vec3::X);
        let volume = VoxelVolume::new(Vec3::ZERO, 2.0, 1);
        let mut builder = builder(1, 64);
        let (octree, report) = builder.build(&dispatcher(), &fragments, volume).unwrap();

        let root = octree.root();
        assert!(root.is_occupied());
        assert!(root.is_subdivided());
        assert_eq!(root.children, [1, 2, 3, 4, 5, 6, 7, 8]);

        // Only octant 7 (+x +y +z) became a leaf
        for octant in 0..8u8 {
            let child = octree.node(root.children[octant as usize]).unwrap();
            assert_eq!(child.is_filled_leaf(), octant == 7, "octant {octant}");
        }
        assert_eq!(report.node_count, 9);
        assert_eq!(report.pool_nodes, 9);
        assert_eq!(report.leaf_count, 1);
        assert_eq!(report.depth_reached, 1);

        assert_eq!(builder.levels()[1], BuildInfo::for_range(1, 8));
        assert_eq!(builder.state(), BuildState::Done);
    }

    #[test]
    fn test_state_sequence() {
        let fragments = fragments_at(2, &[UVec3::new(3, 0, 2)], Vec3::ONE);
        let mut builder = builder(2, 64);
        let dispatcher = dispatcher();

        let mut states = vec![builder.state()];
        while builder.state() != BuildState::Done {
            states.push(builder.step(&dispatcher, &fragments).unwrap());
        }
        assert_eq!(
            states,
            vec![
                BuildState::Clear,
                BuildState::Flag(0),
                BuildState::Allocate(0),
                BuildState::Advance(0),
                BuildState::Flag(1),
                BuildState::Allocate(1),
                BuildState::Advance(1),
                BuildState::Flag(2),
                BuildState::StoreLeaves,
                BuildState::Filter(1),
                BuildState::Filter(0),
                BuildState::Done,
            ]
        );
        assert_eq!(builder.levels()[2], BuildInfo::for_range(9, 8));
    }

    #[test]
    fn test_every_fragment_lands_in_one_leaf() {
        let coords: Vec<UVec3> = (0..64u32)
            .map(|i| UVec3::new(i % 8, (i * 3) % 8, (i * 5) % 8))
            .collect();
        let fragments = fragments_at(3, &coords, Vec3::splat(0.5));
        let volume = VoxelVolume::new(Vec3::ZERO, 8.0, 3);
        let (octree, report) = builder(3, 4096).build(&dispatcher(), &fragments, volume).unwrap();
        assert!(!report.saturated);

        let mut samples = 0;
        for fragment in fragments.to_vec() {
            let leaf = octree.find_leaf(fragment.position()).expect("fragment has a leaf");
            assert_eq!(leaf.depth, 3);
            assert_eq!(leaf.coord, fragment.voxel_coord(3));
            samples += 1;
        }
        assert_eq!(samples, 64);
        let total: u32 = octree.leaves().map(|leaf| leaf.attributes.samples).sum();
        assert_eq!(total, 64);
    }

    #[test]
    fn test_pool_exhaustion_truncates() {
        // Two far-apart fragments need 1 + 8 + 2 * 8 + 2 * 8 nodes at depth 3
        let coords = [UVec3::new(0, 0, 0), UVec3::new(7, 7, 7)];
        let fragments = fragments_at(3, &coords, Vec3::ONE);
        let volume = VoxelVolume::new(Vec3::ZERO, 8.0, 3);
        let (octree, report) = builder(3, 20).build(&dispatcher(), &fragments, volume).unwrap();

        assert!(report.saturated);
        assert!(report.truncated_nodes > 0);
        assert!(octree.node_count() <= 20);

        // Every fragment still resolves to exactly one (possibly shallow) leaf
        for fragment in fragments.to_vec() {
            let leaf = octree.find_leaf(fragment.position()).expect("fragment has a leaf");
            assert!(leaf.depth < 3 || !octree.node(leaf.node).unwrap().is_truncated());
        }
        let truncated: Vec<_> = octree
            .leaves()
            .filter(|leaf| octree.node(leaf.node).is_some_and(|n| n.is_truncated()))
            .collect();
        assert!(!truncated.is_empty());
        // Fragments below a truncated leaf are averaged into it
        for leaf in truncated {
            assert!(leaf.attributes.samples > 0);
            assert!((leaf.attributes.color - Vec3::ONE).abs().max_element() < 1.0 / 255.0);
        }
    }

    #[test]
    fn test_partial_grant_counts_linked_nodes() {
        // Root takes 1..9; the two level-1 nodes ask for 16 slots but only
        // 11 remain, so the second batch is cut to 3 and those stay unlinked
        let coords = [UVec3::new(0, 0, 0), UVec3::new(7, 7, 7)];
        let fragments = fragments_at(3, &coords, Vec3::ONE);
        let volume = VoxelVolume::new(Vec3::ZERO, 8.0, 3);
        let (octree, report) = builder(3, 20).build(&dispatcher(), &fragments, volume).unwrap();

        assert_eq!(report.pool_nodes, 20);
        assert_eq!(octree.node_count(), 20);
        assert_eq!(report.node_count, 17);
        assert_eq!(report.truncated_nodes, 2);
        assert_eq!(report.leaf_count, 2);
    }

    #[test]
    fn test_multigroup_pool_invariants() {
        let dispatcher = dispatcher();
        let volume = VoxelVolume::new(Vec3::ZERO, 32.0, 5);

        for capacity in [1, 9, 100, 777, 3000, 65_536] {
            for seed in 0..3 {
                let coords = scattered_coords(5000, 5, seed);
                let fragments = fragments_at(5, &coords, Vec3::splat(0.5));
                let (octree, report) = builder(5, capacity).build(&dispatcher, &fragments, volume).unwrap();
                let nodes = octree.nodes_slice();
                assert!(nodes.len() as u32 <= capacity);
                assert!(report.node_count <= report.pool_nodes);

                // Child batches are disjoint and inside the pool
                let mut seen = HashSet::new();
                for node in nodes.iter().filter(|node| node.is_subdivided()) {
                    for child in node.children {
                        assert!(child != 0 && (child as usize) < nodes.len(), "capacity {capacity}");
                        assert!(seen.insert(child), "child {child} shared at capacity {capacity}");
                    }
                }

                for fragment in fragments.to_vec() {
                    let leaf = octree
                        .find_leaf(fragment.position())
                        .unwrap_or_else(|| panic!("fragment lost at capacity {capacity}"));
                    let node = octree.node(leaf.node).unwrap();
                    assert!(leaf.depth == 5 || node.is_truncated(), "capacity {capacity}");
                }
                assert_eq!(report.saturated, report.truncated_nodes > 0);
            }
        }
    }

    #[test]
    fn test_filter_averages_children() {
        let red = Vec3::new(1.0, 0.0, 0.0);
        let blue = Vec3::new(0.0, 0.0, 1.0);
        let fragments = colored_fragments(2, &[(UVec3::ZERO, red), (UVec3::splat(3), blue)]);
        let volume = VoxelVolume::new(Vec3::ZERO, 4.0, 2);
        let (octree, _) = builder(2, 256).build(&dispatcher(), &fragments, volume).unwrap();

        // Each level-1 parent holds one leaf and copies it
        let near = octree.sample(Vec3::splat(0.1), 1).unwrap();
        let far = octree.sample(Vec3::splat(0.9), 1).unwrap();
        assert!((near.color - red).abs().max_element() < 1.0 / 255.0);
        assert!((far.color - blue).abs().max_element() < 1.0 / 255.0);

        let root = octree.node_attributes(0).unwrap();
        assert!((root.color - (red + blue) * 0.5).abs().max_element() < 1.5 / 255.0);
        assert!((root.normal - Vec3::Y).length() < 0.02);
        assert_eq!(root.samples, 2);
        assert_eq!(octree.sample(Vec3::splat(0.5), 0), Some(root));
    }

    #[test]
    fn test_unit_triangle_builds_one_subdivided_root() {
        let dispatcher = dispatcher();
        let volume = VoxelVolume::new(Vec3::ZERO, 2.0, 1);
        let triangle = DrawCall::new(
            [Vec3::ZERO, Vec3::X, Vec3::Y]
                .map(|p| Vertex::new(p, Vec3::Z, Vec2::ZERO))
                .to_vec(),
            vec![0, 1, 2],
            SurfaceMaterial::diffuse(Vec3::new(1.0, 0.0, 0.0)),
        );
        let mut fragments = FragmentBuffer::new(64);
        let voxelized = Voxelizer::new(volume)
            .voxelize(&dispatcher, &[triangle], &mut fragments)
            .unwrap();
        assert_eq!(voxelized.emitted, 1);

        let (octree, report) = builder(1, 64).build(&dispatcher, &fragments, volume).unwrap();
        let subdivided: Vec<usize> = (0..octree.node_count())
            .filter(|&i| octree.nodes_slice()[i].is_subdivided())
            .collect();
        assert_eq!(subdivided, vec![0]);
        assert_eq!(report.leaf_count, 1);

        let leaf = octree.leaves().next().unwrap();
        assert_eq!(leaf.coord, UVec3::new(1, 1, 1));
        assert!((leaf.attributes.normal - Vec3::Z).length() < 0.02);
        let root = octree.node_attributes(0).unwrap();
        assert!((root.color - Vec3::X).abs().max_element() < 1.0 / 255.0);
    }

    #[test]
    fn test_rebuild_resets_pool() {
        let dispatcher = dispatcher();
        let volume = VoxelVolume::new(Vec3::ZERO, 8.0, 3);
        let mut builder = builder(3, 256);

        let dense = fragments_at(3, &[UVec3::ZERO, UVec3::splat(7), UVec3::new(7, 0, 0)], Vec3::ONE);
        let (first, _) = builder.build(&dispatcher, &dense, volume).unwrap();
        let single = fragments_at(3, &[UVec3::new(4, 4, 4)], Vec3::ONE);
        let (second, _) = builder.build(&dispatcher, &single, volume).unwrap();

        assert!(first.leaf_count() == 3);
        assert_eq!(second.leaf_count(), 1);
        assert_eq!(second.node_count(), 1 + 8 * 3);
    }

    #[test]
    fn test_voxelized_quad_builds_a_slab() {
        let dispatcher = dispatcher();
        let volume = VoxelVolume::new(Vec3::ZERO, 4.0, 3);
        let mut fragments = FragmentBuffer::new(4096);
        let draw = DrawCall::quad(4.0, SurfaceMaterial::diffuse(Vec3::new(0.0, 1.0, 0.0)))
            .with_transform(crate::core::types::Mat4::from_translation(Vec3::new(0.0, 0.0, 0.1)));
        Voxelizer::new(volume)
            .voxelize(&dispatcher, &[draw], &mut fragments)
            .unwrap();

        let (octree, _) = builder(3, 1 << 12).build(&dispatcher, &fragments, volume).unwrap();
        assert_eq!(octree.leaf_count(), 64);
        for leaf in octree.leaves() {
            assert_eq!(leaf.coord.z, 4);
            assert!(leaf.attributes.color.y > 0.99);
            assert!((leaf.attributes.normal - Vec3::Z).length() < 0.02);
        }
    }
}
