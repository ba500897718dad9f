//! Conservative triangle voxelizer
//!
//! One lane per triangle. Each triangle is projected along the axis where its
//! face normal is largest, rasterized over its half-pixel dilated bounding box
//! and emits one fragment per covered pixel at the depth of the triangle plane.
//! A lane collects its fragments locally; the group then reserves space for all
//! of them with a single atomic and copies them into the fragment buffer.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::compute::aggregator::Reservation;
use crate::compute::dispatch::{DispatchIndirectArgs, Dispatcher};
use crate::core::types::{Mat3, Result, UVec3, Vec2, Vec3};

use super::codec;
use super::fragment::{FragmentBuffer, VoxelFragment};
use super::mesh::DrawCall;
use super::volume::VoxelVolume;

/// Squared face-normal length below which a triangle counts as zero-area
const DEGENERATE_AREA_SQ: f32 = 1e-12;

/// Outcome of one voxelization pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VoxelizeReport {
    pub triangles: u32,
    /// Zero-area or malformed triangles, skipped without output
    pub degenerate_triangles: u32,
    /// Fragments stored in the buffer
    pub emitted: u32,
    /// Fragments produced, including those dropped at capacity
    pub requested: u32,
    pub saturated: bool,
}

/// Triangle in grid space with world-space vertex normals
#[derive(Clone, Copy, Debug)]
struct Triangle {
    grid: [Vec3; 3],
    normals: [Vec3; 3],
    color: u32,
    emissive: u32,
}

/// Projection of a triangle onto its dominant plane
#[derive(Clone, Copy, Debug)]
struct TriangleSetup {
    /// Dominant axis: 0 = x, 1 = y, 2 = z
    axis: usize,
    /// Projected vertices
    projected: [Vec2; 3],
    /// Depth of each vertex along the dominant axis
    depths: [f32; 3],
    /// Face normal in projected (a, b, depth) order
    face_normal: Vec3,
    /// Inclusive pixel range covered by the dilated bounding box
    pixel_min: [i64; 2],
    pixel_max: [i64; 2],
}

/// Reorder a grid-space vector into (a, b, depth) for the given dominant axis
fn project(v: Vec3, axis: usize) -> Vec3 {
    match axis {
        0 => Vec3::new(v.y, v.z, v.x),
        1 => Vec3::new(v.z, v.x, v.y),
        _ => v,
    }
}

/// Inverse of `project`
fn unproject(v: Vec3, axis: usize) -> Vec3 {
    match axis {
        0 => Vec3::new(v.z, v.x, v.y),
        1 => Vec3::new(v.y, v.z, v.x),
        _ => v,
    }
}

/// Axis with the largest absolute normal component, ties prefer z then y
fn dominant_axis(normal: Vec3) -> usize {
    let a = normal.abs();
    if a.z >= a.x && a.z >= a.y {
        2
    } else if a.y >= a.x {
        1
    } else {
        0
    }
}

fn cross2(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

impl TriangleSetup {
    fn new(grid: [Vec3; 3], resolution: u32) -> Option<Self> {
        let face = (grid[1] - grid[0]).cross(grid[2] - grid[0]);
        if !face.is_finite() || face.length_squared() < DEGENERATE_AREA_SQ {
            return None;
        }

        let axis = dominant_axis(face);
        let p = grid.map(|v| project(v, axis));
        let projected = p.map(|v| v.truncate());
        let depths = p.map(|v| v.z);

        let lo = projected[0].min(projected[1]).min(projected[2]) - 0.5;
        let hi = projected[0].max(projected[1]).max(projected[2]) + 0.5;

        // Pixel i spans [i, i + 1]; keep pixels whose centre lies in [lo, hi]
        let last = resolution as i64 - 1;
        let first_pixel = |v: f32| ((v - 0.5).ceil() as i64).clamp(0, last + 1);
        let last_pixel = |v: f32| ((v - 0.5).floor() as i64).clamp(-1, last);

        Some(Self {
            axis,
            projected,
            depths,
            face_normal: project(face, axis),
            pixel_min: [first_pixel(lo.x), first_pixel(lo.y)],
            pixel_max: [last_pixel(hi.x), last_pixel(hi.y)],
        })
    }

    /// Plane depth at a projected point, kept within the triangle's depth span
    fn depth_at(&self, p: Vec2) -> f32 {
        let n = self.face_normal;
        let d = p - self.projected[0];
        let depth = self.depths[0] - (n.x * d.x + n.y * d.y) / n.z;
        let lo = self.depths[0].min(self.depths[1]).min(self.depths[2]);
        let hi = self.depths[0].max(self.depths[1]).max(self.depths[2]);
        depth.clamp(lo, hi)
    }

    /// Conservative coverage of the pixel centred at `p`: the pixel square
    /// must overlap the triangle, not merely touch it. Returns the barycentric
    /// weights of the centre (clamped to the triangle) when covered.
    fn coverage(&self, p: Vec2) -> Option<[f32; 3]> {
        let q = &self.projected;
        let area = cross2(q[1] - q[0], q[2] - q[0]);
        let winding = area.signum();

        let mut edges = [0.0f32; 3];
        for k in 0..3 {
            let from = q[k];
            let to = q[(k + 1) % 3];
            let edge = to - from;
            let e = cross2(edge, p - from) * winding;
            // Half-pixel extent projected onto the edge normal
            if e + 0.5 * (edge.x.abs() + edge.y.abs()) <= 0.0 {
                return None;
            }
            edges[k] = e;
        }

        // Edge k is opposite vertex (k + 2) % 3
        let weights = [edges[1], edges[2], edges[0]].map(|e| (e / area.abs()).max(0.0));
        let sum: f32 = weights.iter().sum();
        if sum > 0.0 {
            Some(weights.map(|w| w / sum))
        } else {
            Some([1.0 / 3.0; 3])
        }
    }
}

/// Turns draw calls into fragments inside a `VoxelVolume`
#[derive(Clone, Copy, Debug)]
pub struct Voxelizer {
    volume: VoxelVolume,
}

impl Voxelizer {
    pub fn new(volume: VoxelVolume) -> Self {
        Self { volume }
    }

    pub fn volume(&self) -> &VoxelVolume {
        &self.volume
    }

    /// Voxelize every triangle of `draws` into `fragments`.
    ///
    /// The buffer is cleared first. Running out of space drops fragments and
    /// sets `saturated`; the only error is a rejected dispatch.
    pub fn voxelize(
        &self,
        dispatcher: &Dispatcher,
        draws: &[DrawCall],
        fragments: &mut FragmentBuffer,
    ) -> Result<VoxelizeReport> {
        fragments.clear();

        let mut first_triangle = Vec::with_capacity(draws.len());
        let mut triangles = 0u32;
        for draw in draws {
            first_triangle.push(triangles);
            triangles += draw.triangle_count();
        }
        let normal_matrices: Vec<Mat3> = draws.iter().map(DrawCall::normal_matrix).collect();

        let degenerate = AtomicU32::new(0);
        let buffer: &FragmentBuffer = fragments;

        dispatcher.dispatch_1d("voxelize", DispatchIndirectArgs::for_items(triangles), |group| {
            let scratch: Vec<Vec<VoxelFragment>> = group
                .lanes()
                .map(|lane| {
                    let mut out = Vec::new();
                    if lane < triangles {
                        let rasterized = self
                            .fetch_triangle(draws, &first_triangle, &normal_matrices, lane)
                            .is_some_and(|tri| self.rasterize(&tri, &mut out));
                        if !rasterized {
                            degenerate.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    out
                })
                .collect();

            let requests: Vec<u32> = scratch.iter().map(|f| f.len() as u32).collect();
            let reservations = group.reserve(buffer.counter(), &requests, buffer.capacity());

            for (lane_fragments, reservation) in scratch.iter().zip(reservations) {
                if let Reservation::Granted { base, len } = reservation {
                    for (offset, fragment) in lane_fragments.iter().take(len as usize).enumerate() {
                        buffer.storage().write(base as usize + offset, fragment);
                    }
                }
            }
        })?;

        let report = VoxelizeReport {
            triangles,
            degenerate_triangles: degenerate.into_inner(),
            emitted: buffer.len(),
            requested: buffer.requested(),
            saturated: buffer.is_saturated(),
        };

        if report.saturated {
            log::warn!(
                "Fragment buffer saturated: {} of {} fragments dropped",
                report.requested - report.emitted,
                report.requested
            );
        }
        log::debug!(
            "Voxelized {} triangles ({} degenerate) into {} fragments",
            report.triangles, report.degenerate_triangles, report.emitted
        );

        Ok(report)
    }

    /// Gather triangle `index` across all draw calls into grid space.
    /// `None` for out-of-range vertex indices.
    fn fetch_triangle(
        &self,
        draws: &[DrawCall],
        first_triangle: &[u32],
        normal_matrices: &[Mat3],
        index: u32,
    ) -> Option<Triangle> {
        let draw_index = first_triangle.partition_point(|&first| first <= index).checked_sub(1)?;
        let draw = draws.get(draw_index)?;
        let local = (index - first_triangle[draw_index]) as usize;

        let mut grid = [Vec3::ZERO; 3];
        let mut normals = [Vec3::ZERO; 3];
        for corner in 0..3 {
            let vertex = draw.vertices.get(*draw.indices.get(local * 3 + corner)? as usize)?;
            grid[corner] = self
                .volume
                .world_to_grid(draw.transform.transform_point3(vertex.position));
            normals[corner] = (normal_matrices[draw_index] * vertex.normal).normalize_or_zero();
        }

        Some(Triangle {
            grid,
            normals,
            color: codec::pack_unorm4x8(draw.material.base_color),
            emissive: codec::pack_rgb(draw.material.emissive),
        })
    }

    /// Emit fragments for one triangle. Returns false for degenerate input.
    fn rasterize(&self, tri: &Triangle, out: &mut Vec<VoxelFragment>) -> bool {
        let resolution = self.volume.resolution();
        let Some(setup) = TriangleSetup::new(tri.grid, resolution) else {
            return false;
        };

        for b in setup.pixel_min[1]..=setup.pixel_max[1] {
            for a in setup.pixel_min[0]..=setup.pixel_max[0] {
                let center = Vec2::new(a as f32 + 0.5, b as f32 + 0.5);
                let Some(weights) = setup.coverage(center) else {
                    continue;
                };

                let depth = setup.depth_at(center).floor();
                if depth < 0.0 || depth >= resolution as f32 {
                    continue;
                }

                let normal = tri.normals[0] * weights[0]
                    + tri.normals[1] * weights[1]
                    + tri.normals[2] * weights[2];
                if normal.length_squared() < 1e-12 {
                    continue;
                }

                let coord = unproject(Vec3::new(a as f32, b as f32, depth), setup.axis).as_uvec3();
                out.push(VoxelFragment::new(
                    voxel_center_normalized(coord, resolution),
                    normal.normalize(),
                    tri.color,
                    tri.emissive,
                ));
            }
        }
        true
    }
}

fn voxel_center_normalized(coord: UVec3, resolution: u32) -> Vec3 {
    (coord.as_vec3() + 0.5) / resolution as f32
}
