//! Ray type and slab intersection

use crate::core::types::Vec3;
use super::aabb::Aabb;

/// Direction components smaller than this are nudged away from zero so the
/// reciprocal stays finite and slab tests never produce `0 * inf`.
const DIRECTION_EPSILON: f32 = 1e-12;

/// A ray defined by origin and direction
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    /// Precomputed 1/direction for fast AABB intersection
    pub inv_direction: Vec3,
}

impl Ray {
    /// Create a new ray (direction should be normalized)
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        let nudge = |d: f32| {
            if d.abs() > DIRECTION_EPSILON {
                d
            } else if d >= 0.0 {
                DIRECTION_EPSILON
            } else {
                -DIRECTION_EPSILON
            }
        };
        let safe = Vec3::new(nudge(direction.x), nudge(direction.y), nudge(direction.z));
        Self {
            origin,
            direction,
            inv_direction: safe.recip(),
        }
    }

    /// Get point along ray at parameter t
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Ray-AABB intersection using slab method
    /// Returns Some((t_near, t_far)) if intersection, None otherwise
    pub fn intersects_aabb(&self, aabb: &Aabb) -> Option<(f32, f32)> {
        let t1 = (aabb.min - self.origin) * self.inv_direction;
        let t2 = (aabb.max - self.origin) * self.inv_direction;

        let t_min = t1.min(t2);
        let t_max = t1.max(t2);

        let t_near = t_min.max_element();
        let t_far = t_max.min_element();

        if t_near <= t_far && t_far >= 0.0 {
            Some((t_near.max(0.0), t_far))
        } else {
            None
        }
    }
}
