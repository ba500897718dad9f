//! Axis-aligned bounding box

use crate::core::types::Vec3;

/// Axis-aligned bounding box defined by min and max corners
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create AABB from min and max corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create AABB from center and half-extents
    pub fn from_center_half_extent(center: Vec3, half_extent: Vec3) -> Self {
        Self {
            min: center - half_extent,
            max: center + half_extent,
        }
    }

    /// Cube of edge length `size` around `center`
    pub fn cube(center: Vec3, size: f32) -> Self {
        Self::from_center_half_extent(center, Vec3::splat(size * 0.5))
    }

    /// Get center point
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get size (max - min)
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Get half-extents
    pub fn half_extent(&self) -> Vec3 {
        self.size() * 0.5
    }

    /// Child octant box; index bit 0 selects +x, bit 1 +y, bit 2 +z.
    pub fn child_octant(&self, index: u8) -> Aabb {
        let center = self.center();
        let half = self.half_extent() * 0.5;

        let offset = Vec3::new(
            if index & 1 != 0 { half.x } else { -half.x },
            if index & 2 != 0 { half.y } else { -half.y },
            if index & 4 != 0 { half.z } else { -half.z },
        );

        Aabb::from_center_half_extent(center + offset, half)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_accessors() {
        let aabb = Aabb::cube(Vec3::splat(1.0), 2.0);
        assert_eq!(aabb.min, Vec3::ZERO);
        assert_eq!(aabb.max, Vec3::splat(2.0));
        assert_eq!(aabb.center(), Vec3::ONE);
        assert_eq!(aabb.half_extent(), Vec3::ONE);
    }

    #[test]
    fn test_child_octants_tile_parent() {
        let parent = Aabb::new(Vec3::ZERO, Vec3::splat(2.0));
        assert_eq!(parent.child_octant(0), Aabb::new(Vec3::ZERO, Vec3::ONE));
        assert_eq!(parent.child_octant(7), Aabb::new(Vec3::ONE, Vec3::splat(2.0)));
        assert_eq!(parent.child_octant(5).min, Vec3::new(1.0, 0.0, 1.0));
    }
}
