//! View frustum for culling octree nodes

use crate::core::types::{Mat4, Vec3, Vec4};

/// A plane defined by normal and distance from origin
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    /// Plane from packed `(normal.xyz, distance)`, normalized.
    pub fn from_vec4(plane: Vec4) -> Self {
        let normal = plane.truncate();
        let len = normal.length();
        if len > 0.0 {
            Self {
                normal: normal / len,
                distance: plane.w / len,
            }
        } else {
            // Degenerate rows accept everything
            Self {
                normal: Vec3::ZERO,
                distance: 0.0,
            }
        }
    }

    /// Signed distance from point to plane (positive = in front)
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }

    /// Projection of a box's half-extent onto the plane normal
    pub fn projected_radius(&self, half_extent: Vec3) -> f32 {
        self.normal.abs().dot(half_extent)
    }
}

/// View frustum with 6 planes (Left, Right, Bottom, Top, Near, Far), normals
/// pointing inwards.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Use externally supplied planes as-is
    pub fn from_planes(planes: [Plane; 6]) -> Self {
        Self { planes }
    }

    /// Extract frustum planes from a view-projection matrix (Gribb/Hartmann).
    ///
    /// Assumes the [0, 1] clip depth of `perspective_rh`, so the near plane is
    /// row 2 alone rather than row 3 + row 2.
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let m = vp.transpose();
        let (row0, row1, row2, row3) = (m.x_axis, m.y_axis, m.z_axis, m.w_axis);

        Self {
            planes: [
                Plane::from_vec4(row3 + row0), // left
                Plane::from_vec4(row3 - row0), // right
                Plane::from_vec4(row3 + row1), // bottom
                Plane::from_vec4(row3 - row1), // top
                Plane::from_vec4(row2),        // near
                Plane::from_vec4(row3 - row2), // far
            ],
        }
    }

    /// Conservative node visibility test.
    ///
    /// A node is culled as soon as one plane has the whole box on its negative
    /// side, i.e. `distance(center) < -radius` where `radius` is the half-extent
    /// projected on the plane normal. Boxes straddling a plane stay visible.
    pub fn is_node_visible(&self, center: Vec3, half_extent: Vec3) -> bool {
        for plane in &self.planes {
            if plane.distance_to_point(center) < -plane.projected_radius(half_extent) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frustum() -> Frustum {
        let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        Frustum::from_view_projection(&(proj * view))
    }

    #[test]
    fn test_plane_distance() {
        let plane = Plane::new(Vec3::Y, 0.0); // XZ plane
        assert_eq!(plane.distance_to_point(Vec3::new(0.0, 5.0, 0.0)), 5.0);
        assert_eq!(plane.distance_to_point(Vec3::new(0.0, -3.0, 0.0)), -3.0);
    }

    #[test]
    fn test_planes_normalized() {
        for plane in &test_frustum().planes {
            assert!((plane.normal.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_near_plane_uses_zero_depth() {
        let frustum = test_frustum();
        // Camera at z=5 looking at -Z with near = 0.1: near plane sits at z=4.9
        assert!(frustum.is_node_visible(Vec3::new(0.0, 0.0, 4.85), Vec3::ZERO));
        assert!(!frustum.is_node_visible(Vec3::new(0.0, 0.0, 4.95), Vec3::ZERO));
    }

    #[test]
    fn test_node_fully_inside_is_visible() {
        assert!(test_frustum().is_node_visible(Vec3::ZERO, Vec3::splat(0.5)));
    }

    #[test]
    fn test_node_fully_outside_is_culled() {
        let frustum = test_frustum();
        // Behind the camera
        assert!(!frustum.is_node_visible(Vec3::new(0.0, 0.0, 20.0), Vec3::splat(1.0)));
        // Far off to the side
        assert!(!frustum.is_node_visible(Vec3::new(50.0, 0.0, 0.0), Vec3::splat(1.0)));
        // Beyond the far plane
        assert!(!frustum.is_node_visible(Vec3::new(0.0, 0.0, -200.0), Vec3::splat(1.0)));
    }

    #[test]
    fn test_node_straddling_plane_is_visible() {
        let frustum = test_frustum();
        // 90 degree fov: at distance 5 the right plane passes through x = 5
        assert!(!frustum.is_node_visible(Vec3::new(6.0, 0.0, 0.0), Vec3::ZERO));
        assert!(frustum.is_node_visible(Vec3::new(6.0, 0.0, 0.0), Vec3::splat(2.0)));
    }
}
