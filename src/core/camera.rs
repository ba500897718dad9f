//! Camera and per-frame camera matrices
//!
//! Conventions: right-handed view space with the camera looking down -Z,
//! `perspective_rh` projection so NDC depth spans [0, 1] (0 = near plane).

use bytemuck::{Pod, Zeroable};

use crate::core::types::{Mat3, Mat4, Quat, Vec3};
use crate::math::frustum::Frustum;

/// Camera with position, rotation, and projection parameters
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    /// World position
    pub position: Vec3,
    /// Rotation as quaternion
    pub rotation: Quat,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Aspect ratio (width / height)
    pub aspect: f32,
    /// Near clip plane
    pub near: f32,
    /// Far clip plane
    pub far: f32,
}

impl Camera {
    /// Create a new camera
    pub fn new(position: Vec3, fov_y_degrees: f32, aspect: f32) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near: 0.1,
            far: 100.0,
        }
    }

    /// Create camera looking at a target
    pub fn look_at(position: Vec3, target: Vec3, up: Vec3) -> Self {
        let forward = (target - position).normalize();
        let right = forward.cross(up).normalize();
        let up = right.cross(forward);

        let rotation = Quat::from_mat3(&Mat3::from_cols(right, up, -forward));

        Self {
            rotation,
            ..Self::new(position, 60.0, 16.0 / 9.0)
        }
    }

    /// Get view matrix (world to camera space)
    pub fn view_matrix(&self) -> Mat4 {
        let rotation_matrix = Mat4::from_quat(self.rotation.conjugate());
        let translation_matrix = Mat4::from_translation(-self.position);
        rotation_matrix * translation_matrix
    }

    /// Get projection matrix (camera to clip space)
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    /// Snapshot the matrices consumed by the reflection tracer this frame
    pub fn matrices(&self) -> CameraMatrices {
        CameraMatrices::new(self.view_matrix(), self.projection_matrix())
    }

    /// Get forward direction (negative Z in camera space)
    pub fn forward(&self) -> Vec3 {
        self.rotation * -Vec3::Z
    }

    /// Update aspect ratio (call on window resize)
    pub fn set_aspect(&mut self, width: f32, height: f32) {
        self.aspect = width / height;
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 0.0, 5.0), 60.0, 16.0 / 9.0)
    }
}

/// Camera state supplied once per frame: view, projection and their inverses.
///
/// Laid out like the shader-side camera block so it can be uploaded as-is.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct CameraMatrices {
    pub view: Mat4,
    pub proj: Mat4,
    pub view_inv: Mat4,
    pub proj_inv: Mat4,
    pub view_proj: Mat4,
    pub view_proj_inv: Mat4,
}

impl CameraMatrices {
    /// Build the full set from externally supplied view and projection
    pub fn new(view: Mat4, proj: Mat4) -> Self {
        let view_proj = proj * view;
        Self {
            view,
            proj,
            view_inv: view.inverse(),
            proj_inv: proj.inverse(),
            view_proj,
            view_proj_inv: view_proj.inverse(),
        }
    }

    /// Camera position in world space
    pub fn position(&self) -> Vec3 {
        self.view_inv.w_axis.truncate()
    }

    /// Near plane distance recovered from the projection
    ///
    /// For `perspective_rh`, `proj.z_axis.z = f / (n - f)` and
    /// `proj.w_axis.z = n * f / (n - f)`, so `n = w_axis.z / z_axis.z`.
    pub fn near(&self) -> f32 {
        self.proj.w_axis.z / self.proj.z_axis.z
    }

    /// The six culling planes of this view
    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(&self.view_proj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directions() {
        let camera = Camera::default();

        // Default camera looks down -Z
        let forward = camera.forward();
        assert!((forward.z - (-1.0)).abs() < 0.001);
    }

    #[test]
    fn test_view_matrix_translation() {
        let mut camera = Camera::default();
        camera.position = Vec3::new(10.0, 0.0, 0.0);

        let view = camera.view_matrix();
        // View matrix should translate world origin to (-10, 0, 0) in camera space
        let origin_in_camera = view.transform_point3(Vec3::ZERO);
        assert!((origin_in_camera.x - (-10.0)).abs() < 0.001);
    }

    #[test]
    fn test_look_at_faces_target() {
        let camera = Camera::look_at(Vec3::new(0.0, 2.0, 8.0), Vec3::new(0.0, 2.0, 0.0), Vec3::Y);
        let target_in_view = camera.view_matrix().transform_point3(Vec3::new(0.0, 2.0, 0.0));
        assert!(target_in_view.x.abs() < 1e-4);
        assert!(target_in_view.y.abs() < 1e-4);
        assert!((target_in_view.z + 8.0).abs() < 1e-4);
    }

    #[test]
    fn test_matrices_inverses() {
        let matrices = Camera::default().matrices();
        let identity = matrices.view_proj * matrices.view_proj_inv;
        assert!(identity.abs_diff_eq(Mat4::IDENTITY, 1e-4));
        assert!((matrices.position() - Vec3::new(0.0, 0.0, 5.0)).length() < 1e-4);
    }

    #[test]
    fn test_near_recovered_from_projection() {
        let camera = Camera::default();
        assert!((camera.matrices().near() - camera.near).abs() < 1e-4);
    }
}
