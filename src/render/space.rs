//! Conversions between world, view and screen space
//!
//! Screen space is `(u, v, depth)`: `u = ndc.x * 0.5 + 0.5`,
//! `v = ndc.y * 0.5 + 0.5` (no vertical flip, v = 0 is the bottom row) and
//! `depth` is NDC depth in [0, 1] with 0 on the near plane.

use crate::core::camera::CameraMatrices;
use crate::core::types::{Mat4, Vec2, Vec3, Vec4};

/// NDC xy in [-1, 1] to uv in [0, 1]
#[inline]
pub fn ndc_to_uv(ndc: Vec2) -> Vec2 {
    ndc * 0.5 + 0.5
}

#[inline]
pub fn uv_to_ndc(uv: Vec2) -> Vec2 {
    uv * 2.0 - 1.0
}

/// Centre of pixel `(x, y)` in uv space
#[inline]
pub fn pixel_to_uv(x: u32, y: u32, width: u32, height: u32) -> Vec2 {
    Vec2::new((x as f32 + 0.5) / width as f32, (y as f32 + 0.5) / height as f32)
}

fn project(m: &Mat4, p: Vec3) -> Vec3 {
    let clip = *m * p.extend(1.0);
    let ndc = clip.truncate() / clip.w;
    ndc_to_uv(ndc.truncate()).extend(ndc.z)
}

fn unproject(m: &Mat4, screen: Vec3) -> Vec3 {
    let ndc = uv_to_ndc(screen.truncate());
    let p: Vec4 = *m * Vec4::new(ndc.x, ndc.y, screen.z, 1.0);
    p.truncate() / p.w
}

pub fn world_to_screen(camera: &CameraMatrices, world: Vec3) -> Vec3 {
    project(&camera.view_proj, world)
}

pub fn view_to_screen(camera: &CameraMatrices, view: Vec3) -> Vec3 {
    project(&camera.proj, view)
}

pub fn screen_to_world(camera: &CameraMatrices, screen: Vec3) -> Vec3 {
    unproject(&camera.view_proj_inv, screen)
}

pub fn screen_to_view(camera: &CameraMatrices, screen: Vec3) -> Vec3 {
    unproject(&camera.proj_inv, screen)
}

/// Positive view-space distance along -Z for an NDC depth
pub fn linear_depth(camera: &CameraMatrices, depth: f32) -> f32 {
    let p = camera.proj_inv * Vec4::new(0.0, 0.0, depth, 1.0);
    -p.z / p.w
}
