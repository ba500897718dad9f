//! Screen-space reflection tracer
//!
//! Each pixel of the G-buffer reflects its view ray about the surface normal
//! and marches the reflected ray in screen space against the depth buffer.
//! Misses can fall back to the voxel octree and its irradiance probes.

use bytemuck::{Pod, Zeroable};

use crate::compute::buffer::StorageBuffer;
use crate::compute::dispatch::{DispatchIndirectArgs, Dispatcher};
use crate::core::camera::CameraMatrices;
use crate::core::config::ReflectionConfig;
use crate::core::error::Error;
use crate::core::types::{Result, Vec2, Vec3};
use crate::irradiance::IrradianceField;
use crate::math::frustum::Frustum;
use crate::math::ray::Ray;
use crate::voxel::svo::Octree;

use super::space::{linear_depth, pixel_to_uv, screen_to_view, view_to_screen};

/// Rec. 709 luma weights
pub const LUMINANCE: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

pub fn luminance(color: Vec3) -> f32 {
    color.dot(LUMINANCE)
}

/// One G-buffer pixel
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GBufferTexel {
    /// NDC depth, 1.0 = sky
    pub depth: f32,
    /// World-space normal
    pub normal: Vec3,
    pub roughness: f32,
    /// Lit scene colour
    pub color: Vec3,
}

impl GBufferTexel {
    pub const SKY: Self = Self {
        depth: 1.0,
        normal: Vec3::Z,
        roughness: 1.0,
        color: Vec3::ZERO,
    };
}

/// Per-pixel surface data, row 0 at the bottom of the screen
#[derive(Clone, Debug)]
pub struct GBuffer {
    width: u32,
    height: u32,
    texels: Vec<GBufferTexel>,
}

impl GBuffer {
    /// A buffer where every pixel is sky
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            texels: vec![GBufferTexel::SKY; width as usize * height as usize],
        }
    }

    pub fn from_texels(width: u32, height: u32, texels: Vec<GBufferTexel>) -> Result<Self> {
        if texels.len() != width as usize * height as usize {
            return Err(Error::InvalidInput(format!(
                "G-buffer of {width}x{height} needs {} texels, got {}",
                width as usize * height as usize,
                texels.len()
            )));
        }
        Ok(Self { width, height, texels })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn texel(&self, x: u32, y: u32) -> &GBufferTexel {
        &self.texels[(y * self.width + x) as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, texel: GBufferTexel) {
        self.texels[(y * self.width + x) as usize] = texel;
    }

    pub fn texels(&self) -> &[GBufferTexel] {
        &self.texels
    }

    /// Pixel containing `uv`, if on screen
    pub fn pixel_at(&self, uv: Vec2) -> Option<(u32, u32)> {
        if !(0.0..1.0).contains(&uv.x) || !(0.0..1.0).contains(&uv.y) {
            return None;
        }
        let x = ((uv.x * self.width as f32) as u32).min(self.width - 1);
        let y = ((uv.y * self.height as f32) as u32).min(self.height - 1);
        Some((x, y))
    }
}

/// Where a reflection sample came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReflectionSource {
    /// Not traced (sky, too rough) or nothing found
    #[default]
    None,
    /// Screen-space hit
    Screen,
    /// Leaf found by the octree fallback
    Octree,
    /// Environment seen by the octree fallback
    Environment,
    /// Hit rejected by the luminance threshold
    Suppressed,
}

impl ReflectionSource {
    fn to_raw(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Screen => 1,
            Self::Octree => 2,
            Self::Environment => 3,
            Self::Suppressed => 4,
        }
    }

    fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Screen,
            2 => Self::Octree,
            3 => Self::Environment,
            4 => Self::Suppressed,
            _ => Self::None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ReflectionSample {
    pub color: Vec3,
    /// Blend weight in [0, 1]
    pub confidence: f32,
    pub source: ReflectionSource,
}

impl ReflectionSample {
    fn found(color: Vec3, confidence: f32, source: ReflectionSource) -> Self {
        Self {
            color,
            confidence,
            source,
        }
    }
}

/// Storage layout of one traced pixel
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct RawSample {
    color: [f32; 3],
    confidence: f32,
    source: u32,
}

impl From<ReflectionSample> for RawSample {
    fn from(sample: ReflectionSample) -> Self {
        Self {
            color: sample.color.to_array(),
            confidence: sample.confidence,
            source: sample.source.to_raw(),
        }
    }
}

impl From<RawSample> for ReflectionSample {
    fn from(raw: RawSample) -> Self {
        Self {
            color: Vec3::from_array(raw.color),
            confidence: raw.confidence,
            source: ReflectionSource::from_raw(raw.source),
        }
    }
}

/// Traced reflections, same layout as the G-buffer
#[derive(Clone, Debug)]
pub struct ReflectionBuffer {
    width: u32,
    height: u32,
    samples: Vec<ReflectionSample>,
}

impl ReflectionBuffer {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn sample(&self, x: u32, y: u32) -> &ReflectionSample {
        &self.samples[(y * self.width + x) as usize]
    }

    pub fn samples(&self) -> &[ReflectionSample] {
        &self.samples
    }

    /// Pixels that received a sample from `source`
    pub fn count(&self, source: ReflectionSource) -> usize {
        self.samples.iter().filter(|s| s.source == source).count()
    }
}

/// Octree and probes published by the last valid rebuild
#[derive(Clone, Copy, Debug)]
pub struct ReflectionScene<'a> {
    pub octree: &'a Octree,
    pub irradiance: &'a IrradianceField,
}

/// Per-pixel screen-space reflection marcher
#[derive(Clone, Debug)]
pub struct ReflectionTracer {
    config: ReflectionConfig,
}

impl ReflectionTracer {
    pub fn new(config: ReflectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReflectionConfig {
        &self.config
    }

    /// March steps for a surface of `roughness`
    pub fn step_count(&self, roughness: f32) -> u32 {
        let t = roughness.clamp(0.0, 1.0);
        let max = self.config.max_steps as f32;
        let min = self.config.min_steps as f32;
        (max + (min - max) * t).round() as u32
    }

    /// Octree depth the fallback traces to for a surface of `roughness`
    pub fn fallback_level(&self, roughness: f32, max_depth: u8) -> u8 {
        let climb = (roughness.clamp(0.0, 1.0) * self.config.fallback_lod_levels as f32).round() as u8;
        max_depth.saturating_sub(climb)
    }

    /// Fade towards the screen border, 1 in the interior
    pub fn edge_fade(&self, uv: Vec2) -> f32 {
        if self.config.edge_fade <= 0.0 {
            return 1.0;
        }
        let border = uv.x.min(1.0 - uv.x).min(uv.y).min(1.0 - uv.y);
        (border / self.config.edge_fade).clamp(0.0, 1.0)
    }

    /// Trace every pixel of `gbuffer`, one 8x8 tile per work group
    pub fn trace(
        &self,
        dispatcher: &Dispatcher,
        camera: &CameraMatrices,
        gbuffer: &GBuffer,
        scene: Option<ReflectionScene<'_>>,
    ) -> Result<ReflectionBuffer> {
        let (width, height) = (gbuffer.width(), gbuffer.height());
        let output = StorageBuffer::<RawSample>::new(width as usize * height as usize);
        let frustum = camera.frustum();

        dispatcher.dispatch_2d("ssr_trace", DispatchIndirectArgs::for_tiles(width, height, 1), |group| {
            for pixel in group.invocations() {
                if pixel.x >= width || pixel.y >= height {
                    continue;
                }
                let sample = self.trace_pixel(camera, &frustum, gbuffer, pixel.x, pixel.y, scene);
                output.write((pixel.y * width + pixel.x) as usize, &sample.into());
            }
        })?;

        let samples = output
            .to_vec(output.len())
            .into_iter()
            .map(ReflectionSample::from)
            .collect();
        Ok(ReflectionBuffer {
            width,
            height,
            samples,
        })
    }

    /// Reflection for pixel `(x, y)`
    pub fn trace_pixel(
        &self,
        camera: &CameraMatrices,
        frustum: &Frustum,
        gbuffer: &GBuffer,
        x: u32,
        y: u32,
        scene: Option<ReflectionScene<'_>>,
    ) -> ReflectionSample {
        let texel = gbuffer.texel(x, y);
        if texel.depth >= 1.0 || texel.roughness > self.config.max_roughness {
            return ReflectionSample::default();
        }

        let uv = pixel_to_uv(x, y, gbuffer.width(), gbuffer.height());
        let origin = screen_to_view(camera, uv.extend(texel.depth));
        let normal = camera.view.transform_vector3(texel.normal).normalize_or_zero();
        let view_dir = origin.normalize_or_zero();
        if normal == Vec3::ZERO || view_dir == Vec3::ZERO {
            return ReflectionSample::default();
        }
        let dir = view_dir - 2.0 * view_dir.dot(normal) * normal;

        let sample = self
            .march(camera, gbuffer, (x, y), origin, dir, texel.roughness)
            .or_else(|| {
                let scene = scene.filter(|_| self.config.octree_fallback)?;
                Some(self.fallback(camera, frustum, scene, origin, dir, texel))
            })
            .unwrap_or_default();

        if luminance(sample.color) > self.config.luminance_threshold {
            return ReflectionSample::found(Vec3::ZERO, 0.0, ReflectionSource::Suppressed);
        }
        sample
    }

    /// Screen-space march of the view-space ray `origin + t * dir`
    fn march(
        &self,
        camera: &CameraMatrices,
        gbuffer: &GBuffer,
        pixel: (u32, u32),
        origin: Vec3,
        dir: Vec3,
        roughness: f32,
    ) -> Option<ReflectionSample> {
        // Keep the end point in front of the near plane
        let mut length = self.config.max_distance;
        if dir.z > 0.0 {
            let near = camera.near();
            length = length.min((-near - origin.z) / dir.z);
        }
        if length <= 0.0 {
            return None;
        }

        let start = view_to_screen(camera, origin);
        let end = view_to_screen(camera, origin + dir * length);
        let steps = self.step_count(roughness).max(1);

        for i in 1..=steps {
            let p = start.lerp(end, i as f32 / steps as f32);
            let (px, py) = gbuffer.pixel_at(p.truncate())?;
            if (px, py) == pixel {
                continue;
            }
            let scene_depth = gbuffer.texel(px, py).depth;
            if scene_depth >= 1.0 || p.z <= scene_depth {
                continue;
            }
            let gap = linear_depth(camera, p.z) - linear_depth(camera, scene_depth);
            if gap <= self.config.thickness {
                let hit = gbuffer.texel(px, py);
                let confidence = (1.0 - roughness) * self.edge_fade(p.truncate());
                return Some(ReflectionSample::found(hit.color, confidence, ReflectionSource::Screen));
            }
        }
        None
    }

    /// World-space lookup through the octree, then the environment
    fn fallback(
        &self,
        camera: &CameraMatrices,
        frustum: &Frustum,
        scene: ReflectionScene<'_>,
        origin: Vec3,
        dir: Vec3,
        texel: &GBufferTexel,
    ) -> ReflectionSample {
        let voxel = scene.octree.volume().voxel_size();
        let world_origin = camera.view_inv.transform_point3(origin) + texel.normal.normalize_or_zero() * voxel;
        let world_dir = camera.view_inv.transform_vector3(dir).normalize_or_zero();
        let confidence = 1.0 - texel.roughness;

        let ray = Ray::new(world_origin, world_dir);
        let lod = self.fallback_level(texel.roughness, scene.octree.max_depth());
        match scene.octree.raycast_lod(&ray, self.config.max_distance, Some(frustum), lod) {
            Some(hit) => ReflectionSample::found(
                scene.irradiance.shade_leaf(&hit.leaf),
                confidence,
                ReflectionSource::Octree,
            ),
            None => ReflectionSample::found(
                scene.irradiance.environment_radiance(world_dir),
                confidence,
                ReflectionSource::Environment,
            ),
        }
    }
}
