//! Per-frame orchestration of the voxel GI passes
//!
//! A rebuild runs voxelize -> octree build -> irradiance encode. Its result is
//! published only when every pass succeeded; a rejected dispatch marks the
//! frame invalid and the next rebuild starts from scratch. `run_frame` then
//! culls the octree against the camera and traces reflections.

use std::time::Instant;

use crate::compute::buffer::StorageBuffer;
use crate::compute::dispatch::{DispatchIndirectArgs, Dispatcher};
use crate::core::camera::CameraMatrices;
use crate::core::config::PipelineConfig;
use crate::core::types::{Result, Vec3};
use crate::irradiance::{Environment, IrradianceEncoder, IrradianceField};
use crate::math::ray::Ray;
use crate::render::culling::NodeCuller;
use crate::render::space::{pixel_to_uv, screen_to_world, world_to_screen};
use crate::render::ssr::{GBuffer, GBufferTexel, ReflectionBuffer, ReflectionScene, ReflectionSource, ReflectionTracer};
use crate::voxel::fragment::FragmentBuffer;
use crate::voxel::mesh::DrawCall;
use crate::voxel::svo::{BuildReport, LeafInfo, Octree, OctreeBuilder};
use crate::voxel::volume::VoxelVolume;
use crate::voxel::voxelizer::{VoxelizeReport, Voxelizer};

/// Everything a valid rebuild publishes
#[derive(Debug)]
pub struct FrameData {
    pub octree: Octree,
    pub irradiance: IrradianceField,
    pub voxelize: VoxelizeReport,
    pub build: BuildReport,
}

impl FrameData {
    pub fn reflection_scene(&self) -> ReflectionScene<'_> {
        ReflectionScene {
            octree: &self.octree,
            irradiance: &self.irradiance,
        }
    }

    /// Radiance arriving along `ray`: the first leaf's shading, or the
    /// environment when nothing is hit within `max_t`
    pub fn radiance(&self, ray: &Ray, max_t: f32) -> Vec3 {
        match self.octree.raycast(ray, max_t, None) {
            Some(hit) => self.irradiance.shade_leaf(&hit.leaf),
            None => self.irradiance.environment_radiance(ray.direction),
        }
    }
}

/// Counters and pass timings of one frame
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameStats {
    pub triangles: u32,
    pub fragments: u32,
    pub nodes: u32,
    pub leaves: u32,
    pub truncated_nodes: u32,
    /// Leaves inside the camera frustum
    pub visible_leaves: u32,
    /// Subtrees rejected by the frustum
    pub culled_nodes: u32,
    pub screen_hits: u32,
    pub octree_hits: u32,
    pub environment_hits: u32,
    pub suppressed: u32,
    pub voxelize_ms: f32,
    pub build_ms: f32,
    pub encode_ms: f32,
    pub trace_ms: f32,
}

/// Outcome of `GiPipeline::run_frame`
#[derive(Debug)]
pub struct FrameReport {
    pub frame: u64,
    /// False when a pass failed; nothing from this frame may be consumed
    pub valid: bool,
    pub fragments_saturated: bool,
    pub nodes_saturated: bool,
    pub stats: FrameStats,
    pub reflections: Option<ReflectionBuffer>,
}

/// Host-facing driver owning all frame-scoped buffers
pub struct GiPipeline {
    config: PipelineConfig,
    dispatcher: Dispatcher,
    voxelizer: Voxelizer,
    fragments: FragmentBuffer,
    builder: OctreeBuilder,
    encoder: IrradianceEncoder,
    tracer: ReflectionTracer,
    culler: NodeCuller,
    frame: Option<FrameData>,
    frame_index: u64,
    stats: FrameStats,
}

fn elapsed_ms(start: Instant) -> f32 {
    start.elapsed().as_secs_f32() * 1000.0
}

impl GiPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let dispatcher = Dispatcher::new(&config.dispatch)?;
        let volume = VoxelVolume::from_config(&config.voxel, config.octree.max_depth);

        log::info!(
            "Voxel GI pipeline: {}^3 voxels over {} units, {} fragments, {} nodes, {} workers",
            volume.resolution(),
            volume.size,
            config.voxel.fragment_capacity,
            config.octree.node_capacity,
            dispatcher.worker_count()
        );

        Ok(Self {
            voxelizer: Voxelizer::new(volume),
            fragments: FragmentBuffer::new(config.voxel.fragment_capacity),
            builder: OctreeBuilder::new(&config.octree),
            encoder: IrradianceEncoder::new(config.irradiance.clone()),
            tracer: ReflectionTracer::new(config.reflection.clone()),
            culler: NodeCuller::new(),
            dispatcher,
            config,
            frame: None,
            frame_index: 0,
            stats: FrameStats::default(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn volume(&self) -> &VoxelVolume {
        self.voxelizer.volume()
    }

    /// Data of the last valid rebuild, `None` after a failed frame
    pub fn frame_data(&self) -> Option<&FrameData> {
        self.frame.as_ref()
    }

    /// Leaves of the last `run_frame` inside the camera frustum, nearest first
    pub fn visible_leaves(&self) -> &[LeafInfo] {
        self.culler.visible()
    }

    /// Voxelize `scene`, build the octree and encode irradiance.
    ///
    /// The previous frame's data is dropped before any pass runs, so a failure
    /// leaves nothing published.
    pub fn rebuild(&mut self, scene: &[DrawCall], environment: &dyn Environment) -> Result<&FrameData> {
        self.frame = None;
        self.stats = FrameStats::default();

        let start = Instant::now();
        let voxelize = self
            .voxelizer
            .voxelize(&self.dispatcher, scene, &mut self.fragments)?;
        self.stats.voxelize_ms = elapsed_ms(start);

        let start = Instant::now();
        let (octree, build) = self
            .builder
            .build(&self.dispatcher, &self.fragments, *self.voxelizer.volume())?;
        self.stats.build_ms = elapsed_ms(start);

        let start = Instant::now();
        let irradiance = self.encoder.encode(&self.dispatcher, &octree, environment)?;
        self.stats.encode_ms = elapsed_ms(start);

        self.stats.triangles = voxelize.triangles;
        self.stats.fragments = voxelize.emitted;
        self.stats.nodes = build.node_count;
        self.stats.leaves = build.leaf_count;
        self.stats.truncated_nodes = build.truncated_nodes;

        Ok(self.frame.insert(FrameData {
            octree,
            irradiance,
            voxelize,
            build,
        }))
    }

    /// Screen-space reflections for `gbuffer`, falling back to the last valid
    /// octree when one is published.
    pub fn trace_reflections(&self, camera: &CameraMatrices, gbuffer: &GBuffer) -> Result<ReflectionBuffer> {
        let scene = self.frame.as_ref().map(FrameData::reflection_scene);
        self.tracer.trace(&self.dispatcher, camera, gbuffer, scene)
    }

    /// Primary visibility of the published octree as a G-buffer.
    ///
    /// Every hit pixel gets `roughness`; returns `None` without frame data.
    pub fn render_gbuffer(
        &self,
        camera: &CameraMatrices,
        width: u32,
        height: u32,
        roughness: f32,
    ) -> Result<Option<GBuffer>> {
        let Some(frame) = self.frame.as_ref() else {
            return Ok(None);
        };
        let frustum = camera.frustum();
        let origin = camera.position();
        let texels = StorageBuffer::<GBufferTexel>::from_slice(&vec![GBufferTexel::SKY; width as usize * height as usize]);
        let max_t = self.tracer.config().max_distance.max(self.volume().size * 3.0f32.sqrt())
            + origin.distance(self.volume().center);

        self.dispatcher
            .dispatch_2d("gbuffer", DispatchIndirectArgs::for_tiles(width, height, 1), |group| {
                for pixel in group.invocations() {
                    if pixel.x >= width || pixel.y >= height {
                        continue;
                    }
                    let uv = pixel_to_uv(pixel.x, pixel.y, width, height);
                    let dir = (screen_to_world(camera, uv.extend(0.5)) - origin).normalize_or_zero();
                    let Some(hit) = frame.octree.raycast(&Ray::new(origin, dir), max_t, Some(&frustum)) else {
                        continue;
                    };
                    let texel = GBufferTexel {
                        depth: world_to_screen(camera, hit.position).z.clamp(0.0, 1.0 - f32::EPSILON),
                        normal: hit.leaf.attributes.normal,
                        roughness,
                        color: frame.irradiance.shade_leaf(&hit.leaf),
                    };
                    texels.write((pixel.y * width + pixel.x) as usize, &texel);
                }
            })?;

        GBuffer::from_texels(width, height, texels.to_vec(texels.len())).map(Some)
    }

    fn frame_passes(
        &mut self,
        scene: &[DrawCall],
        environment: &dyn Environment,
        camera: &CameraMatrices,
        gbuffer: Option<&GBuffer>,
    ) -> Result<Option<ReflectionBuffer>> {
        self.rebuild(scene, environment)?;
        if let Some(frame) = self.frame.as_ref() {
            self.culler
                .cull_and_sort(&frame.octree, &camera.frustum(), camera.position());
            self.stats.visible_leaves = self.culler.visible_count();
            self.stats.culled_nodes = self.culler.culled_count();
        }

        let Some(gbuffer) = gbuffer else {
            return Ok(None);
        };
        let start = Instant::now();
        let reflections = self.trace_reflections(camera, gbuffer)?;
        self.stats.trace_ms = elapsed_ms(start);
        Ok(Some(reflections))
    }

    /// One frame: rebuild, cull, then trace reflections when a G-buffer is
    /// given.
    ///
    /// Errors never escape; they invalidate the frame instead.
    pub fn run_frame(
        &mut self,
        scene: &[DrawCall],
        environment: &dyn Environment,
        camera: &CameraMatrices,
        gbuffer: Option<&GBuffer>,
    ) -> FrameReport {
        self.frame_index += 1;
        let frame = self.frame_index;

        let result = self.frame_passes(scene, environment, camera, gbuffer);

        match result {
            Ok(reflections) => {
                if let Some(reflections) = &reflections {
                    self.stats.screen_hits = reflections.count(ReflectionSource::Screen) as u32;
                    self.stats.octree_hits = reflections.count(ReflectionSource::Octree) as u32;
                    self.stats.environment_hits = reflections.count(ReflectionSource::Environment) as u32;
                    self.stats.suppressed = reflections.count(ReflectionSource::Suppressed) as u32;
                }
                let (fragments_saturated, nodes_saturated) = self
                    .frame
                    .as_ref()
                    .map(|f| (f.voxelize.saturated, f.build.saturated))
                    .unwrap_or_default();
                log::debug!("Frame {frame}: {:?}", self.stats);
                FrameReport {
                    frame,
                    valid: true,
                    fragments_saturated,
                    nodes_saturated,
                    stats: self.stats,
                    reflections,
                }
            }
            Err(e) => {
                log::warn!("Frame {frame} invalid: {e}");
                self.frame = None;
                FrameReport {
                    frame,
                    valid: false,
                    fragments_saturated: self.fragments.is_saturated(),
                    nodes_saturated: self.builder.is_saturated(),
                    stats: self.stats,
                    reflections: None,
                }
            }
        }
    }
}

impl std::fmt::Debug for GiPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GiPipeline")
            .field("frame_index", &self.frame_index)
            .field("volume", self.voxelizer.volume())
            .field("valid", &self.frame.is_some())
            .finish()
    }
}
