//! voxgi - headless driver
//!
//! Usage:
//!   cargo run --release -- [--config pipeline.json] [--frames N] [--size WxH]

use glam::{Mat4, Vec3};

use voxgi::core::{camera::Camera, logging, PipelineConfig};
use voxgi::irradiance::GradientSky;
use voxgi::pipeline::GiPipeline;
use voxgi::voxel::mesh::{DrawCall, SurfaceMaterial};

/// Floor, a lit box and a glowing cube
fn demo_scene(volume_size: f32) -> Vec<DrawCall> {
    let floor = volume_size * 0.8;
    vec![
        DrawCall::quad(floor, SurfaceMaterial::diffuse(Vec3::splat(0.7)))
            .with_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, -volume_size * 0.25))),
        DrawCall::cube(volume_size * 0.2, SurfaceMaterial::diffuse(Vec3::new(0.8, 0.3, 0.2)))
            .with_transform(Mat4::from_translation(Vec3::new(-volume_size * 0.15, 0.0, -volume_size * 0.1))),
        DrawCall::cube(
            volume_size * 0.1,
            SurfaceMaterial::emissive(Vec3::ONE, Vec3::new(1.0, 0.9, 0.6)),
        )
        .with_transform(Mat4::from_translation(Vec3::new(volume_size * 0.2, volume_size * 0.1, -volume_size * 0.15))),
    ]
}

fn main() {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let arg = |name: &str| {
        args.iter()
            .position(|a| a == name)
            .and_then(|i| args.get(i + 1))
    };

    let config = match arg("--config") {
        Some(path) => match PipelineConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Failed to load {path}: {e}");
                std::process::exit(1);
            }
        },
        None => PipelineConfig::default(),
    };
    let frames: u32 = arg("--frames").and_then(|s| s.parse().ok()).unwrap_or(3);
    let (width, height) = arg("--size")
        .and_then(|s| s.split_once('x'))
        .and_then(|(w, h)| Some((w.parse().ok()?, h.parse().ok()?)))
        .unwrap_or((320u32, 180u32));

    let mut pipeline = match GiPipeline::new(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            log::error!("Failed to create pipeline: {e}");
            std::process::exit(1);
        }
    };

    let volume = *pipeline.volume();
    let scene = demo_scene(volume.size);
    let sky = GradientSky::default();

    let mut camera = Camera::look_at(
        volume.center + Vec3::new(0.0, -volume.size * 0.6, volume.size * 0.35),
        volume.center,
        Vec3::Z,
    );
    camera.set_aspect(width as f32, height as f32);
    camera.far = volume.size * 4.0;
    let matrices = camera.matrices();

    // Primary visibility comes from the first rebuild's octree
    if let Err(e) = pipeline.rebuild(&scene, &sky) {
        log::error!("Initial rebuild failed: {e}");
        std::process::exit(1);
    }
    let gbuffer = match pipeline.render_gbuffer(&matrices, width, height, 0.1) {
        Ok(gbuffer) => gbuffer,
        Err(e) => {
            log::error!("G-buffer pass failed: {e}");
            std::process::exit(1);
        }
    };

    for _ in 0..frames {
        let report = pipeline.run_frame(&scene, &sky, &matrices, gbuffer.as_ref());
        let stats = &report.stats;
        log::info!(
            "Frame {} valid={} | {} tris -> {} fragments -> {} nodes / {} leaves ({} truncated) | \
             {} visible, {} culled | reflections: {} screen, {} octree, {} env, {} suppressed | \
             voxelize {:.2}ms build {:.2}ms encode {:.2}ms trace {:.2}ms",
            report.frame,
            report.valid,
            stats.triangles,
            stats.fragments,
            stats.nodes,
            stats.leaves,
            stats.truncated_nodes,
            stats.visible_leaves,
            stats.culled_nodes,
            stats.screen_hits,
            stats.octree_hits,
            stats.environment_hits,
            stats.suppressed,
            stats.voxelize_ms,
            stats.build_ms,
            stats.encode_ms,
            stats.trace_ms,
        );
        if report.fragments_saturated || report.nodes_saturated {
            log::warn!(
                "Frame {} saturated (fragments: {}, nodes: {})",
                report.frame, report.fragments_saturated, report.nodes_saturated
            );
        }
    }

    if let Some(frame) = pipeline.frame_data() {
        let env = frame.irradiance.environment.irradiance(Vec3::Z);
        log::info!(
            "Octree memory: {} KiB, sky irradiance from +Z: {:.3?}",
            frame.octree.memory_usage() / 1024,
            env
        );
    }
}
