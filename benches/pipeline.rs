use criterion::{criterion_group, criterion_main, Criterion, black_box};

use glam::{Mat4, Vec3};

use voxgi::compute::aggregator::AtomicCounter;
use voxgi::compute::dispatch::{DispatchIndirectArgs, Dispatcher};
use voxgi::core::config::{DispatchConfig, IrradianceConfig, OctreeConfig, PipelineConfig};
use voxgi::irradiance::{GradientSky, IrradianceEncoder};
use voxgi::pipeline::GiPipeline;
use voxgi::voxel::codec;
use voxgi::voxel::fragment::FragmentBuffer;
use voxgi::voxel::mesh::{DrawCall, SurfaceMaterial};
use voxgi::voxel::svo::OctreeBuilder;
use voxgi::voxel::volume::VoxelVolume;
use voxgi::voxel::voxelizer::Voxelizer;

fn scene() -> Vec<DrawCall> {
    vec![
        DrawCall::quad(12.0, SurfaceMaterial::diffuse(Vec3::splat(0.7)))
            .with_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, -4.0))),
        DrawCall::cube(4.0, SurfaceMaterial::diffuse(Vec3::new(0.8, 0.3, 0.2))),
        DrawCall::cube(1.5, SurfaceMaterial::emissive(Vec3::ONE, Vec3::ONE))
            .with_transform(Mat4::from_translation(Vec3::new(4.0, 2.0, -2.0))),
    ]
}

fn dispatcher() -> Dispatcher {
    Dispatcher::new(&DispatchConfig::default()).expect("dispatcher")
}

fn bench_aggregator_reserve(c: &mut Criterion) {
    let dispatcher = dispatcher();
    let counter = AtomicCounter::new(0);

    c.bench_function("aggregator_reserve_64k_lanes", |b| {
        b.iter(|| {
            counter.reset(0);
            dispatcher
                .dispatch_1d("bench_reserve", DispatchIndirectArgs::for_items(65_536), |group| {
                    let requests: Vec<u32> = group.lanes().map(|lane| lane % 4).collect();
                    black_box(group.reserve(&counter, &requests, u32::MAX));
                })
                .expect("dispatch");
        });
    });
}

fn bench_normal_codec(c: &mut Criterion) {
    let normals: Vec<Vec3> = (0..1024)
        .map(|i| {
            let t = i as f32 * 0.37;
            Vec3::new(t.sin(), t.cos(), (t * 0.5).sin()).normalize()
        })
        .collect();

    c.bench_function("normal_codec_1024", |b| {
        b.iter(|| {
            for n in &normals {
                black_box(codec::decode_normal(codec::encode_normal(black_box(*n))));
            }
        });
    });
}

fn bench_voxelize(c: &mut Criterion) {
    let dispatcher = dispatcher();
    let voxelizer = Voxelizer::new(VoxelVolume::new(Vec3::ZERO, 16.0, 7));
    let mut fragments = FragmentBuffer::new(1 << 20);
    let scene = scene();

    c.bench_function("voxelize_128", |b| {
        b.iter(|| voxelizer.voxelize(&dispatcher, black_box(&scene), &mut fragments).expect("voxelize"));
    });
}

fn bench_octree_build(c: &mut Criterion) {
    let dispatcher = dispatcher();
    let volume = VoxelVolume::new(Vec3::ZERO, 16.0, 7);
    let mut fragments = FragmentBuffer::new(1 << 20);
    Voxelizer::new(volume)
        .voxelize(&dispatcher, &scene(), &mut fragments)
        .expect("voxelize");
    let mut builder = OctreeBuilder::new(&OctreeConfig {
        max_depth: 7,
        node_capacity: 1 << 20,
    });

    c.bench_function("octree_build_128", |b| {
        b.iter(|| builder.build(&dispatcher, black_box(&fragments), volume).expect("build"));
    });
}

fn bench_environment_sh(c: &mut Criterion) {
    let dispatcher = dispatcher();
    let encoder = IrradianceEncoder::new(IrradianceConfig {
        environment_resolution: 32,
        ..Default::default()
    });
    let sky = GradientSky::default();

    c.bench_function("environment_sh_32", |b| {
        b.iter(|| encoder.encode_environment(&dispatcher, black_box(&sky)).expect("encode"));
    });
}

fn bench_rebuild(c: &mut Criterion) {
    let mut config = PipelineConfig::default();
    config.octree.max_depth = 6;
    let mut pipeline = GiPipeline::new(config).expect("pipeline");
    let scene = scene();
    let sky = GradientSky::default();

    c.bench_function("pipeline_rebuild_64", |b| {
        b.iter(|| {
            pipeline.rebuild(black_box(&scene), &sky).expect("rebuild");
        });
    });
}

criterion_group!(
    benches,
    bench_aggregator_reserve,
    bench_normal_codec,
    bench_voxelize,
    bench_octree_build,
    bench_environment_sh,
    bench_rebuild,
);
criterion_main!(benches);
