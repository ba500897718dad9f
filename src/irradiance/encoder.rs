//! Parallel SH projection of the environment and of per-leaf voxel probes

use std::f32::consts::PI;

use crate::compute::buffer::StorageBuffer;
use crate::compute::dispatch::{DispatchIndirectArgs, Dispatcher};
use crate::core::config::IrradianceConfig;
use crate::core::types::{Result, Vec3};
use crate::math::ray::Ray;
use crate::voxel::svo::{LeafInfo, Octree};

use super::environment::{cube_texel_direction, cube_texel_solid_angle, Environment, CUBE_FACES};
use super::sh::ShProbeRgb;

/// Direction `index` of `count` points spread evenly over the sphere
pub fn fibonacci_direction(index: u32, count: u32) -> Vec3 {
    let golden_angle = PI * (3.0 - 5.0f32.sqrt());
    let y = 1.0 - 2.0 * (index as f32 + 0.5) / count as f32;
    let r = (1.0 - y * y).max(0.0).sqrt();
    let phi = golden_angle * index as f32;
    Vec3::new(r * phi.cos(), y, r * phi.sin())
}

/// Encoded lighting of one frame: environment SH plus one probe per leaf
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IrradianceField {
    pub environment: ShProbeRgb,
    /// Indexed by leaf payload slot
    pub probes: Vec<ShProbeRgb>,
}

impl IrradianceField {
    pub fn probe(&self, payload: u32) -> Option<&ShProbeRgb> {
        self.probes.get(payload as usize)
    }

    /// Band-limited environment radiance from `dir`
    pub fn environment_radiance(&self, dir: Vec3) -> Vec3 {
        self.environment.evaluate(dir).max(Vec3::ZERO)
    }

    /// Diffuse radiance leaving a leaf: `emissive + albedo * E(n) / pi`.
    ///
    /// Cells without a probe (filtered interior nodes) use the environment.
    pub fn shade_leaf(&self, leaf: &LeafInfo) -> Vec3 {
        let attributes = &leaf.attributes;
        let irradiance = self
            .probe(leaf.payload)
            .unwrap_or(&self.environment)
            .irradiance(attributes.normal);
        attributes.emissive + attributes.color * irradiance / PI
    }
}

/// Projects radiance onto SH9 probes
#[derive(Clone, Debug)]
pub struct IrradianceEncoder {
    config: IrradianceConfig,
}

impl IrradianceEncoder {
    pub fn new(config: IrradianceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IrradianceConfig {
        &self.config
    }

    /// Environment probe and all voxel probes for `octree`
    pub fn encode(
        &self,
        dispatcher: &Dispatcher,
        octree: &Octree,
        environment: &dyn Environment,
    ) -> Result<IrradianceField> {
        let env_probe = self.encode_environment(dispatcher, environment)?;
        let probes = self.encode_voxel_probes(dispatcher, octree, environment, &env_probe)?;
        log::debug!("Encoded {} voxel probes", probes.len());
        Ok(IrradianceField {
            environment: env_probe,
            probes,
        })
    }

    /// Project the environment through a cube of directions.
    ///
    /// Each 8x8 tile of a face folds its texels, weighted by their exact solid
    /// angle, into a partial probe; partials are summed after the pass.
    pub fn encode_environment(&self, dispatcher: &Dispatcher, environment: &dyn Environment) -> Result<ShProbeRgb> {
        let size = self.config.environment_resolution;
        let args = DispatchIndirectArgs::for_tiles(size, size, CUBE_FACES as u32);
        let partials = StorageBuffer::<ShProbeRgb>::new(args.total_groups() as usize);
        let (gx, gy) = (args.group_count_x, args.group_count_y);

        dispatcher.dispatch_2d("sh_environment", args, |group| {
            let face = group.id.z as usize;
            let mut partial = ShProbeRgb::ZERO;
            for texel in group.invocations() {
                if texel.x >= size || texel.y >= size {
                    continue;
                }
                let dir = cube_texel_direction(face, texel.x, texel.y, size);
                let weight = cube_texel_solid_angle(texel.x, texel.y, size);
                partial.accumulate(dir, environment.radiance(dir), weight);
            }
            let slot = group.id.x + group.id.y * gx + group.id.z * gx * gy;
            partials.write(slot as usize, &partial);
        })?;

        let mut probe = ShProbeRgb::ZERO;
        for partial in partials.to_vec(partials.len()) {
            probe.add(&partial);
        }
        Ok(probe)
    }

    /// One probe per filled leaf, indexed by payload slot.
    ///
    /// Rays leave the leaf centre in `samples_per_probe` directions. A ray that
    /// hits another leaf brings back that leaf's emission plus its albedo lit by
    /// the environment; a ray that escapes brings back the environment.
    pub fn encode_voxel_probes(
        &self,
        dispatcher: &Dispatcher,
        octree: &Octree,
        environment: &dyn Environment,
        env_probe: &ShProbeRgb,
    ) -> Result<Vec<ShProbeRgb>> {
        let leaves: Vec<LeafInfo> = octree.leaves().collect();
        let probes = StorageBuffer::<ShProbeRgb>::new(octree.leaf_count() as usize);

        let samples = self.config.samples_per_probe.max(1);
        let weight = 4.0 * PI / samples as f32;
        let bounce = self.config.bounce_strength;
        let max_distance = if self.config.max_ray_distance > 0.0 {
            self.config.max_ray_distance
        } else {
            octree.volume().size * 3.0f32.sqrt()
        };
        let count = leaves.len() as u32;

        dispatcher.dispatch_1d("sh_voxel_probes", DispatchIndirectArgs::for_items(count), |group| {
            for lane in group.lanes().filter(|&lane| lane < count) {
                let leaf = &leaves[lane as usize];
                let origin = leaf.bounds.center();

                let mut probe = ShProbeRgb::ZERO;
                for sample in 0..samples {
                    let dir = fibonacci_direction(sample, samples);
                    let ray = Ray::new(origin, dir);
                    let radiance = match octree.raycast_from_leaf(leaf.node, &ray, max_distance) {
                        Some(hit) => {
                            let surface = &hit.leaf.attributes;
                            surface.emissive
                                + surface.color * bounce * env_probe.irradiance(surface.normal) / PI
                        }
                        None => environment.radiance(dir),
                    };
                    probe.accumulate(dir, radiance, weight);
                }

                if (leaf.payload as usize) < probes.len() {
                    probes.write(leaf.payload as usize, &probe);
                }
            }
        })?;

        Ok(probes.to_vec(probes.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{DispatchConfig, OctreeConfig};
    use crate::core::types::UVec3;
    use crate::irradiance::environment::{GradientSky, UniformSky};
    use crate::voxel::codec;
    use crate::voxel::fragment::{FragmentBuffer, VoxelFragment};
    use crate::voxel::svo::OctreeBuilder;
    use crate::voxel::volume::VoxelVolume;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(&DispatchConfig {
            max_group_count: 65_535,
            worker_threads: 4,
        })
        .unwrap()
    }

    fn encoder(samples: u32) -> IrradianceEncoder {
        IrradianceEncoder::new(IrradianceConfig {
            samples_per_probe: samples,
            environment_resolution: 16,
            ..Default::default()
        })
    }

    /// Depth 2 octree over a 4-unit cube; each entry is (voxel, albedo, emissive)
    fn octree(voxels: &[(UVec3, Vec3, Vec3)]) -> Octree {
        let fragments = FragmentBuffer::new(voxels.len() as u32);
        let base = fragments.counter().reserve(voxels.len() as u32);
        for (i, (coord, albedo, emissive)) in voxels.iter().enumerate() {
            let fragment = VoxelFragment::new(
                (coord.as_vec3() + 0.5) / 4.0,
                Vec3::Z,
                codec::pack_rgb(*albedo),
                codec::pack_rgb(*emissive),
            );
            fragments.storage().write(base as usize + i, &fragment);
        }
        let mut builder = OctreeBuilder::new(&OctreeConfig {
            max_depth: 2,
            node_capacity: 256,
        });
        builder
            .build(&dispatcher(), &fragments, VoxelVolume::new(Vec3::ZERO, 4.0, 2))
            .unwrap()
            .0
    }

    #[test]
    fn test_fibonacci_directions_are_unit() {
        for i in 0..100 {
            assert!((fibonacci_direction(i, 100).length() - 1.0).abs() < 1e-5);
        }
        assert!(fibonacci_direction(0, 100).y > 0.98);
        assert!(fibonacci_direction(99, 100).y < -0.98);
    }

    #[test]
    fn test_uniform_sky_projection() {
        let radiance = Vec3::new(1.0, 2.0, 3.0);
        let probe = encoder(16)
            .encode_environment(&dispatcher(), &UniformSky::new(radiance))
            .unwrap();

        let c0 = Vec3::from_array(probe.channels.map(|c| c.coefficients[0]));
        assert!((c0 - radiance * 2.0 * PI.sqrt()).length() < 1e-3);
        for channel in &probe.channels {
            for c in &channel.coefficients[1..] {
                assert!(c.abs() < 1e-4, "{c}");
            }
        }
        assert!((probe.irradiance(Vec3::Y) - radiance * PI).length() < 1e-2);
    }

    #[test]
    fn test_gradient_sky_brighter_from_above() {
        let sky = GradientSky {
            zenith: Vec3::ONE,
            horizon: Vec3::splat(0.5),
            ground: Vec3::ZERO,
        };
        let probe = encoder(16).encode_environment(&dispatcher(), &sky).unwrap();
        assert!(probe.irradiance(Vec3::Y).x > probe.irradiance(Vec3::NEG_Y).x);
    }

    #[test]
    fn test_isolated_leaf_sees_environment() {
        let tree = octree(&[(UVec3::new(1, 1, 1), Vec3::splat(0.5), Vec3::ZERO)]);
        let sky = UniformSky::new(Vec3::ONE);
        let field = encoder(256).encode(&dispatcher(), &tree, &sky).unwrap();

        assert_eq!(field.probes.len(), 1);
        let irradiance = field.probes[0].irradiance(Vec3::X);
        assert!((irradiance - Vec3::splat(PI)).abs().max_element() < 0.05);

        // Albedo 0.5 under E = pi reflects 0.5
        let leaf = tree.leaves().next().unwrap();
        assert!((field.shade_leaf(&leaf) - Vec3::splat(0.5)).abs().max_element() < 0.02);
    }

    #[test]
    fn test_emissive_neighbour_lights_probe() {
        let tree = octree(&[
            (UVec3::new(1, 1, 1), Vec3::splat(0.5), Vec3::ZERO),
            (UVec3::new(1, 1, 2), Vec3::ZERO, Vec3::ONE),
        ]);
        let field = encoder(256)
            .encode(&dispatcher(), &tree, &UniformSky::new(Vec3::ZERO))
            .unwrap();

        let dark = tree.find_leaf(Vec3::new(0.375, 0.375, 0.375)).unwrap();
        let probe = field.probe(dark.payload).unwrap();
        assert!(probe.irradiance(Vec3::Z).x > 0.5);
        assert!(probe.irradiance(Vec3::Z).x > 4.0 * probe.irradiance(Vec3::NEG_Z).x);
    }
}
