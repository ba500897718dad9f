//! Distant radiance sources and cube-map texel geometry
//!
//! Cube faces follow the GL order `+X, -X, +Y, -Y, +Z, -Z`. Texel `(x, y)`
//! of a `size` x `size` face has face coordinates
//! `u = 2 (x + 0.5) / size - 1` and `v = 2 (y + 0.5) / size - 1`.

use crate::core::error::Error;
use crate::core::types::{Result, Vec3};

/// Number of cube faces
pub const CUBE_FACES: usize = 6;

/// Radiance arriving from infinitely far away
pub trait Environment: Send + Sync {
    /// Radiance travelling towards the origin from direction `dir`
    fn radiance(&self, dir: Vec3) -> Vec3;
}

/// Constant radiance in every direction
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UniformSky {
    pub radiance: Vec3,
}

impl UniformSky {
    pub fn new(radiance: Vec3) -> Self {
        Self { radiance }
    }
}

impl Environment for UniformSky {
    fn radiance(&self, _dir: Vec3) -> Vec3 {
        self.radiance
    }
}

/// Sky blending zenith, horizon and ground colours along +Y
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GradientSky {
    pub zenith: Vec3,
    pub horizon: Vec3,
    pub ground: Vec3,
}

impl Default for GradientSky {
    fn default() -> Self {
        Self {
            zenith: Vec3::new(0.25, 0.45, 0.9),
            horizon: Vec3::new(0.8, 0.85, 0.9),
            ground: Vec3::new(0.2, 0.18, 0.15),
        }
    }
}

impl Environment for GradientSky {
    fn radiance(&self, dir: Vec3) -> Vec3 {
        let up = dir.normalize_or_zero().y;
        if up >= 0.0 {
            self.horizon.lerp(self.zenith, up)
        } else {
            self.horizon.lerp(self.ground, -up)
        }
    }
}

/// Unit direction through the centre of texel `(x, y)` on `face`
pub fn cube_texel_direction(face: usize, x: u32, y: u32, size: u32) -> Vec3 {
    let u = 2.0 * (x as f32 + 0.5) / size as f32 - 1.0;
    let v = 2.0 * (y as f32 + 0.5) / size as f32 - 1.0;
    let dir = match face {
        0 => Vec3::new(1.0, -v, -u),
        1 => Vec3::new(-1.0, -v, u),
        2 => Vec3::new(u, 1.0, v),
        3 => Vec3::new(u, -1.0, -v),
        4 => Vec3::new(u, -v, 1.0),
        _ => Vec3::new(-u, -v, -1.0),
    };
    dir.normalize()
}

/// Face and face coordinates `(u, v)` in [-1, 1] hit by `dir`
pub fn cube_face_coords(dir: Vec3) -> (usize, f32, f32) {
    let a = dir.abs();
    if a.x >= a.y && a.x >= a.z {
        if dir.x > 0.0 {
            (0, -dir.z / a.x, -dir.y / a.x)
        } else {
            (1, dir.z / a.x, -dir.y / a.x)
        }
    } else if a.y >= a.z {
        if dir.y > 0.0 {
            (2, dir.x / a.y, dir.z / a.y)
        } else {
            (3, dir.x / a.y, -dir.z / a.y)
        }
    } else if dir.z > 0.0 {
        (4, dir.x / a.z, -dir.y / a.z)
    } else {
        (5, -dir.x / a.z, -dir.y / a.z)
    }
}

/// Solid angle subtended by texel `(x, y)` of a `size` x `size` face
pub fn cube_texel_solid_angle(x: u32, y: u32, size: u32) -> f32 {
    fn area_element(x: f32, y: f32) -> f32 {
        (x * y).atan2((x * x + y * y + 1.0).sqrt())
    }

    let step = 2.0 / size as f32;
    let x0 = x as f32 * step - 1.0;
    let y0 = y as f32 * step - 1.0;
    let (x1, y1) = (x0 + step, y0 + step);

    area_element(x0, y0) - area_element(x0, y1) - area_element(x1, y0) + area_element(x1, y1)
}

/// Six square faces of linear radiance
#[derive(Clone, Debug, PartialEq)]
pub struct CubeMap {
    size: u32,
    faces: [Vec<Vec3>; CUBE_FACES],
}

impl CubeMap {
    /// Cube map from row-major face data, `size * size` texels per face
    pub fn new(size: u32, faces: [Vec<Vec3>; CUBE_FACES]) -> Result<Self> {
        let texels = size as usize * size as usize;
        if size == 0 {
            return Err(Error::InvalidInput("cube map size must be non-zero".into()));
        }
        if let Some((face, data)) = faces.iter().enumerate().find(|(_, f)| f.len() != texels) {
            return Err(Error::InvalidInput(format!(
                "cube face {face} has {} texels, expected {texels}",
                data.len()
            )));
        }
        Ok(Self { size, faces })
    }

    /// Bake another environment into a cube map
    pub fn from_environment(size: u32, environment: &dyn Environment) -> Result<Self> {
        let faces = std::array::from_fn(|face| {
            (0..size * size)
                .map(|i| environment.radiance(cube_texel_direction(face, i % size, i / size, size)))
                .collect()
        });
        Self::new(size, faces)
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn texel(&self, face: usize, x: u32, y: u32) -> Vec3 {
        self.faces[face][(y * self.size + x) as usize]
    }
}

impl Environment for CubeMap {
    /// Nearest-texel lookup
    fn radiance(&self, dir: Vec3) -> Vec3 {
        let (face, u, v) = cube_face_coords(dir);
        let to_texel = |c: f32| (((c + 1.0) * 0.5 * self.size as f32) as u32).min(self.size - 1);
        self.texel(face, to_texel(u), to_texel(v))
    }
}
