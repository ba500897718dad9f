//! Scene geometry handed to the voxelizer

use crate::core::types::{Mat3, Mat4, Vec2, Vec3, Vec4};

/// Mesh vertex
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self { position, normal, uv }
    }
}

/// Flat surface properties of a draw call
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceMaterial {
    /// Linear RGBA albedo
    pub base_color: Vec4,
    /// Linear emitted radiance, each channel in [0, 1]
    pub emissive: Vec3,
}

impl SurfaceMaterial {
    pub fn diffuse(color: Vec3) -> Self {
        Self {
            base_color: color.extend(1.0),
            emissive: Vec3::ZERO,
        }
    }

    pub fn emissive(color: Vec3, emissive: Vec3) -> Self {
        Self {
            base_color: color.extend(1.0),
            emissive,
        }
    }
}

impl Default for SurfaceMaterial {
    fn default() -> Self {
        Self::diffuse(Vec3::splat(0.8))
    }
}

/// Indexed triangle list with a model transform
#[derive(Clone, Debug, PartialEq)]
pub struct DrawCall {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub transform: Mat4,
    pub material: SurfaceMaterial,
}

impl DrawCall {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>, material: SurfaceMaterial) -> Self {
        Self {
            vertices,
            indices,
            transform: Mat4::IDENTITY,
            material,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn triangle_count(&self) -> u32 {
        (self.indices.len() / 3) as u32
    }

    /// Matrix that carries object-space normals to world space
    pub fn normal_matrix(&self) -> Mat3 {
        Mat3::from_mat4(self.transform).inverse().transpose()
    }

    /// Axis-aligned square of edge `size` centred at the origin in the XY
    /// plane, facing +Z
    pub fn quad(size: f32, material: SurfaceMaterial) -> Self {
        let h = size * 0.5;
        let corners = [
            (Vec3::new(-h, -h, 0.0), Vec2::new(0.0, 0.0)),
            (Vec3::new(h, -h, 0.0), Vec2::new(1.0, 0.0)),
            (Vec3::new(h, h, 0.0), Vec2::new(1.0, 1.0)),
            (Vec3::new(-h, h, 0.0), Vec2::new(0.0, 1.0)),
        ];
        let vertices = corners
            .iter()
            .map(|&(p, uv)| Vertex::new(p, Vec3::Z, uv))
            .collect();
        Self::new(vertices, vec![0, 1, 2, 0, 2, 3], material)
    }

    /// Axis-aligned cube of edge `size` centred at the origin, outward normals
    pub fn cube(size: f32, material: SurfaceMaterial) -> Self {
        let h = size * 0.5;
        let faces = [
            (Vec3::X, Vec3::Y, Vec3::Z),
            (Vec3::NEG_X, Vec3::Y, Vec3::NEG_Z),
            (Vec3::Y, Vec3::Z, Vec3::X),
            (Vec3::NEG_Y, Vec3::Z, Vec3::NEG_X),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, tangent, bitangent) in faces {
            let base = vertices.len() as u32;
            for (s, t) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                let p = (normal + tangent * s + bitangent * t) * h;
                vertices.push(Vertex::new(p, normal, Vec2::new(s * 0.5 + 0.5, t * 0.5 + 0.5)));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Self::new(vertices, indices, material)
    }
}
