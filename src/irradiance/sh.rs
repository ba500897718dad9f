//! Second-order (9 coefficient) real spherical harmonics
//!
//! Coefficient order: `(0,0)`, `(1,-1) y`, `(1,0) z`, `(1,1) x`,
//! `(2,-2) xy`, `(2,-1) yz`, `(2,0) 3z^2 - 1`, `(2,1) xz`, `(2,2) x^2 - y^2`.

use bytemuck::{Pod, Zeroable};

use crate::core::types::Vec3;

pub const SH_COEFFICIENTS: usize = 9;

/// `1 / (2 sqrt(pi))`
pub const SH_Y00: f32 = 0.282_094_8;
/// `sqrt(3) / (2 sqrt(pi))`
pub const SH_Y1: f32 = 0.488_602_5;
/// `sqrt(15) / (2 sqrt(pi))`, shared by `(2,-2)`, `(2,-1)` and `(2,1)`
pub const SH_Y2_MIXED: f32 = 1.092_548_4;
/// `sqrt(5) / (4 sqrt(pi))`
pub const SH_Y20: f32 = 0.315_391_57;
/// `sqrt(15) / (4 sqrt(pi))`
pub const SH_Y22: f32 = 0.546_274_2;

/// Cosine-lobe convolution weights per band: `pi`, `2 pi / 3`, `pi / 4`
const BAND_WEIGHTS: [f32; 3] = [
    std::f32::consts::PI,
    2.0 * std::f32::consts::PI / 3.0,
    std::f32::consts::FRAC_PI_4,
];

/// Band of each coefficient
const COEFFICIENT_BAND: [usize; SH_COEFFICIENTS] = [0, 1, 1, 1, 2, 2, 2, 2, 2];

/// The nine basis functions evaluated at a unit direction
pub fn sh_basis(dir: Vec3) -> [f32; SH_COEFFICIENTS] {
    let Vec3 { x, y, z } = dir;
    [
        SH_Y00,
        SH_Y1 * y,
        SH_Y1 * z,
        SH_Y1 * x,
        SH_Y2_MIXED * x * y,
        SH_Y2_MIXED * y * z,
        SH_Y20 * (3.0 * z * z - 1.0),
        SH_Y2_MIXED * x * z,
        SH_Y22 * (x * x - y * y),
    ]
}

/// One scalar channel projected onto the SH9 basis
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ShProbe {
    pub coefficients: [f32; SH_COEFFICIENTS],
}

impl ShProbe {
    pub const ZERO: Self = Self {
        coefficients: [0.0; SH_COEFFICIENTS],
    };

    /// Add `radiance * weight` arriving from `dir`
    pub fn accumulate(&mut self, dir: Vec3, radiance: f32, weight: f32) {
        let scaled = radiance * weight;
        for (c, b) in self.coefficients.iter_mut().zip(sh_basis(dir)) {
            *c += b * scaled;
        }
    }

    pub fn add(&mut self, other: &ShProbe) {
        for (c, o) in self.coefficients.iter_mut().zip(other.coefficients) {
            *c += o;
        }
    }

    pub fn scale(&mut self, factor: f32) {
        for c in &mut self.coefficients {
            *c *= factor;
        }
    }

    /// Reconstructed radiance towards `dir`
    pub fn evaluate(&self, dir: Vec3) -> f32 {
        self.coefficients
            .iter()
            .zip(sh_basis(dir))
            .map(|(c, b)| c * b)
            .sum()
    }

    /// Irradiance on a surface with normal `normal` (cosine-lobe convolution)
    pub fn irradiance(&self, normal: Vec3) -> f32 {
        self.coefficients
            .iter()
            .zip(sh_basis(normal))
            .zip(COEFFICIENT_BAND)
            .map(|((c, b), band)| BAND_WEIGHTS[band] * c * b)
            .sum()
    }
}

/// RGB probe, one `ShProbe` per channel
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ShProbeRgb {
    pub channels: [ShProbe; 3],
}

impl ShProbeRgb {
    pub const ZERO: Self = Self {
        channels: [ShProbe::ZERO; 3],
    };

    pub fn accumulate(&mut self, dir: Vec3, radiance: Vec3, weight: f32) {
        let basis = sh_basis(dir);
        for (channel, value) in self.channels.iter_mut().zip(radiance.to_array()) {
            let scaled = value * weight;
            for (c, b) in channel.coefficients.iter_mut().zip(basis) {
                *c += b * scaled;
            }
        }
    }

    pub fn add(&mut self, other: &ShProbeRgb) {
        for (channel, o) in self.channels.iter_mut().zip(&other.channels) {
            channel.add(o);
        }
    }

    pub fn scale(&mut self, factor: f32) {
        for channel in &mut self.channels {
            channel.scale(factor);
        }
    }

    pub fn evaluate(&self, dir: Vec3) -> Vec3 {
        Vec3::from_array(self.channels.map(|c| c.evaluate(dir)))
    }

    /// Irradiance towards `normal`, clamped at zero (band-limited ringing)
    pub fn irradiance(&self, normal: Vec3) -> Vec3 {
        Vec3::from_array(self.channels.map(|c| c.irradiance(normal))).max(Vec3::ZERO)
    }
}
