//! Spherical-harmonic irradiance encoding

pub mod sh;
pub mod environment;
pub mod encoder;

pub use sh::{sh_basis, ShProbe, ShProbeRgb, SH_COEFFICIENTS};
pub use environment::{CubeMap, Environment, GradientSky, UniformSky};
pub use encoder::{IrradianceEncoder, IrradianceField};
