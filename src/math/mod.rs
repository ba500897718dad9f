//! Mathematical utilities and data structures

pub mod aabb;
pub mod ray;
pub mod frustum;

pub use aabb::Aabb;
pub use ray::Ray;
pub use frustum::{Plane, Frustum};
