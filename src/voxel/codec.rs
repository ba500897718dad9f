//! Packed attribute codecs
//!
//! Normal layout (32 bits):
//! - bit 31: sign of the dominant component
//! - bits 29-30: dominant axis (0 = x, 1 = y, 2 = z)
//! - bits 14-28: first minor component / |dominant|, signed 15-bit, scale 16383
//! - bits 0-13: second minor component / |dominant|, signed 14-bit, scale 8191
//!
//! Minor components are taken in cyclic order after the dominant axis
//! (x -> y, z; y -> z, x; z -> x, y).
//!
//! Colours are RGBA8 with red in the low byte. Leaf payloads keep a running
//! average whose sample count lives in the low 6 bits of alpha.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::core::types::{Vec3, Vec4};

const SIGN_BIT: u32 = 1 << 31;
const AXIS_SHIFT: u32 = 29;
const U_SHIFT: u32 = 14;
const U_MASK: u32 = 0x7FFF;
const V_MASK: u32 = 0x3FFF;
const U_SCALE: f32 = 16383.0;
const V_SCALE: f32 = 8191.0;

/// Largest sample count a running average records
pub const MAX_AVERAGE_COUNT: u32 = 0x3F;

/// Encode a unit direction into 32 bits
pub fn encode_normal(n: Vec3) -> u32 {
    let a = n.abs();
    let axis = if a.x >= a.y.max(a.z) {
        0
    } else if a.y >= a.z {
        1
    } else {
        2
    };
    let tuv = match axis {
        0 => n,
        1 => Vec3::new(n.y, n.z, n.x),
        _ => Vec3::new(n.z, n.x, n.y),
    };

    let major = tuv.x.abs();
    if major <= 0.0 || !major.is_finite() {
        return 0;
    }

    let u = ((tuv.y / major * U_SCALE) as i32).clamp(-0x4000, 0x3FFF) as u32 & U_MASK;
    let v = ((tuv.z / major * V_SCALE) as i32).clamp(-0x2000, 0x1FFF) as u32 & V_MASK;
    let sign = if tuv.x < 0.0 { SIGN_BIT } else { 0 };

    sign | (axis << AXIS_SHIFT) | (u << U_SHIFT) | v
}

/// Decode a packed normal back to a unit direction
pub fn decode_normal(packed: u32) -> Vec3 {
    let t = if packed & SIGN_BIT != 0 { -1.0 } else { 1.0 };
    let axis = (packed >> AXIS_SHIFT) & 0x3;

    // Sign-extend the two fixed-point fields
    let u = (((packed >> U_SHIFT) & U_MASK) << 17) as i32 >> 17;
    let v = ((packed & V_MASK) << 18) as i32 >> 18;
    let u = u as f32 / U_SCALE;
    let v = v as f32 / V_SCALE;

    let n = match axis {
        0 => Vec3::new(t, u, v),
        1 => Vec3::new(v, t, u),
        _ => Vec3::new(u, v, t),
    };
    n.normalize()
}

/// Pack four [0, 1] channels into RGBA8, red in the low byte
pub fn pack_unorm4x8(c: Vec4) -> u32 {
    let q = (c.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
    (q.x as u32) | ((q.y as u32) << 8) | ((q.z as u32) << 16) | ((q.w as u32) << 24)
}

pub fn unpack_unorm4x8(packed: u32) -> Vec4 {
    Vec4::new(
        (packed & 0xFF) as f32,
        ((packed >> 8) & 0xFF) as f32,
        ((packed >> 16) & 0xFF) as f32,
        (packed >> 24) as f32,
    ) / 255.0
}

/// RGB colour packed with alpha = 1
pub fn pack_rgb(c: Vec3) -> u32 {
    pack_unorm4x8(c.extend(1.0))
}

/// Map a unit normal into [0, 1] for RGBA8 storage
pub fn normal_to_unorm(n: Vec3) -> Vec3 {
    n * 0.5 + 0.5
}

pub fn unorm_to_normal(c: Vec3) -> Vec3 {
    (c * 2.0 - 1.0).normalize_or_zero()
}

/// Decoded running average: mean colour and number of samples folded in
pub fn unpack_average(packed: u32) -> (Vec3, u32) {
    (unpack_unorm4x8(packed).truncate(), (packed >> 24) & MAX_AVERAGE_COUNT)
}

/// Fold `value` into the RGBA8 running average stored in `word`.
///
/// Lock-free: retries the compare-exchange until no other lane raced in
/// between. Once the count saturates, new samples keep blending in with
/// weight `1 / (MAX_AVERAGE_COUNT + 1)`.
pub fn atomic_average_rgba8(word: &AtomicU32, value: Vec3) {
    let sample = value.clamp(Vec3::ZERO, Vec3::ONE) * 255.0;
    let mut current = word.load(Ordering::Relaxed);
    loop {
        let count = (current >> 24) & MAX_AVERAGE_COUNT;
        let mean = Vec3::new(
            (current & 0xFF) as f32,
            ((current >> 8) & 0xFF) as f32,
            ((current >> 16) & 0xFF) as f32,
        );
        let blended = ((mean * count as f32 + sample) / (count + 1) as f32).round();
        let next = (blended.x as u32)
            | ((blended.y as u32) << 8)
            | ((blended.z as u32) << 16)
            | ((count + 1).min(MAX_AVERAGE_COUNT) << 24);

        match word.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}
