//! Lattice value noise and its curl.
//!
//! The scalar field assigns every integer lattice point a value in [-1, 1]
//! derived from a 32-bit integer hash of its coordinates, and blends the eight
//! surrounding lattice values with smoothstep weights. The blend is C¹, so the
//! field has no creases at cell boundaries.
//!
//! [`NoiseField::curl`] treats `(n, n, n)` as a vector potential and returns
//! its curl, estimated with central differences. The result is
//! divergence-free: agents pushed by it swirl without bunching up or
//! spreading out.
//!
//! `shader::NOISE_WGSL` implements the same hash, blend and curl so both
//! compute substrates sample an identical field.

use glam::Vec3;

/// Finite-difference step used by [`NoiseField::curl`], in noise-space units.
pub const CURL_EPSILON: f32 = 0.1;

/// 32-bit integer hash (lowbias32 family). Matches `hash` in the WGSL utilities.
#[inline]
pub fn hash(n: u32) -> u32 {
    let mut x = n;
    x ^= x >> 17;
    x = x.wrapping_mul(0xed5a_d4bb);
    x ^= x >> 11;
    x = x.wrapping_mul(0xac4c_1b51);
    x ^= x >> 15;
    x = x.wrapping_mul(0x3184_8bab);
    x ^= x >> 14;
    x
}

/// Hash of a 3D lattice coordinate. Matches `hash3` in the WGSL utilities.
#[inline]
pub fn hash3(x: u32, y: u32, z: u32) -> u32 {
    hash(x.wrapping_add(hash(y.wrapping_add(hash(z)))))
}

/// Value in [-1, 1] attached to a lattice point.
///
/// Only the top 24 bits of the hash are used so the conversion to `f32` is
/// exact on every substrate.
#[inline]
fn lattice_value(x: i32, y: i32, z: i32) -> f32 {
    let h = hash3(x as u32, y as u32, z as u32) >> 8;
    h as f32 / 16_777_215.0 * 2.0 - 1.0
}

#[inline]
fn fade(t: f32) -> f32 {
    t * t * (3.0 - 2.0 * t)
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Deterministic 3D noise field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoiseField;

impl NoiseField {
    pub fn new() -> Self {
        Self
    }

    /// Scalar noise in [-1, 1].
    pub fn sample(&self, p: Vec3) -> f32 {
        let cell = p.floor();
        let f = p - cell;
        let (ix, iy, iz) = (cell.x as i32, cell.y as i32, cell.z as i32);
        let (ux, uy, uz) = (fade(f.x), fade(f.y), fade(f.z));

        let c000 = lattice_value(ix, iy, iz);
        let c100 = lattice_value(ix.wrapping_add(1), iy, iz);
        let c010 = lattice_value(ix, iy.wrapping_add(1), iz);
        let c110 = lattice_value(ix.wrapping_add(1), iy.wrapping_add(1), iz);
        let c001 = lattice_value(ix, iy, iz.wrapping_add(1));
        let c101 = lattice_value(ix.wrapping_add(1), iy, iz.wrapping_add(1));
        let c011 = lattice_value(ix, iy.wrapping_add(1), iz.wrapping_add(1));
        let c111 = lattice_value(ix.wrapping_add(1), iy.wrapping_add(1), iz.wrapping_add(1));

        let x00 = lerp(c000, c100, ux);
        let x10 = lerp(c010, c110, ux);
        let x01 = lerp(c001, c101, ux);
        let x11 = lerp(c011, c111, ux);
        let y0 = lerp(x00, x10, uy);
        let y1 = lerp(x01, x11, uy);
        lerp(y0, y1, uz)
    }

    /// Divergence-free vector field: curl of the potential `(n, n, n)`.
    ///
    /// Six noise evaluations (one central difference per axis).
    pub fn curl(&self, p: Vec3) -> Vec3 {
        let ex = Vec3::new(CURL_EPSILON, 0.0, 0.0);
        let ey = Vec3::new(0.0, CURL_EPSILON, 0.0);
        let ez = Vec3::new(0.0, 0.0, CURL_EPSILON);

        let dx = self.sample(p + ex) - self.sample(p - ex);
        let dy = self.sample(p + ey) - self.sample(p - ey);
        let dz = self.sample(p + ez) - self.sample(p - ez);

        Vec3::new(dy - dz, dz - dx, dx - dy) / (2.0 * CURL_EPSILON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_points() -> impl Iterator<Item = Vec3> {
        (0..200).map(|i| {
            let t = i as f32;
            Vec3::new(
                (t * 0.731).sin() * 13.0 + t * 0.05,
                (t * 1.113).cos() * 7.0 - 3.3,
                t * 0.173 - 11.0,
            )
        })
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(hash(0), hash(0));
        assert_ne!(hash(1), hash(2));
        assert_ne!(hash3(1, 2, 3), hash3(3, 2, 1));
    }

    #[test]
    fn test_noise_deterministic_and_bounded() {
        let field = NoiseField::new();
        for p in sample_points() {
            let n = field.sample(p);
            assert_eq!(n, field.sample(p));
            assert!((-1.0..=1.0).contains(&n), "noise {} out of range at {:?}", n, p);
        }
    }

    #[test]
    fn test_noise_hits_lattice_values() {
        let field = NoiseField::new();
        let n = field.sample(Vec3::new(3.0, -2.0, 5.0));
        assert_eq!(n, lattice_value(3, -2, 5));
    }

    #[test]
    fn test_noise_continuous_across_cell_boundary() {
        let field = NoiseField::new();
        for p in sample_points() {
            let boundary = Vec3::new(p.x.floor(), p.y, p.z);
            let below = field.sample(boundary - Vec3::X * 1e-3);
            let above = field.sample(boundary + Vec3::X * 1e-3);
            assert!((below - above).abs() < 0.01, "jump at {:?}", boundary);
        }
    }

    #[test]
    fn test_noise_varies() {
        let field = NoiseField::new();
        let values: Vec<f32> = sample_points().map(|p| field.sample(p)).collect();
        let min = values.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        assert!(max - min > 0.5);
    }

    #[test]
    fn test_curl_is_divergence_free() {
        let field = NoiseField::new();
        let h = CURL_EPSILON;
        let mut max_partial = 0.0f32;
        for p in sample_points() {
            let dxx = (field.curl(p + Vec3::X * h).x - field.curl(p - Vec3::X * h).x) / (2.0 * h);
            let dyy = (field.curl(p + Vec3::Y * h).y - field.curl(p - Vec3::Y * h).y) / (2.0 * h);
            let dzz = (field.curl(p + Vec3::Z * h).z - field.curl(p - Vec3::Z * h).z) / (2.0 * h);
            max_partial = max_partial.max(dxx.abs()).max(dyy.abs()).max(dzz.abs());
            let divergence = dxx + dyy + dzz;
            assert!(divergence.abs() < 1e-3, "divergence {} at {:?}", divergence, p);
        }
        // The field must actually swirl for the check above to mean anything.
        assert!(max_partial > 0.05);
    }

    #[test]
    fn test_curl_finite() {
        let field = NoiseField::new();
        for p in sample_points() {
            let c = field.curl(p * 100.0);
            assert!(c.is_finite());
        }
    }
}
