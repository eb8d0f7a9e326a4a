//! Deterministic math utilities
//!
//! Re-exports glam with the placement helpers the scene and renderer share

pub use glam::*;

/// Deterministic random number generator
///
/// Small LCG, good enough for seeding initial velocities. Same seed gives
/// the same sequence on every platform.
pub struct DeterministicRng {
    seed: u64,
    state: u64,
}

impl DeterministicRng {
    pub fn new(seed: u64) -> Self {
        Self { seed, state: seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn next_u32(&mut self) -> u32 {
        // LCG constants (Numerical Recipes)
        const A: u64 = 1664525;
        const C: u64 = 1013904223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        self.state as u32
    }

    /// Uniform in [0, 1)
    pub fn next_f32(&mut self) -> f32 {
        // 24 high bits fit an f32 mantissa exactly, so the result never rounds up to 1.0
        (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }

    /// Uniform in [min, max)
    pub fn next_range(&mut self, min: f32, max: f32) -> f32 {
        min + (max - min) * self.next_f32()
    }
}

/// Rotation from Euler angles in degrees, applied X then Y then Z in
/// matrix order (`Rx * Ry * Rz`).
pub fn rotation_from_euler_degrees(degrees: Vec3) -> Mat4 {
    Mat4::from_rotation_x(degrees.x.to_radians())
        * Mat4::from_rotation_y(degrees.y.to_radians())
        * Mat4::from_rotation_z(degrees.z.to_radians())
}

/// Placement without scale: `T * R`
pub fn placement_matrix(position: Vec3, rotation_degrees: Vec3) -> Mat4 {
    Mat4::from_translation(position) * rotation_from_euler_degrees(rotation_degrees)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rng_is_deterministic() {
        let mut a = DeterministicRng::new(7);
        let mut b = DeterministicRng::new(7);
        for _ in 0..16 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn rng_range_stays_in_bounds() {
        let mut rng = DeterministicRng::new(42);
        for _ in 0..1000 {
            let v = rng.next_range(-2.0, 2.0);
            assert!((-2.0..2.0).contains(&v));
        }
    }

    #[test]
    fn placement_is_translation_times_rotation() {
        let m = placement_matrix(Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.0, 90.0, 0.0));
        let p = m.transform_point3(Vec3::X);
        // +X rotated 90 degrees about Y lands on -Z
        assert!((p - Vec3::new(1.0, 2.0, 2.0)).length() < 1e-5);
        assert_eq!(m.w_axis.truncate(), Vec3::new(1.0, 2.0, 3.0));
    }
}
