//! Sphere Sampler - seeded synthetic point source
//!
//! Produces points uniformly distributed on the surface of a sphere. Used by
//! the demo recording session in place of a real sensor.

use std::f32::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Growth of the cloud radius per frame in the demo run
const SCALE_PER_FRAME: f32 = 1.0 / 50.0;

/// Seeded generator of points on a sphere
#[derive(Debug, Clone)]
pub struct SphereSampler {
    seed: u64,
    /// Random number generator
    rng: StdRng,
}

impl Default for SphereSampler {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SphereSampler {
    /// Create a sampler; equal seeds give equal point sequences
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Seed the sampler was created with
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Next point on the sphere of radius `scale`
    pub fn next_point(&mut self, scale: f32) -> [f32; 3] {
        let theta = 2.0 * PI * self.rng.gen::<f32>();
        let phi = (1.0 - 2.0 * self.rng.gen::<f32>()).acos();
        [
            phi.sin() * theta.cos() * scale,
            phi.sin() * theta.sin() * scale,
            phi.cos() * scale,
        ]
    }

    /// `count` points flattened as `x, y, z, x, y, z, ...`
    pub fn points(&mut self, count: usize, scale: f32) -> Vec<f32> {
        let mut values = Vec::with_capacity(count * 3);
        self.fill(&mut values, count, scale);
        values
    }

    /// Append `count` flattened points to `values`
    pub fn fill(&mut self, values: &mut Vec<f32>, count: usize, scale: f32) {
        values.reserve(count * 3);
        for _ in 0..count {
            values.extend_from_slice(&self.next_point(scale));
        }
    }
}

/// Radius of the demo cloud for a frame: grows slightly every frame
pub fn frame_scale(frame_index: u32) -> f32 {
    1.0 + frame_index as f32 * SCALE_PER_FRAME
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_lie_on_sphere() {
        let mut sampler = SphereSampler::new(7);
        for scale in [1.0f32, 2.5] {
            for _ in 0..500 {
                let [x, y, z] = sampler.next_point(scale);
                let radius = (x * x + y * y + z * z).sqrt();
                assert!((radius - scale).abs() < 1e-4 * scale, "radius {}", radius);
            }
        }
    }

    #[test]
    fn test_seed_is_deterministic() {
        let a = SphereSampler::new(42).points(100, 1.0);
        let b = SphereSampler::new(42).points(100, 1.0);
        let c = SphereSampler::new(43).points(100, 1.0);

        assert_eq!(a.len(), 300);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_frame_scale() {
        assert_eq!(frame_scale(0), 1.0);
        assert_eq!(frame_scale(50), 2.0);
        assert!(frame_scale(99) < 3.0);
    }

    #[test]
    fn test_points_cover_both_hemispheres() {
        let values = SphereSampler::default().points(1000, 1.0);
        let above = values.chunks(3).filter(|p| p[2] > 0.0).count();
        assert!(above > 350 && above < 650, "{} points above", above);
    }
}
