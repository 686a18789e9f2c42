//! Initial flock placement.
//!
//! Every agent is created exactly once, before the first tick: positions are
//! spread uniformly through a sphere around the origin and every agent starts
//! at 30% of the max speed along a uniformly random heading.

use glam::Vec3;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;

use crate::grid::GridDims;
use crate::params::Params;
use crate::state::AgentRecord;

/// Radius of the spawn sphere as a fraction of the boundary radius.
pub const INITIAL_SPREAD: f32 = 0.6;
/// Initial speed as a fraction of the max speed.
pub const INITIAL_SPEED: f32 = 0.3;

/// Seeded random source with the spawn helpers the flock needs.
///
/// ```ignore
/// let mut ctx = SpawnContext::seeded(Some(7));
/// let p = ctx.random_in_sphere(240.0);
/// let heading = ctx.random_direction();
/// ```
pub struct SpawnContext {
    rng: SmallRng,
}

impl SpawnContext {
    /// Deterministic for `Some(seed)`, seeded from OS entropy for `None`.
    pub fn seeded(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Self { rng }
    }

    /// Random point inside a sphere of given radius, centered at origin.
    ///
    /// Distribution is uniform throughout the volume.
    pub fn random_in_sphere(&mut self, radius: f32) -> Vec3 {
        // Cube root for uniform volume distribution
        let r = radius * self.rng.gen::<f32>().cbrt();
        self.random_direction() * r
    }

    /// Random unit vector, uniformly distributed on the unit sphere.
    pub fn random_direction(&mut self) -> Vec3 {
        let theta = self.rng.gen_range(0.0..TAU);
        // Uniform in cos(phi), not phi, so the poles are not oversampled
        let z: f32 = self.rng.gen_range(-1.0..=1.0);
        let ring = (1.0 - z * z).max(0.0).sqrt();
        Vec3::new(ring * theta.cos(), ring * theta.sin(), z)
    }
}

/// One record per agent for a fresh flock, in id order.
pub fn spawn_flock(dims: GridDims, params: &Params, seed: Option<u64>) -> Vec<AgentRecord> {
    let mut ctx = SpawnContext::seeded(seed);
    let spread = INITIAL_SPREAD * params.boundary_radius.max(0.0);
    let speed = INITIAL_SPEED * params.max_speed.max(0.0);

    (0..dims.count())
        .map(|_| {
            let position = ctx.random_in_sphere(spread);
            let velocity = ctx.random_direction() * speed;
            AgentRecord::new(position, velocity)
        })
        .collect()
}
