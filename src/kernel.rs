//! Per-agent update kernels.
//!
//! The velocity kernel turns an agent's current state plus a sampled set of
//! neighbors into its next velocity; the position kernel integrates the next
//! velocity. Both are pure functions of the previous generation, so every
//! agent can be updated in parallel.
//!
//! Accelerations are accumulated in a fixed order (separation, alignment,
//! cohesion, turbulence, centroid pull, containment) so results are
//! reproducible across substrates. The WGSL velocity kernel in `shader` follows
//! the same order.

use glam::{Vec3, Vec4};

use crate::noise::NoiseField;
use crate::params::Params;
use crate::sampler::NeighborSampler;

/// Spatial frequency of the turbulence field.
pub const TURBULENCE_FREQUENCY: f32 = 0.008;
/// How fast the turbulence field drifts through time.
pub const TURBULENCE_DRIFT: f32 = 0.15;
/// Centroid pull strength relative to the cohesion weight.
pub const CENTROID_PULL: f32 = 0.15;
/// Fraction of the boundary radius where containment starts.
pub const CONTAINMENT_START: f32 = 0.7;
/// Moving agents never drop below this fraction of the max speed.
pub const MIN_SPEED_FRACTION: f32 = 0.2;
/// Separation density compensation saturates at this factor.
pub const SEPARATION_DENSITY_CAP: f32 = 3.0;

const EPSILON: f32 = 1e-3;
const REST_EPSILON: f32 = 1e-6;
// Containment grows cubically; past this many falloff widths the force is
// already far beyond anything max_speed can express.
const CONTAINMENT_EXCESS_LIMIT: f32 = 100.0;

/// Hermite step between two edges. Coincident edges degrade to a hard step.
#[inline]
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge0 == edge1 {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Position and velocity of one agent.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Boid {
    pub position: Vec3,
    pub velocity: Vec3,
}

impl Boid {
    pub fn new(position: Vec3, velocity: Vec3) -> Self {
        Self { position, velocity }
    }

    #[inline]
    pub fn from_texels(position: Vec4, velocity: Vec4) -> Self {
        Self {
            position: position.truncate(),
            velocity: velocity.truncate(),
        }
    }
}

/// Everything the velocity kernel reads besides agent state.
#[derive(Clone, Copy, Debug)]
pub struct KernelContext {
    pub params: Params,
    pub noise: NoiseField,
    /// Frame delta in seconds (already clamped by the caller).
    pub dt: f32,
    /// Simulation time in seconds.
    pub time: f32,
    /// N / K compensation for unvisited neighbors.
    pub density_scale: f32,
}

impl KernelContext {
    pub fn new(params: Params, dt: f32, time: f32, density_scale: f32) -> Self {
        Self {
            params,
            noise: NoiseField::new(),
            dt,
            time,
            density_scale,
        }
    }
}

/// Individual acceleration terms for one agent, in accumulation order.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Steering {
    pub separation: Vec3,
    pub alignment: Vec3,
    pub cohesion: Vec3,
    pub turbulence: Vec3,
    pub centroid: Vec3,
    pub containment: Vec3,
}

impl Steering {
    /// Sum of all terms.
    pub fn total(&self) -> Vec3 {
        self.separation
            + self.alignment
            + self.cohesion
            + self.turbulence
            + self.centroid
            + self.containment
    }
}

/// Running sums over the visited neighbors.
#[derive(Clone, Copy, Debug, Default)]
struct NeighborSums {
    separation: Vec3,
    separation_count: u32,
    velocity: Vec3,
    position: Vec3,
    perceived_count: u32,
}

impl NeighborSums {
    #[inline]
    fn add(&mut self, mine: &Boid, other: &Boid, params: &Params) {
        let offset = mine.position - other.position;
        let d = offset.length();
        if d <= 0.0 {
            return;
        }
        if d < params.separation_radius {
            self.separation += offset / d;
            self.separation_count += 1;
        }
        if d < params.perception_radius {
            self.velocity += other.velocity;
            self.position += other.position;
            self.perceived_count += 1;
        }
    }

    fn steering(&self, mine: &Boid, ctx: &KernelContext) -> Steering {
        let params = &ctx.params;
        let mut steering = Steering::default();

        if self.separation_count > 0 {
            let count = self.separation_count as f32;
            let density = (count * ctx.density_scale / 10.0).min(SEPARATION_DENSITY_CAP);
            steering.separation = self.separation / count * params.separation_weight * density;
        }

        if self.perceived_count > 0 {
            let count = self.perceived_count as f32;

            let mut align = self.velocity / count - mine.velocity;
            if align.length() > EPSILON {
                align = align.normalize();
            }
            steering.alignment = align * params.alignment_weight;

            let to_center = self.position / count - mine.position;
            let dist = to_center.length();
            if dist > EPSILON {
                steering.cohesion = to_center / dist
                    * smoothstep(0.0, params.perception_radius, dist)
                    * params.cohesion_weight;
            }
        }

        let drift = Vec3::splat(ctx.time * TURBULENCE_DRIFT);
        steering.turbulence = ctx
            .noise
            .curl(mine.position * TURBULENCE_FREQUENCY + drift)
            * params.turbulence;

        let boundary = params.boundary_radius.max(0.0);
        let r = mine.position.length();
        if r > EPSILON {
            let inward = -mine.position / r;
            steering.centroid = inward
                * smoothstep(0.5 * boundary, boundary, r)
                * params.cohesion_weight
                * CENTROID_PULL;

            let start = CONTAINMENT_START * boundary;
            if boundary > 0.0 && r > start {
                let excess = ((r - start) / (boundary - start)).min(CONTAINMENT_EXCESS_LIMIT);
                steering.containment =
                    inward * 2.0 * params.max_speed.max(0.0) * excess * excess * excess;
            }
        }

        steering
    }
}

/// Per-term accelerations acting on `mine` given its visited neighbors.
pub fn steer(mine: &Boid, neighbors: impl IntoIterator<Item = Boid>, ctx: &KernelContext) -> Steering {
    let mut sums = NeighborSums::default();
    for other in neighbors {
        sums.add(mine, &other, &ctx.params);
    }
    sums.steering(mine, ctx)
}

/// Integrate steering into the next velocity and apply the speed limits.
pub fn next_velocity(mine: &Boid, neighbors: impl IntoIterator<Item = Boid>, ctx: &KernelContext) -> Vec3 {
    let steering = steer(mine, neighbors, ctx);
    integrate_velocity(mine.velocity, steering.total(), ctx)
}

/// The velocity kernel as run by the flock: agent `id` of the current
/// generation, neighbors drawn from `sampler`.
pub fn velocity_for(
    id: u32,
    positions: &[Vec4],
    velocities: &[Vec4],
    sampler: &dyn NeighborSampler,
    ctx: &KernelContext,
) -> Vec3 {
    let i = id as usize;
    let mine = Boid::from_texels(positions[i], velocities[i]);
    let mut sums = NeighborSums::default();
    sampler.for_each_candidate(id, &mut |j| {
        let j = j as usize;
        let other = Boid::from_texels(positions[j], velocities[j]);
        sums.add(&mine, &other, &ctx.params);
    });
    let steering = sums.steering(&mine, ctx);
    integrate_velocity(mine.velocity, steering.total(), ctx)
}

fn integrate_velocity(previous: Vec3, acceleration: Vec3, ctx: &KernelContext) -> Vec3 {
    let v = previous + acceleration * ctx.dt;
    clamp_speed(v, previous, ctx.params.max_speed)
}

/// Keep `|v|` within `[0.2 * max_speed, max_speed]` for moving agents.
///
/// A velocity that collapsed to zero continues along `previous` at the
/// minimum speed; an agent that was already at rest stays at rest. A
/// velocity whose magnitude overflowed keeps its heading (or, when that is
/// lost too, the previous one) at the maximum speed.
pub fn clamp_speed(v: Vec3, previous: Vec3, max_speed: f32) -> Vec3 {
    let max_speed = max_speed.max(0.0);
    let min_speed = MIN_SPEED_FRACTION * max_speed;
    let speed = v.length();

    if !speed.is_finite() {
        return match overflowed_heading(v).or_else(|| heading(previous)) {
            Some(dir) => dir * max_speed,
            None => Vec3::ZERO,
        };
    }

    if speed > max_speed {
        v * (max_speed / speed)
    } else if speed < min_speed {
        if speed > REST_EPSILON {
            v * (min_speed / speed)
        } else if previous.length() > REST_EPSILON {
            previous.normalize() * min_speed
        } else {
            v
        }
    } else {
        v
    }
}

/// Direction of a vector with finite components whose length overflows.
fn overflowed_heading(v: Vec3) -> Option<Vec3> {
    if !v.is_finite() {
        return None;
    }
    let largest = v.abs().max_element();
    if largest > 0.0 {
        (v / largest).try_normalize()
    } else {
        None
    }
}

fn heading(v: Vec3) -> Option<Vec3> {
    if v.length() > REST_EPSILON {
        v.try_normalize()
    } else {
        None
    }
}

/// Position kernel: `p + v_next * dt`.
#[inline]
pub fn integrate_position(position: Vec3, next_velocity: Vec3, dt: f32) -> Vec3 {
    position + next_velocity * dt
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const NO_NEIGHBORS: [Boid; 0] = [];

    fn calm_params() -> Params {
        Params::drift(40.0, 400.0)
    }

    fn ctx(params: Params, density_scale: f32) -> KernelContext {
        KernelContext::new(params, 0.016, 0.0, density_scale)
    }

    #[test]
    fn test_smoothstep() {
        assert_eq!(smoothstep(0.0, 1.0, -1.0), 0.0);
        assert_eq!(smoothstep(0.0, 1.0, 2.0), 1.0);
        assert_relative_eq!(smoothstep(0.0, 1.0, 0.5), 0.5);
        assert_eq!(smoothstep(2.0, 2.0, 1.0), 0.0);
        assert_eq!(smoothstep(2.0, 2.0, 2.0), 1.0);
    }

    #[test]
    fn test_no_forces_keeps_velocity() {
        let mine = Boid::new(Vec3::new(10.0, 0.0, 0.0), Vec3::new(0.0, 20.0, 0.0));
        let neighbor = Boid::new(Vec3::new(12.0, 0.0, 0.0), Vec3::new(5.0, 0.0, 0.0));
        let v = next_velocity(&mine, [neighbor], &ctx(calm_params(), 1.0));
        assert_eq!(v, mine.velocity);
        assert_eq!(integrate_position(mine.position, v, 0.5), Vec3::new(10.0, 10.0, 0.0));
    }

    #[test]
    fn test_separation_pushes_apart() {
        let mut params = calm_params();
        params.separation_weight = 10.0;
        let a = Boid::new(Vec3::ZERO, Vec3::ZERO);
        let b = Boid::new(Vec3::X, Vec3::ZERO);
        let scale = 4.0 / 3.0;

        let on_a = steer(&a, [b], &ctx(params, scale)).separation;
        let on_b = steer(&b, [a], &ctx(params, scale)).separation;
        let expected = 10.0 * (scale / 10.0);
        assert_relative_eq!(on_a.x, -expected, epsilon = 1e-6);
        assert_relative_eq!(on_b.x, expected, epsilon = 1e-6);
        assert_eq!(on_a.y, 0.0);
        assert_eq!(on_a.z, 0.0);

        params.separation_weight = 20.0;
        let doubled = steer(&a, [b], &ctx(params, scale)).separation;
        assert_relative_eq!(doubled.x, 2.0 * on_a.x, epsilon = 1e-6);
    }

    #[test]
    fn test_separation_density_saturates() {
        let mut params = calm_params();
        params.separation_weight = 1.0;
        let a = Boid::new(Vec3::ZERO, Vec3::ZERO);
        let b = Boid::new(Vec3::X, Vec3::ZERO);
        let s = steer(&a, [b], &ctx(params, 1_000.0)).separation;
        assert_relative_eq!(s.length(), SEPARATION_DENSITY_CAP, epsilon = 1e-6);
    }

    #[test]
    fn test_coincident_neighbor_ignored() {
        let mut params = Params::default();
        params.turbulence = 0.0;
        let a = Boid::new(Vec3::new(1.0, 2.0, 3.0), Vec3::X);
        let s = steer(&a, [a, a], &ctx(params, 1.0));
        assert_eq!(s.separation, Vec3::ZERO);
        assert_eq!(s.alignment, Vec3::ZERO);
        assert_eq!(s.cohesion, Vec3::ZERO);
        assert!(s.total().is_finite());
    }

    #[test]
    fn test_alignment_unit_steer() {
        let mut params = calm_params();
        params.alignment_weight = 3.0;
        let mine = Boid::new(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0));
        let other = Boid::new(Vec3::new(0.0, 5.0, 0.0), Vec3::new(10.0, 10.0, 0.0));
        let s = steer(&mine, [other], &ctx(params, 1.0)).alignment;
        assert_relative_eq!(s.y, 3.0, epsilon = 1e-6);
        assert_relative_eq!(s.x, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_cohesion_scales_with_distance() {
        let mut params = calm_params();
        params.cohesion_weight = 2.0;
        params.perception_radius = 40.0;
        let mine = Boid::new(Vec3::ZERO, Vec3::ZERO);
        let other = Boid::new(Vec3::new(20.0, 0.0, 0.0), Vec3::ZERO);
        let s = steer(&mine, [other], &ctx(params, 1.0)).cohesion;
        assert_relative_eq!(s.x, 2.0 * smoothstep(0.0, 40.0, 20.0), epsilon = 1e-6);
        assert_relative_eq!(s.x, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_containment_at_boundary() {
        let params = calm_params();
        let mine = Boid::new(Vec3::new(0.0, 0.0, 400.0), Vec3::ZERO);
        let s = steer(&mine, NO_NEIGHBORS, &ctx(params, 1.0));
        assert_relative_eq!(s.containment.z, -80.0, epsilon = 1e-3);
        assert_eq!(s.centroid, Vec3::ZERO);

        let inside = Boid::new(Vec3::new(0.0, 0.0, 279.0), Vec3::ZERO);
        assert_eq!(steer(&inside, NO_NEIGHBORS, &ctx(params, 1.0)).containment, Vec3::ZERO);
    }

    #[test]
    fn test_centroid_pull_outer_shell() {
        let mut params = calm_params();
        params.cohesion_weight = 10.0;
        let far = Boid::new(Vec3::new(400.0, 0.0, 0.0), Vec3::ZERO);
        let s = steer(&far, NO_NEIGHBORS, &ctx(params, 1.0));
        assert_relative_eq!(s.centroid.x, -10.0 * CENTROID_PULL, epsilon = 1e-6);

        let near = Boid::new(Vec3::new(100.0, 0.0, 0.0), Vec3::ZERO);
        assert_eq!(steer(&near, NO_NEIGHBORS, &ctx(params, 1.0)).centroid, Vec3::ZERO);
    }

    #[test]
    fn test_escaped_agent_turns_inward() {
        let params = Params::default();
        let mine = Boid::new(Vec3::new(0.0, 800.0, 0.0), Vec3::ZERO);
        let v = next_velocity(&mine, NO_NEIGHBORS, &ctx(params, 1.0));
        assert!(v.y < 0.0);
        assert!(v.length() <= params.max_speed + 1e-3);
    }

    #[test]
    fn test_far_away_agent_stays_finite() {
        let params = Params::default();
        let mine = Boid::new(Vec3::new(1.0e9, -1.0e9, 1.0e9), Vec3::new(40.0, 0.0, 0.0));
        let v = next_velocity(&mine, NO_NEIGHBORS, &ctx(params, 1.0));
        assert!(v.is_finite());
        assert!(v.length() <= params.max_speed + 1e-3);
    }

    #[test]
    fn test_overflowing_steering_stays_finite() {
        let params = Params {
            separation_weight: 1.0e38,
            alignment_weight: 1.0e38,
            cohesion_weight: 1.0e38,
            ..Params::default()
        };
        let mine = Boid::new(Vec3::ZERO, Vec3::new(0.0, 10.0, 0.0));
        let neighbor = Boid::new(Vec3::X, Vec3::new(0.0, 0.0, 10.0));
        let v = next_velocity(&mine, [neighbor], &ctx(params, 1_000.0));
        assert!(v.is_finite(), "{:?}", v);
        assert!(v.length() <= params.max_speed + 1e-3);
        assert!(v.length() >= MIN_SPEED_FRACTION * params.max_speed - 1e-3);
    }

    #[test]
    fn test_clamp_speed_non_finite() {
        let v = clamp_speed(Vec3::new(f32::INFINITY, 0.0, 0.0), Vec3::X, 40.0);
        assert_eq!(v, Vec3::new(40.0, 0.0, 0.0));

        // Components fit in f32 but the length does not
        let v = clamp_speed(Vec3::new(3.0e38, -3.0e38, 0.0), Vec3::Y, 40.0);
        assert!(v.is_finite());
        assert_relative_eq!(v.length(), 40.0, epsilon = 1e-3);
        assert!(v.x > 0.0 && v.y < 0.0);

        let v = clamp_speed(Vec3::new(f32::NAN, 1.0, 0.0), Vec3::new(0.0, 0.0, -3.0), 40.0);
        assert_relative_eq!(v.z, -40.0, epsilon = 1e-4);

        assert_eq!(clamp_speed(Vec3::splat(f32::NAN), Vec3::ZERO, 40.0), Vec3::ZERO);
    }

    #[test]
    fn test_clamp_speed() {
        let v = clamp_speed(Vec3::new(100.0, 0.0, 0.0), Vec3::ZERO, 40.0);
        assert_relative_eq!(v.length(), 40.0, epsilon = 1e-4);

        let v = clamp_speed(Vec3::new(0.0, 1.0, 0.0), Vec3::ZERO, 40.0);
        assert_relative_eq!(v.y, 8.0, epsilon = 1e-5);

        let v = clamp_speed(Vec3::ZERO, Vec3::new(0.0, 0.0, -5.0), 40.0);
        assert_relative_eq!(v.z, -8.0, epsilon = 1e-5);

        assert_eq!(clamp_speed(Vec3::ZERO, Vec3::ZERO, 40.0), Vec3::ZERO);
        assert_eq!(clamp_speed(Vec3::X * 10.0, Vec3::ZERO, -5.0), Vec3::ZERO);
    }

    #[test]
    fn test_velocity_for_matches_steer() {
        use crate::sampler::StrideSampler;

        let mut params = Params::default();
        params.turbulence = 0.0;
        let boids = [
            Boid::new(Vec3::ZERO, Vec3::X * 10.0),
            Boid::new(Vec3::new(3.0, 0.0, 0.0), Vec3::Y * 10.0),
            Boid::new(Vec3::new(0.0, 4.0, 0.0), Vec3::Z * 10.0),
            Boid::new(Vec3::new(0.0, 0.0, 30.0), Vec3::X * -10.0),
        ];
        let positions: Vec<Vec4> = boids.iter().map(|b| b.position.extend(0.0)).collect();
        let velocities: Vec<Vec4> = boids.iter().map(|b| b.velocity.extend(0.0)).collect();
        let sampler = StrideSampler::new(4, 3).unwrap();
        let ctx = ctx(params, sampler.density_scale());

        let direct = next_velocity(&boids[1], [boids[0], boids[2], boids[3]], &ctx);
        let sampled = velocity_for(1, &positions, &velocities, &sampler, &ctx);
        assert_eq!(direct, sampled);
    }
}
