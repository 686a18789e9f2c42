//! Read-only frame access for renderers.
//!
//! After every tick the current generation is exposed as a [`FrameView`]:
//! the position and velocity texel grids, the grid dimensions and the active
//! agent count. Renderers draw instances `0..active_count` and orient each one
//! with [`instance_transform`]; the WGSL vertex shader builds the same
//! transform on the GPU.

use glam::{Mat3, Mat4, Vec3, Vec4};

use crate::grid::GridDims;
use crate::kernel::smoothstep;
use crate::state::AgentRecord;

/// Speed at which the cosmetic instance scale saturates.
pub const SCALE_SATURATION_SPEED: f32 = 50.0;

const MIN_HEADING_SPEED: f32 = 0.001;

/// Borrowed view of the current generation.
#[derive(Clone, Copy, Debug)]
pub struct FrameView<'a> {
    positions: &'a [Vec4],
    velocities: &'a [Vec4],
    dims: GridDims,
    active_count: u32,
    generation: u64,
}

impl<'a> FrameView<'a> {
    pub fn new(
        positions: &'a [Vec4],
        velocities: &'a [Vec4],
        dims: GridDims,
        active_count: u32,
        generation: u64,
    ) -> Self {
        debug_assert_eq!(positions.len(), dims.count() as usize);
        debug_assert_eq!(velocities.len(), dims.count() as usize);
        Self {
            positions,
            velocities,
            dims,
            active_count: active_count.min(dims.count()),
            generation,
        }
    }

    /// Position texels `[x, y, z, flag]` of every agent, in id order.
    #[inline]
    pub fn positions(&self) -> &'a [Vec4] {
        self.positions
    }

    /// Velocity texels `[x, y, z, reserved]` of every agent, in id order.
    #[inline]
    pub fn velocities(&self) -> &'a [Vec4] {
        self.velocities
    }

    /// Position texels of the agents that should be drawn.
    #[inline]
    pub fn active_positions(&self) -> &'a [Vec4] {
        &self.positions[..self.active_count as usize]
    }

    /// Velocity texels of the agents that should be drawn.
    #[inline]
    pub fn active_velocities(&self) -> &'a [Vec4] {
        &self.velocities[..self.active_count as usize]
    }

    pub fn position_at(&self, x: u32, y: u32) -> Option<Vec3> {
        self.dims
            .id_at(x, y)
            .map(|id| self.positions[id as usize].truncate())
    }

    pub fn velocity_at(&self, x: u32, y: u32) -> Option<Vec3> {
        self.dims
            .id_at(x, y)
            .map(|id| self.velocities[id as usize].truncate())
    }

    pub fn record(&self, id: u32) -> Option<AgentRecord> {
        let i = id as usize;
        Some(AgentRecord::from_texels(
            *self.positions.get(i)?,
            *self.velocities.get(i)?,
        ))
    }

    #[inline]
    pub fn active_count(&self) -> u32 {
        self.active_count
    }

    #[inline]
    pub fn dims(&self) -> GridDims {
        self.dims
    }

    /// Generation counter of the flock that produced this view.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Summary statistics over all agents.
    pub fn stats(&self) -> FlockStats {
        FlockStats::from_texels(self.positions, self.velocities)
    }
}

/// A frame copied out of its substrate (GPU readback, snapshots).
#[derive(Clone, Debug, PartialEq)]
pub struct OwnedFrame {
    pub positions: Vec<Vec4>,
    pub velocities: Vec<Vec4>,
    pub dims: GridDims,
    pub active_count: u32,
    pub generation: u64,
}

impl OwnedFrame {
    pub fn view(&self) -> FrameView<'_> {
        FrameView::new(
            &self.positions,
            &self.velocities,
            self.dims,
            self.active_count,
            self.generation,
        )
    }
}

/// Aggregate motion statistics of one generation.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FlockStats {
    pub mean_speed: f32,
    pub min_speed: f32,
    pub max_speed: f32,
    pub centroid: Vec3,
    /// Distance of the farthest agent from the origin.
    pub max_radius: f32,
}

impl FlockStats {
    pub fn from_texels(positions: &[Vec4], velocities: &[Vec4]) -> Self {
        if positions.is_empty() {
            return Self::default();
        }

        let mut stats = Self {
            min_speed: f32::INFINITY,
            ..Self::default()
        };
        let mut speed_sum = 0.0f64;
        let mut position_sum = glam::DVec3::ZERO;

        for (p, v) in positions.iter().zip(velocities) {
            let speed = v.truncate().length();
            speed_sum += speed as f64;
            stats.min_speed = stats.min_speed.min(speed);
            stats.max_speed = stats.max_speed.max(speed);

            let p = p.truncate();
            position_sum += p.as_dvec3();
            stats.max_radius = stats.max_radius.max(p.length());
        }

        let n = positions.len() as f64;
        stats.mean_speed = (speed_sum / n) as f32;
        stats.centroid = (position_sum / n).as_vec3();
        stats
    }
}

/// Orthonormal basis whose third column (forward) points along `velocity`.
///
/// Near-zero velocities face +Z.
pub fn orientation_basis(velocity: Vec3) -> Mat3 {
    let forward = if velocity.length() < MIN_HEADING_SPEED {
        Vec3::Z
    } else {
        velocity.normalize()
    };
    let reference = if forward.y.abs() > 0.999 { Vec3::X } else { Vec3::Y };
    let right = reference.cross(forward).normalize();
    let up = forward.cross(right);
    Mat3::from_cols(right, up, forward)
}

/// Cosmetic size factor: fast agents are drawn up to twice as large.
#[inline]
pub fn instance_scale(speed: f32) -> f32 {
    1.0 + smoothstep(0.0, SCALE_SATURATION_SPEED, speed)
}

/// Model matrix for one agent instance.
pub fn instance_transform(position: Vec3, velocity: Vec3) -> Mat4 {
    let basis = orientation_basis(velocity) * instance_scale(velocity.length());
    Mat4::from_cols(
        basis.x_axis.extend(0.0),
        basis.y_axis.extend(0.0),
        basis.z_axis.extend(0.0),
        position.extend(1.0),
    )
}
