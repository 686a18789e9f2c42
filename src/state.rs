//! Double-buffered agent state.
//!
//! Each agent owns one [`AgentRecord`] per generation. Storage is split into
//! two vec4 texel streams, matching the GPU layout:
//!
//! ```text
//! positions:  [x, y, z, flag]      x N   (front = current, back = next)
//! velocities: [x, y, z, reserved]  x N   (front = current, back = next)
//! ```
//!
//! The two streams are double-buffered independently so the velocity pass
//! can write the next velocity generation while the position pass still
//! reads the current positions.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use crate::error::FlockError;
use crate::grid::GridDims;

/// One agent's state for one generation.
///
/// `flag` and `reserved` are opaque padding carried unchanged from one
/// generation to the next.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct AgentRecord {
    pub position: [f32; 3],
    pub flag: f32,
    pub velocity: [f32; 3],
    pub reserved: f32,
}

const _: () = assert!(std::mem::size_of::<AgentRecord>() == 32);

impl AgentRecord {
    pub fn new(position: Vec3, velocity: Vec3) -> Self {
        Self {
            position: position.to_array(),
            flag: 0.0,
            velocity: velocity.to_array(),
            reserved: 0.0,
        }
    }

    /// Assemble a record from its position and velocity texels.
    #[inline]
    pub fn from_texels(position: Vec4, velocity: Vec4) -> Self {
        Self {
            position: position.truncate().to_array(),
            flag: position.w,
            velocity: velocity.truncate().to_array(),
            reserved: velocity.w,
        }
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    #[inline]
    pub fn velocity(&self) -> Vec3 {
        Vec3::from_array(self.velocity)
    }

    #[inline]
    pub fn position_texel(&self) -> Vec4 {
        self.position().extend(self.flag)
    }

    #[inline]
    pub fn velocity_texel(&self) -> Vec4 {
        self.velocity().extend(self.reserved)
    }
}

/// A front/back pair of equally sized buffers.
///
/// The front buffer holds the current generation and is only read during a
/// tick; the back buffer receives the next generation. [`PingPong::swap`]
/// promotes the back buffer once every agent has been written.
#[derive(Clone, Debug)]
pub struct PingPong<T> {
    front: Vec<T>,
    back: Vec<T>,
}

impl<T: Copy> PingPong<T> {
    /// Both buffers start as copies of `initial`.
    pub fn new(initial: Vec<T>) -> Self {
        Self {
            back: initial.clone(),
            front: initial,
        }
    }

    #[inline]
    pub fn front(&self) -> &[T] {
        &self.front
    }

    #[inline]
    pub fn back(&self) -> &[T] {
        &self.back
    }

    /// Current generation for reading, next generation for writing.
    #[inline]
    pub fn split(&mut self) -> (&[T], &mut [T]) {
        (&self.front, &mut self.back)
    }

    #[inline]
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.front, &mut self.back);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.front.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.front.is_empty()
    }
}

/// Double-buffered position and velocity generations for every agent.
#[derive(Clone, Debug)]
pub struct AgentStateStore {
    dims: GridDims,
    positions: PingPong<Vec4>,
    velocities: PingPong<Vec4>,
    generation: u64,
}

impl AgentStateStore {
    /// Build the store from one record per agent, in id order.
    pub fn from_records(dims: GridDims, records: &[AgentRecord]) -> Result<Self, FlockError> {
        let expected = dims.count() as usize;
        if records.len() != expected {
            return Err(FlockError::RecordCountMismatch {
                expected,
                actual: records.len(),
            });
        }

        let positions = records.iter().map(AgentRecord::position_texel).collect();
        let velocities = records.iter().map(AgentRecord::velocity_texel).collect();

        Ok(Self {
            dims,
            positions: PingPong::new(positions),
            velocities: PingPong::new(velocities),
            generation: 0,
        })
    }

    #[inline]
    pub fn dims(&self) -> GridDims {
        self.dims
    }

    /// Number of completed swaps since construction.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Current-generation position texels.
    #[inline]
    pub fn positions(&self) -> &[Vec4] {
        self.positions.front()
    }

    /// Current-generation velocity texels.
    #[inline]
    pub fn velocities(&self) -> &[Vec4] {
        self.velocities.front()
    }

    /// Current-generation record of one agent, `None` past the agent count.
    #[inline]
    pub fn record(&self, id: u32) -> Option<AgentRecord> {
        let i = id as usize;
        let p = *self.positions.front().get(i)?;
        let v = *self.velocities.front().get(i)?;
        Some(AgentRecord::from_texels(p, v))
    }

    /// All current-generation records, in id order.
    pub fn records(&self) -> Vec<AgentRecord> {
        self.positions()
            .iter()
            .zip(self.velocities())
            .map(|(p, v)| AgentRecord::from_texels(*p, *v))
            .collect()
    }

    /// Overwrite one agent's current record (both buffers, so the next swap
    /// cannot resurrect the old value).
    pub fn set_record(&mut self, id: u32, record: AgentRecord) -> Result<(), FlockError> {
        let i = id as usize;
        if i >= self.positions.front.len() {
            return Err(FlockError::AgentOutOfRange {
                id,
                count: self.positions.front.len() as u32,
            });
        }
        let (p, v) = (record.position_texel(), record.velocity_texel());
        self.positions.front[i] = p;
        self.positions.back[i] = p;
        self.velocities.front[i] = v;
        self.velocities.back[i] = v;
        Ok(())
    }

    /// Surfaces for the velocity pass: current positions and velocities to
    /// read, next velocities to write.
    pub(crate) fn velocity_pass(&mut self) -> (&[Vec4], &[Vec4], &mut [Vec4]) {
        let (vel_read, vel_write) = self.velocities.split();
        (self.positions.front(), vel_read, vel_write)
    }

    /// Surfaces for the position pass: current positions and the freshly
    /// written next velocities to read, next positions to write.
    pub(crate) fn position_pass(&mut self) -> (&[Vec4], &[Vec4], &mut [Vec4]) {
        let (pos_read, pos_write) = self.positions.split();
        (pos_read, self.velocities.back(), pos_write)
    }

    /// Promote the next generation of both streams.
    pub(crate) fn swap(&mut self) {
        self.positions.swap();
        self.velocities.swap();
        self.generation += 1;
    }
}
