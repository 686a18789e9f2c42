//! # murmur - flocking at murmuration scale
//!
//! Simulates tens of thousands of birds with a Boids-style model (separation,
//! alignment, cohesion) plus curl-noise turbulence and a soft spherical
//! boundary. Every tick updates all agents in parallel from the previous
//! generation into the next, on the CPU with rayon or on the GPU with wgpu
//! compute shaders.
//!
//! ## Quick Start
//!
//! ```ignore
//! use murmur::prelude::*;
//!
//! fn main() -> Result<(), FlockError> {
//!     let mut flock = Flock::builder()
//!         .with_grid(256, 256)
//!         .with_sample_budget(300)
//!         .with_seed(Some(42))
//!         .build()?;
//!
//!     for frame in 0..600 {
//!         flock.tick(1.0 / 60.0, frame as f32 / 60.0);
//!     }
//!
//!     let stats = flock.frame().stats();
//!     println!("mean speed {:.1}", stats.mean_speed);
//!     Ok(())
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Agents
//!
//! Agents live on a `W x H` grid: agent `id` sits at `(id % W, id / W)`.
//! Each agent is a position texel and a velocity texel (`vec4` each, the `w`
//! channels are padding). Both are double-buffered; see [`state`].
//!
//! ### Neighbors
//!
//! Full pairwise search is O(N²). Instead each agent looks at a fixed
//! budget of `K` candidates picked with a constant stride through the id
//! range ([`StrideSampler`]). Separation compensates for the under-count by
//! scaling with `N / K`. Other samplers plug in through [`NeighborSampler`].
//!
//! ### Parameters
//!
//! [`Params`] are tunable while running through a [`SharedParams`] handle.
//! Each tick reads one snapshot, so a change lands cleanly on the next tick.
//!
//! ### Substrates
//!
//! [`Flock`] runs on the CPU, [`GpuFlock`] runs the same kernels in WGSL.
//! Both implement [`FlockSubstrate`].
//!
//! ## Viewer
//!
//! The `murmur` binary opens a window (see [`window`]) and draws each agent
//! as a small bird mesh facing along its velocity.

pub mod bridge;
pub mod error;
pub mod flock;
pub mod gpu;
pub mod grid;
pub mod input;
pub mod kernel;
pub mod noise;
pub mod params;
pub mod sampler;
pub mod shader;
pub mod spawn;
pub mod state;
pub mod time;
pub mod window;

pub use bytemuck;
pub use glam::{Vec3, Vec4};

pub use bridge::{FlockStats, FrameView, OwnedFrame};
pub use error::{FlockError, GpuError, SimulationError};
pub use flock::{Flock, FlockBuilder, FlockSubstrate};
pub use gpu::{GpuContext, GpuFlock};
pub use grid::GridDims;
pub use noise::NoiseField;
pub use params::{ParamField, Params, SharedParams};
pub use sampler::{NeighborSampler, StrideSampler};
pub use state::AgentRecord;
pub use time::FrameClock;

/// Convenient re-exports for common usage.
///
/// ```ignore
/// use murmur::prelude::*;
/// ```
pub mod prelude {
    pub use crate::bridge::{FlockStats, FrameView};
    pub use crate::error::{FlockError, GpuError};
    pub use crate::flock::{Flock, FlockSubstrate};
    pub use crate::gpu::{GpuContext, GpuFlock};
    pub use crate::grid::GridDims;
    pub use crate::params::{ParamField, Params, SharedParams};
    pub use crate::sampler::{NeighborSampler, StrideSampler};
    pub use crate::state::AgentRecord;
    pub use crate::time::FrameClock;
    pub use crate::{Vec3, Vec4};
}
