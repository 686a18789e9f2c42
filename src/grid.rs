//! Agent grid addressing.
//!
//! Agents live in a `width x height` grid of records. An agent id is its
//! row-major index into that grid, so the same `(x, y)` coordinate addresses
//! an agent in every buffer (positions, velocities, GPU storage).

use crate::error::FlockError;

/// Dimensions of the agent grid. `count() == width * height`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GridDims {
    width: u32,
    height: u32,
}

impl GridDims {
    /// Validate and create grid dimensions.
    ///
    /// Both dimensions must be non-zero and the agent count must fit in a `u32`
    /// (agent ids are `u32` on the GPU).
    pub fn new(width: u32, height: u32) -> Result<Self, FlockError> {
        if width == 0 || height == 0 || width.checked_mul(height).is_none() {
            return Err(FlockError::InvalidGrid { width, height });
        }
        Ok(Self { width, height })
    }

    /// Square grid holding `side * side` agents.
    pub fn square(side: u32) -> Result<Self, FlockError> {
        Self::new(side, side)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Total number of agents, `N = W * H`.
    #[inline]
    pub fn count(&self) -> u32 {
        self.width * self.height
    }

    /// Grid coordinate of an agent: `(id mod W, id div W)`.
    #[inline]
    pub fn coord_of(&self, id: u32) -> (u32, u32) {
        debug_assert!(id < self.count(), "agent id out of range");
        (id % self.width, id / self.width)
    }

    /// Agent id at a grid coordinate, or `None` outside the grid.
    #[inline]
    pub fn id_at(&self, x: u32, y: u32) -> Option<u32> {
        if x < self.width && y < self.height {
            Some(y * self.width + x)
        } else {
            None
        }
    }
}
