//! Bounded neighbor sampling.
//!
//! Exact neighbor search is O(N²). Instead, each agent looks at a fixed budget
//! of K candidates and the kernels scale density-dependent terms by `N / K`
//! to stand in for the neighbors that were not visited.
//!
//! The sampler is a trait so a smarter candidate source (a spatial hash, for
//! instance) can replace [`StrideSampler`] without touching the kernels.

use crate::error::FlockError;

/// Reference neighbor budget per agent per tick.
pub const DEFAULT_SAMPLE_BUDGET: u32 = 300;

/// Source of neighbor candidates for the velocity kernel.
pub trait NeighborSampler: Send + Sync {
    /// Visit the candidate ids for agent `id`. Never visits `id` itself and
    /// never visits more than [`budget`](Self::budget) ids.
    fn for_each_candidate(&self, id: u32, visit: &mut dyn FnMut(u32));

    /// Maximum number of candidates per agent (K).
    fn budget(&self) -> u32;

    /// Factor compensating for unvisited neighbors (N / K).
    fn density_scale(&self) -> f32;

    /// The fixed stride pattern this sampler follows, if any. Only stride
    /// patterns can be reproduced by the GPU kernels.
    fn as_stride(&self) -> Option<&StrideSampler> {
        None
    }
}

/// Fixed-stride sampling: ids `0, S, 2S, ...` with `S = max(1, N / K)`.
///
/// Every agent sees the same candidate set (minus itself), and the set is
/// identical every tick. Skipping the sampling agent moves on to the next
/// stride position without consuming budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StrideSampler {
    agent_count: u32,
    budget: u32,
    stride: u32,
}

impl StrideSampler {
    pub fn new(agent_count: u32, budget: u32) -> Result<Self, FlockError> {
        if budget == 0 {
            return Err(FlockError::InvalidSampleBudget);
        }
        let stride = (agent_count / budget).max(1);
        Ok(Self {
            agent_count,
            budget,
            stride,
        })
    }

    #[inline]
    pub fn stride(&self) -> u32 {
        self.stride
    }

    #[inline]
    pub fn agent_count(&self) -> u32 {
        self.agent_count
    }

    /// Candidate ids for `id`, collected. Convenience for tests and tools.
    pub fn candidates(&self, id: u32) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.budget as usize);
        self.for_each_candidate(id, &mut |j| out.push(j));
        out
    }
}

impl NeighborSampler for StrideSampler {
    fn for_each_candidate(&self, id: u32, visit: &mut dyn FnMut(u32)) {
        let mut visited = 0;
        let mut j = 0u32;
        while visited < self.budget && j < self.agent_count {
            if j != id {
                visit(j);
                visited += 1;
            }
            j = match j.checked_add(self.stride) {
                Some(next) => next,
                None => break,
            };
        }
    }

    #[inline]
    fn budget(&self) -> u32 {
        self.budget
    }

    #[inline]
    fn density_scale(&self) -> f32 {
        self.agent_count as f32 / self.budget as f32
    }

    fn as_stride(&self) -> Option<&StrideSampler> {
        Some(self)
    }
}
