//! CPU compute substrate.
//!
//! [`Flock`] owns the double-buffered agent state and runs one tick as two
//! rayon parallel-for passes:
//!
//! 1. velocity pass: every agent reads the current positions and velocities
//!    and writes its next velocity;
//! 2. position pass: every agent reads its current position and the freshly
//!    written next velocity and writes its next position.
//!
//! The buffers swap only after both passes complete, so no agent ever reads
//! a partially updated generation.
//!
//! # Example
//!
//! ```ignore
//! use murmur::prelude::*;
//!
//! let mut flock = Flock::builder()
//!     .with_grid(256, 256)
//!     .with_sample_budget(300)
//!     .with_seed(Some(7))
//!     .build()?;
//!
//! flock.tick(1.0 / 60.0, 0.0);
//! let frame = flock.frame();
//! ```

use glam::Vec4;
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::bridge::FrameView;
use crate::error::FlockError;
use crate::grid::GridDims;
use crate::kernel::{self, KernelContext};
use crate::params::{Params, SharedParams};
use crate::sampler::{NeighborSampler, StrideSampler, DEFAULT_SAMPLE_BUDGET};
use crate::spawn::spawn_flock;
use crate::state::{AgentRecord, AgentStateStore};
use crate::time::clamp_delta;

/// Reference grid side: 256 x 256 = 65,536 agents.
pub const DEFAULT_GRID_SIDE: u32 = 256;

// Log flock statistics every this many generations at debug level.
const STATS_LOG_INTERVAL: u64 = 600;

/// Operations shared by the CPU and GPU substrates.
pub trait FlockSubstrate {
    /// Advance one generation. `dt` is clamped to
    /// [`MAX_DELTA_TIME`](crate::time::MAX_DELTA_TIME).
    fn tick(&mut self, dt: f32, time: f32);

    fn dims(&self) -> GridDims;

    /// Number of agents renderers should draw.
    fn active_count(&self) -> u32;

    /// Set the drawn agent count, clamped to N. Returns the applied count.
    fn set_active_count(&mut self, count: u32) -> u32;

    /// Handle for external control surfaces.
    fn params_handle(&self) -> SharedParams;

    /// Completed ticks since construction.
    fn generation(&self) -> u64;

    /// Current parameter snapshot.
    fn params(&self) -> Params {
        self.params_handle().snapshot()
    }

    /// Replace all parameters; effective from the next tick.
    fn set_params(&self, params: Params) {
        self.params_handle().replace(params);
    }
}

/// Clamp a requested active count to the agent count, warning when it had to.
pub(crate) fn clamp_active_count(requested: u32, agent_count: u32) -> u32 {
    if requested > agent_count {
        warn!(
            "Active count {} exceeds agent count {}, clamping",
            requested, agent_count
        );
        agent_count
    } else {
        requested
    }
}

/// Builder for a [`Flock`].
pub struct FlockBuilder {
    width: u32,
    height: u32,
    sample_budget: u32,
    params: Params,
    seed: Option<u64>,
    active_count: Option<u32>,
    records: Option<Vec<AgentRecord>>,
    sampler: Option<Box<dyn NeighborSampler>>,
}

impl Default for FlockBuilder {
    fn default() -> Self {
        Self {
            width: DEFAULT_GRID_SIDE,
            height: DEFAULT_GRID_SIDE,
            sample_budget: DEFAULT_SAMPLE_BUDGET,
            params: Params::default(),
            seed: None,
            active_count: None,
            records: None,
            sampler: None,
        }
    }
}

impl FlockBuilder {
    /// Agent grid dimensions (N = width * height).
    pub fn with_grid(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Neighbor candidates visited per agent per tick (K).
    pub fn with_sample_budget(mut self, budget: u32) -> Self {
        self.sample_budget = budget;
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Spawn seed. `None` seeds from OS entropy.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Initial drawn agent count (defaults to all agents).
    pub fn with_active_count(mut self, count: u32) -> Self {
        self.active_count = Some(count);
        self
    }

    /// Start from explicit records instead of the spawner.
    pub fn with_records(mut self, records: Vec<AgentRecord>) -> Self {
        self.records = Some(records);
        self
    }

    /// Replace the stride sampler. The sample budget is then ignored, and
    /// unless `sampler` is a [`StrideSampler`] the flock cannot be moved to
    /// the GPU substrate.
    pub fn with_sampler(mut self, sampler: impl NeighborSampler + 'static) -> Self {
        self.sampler = Some(Box::new(sampler));
        self
    }

    pub fn build(self) -> Result<Flock, FlockError> {
        let dims = GridDims::new(self.width, self.height)?;
        let sampler: Box<dyn NeighborSampler> = match self.sampler {
            Some(sampler) => sampler,
            None => Box::new(StrideSampler::new(dims.count(), self.sample_budget)?),
        };
        let records = match self.records {
            Some(records) => records,
            None => spawn_flock(dims, &self.params, self.seed),
        };
        let store = AgentStateStore::from_records(dims, &records)?;
        let active_count =
            clamp_active_count(self.active_count.unwrap_or(dims.count()), dims.count());

        info!(
            "Flock ready: {}x{} = {} agents, sample budget {}, density scale {:.2}",
            dims.width(),
            dims.height(),
            dims.count(),
            sampler.budget(),
            sampler.density_scale()
        );

        Ok(Flock {
            store,
            sampler,
            params: SharedParams::new(self.params),
            active_count,
        })
    }
}

/// Flock simulated on the CPU.
pub struct Flock {
    store: AgentStateStore,
    sampler: Box<dyn NeighborSampler>,
    params: SharedParams,
    active_count: u32,
}

impl Flock {
    pub fn builder() -> FlockBuilder {
        FlockBuilder::default()
    }

    /// Advance one generation.
    pub fn tick(&mut self, dt: f32, time: f32) {
        let dt = clamp_delta(dt);
        let params = self.params.snapshot();
        let ctx = KernelContext::new(params, dt, time, self.sampler.density_scale());
        let sampler = self.sampler.as_ref();

        {
            let (positions, velocities, next_velocities) = self.store.velocity_pass();
            next_velocities
                .par_iter_mut()
                .enumerate()
                .for_each(|(i, out)| {
                    let v = kernel::velocity_for(i as u32, positions, velocities, sampler, &ctx);
                    *out = v.extend(velocities[i].w);
                });
        }

        {
            let (positions, next_velocities, next_positions) = self.store.position_pass();
            next_positions
                .par_iter_mut()
                .enumerate()
                .for_each(|(i, out)| {
                    let p = positions[i];
                    let next = kernel::integrate_position(p.truncate(), next_velocities[i].truncate(), dt);
                    *out = next.extend(p.w);
                });
        }

        self.store.swap();

        let generation = self.store.generation();
        if generation % STATS_LOG_INTERVAL == 0 && log::log_enabled!(log::Level::Debug) {
            let stats = self.frame().stats();
            debug!(
                "Generation {}: speed {:.1}/{:.1}/{:.1} (min/mean/max), centroid {:?}, max radius {:.1}",
                generation,
                stats.min_speed,
                stats.mean_speed,
                stats.max_speed,
                stats.centroid,
                stats.max_radius
            );
        }
    }

    /// Read-only view of the current generation.
    pub fn frame(&self) -> FrameView<'_> {
        FrameView::new(
            self.store.positions(),
            self.store.velocities(),
            self.store.dims(),
            self.active_count,
            self.store.generation(),
        )
    }

    #[inline]
    pub fn dims(&self) -> GridDims {
        self.store.dims()
    }

    /// Neighbor sampler driving the velocity pass.
    pub fn sampler(&self) -> &dyn NeighborSampler {
        self.sampler.as_ref()
    }

    /// Current parameter snapshot.
    pub fn params(&self) -> Params {
        self.params.snapshot()
    }

    /// Replace all parameters; effective from the next tick.
    pub fn set_params(&self, params: Params) {
        self.params.replace(params);
    }

    pub fn params_handle(&self) -> SharedParams {
        self.params.clone()
    }

    #[inline]
    pub fn active_count(&self) -> u32 {
        self.active_count
    }

    pub fn set_active_count(&mut self, count: u32) -> u32 {
        self.active_count = clamp_active_count(count, self.dims().count());
        self.active_count
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.store.generation()
    }

    /// All current records, in id order.
    pub fn records(&self) -> Vec<AgentRecord> {
        self.store.records()
    }

    /// Overwrite one agent's current record. Fails with
    /// [`FlockError::AgentOutOfRange`] when `id` is not below the agent count.
    pub fn set_record(&mut self, id: u32, record: AgentRecord) -> Result<(), FlockError> {
        self.store.set_record(id, record)
    }

    /// Current position texels; same layout as the GPU storage buffers.
    pub fn position_texels(&self) -> &[Vec4] {
        self.store.positions()
    }

    /// Current velocity texels; same layout as the GPU storage buffers.
    pub fn velocity_texels(&self) -> &[Vec4] {
        self.store.velocities()
    }
}

impl FlockSubstrate for Flock {
    fn tick(&mut self, dt: f32, time: f32) {
        Flock::tick(self, dt, time);
    }

    fn dims(&self) -> GridDims {
        Flock::dims(self)
    }

    fn active_count(&self) -> u32 {
        self.active_count
    }

    fn set_active_count(&mut self, count: u32) -> u32 {
        Flock::set_active_count(self, count)
    }

    fn params_handle(&self) -> SharedParams {
        self.params.clone()
    }

    fn generation(&self) -> u64 {
        self.store.generation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn small_flock() -> Flock {
        Flock::builder()
            .with_grid(16, 16)
            .with_sample_budget(64)
            .with_seed(Some(3))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_rejects_bad_config() {
        assert!(matches!(
            Flock::builder().with_grid(0, 4).build(),
            Err(FlockError::InvalidGrid { .. })
        ));
        assert!(matches!(
            Flock::builder().with_grid(4, 4).with_sample_budget(0).build(),
            Err(FlockError::InvalidSampleBudget)
        ));
        assert!(matches!(
            Flock::builder()
                .with_grid(2, 2)
                .with_records(vec![AgentRecord::default(); 3])
                .build(),
            Err(FlockError::RecordCountMismatch { expected: 4, actual: 3 })
        ));
    }

    #[test]
    fn test_active_count_clamped() {
        let mut flock = Flock::builder()
            .with_grid(4, 4)
            .with_active_count(100)
            .with_seed(Some(1))
            .build()
            .unwrap();
        assert_eq!(flock.active_count(), 16);
        assert_eq!(flock.set_active_count(5), 5);
        assert_eq!(flock.frame().active_count(), 5);
        assert_eq!(flock.set_active_count(17), 16);
    }

    #[test]
    fn test_tick_advances_generation() {
        let mut flock = small_flock();
        let before = flock.records();
        flock.tick(1.0 / 60.0, 0.0);
        assert_eq!(flock.generation(), 1);
        assert_ne!(flock.records(), before);
    }

    #[test]
    fn test_zero_dt_keeps_positions() {
        let mut flock = small_flock();
        let before = flock.position_texels().to_vec();
        flock.tick(-1.0, 0.0);
        assert_eq!(flock.position_texels(), &before[..]);
        flock.tick(f32::NAN, 0.0);
        assert_eq!(flock.position_texels(), &before[..]);
    }

    #[test]
    fn test_padding_preserved_across_ticks() {
        let mut flock = small_flock();
        let mut record = flock.records()[5];
        record.flag = 1.5;
        record.reserved = -2.5;
        flock.set_record(5, record).unwrap();
        for i in 0..5 {
            flock.tick(1.0 / 60.0, i as f32 / 60.0);
        }
        let after = flock.records()[5];
        assert_eq!(after.flag, 1.5);
        assert_eq!(after.reserved, -2.5);
    }

    #[test]
    fn test_set_record_out_of_range() {
        let mut flock = small_flock();
        let before = flock.records();
        let record = AgentRecord::new(Vec3::ONE, Vec3::Z);
        assert_eq!(
            flock.set_record(16 * 16, record),
            Err(FlockError::AgentOutOfRange { id: 256, count: 256 })
        );
        assert!(flock.set_record(u32::MAX, record).is_err());
        assert_eq!(flock.records(), before);
    }

    #[test]
    fn test_param_changes_apply_next_tick() {
        let records = vec![AgentRecord::new(Vec3::ZERO, Vec3::X * 10.0); 4];
        let mut flock = Flock::builder()
            .with_grid(2, 2)
            .with_sample_budget(3)
            .with_params(Params::drift(40.0, 400.0))
            .with_records(records)
            .build()
            .unwrap();

        let handle = flock.params_handle();
        handle.update(|p| p.max_speed = 5.0);
        flock.tick(0.01, 0.0);
        for v in flock.velocity_texels() {
            assert!((v.truncate().length() - 5.0).abs() < 1e-4);
        }
    }

    /// Pairs agents `2k` and `2k + 1` and nothing else.
    struct PairSampler;

    impl NeighborSampler for PairSampler {
        fn for_each_candidate(&self, id: u32, visit: &mut dyn FnMut(u32)) {
            visit(id ^ 1);
        }

        fn budget(&self) -> u32 {
            1
        }

        fn density_scale(&self) -> f32 {
            10.0
        }
    }

    #[test]
    fn test_custom_sampler_drives_velocity_pass() {
        // Every agent is within separation range of every other; only the
        // sampler decides who pushes whom.
        let records = vec![
            AgentRecord::new(Vec3::ZERO, Vec3::ZERO),
            AgentRecord::new(Vec3::X, Vec3::ZERO),
            AgentRecord::new(Vec3::new(0.0, 0.0, 0.5), Vec3::ZERO),
            AgentRecord::new(Vec3::new(0.0, 0.0, 0.8), Vec3::ZERO),
        ];
        let params = Params {
            separation_weight: 10.0,
            ..Params::drift(40.0, 400.0)
        };
        let mut flock = Flock::builder()
            .with_grid(2, 2)
            .with_params(params)
            .with_records(records)
            .with_sampler(PairSampler)
            .build()
            .unwrap();
        assert_eq!(flock.sampler().budget(), 1);
        assert!(flock.sampler().as_stride().is_none());

        flock.tick(1.0 / 60.0, 0.0);

        let heading = |id: usize| flock.velocity_texels()[id].truncate().normalize();
        assert!(heading(0).abs_diff_eq(-Vec3::X, 1e-5));
        assert!(heading(1).abs_diff_eq(Vec3::X, 1e-5));
        assert!(heading(2).abs_diff_eq(-Vec3::Z, 1e-5));
        assert!(heading(3).abs_diff_eq(Vec3::Z, 1e-5));
    }

    #[test]
    fn test_substrate_trait_object() {
        let mut flock = small_flock();
        let substrate: &mut dyn FlockSubstrate = &mut flock;
        substrate.tick(0.02, 0.0);
        assert_eq!(substrate.generation(), 1);
        assert_eq!(substrate.dims().count(), 256);
        substrate.set_params(Params::drift(10.0, 50.0));
        assert_eq!(substrate.params().max_speed, 10.0);
    }
}
