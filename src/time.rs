//! Frame clock driving the simulation.
//!
//! The clock turns wall-clock frame intervals into simulation deltas: scaled,
//! optionally fixed, and clamped to [`MAX_DELTA_TIME`] so a stalled frame
//! (window drag, debugger pause) cannot launch agents across the boundary.
//! Simulation time is the sum of those deltas, so it stops while paused and
//! never jumps.
//!
//! # Example
//!
//! ```ignore
//! use murmur::time::FrameClock;
//!
//! let mut clock = FrameClock::new();
//!
//! // In the frame loop:
//! let (time, dt) = clock.update();
//! flock.tick(dt, time);
//! ```

use std::time::{Duration, Instant};

/// Largest simulation step taken in one tick, in seconds.
pub const MAX_DELTA_TIME: f32 = 0.05;

/// Clamp a raw frame delta to `[0, MAX_DELTA_TIME]`. Negative and non-finite
/// deltas become zero.
#[inline]
pub fn clamp_delta(dt: f32) -> f32 {
    if dt.is_finite() && dt > 0.0 {
        dt.min(MAX_DELTA_TIME)
    } else {
        0.0
    }
}

/// Frame timing for the host loop.
#[derive(Debug)]
pub struct FrameClock {
    /// When the last frame occurred.
    last_frame: Instant,
    /// Accumulated simulation time in seconds.
    elapsed_secs: f32,
    /// Simulation delta of the last frame.
    delta_secs: f32,
    frame_count: u64,
    fps: f32,
    fps_frame_count: u64,
    fps_update_time: Instant,
    fps_update_interval: Duration,
    paused: bool,
    /// Fixed delta time for deterministic runs (optional).
    fixed_delta: Option<f32>,
    /// Time scale multiplier (1.0 = normal speed).
    time_scale: f32,
}

impl FrameClock {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            last_frame: now,
            elapsed_secs: 0.0,
            delta_secs: 0.0,
            frame_count: 0,
            fps: 0.0,
            fps_frame_count: 0,
            fps_update_time: now,
            fps_update_interval: Duration::from_millis(500),
            paused: false,
            fixed_delta: None,
            time_scale: 1.0,
        }
    }

    /// Advance one frame. Returns `(simulation_time, delta)`.
    pub fn update(&mut self) -> (f32, f32) {
        let now = Instant::now();
        let raw_delta = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.frame_count += 1;

        let fps_elapsed = now.duration_since(self.fps_update_time);
        if fps_elapsed >= self.fps_update_interval {
            let frames_since = self.frame_count - self.fps_frame_count;
            self.fps = frames_since as f32 / fps_elapsed.as_secs_f32();
            self.fps_frame_count = self.frame_count;
            self.fps_update_time = now;
        }

        self.delta_secs = if self.paused {
            0.0
        } else {
            clamp_delta(self.fixed_delta.unwrap_or(raw_delta) * self.time_scale)
        };
        self.elapsed_secs += self.delta_secs;

        (self.elapsed_secs, self.delta_secs)
    }

    /// Simulation time in seconds.
    #[inline]
    pub fn elapsed(&self) -> f32 {
        self.elapsed_secs
    }

    /// Simulation delta of the last frame, already clamped.
    #[inline]
    pub fn delta(&self) -> f32 {
        self.delta_secs
    }

    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame_count
    }

    #[inline]
    pub fn fps(&self) -> f32 {
        self.fps
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    #[inline]
    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    /// Stop simulation time. Frames keep being counted.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }

    /// Use a fixed delta instead of wall-clock intervals (`None` restores
    /// real timing). The fixed delta is still clamped.
    pub fn set_fixed_delta(&mut self, delta: Option<f32>) {
        self.fixed_delta = delta;
    }

    /// - `1.0` = normal speed
    /// - `0.5` = half speed (slow motion)
    /// - `2.0` = double speed
    pub fn set_time_scale(&mut self, scale: f32) {
        self.time_scale = scale.max(0.0);
    }

    /// Restart simulation time from zero.
    pub fn reset(&mut self) {
        *self = Self {
            fixed_delta: self.fixed_delta,
            time_scale: self.time_scale,
            ..Self::new()
        };
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
