//! Error types for murmur.
//!
//! Configuration problems are rejected when a flock is built. Compute
//! substrate failures (no adapter, device loss, readback failure) are
//! reported to the host, which decides how to surface them.

use thiserror::Error;

/// Errors raised while configuring a flock.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FlockError {
    /// Grid dimensions are zero or the agent count overflows `u32`.
    #[error("invalid agent grid {width}x{height}: both dimensions must be non-zero and W*H must fit in u32")]
    InvalidGrid { width: u32, height: u32 },
    /// The neighbor sample budget must be at least one.
    #[error("neighbor sample budget must be at least 1")]
    InvalidSampleBudget,
    /// Initial agent data does not match the grid size.
    #[error("expected {expected} agent records, got {actual}")]
    RecordCountMismatch { expected: usize, actual: usize },
    /// An agent id at or past the agent count.
    #[error("agent {id} out of range for a flock of {count}")]
    AgentOutOfRange { id: u32, count: u32 },
}

/// Errors from the GPU compute substrate.
#[derive(Debug, Error)]
pub enum GpuError {
    /// Failed to create a surface for rendering.
    #[error("failed to create GPU surface: {0}")]
    SurfaceCreation(#[from] wgpu::CreateSurfaceError),
    /// No compatible GPU adapter found.
    #[error("no compatible GPU adapter found; a WebGPU/Vulkan/Metal/DX12 capable device is required")]
    NoAdapter,
    /// Failed to create the GPU device.
    #[error("failed to create GPU device: {0}")]
    DeviceCreation(#[from] wgpu::RequestDeviceError),
    /// Failed to map a buffer for reading.
    #[error("failed to map GPU buffer: {0}")]
    BufferMapping(String),
    /// The flock uses a neighbor sampler the GPU kernels cannot reproduce.
    #[error("the GPU substrate only supports stride neighbor sampling")]
    UnsupportedSampler,
    /// Flock configuration rejected while building the GPU substrate.
    #[error(transparent)]
    Flock(#[from] FlockError),
}

/// Errors that can occur when running the viewer.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Failed to create the event loop.
    #[error("failed to create event loop: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    /// Failed to create the window.
    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),
    /// GPU initialization failed.
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
    /// The flock could not be configured.
    #[error("flock configuration error: {0}")]
    Flock(#[from] FlockError),
}
