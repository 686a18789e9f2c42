//! Flock simulated with wgpu compute passes.
//!
//! Positions and velocities each live in two storage buffers. The bind group
//! for parity `f` reads buffers `f` and writes buffers `1 - f`; a tick records
//! the velocity pass and then the position pass into one encoder and flips the
//! parity. Renderers bind [`GpuFlock::current_buffers`] directly as instance
//! vertex buffers.

use std::sync::Arc;

use glam::Vec4;
use log::{debug, error};
use wgpu::util::DeviceExt;

use super::GpuContext;
use crate::bridge::OwnedFrame;
use crate::error::{FlockError, GpuError};
use crate::flock::{clamp_active_count, Flock, FlockSubstrate};
use crate::grid::GridDims;
use crate::params::SharedParams;
use crate::sampler::{NeighborSampler, StrideSampler};
use crate::shader::{compute_shader, GpuUniforms, WORKGROUP_SIZE};
use crate::state::AgentRecord;
use crate::time::clamp_delta;

/// Workgroups per dispatch dimension guaranteed by `wgpu::Limits::default()`.
const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65_535;

/// Current-generation storage buffers, ready for instanced drawing.
#[derive(Clone, Copy)]
pub struct GpuFrameBuffers<'a> {
    pub positions: &'a wgpu::Buffer,
    pub velocities: &'a wgpu::Buffer,
    pub active_count: u32,
}

pub struct GpuFlock {
    gpu: Arc<GpuContext>,
    dims: GridDims,
    sampler: StrideSampler,
    params: SharedParams,
    active_count: u32,
    generation: u64,
    positions: [wgpu::Buffer; 2],
    velocities: [wgpu::Buffer; 2],
    uniform_buffer: wgpu::Buffer,
    bind_groups: [wgpu::BindGroup; 2],
    velocity_pipeline: wgpu::ComputePipeline,
    position_pipeline: wgpu::ComputePipeline,
    front: usize,
    workgroups: (u32, u32),
}

impl GpuFlock {
    /// Upload a CPU flock's current generation. The parameter handle is
    /// shared, so control surfaces attached to `flock` drive both substrates.
    ///
    /// Fails with [`GpuError::UnsupportedSampler`] when `flock` was built
    /// with a sampler other than [`StrideSampler`].
    pub fn from_flock(gpu: Arc<GpuContext>, flock: &Flock) -> Result<Self, GpuError> {
        let sampler = stride_sampler_of(flock)?;
        Self::new(
            gpu,
            flock.dims(),
            &flock.records(),
            sampler.budget(),
            flock.params_handle(),
            flock.active_count(),
        )
    }

    pub fn new(
        gpu: Arc<GpuContext>,
        dims: GridDims,
        records: &[AgentRecord],
        sample_budget: u32,
        params: SharedParams,
        active_count: u32,
    ) -> Result<Self, GpuError> {
        let count = dims.count();
        if records.len() != count as usize {
            return Err(FlockError::RecordCountMismatch {
                expected: count as usize,
                actual: records.len(),
            }
            .into());
        }
        let sampler = StrideSampler::new(count, sample_budget)?;
        let device = &gpu.device;

        let position_texels: Vec<Vec4> = records.iter().map(AgentRecord::position_texel).collect();
        let velocity_texels: Vec<Vec4> = records.iter().map(AgentRecord::velocity_texel).collect();

        let storage_usage = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::VERTEX
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST;
        let make_buffer = |label: &str, texels: &[Vec4]| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(texels),
                usage: storage_usage,
            })
        };
        let positions = [
            make_buffer("Positions A", &position_texels),
            make_buffer("Positions B", &position_texels),
        ];
        let velocities = [
            make_buffer("Velocities A", &velocity_texels),
            make_buffer("Velocities B", &velocity_texels),
        ];

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Flock Uniforms"),
            size: std::mem::size_of::<GpuUniforms>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let storage_entry = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Flock Compute Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
                storage_entry(4, false),
            ],
        });

        let bind_group = |front: usize| {
            let back = 1 - front;
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(if front == 0 { "Flock Bind Group A->B" } else { "Flock Bind Group B->A" }),
                layout: &bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniform_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: positions[front].as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: velocities[front].as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: positions[back].as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: velocities[back].as_entire_binding(),
                    },
                ],
            })
        };
        let bind_groups = [bind_group(0), bind_group(1)];

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Flock Compute Shader"),
            source: wgpu::ShaderSource::Wgsl(compute_shader().into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Flock Compute Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = |label: &str, entry_point: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        };
        let velocity_pipeline = pipeline("Velocity Pipeline", "update_velocity");
        let position_pipeline = pipeline("Position Pipeline", "update_position");

        let workgroups = dispatch_size(count);
        debug!(
            "GPU flock: {} agents, stride {}, dispatch {:?}",
            count,
            sampler.stride(),
            workgroups
        );

        Ok(Self {
            gpu,
            dims,
            sampler,
            params,
            active_count: clamp_active_count(active_count, count),
            generation: 0,
            positions,
            velocities,
            uniform_buffer,
            bind_groups,
            velocity_pipeline,
            position_pipeline,
            front: 0,
            workgroups,
        })
    }

    /// Record one tick into `encoder`. The tick takes effect when the encoder
    /// is submitted; [`current_buffers`](Self::current_buffers) already points
    /// at the generation it will produce.
    pub fn encode_tick(&mut self, encoder: &mut wgpu::CommandEncoder, dt: f32, time: f32) {
        let params = self.params.snapshot();
        let uniforms = GpuUniforms {
            density_scale: self.sampler.density_scale(),
            agent_count: self.dims.count(),
            sample_budget: self.sampler.budget(),
            sample_stride: self.sampler.stride(),
            dispatch_width: self.workgroups.0 * WORKGROUP_SIZE,
            ..GpuUniforms::new(&params, clamp_delta(dt), time)
        };
        self.gpu
            .queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let bind_group = &self.bind_groups[self.front];
        let (x, y) = self.workgroups;
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Velocity Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.velocity_pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(x, y, 1);
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Position Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.position_pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(x, y, 1);
        }

        self.front = 1 - self.front;
        self.generation += 1;
    }

    /// Storage buffers holding the current generation.
    pub fn current_buffers(&self) -> GpuFrameBuffers<'_> {
        GpuFrameBuffers {
            positions: &self.positions[self.front],
            velocities: &self.velocities[self.front],
            active_count: self.active_count,
        }
    }

    /// Copy the current generation back to the host. Blocks until the GPU
    /// has finished all submitted work.
    pub fn read_frame(&self) -> Result<OwnedFrame, GpuError> {
        let stream_size = self.positions[self.front].size();
        let device = &self.gpu.device;

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Flock Readback Staging"),
            size: stream_size * 2,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Flock Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(&self.positions[self.front], 0, &staging, 0, stream_size);
        encoder.copy_buffer_to_buffer(
            &self.velocities[self.front],
            0,
            &staging,
            stream_size,
            stream_size,
        );
        self.gpu.queue.submit(Some(encoder.finish()));

        let buffer_slice = staging.slice(..);
        let (tx, rx) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            // Receiver may have been dropped
            let _ = tx.send(result);
        });
        device.poll(wgpu::Maintain::Wait);

        let mapped = pollster::block_on(rx)
            .map_err(|_| GpuError::BufferMapping("map callback dropped".into()))?;
        if let Err(e) = mapped {
            error!("Flock readback failed: {}", e);
            return Err(GpuError::BufferMapping(e.to_string()));
        }

        let (positions, velocities) = {
            let data = buffer_slice.get_mapped_range();
            // Mapped ranges are only 8-byte aligned; read as [f32; 4]
            let texels: &[[f32; 4]] = bytemuck::cast_slice(&data);
            let half = texels.len() / 2;
            let to_vec4 = |t: &[[f32; 4]]| t.iter().copied().map(Vec4::from_array).collect::<Vec<_>>();
            (to_vec4(&texels[..half]), to_vec4(&texels[half..]))
        };
        staging.unmap();

        Ok(OwnedFrame {
            positions,
            velocities,
            dims: self.dims,
            active_count: self.active_count,
            generation: self.generation,
        })
    }
}

impl FlockSubstrate for GpuFlock {
    fn tick(&mut self, dt: f32, time: f32) {
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Flock Tick Encoder"),
            });
        self.encode_tick(&mut encoder, dt, time);
        self.gpu.queue.submit(Some(encoder.finish()));
    }

    fn dims(&self) -> GridDims {
        self.dims
    }

    fn active_count(&self) -> u32 {
        self.active_count
    }

    fn set_active_count(&mut self, count: u32) -> u32 {
        self.active_count = clamp_active_count(count, self.dims.count());
        self.active_count
    }

    fn params_handle(&self) -> SharedParams {
        self.params.clone()
    }

    fn generation(&self) -> u64 {
        self.generation
    }
}

fn stride_sampler_of(flock: &Flock) -> Result<StrideSampler, GpuError> {
    flock
        .sampler()
        .as_stride()
        .copied()
        .ok_or(GpuError::UnsupportedSampler)
}

/// Workgroup grid covering `count` invocations, folded into a second
/// dimension once the first one is exhausted.
fn dispatch_size(count: u32) -> (u32, u32) {
    let groups = count.div_ceil(WORKGROUP_SIZE).max(1);
    if groups <= MAX_WORKGROUPS_PER_DIMENSION {
        (groups, 1)
    } else {
        (MAX_WORKGROUPS_PER_DIMENSION, groups.div_ceil(MAX_WORKGROUPS_PER_DIMENSION))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_size() {
        assert_eq!(dispatch_size(1), (1, 1));
        assert_eq!(dispatch_size(65_536), (256, 1));
        assert_eq!(dispatch_size(65_537), (257, 1));

        let huge = 20_000_000;
        let (x, y) = dispatch_size(huge);
        assert_eq!(x, MAX_WORKGROUPS_PER_DIMENSION);
        assert!(x as u64 * y as u64 * WORKGROUP_SIZE as u64 >= huge as u64);
    }

    struct EveryoneSampler(u32);

    impl NeighborSampler for EveryoneSampler {
        fn for_each_candidate(&self, id: u32, visit: &mut dyn FnMut(u32)) {
            (0..self.0).filter(|&j| j != id).for_each(|j| visit(j));
        }

        fn budget(&self) -> u32 {
            self.0
        }

        fn density_scale(&self) -> f32 {
            1.0
        }
    }

    #[test]
    fn test_stride_sampler_carried_to_gpu() {
        let flock = Flock::builder()
            .with_grid(16, 16)
            .with_sample_budget(32)
            .with_seed(Some(1))
            .build()
            .unwrap();
        let sampler = stride_sampler_of(&flock).unwrap();
        assert_eq!(sampler.budget(), 32);
        assert_eq!(sampler.stride(), 8);
    }

    #[test]
    fn test_custom_sampler_rejected_for_gpu() {
        let flock = Flock::builder()
            .with_grid(4, 4)
            .with_sampler(EveryoneSampler(16))
            .with_seed(Some(1))
            .build()
            .unwrap();
        assert!(matches!(
            stride_sampler_of(&flock),
            Err(GpuError::UnsupportedSampler)
        ));
    }
}
