//! Viewer: window, instanced bird renderer, and the frame loop.
//!
//! The viewer hosts one substrate. With the GPU substrate the render pass
//! draws straight from the current storage buffers; with the CPU substrate
//! each frame's active texels are uploaded into vertex buffers of the same
//! layout first. Either way one instance is drawn per active agent.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use log::{error, info, warn};
use wgpu::util::DeviceExt;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::PhysicalKey,
    window::{Window, WindowId},
};

use crate::error::{GpuError, SimulationError};
use crate::flock::{Flock, FlockSubstrate};
use crate::gpu::{Camera, GpuContext, GpuFlock};
use crate::input::{step_active_count, ControlAction, ParamControl};
use crate::shader::{render_shader, CameraUniforms};
use crate::time::FrameClock;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const TEXEL_SIZE: wgpu::BufferAddress = 16;
const BIRD_LENGTH: f32 = 3.0;
const TITLE_REFRESH: Duration = Duration::from_secs(1);

const MESH_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3];
const POSITION_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![2 => Float32x4];
const VELOCITY_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![3 => Float32x4];

/// Which substrate runs the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    Cpu,
    #[default]
    Gpu,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct MeshVertex {
    position: [f32; 3],
    normal: [f32; 3],
}

/// Flat-shaded dart pointing down +Z.
fn bird_mesh() -> Vec<MeshVertex> {
    let nose = Vec3::new(0.0, 0.0, 1.0);
    let left = Vec3::new(-0.75, 0.0, -0.5);
    let right = Vec3::new(0.75, 0.0, -0.5);
    let tail = Vec3::new(0.0, 0.2, -0.5);

    let triangles = [
        [nose, tail, left],
        [nose, right, tail],
        [nose, left, right],
        [left, tail, right],
    ];

    triangles
        .iter()
        .flat_map(|[a, b, c]| {
            let normal = (*b - *a).cross(*c - *a).normalize_or_zero();
            [*a, *b, *c].map(|p| MeshVertex {
                position: (p * BIRD_LENGTH).to_array(),
                normal: normal.to_array(),
            })
        })
        .collect()
}

enum Substrate {
    Cpu {
        flock: Flock,
        positions: wgpu::Buffer,
        velocities: wgpu::Buffer,
    },
    Gpu(GpuFlock),
}

impl Substrate {
    fn as_dyn(&mut self) -> &mut dyn FlockSubstrate {
        match self {
            Substrate::Cpu { flock, .. } => flock,
            Substrate::Gpu(flock) => flock,
        }
    }
}

struct ViewerState {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    gpu: Arc<GpuContext>,
    config: wgpu::SurfaceConfiguration,
    render_pipeline: wgpu::RenderPipeline,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    mesh_buffer: wgpu::Buffer,
    mesh_vertex_count: u32,
    depth_texture: wgpu::TextureView,
    substrate: Substrate,
    camera: Camera,
    clock: FrameClock,
    control: ParamControl,
    last_title_update: Instant,
}

impl ViewerState {
    async fn new(
        window: Arc<Window>,
        flock: Flock,
        backend: Backend,
    ) -> Result<Self, SimulationError> {
        let size = window.inner_size();
        let instance = GpuContext::create_instance();
        let surface = instance
            .create_surface(window.clone())
            .map_err(GpuError::from)?;
        let gpu = Arc::new(GpuContext::with_instance(instance, Some(&surface)).await?);
        let device = &gpu.device;

        let surface_caps = surface.get_capabilities(&gpu.adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .or_else(|| surface_caps.formats.first().copied())
            .unwrap_or(wgpu::TextureFormat::Bgra8UnormSrgb);
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(device, &config);

        let depth_texture = create_depth_texture(device, &config);

        let camera = Camera::framing(flock.params().boundary_radius);
        let initial_uniforms = camera_uniforms(&camera, &config);
        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Uniforms"),
            contents: bytemuck::bytes_of(&initial_uniforms),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let camera_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Camera Bind Group Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Camera Bind Group"),
            layout: &camera_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });

        let mesh = bird_mesh();
        let mesh_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Bird Mesh"),
            contents: bytemuck::cast_slice(&mesh),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Bird Render Shader"),
            source: wgpu::ShaderSource::Wgsl(render_shader().into()),
        });

        let render_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Render Pipeline Layout"),
            bind_group_layouts: &[&camera_bind_group_layout],
            push_constant_ranges: &[],
        });

        let texel_layout = |attributes: &'static [wgpu::VertexAttribute]| wgpu::VertexBufferLayout {
            array_stride: TEXEL_SIZE,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes,
        };

        let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Render Pipeline"),
            layout: Some(&render_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[
                    wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &MESH_ATTRIBUTES,
                    },
                    texel_layout(&POSITION_ATTRIBUTES),
                    texel_layout(&VELOCITY_ATTRIBUTES),
                ],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: config.format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let control = ParamControl::new(flock.params_handle());
        let substrate = match backend {
            Backend::Gpu => {
                info!("Simulating on the GPU");
                Substrate::Gpu(GpuFlock::from_flock(gpu.clone(), &flock)?)
            }
            Backend::Cpu => {
                info!("Simulating on the CPU ({} threads)", rayon::current_num_threads());
                let texel_buffer = |label: &str, texels: &[glam::Vec4]| {
                    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some(label),
                        contents: bytemuck::cast_slice(texels),
                        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                    })
                };
                let positions = texel_buffer("CPU Positions", flock.position_texels());
                let velocities = texel_buffer("CPU Velocities", flock.velocity_texels());
                Substrate::Cpu {
                    flock,
                    positions,
                    velocities,
                }
            }
        };

        Ok(Self {
            window,
            surface,
            gpu,
            config,
            render_pipeline,
            camera_buffer,
            camera_bind_group,
            mesh_buffer,
            mesh_vertex_count: mesh.len() as u32,
            depth_texture,
            substrate,
            camera,
            clock: FrameClock::new(),
            control,
            last_title_update: Instant::now(),
        })
    }

    fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.gpu.device, &self.config);
            self.depth_texture = create_depth_texture(&self.gpu.device, &self.config);
        }
    }

    fn handle_action(&mut self, action: ControlAction) {
        if self.control.apply(action) {
            return;
        }
        match action {
            ControlAction::TogglePause => {
                self.clock.toggle_pause();
                info!("{}", if self.clock.is_paused() { "Paused" } else { "Resumed" });
            }
            ControlAction::GrowActive | ControlAction::ShrinkActive => {
                let substrate = self.substrate.as_dyn();
                let next = step_active_count(substrate.active_count(), substrate.dims().count(), action);
                let applied = substrate.set_active_count(next);
                info!("Drawing {} agents", applied);
            }
            _ => {}
        }
    }

    fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        // Lost or outdated surfaces skip the frame without advancing the clock.
        let output = self.surface.get_current_texture()?;
        let (time, dt) = self.clock.update();

        let uniforms = camera_uniforms(&self.camera, &self.config);
        self.gpu
            .queue
            .write_buffer(&self.camera_buffer, 0, bytemuck::bytes_of(&uniforms));

        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        let paused = self.clock.is_paused();
        let (positions, velocities, active_count) = match &mut self.substrate {
            Substrate::Cpu {
                flock,
                positions,
                velocities,
            } => {
                if !paused {
                    flock.tick(dt, time);
                }
                let frame = flock.frame();
                self.gpu.queue.write_buffer(
                    positions,
                    0,
                    bytemuck::cast_slice(frame.active_positions()),
                );
                self.gpu.queue.write_buffer(
                    velocities,
                    0,
                    bytemuck::cast_slice(frame.active_velocities()),
                );
                (&*positions, &*velocities, frame.active_count())
            }
            Substrate::Gpu(flock) => {
                if !paused {
                    flock.encode_tick(&mut encoder, dt, time);
                }
                let buffers = flock.current_buffers();
                (buffers.positions, buffers.velocities, buffers.active_count)
            }
        };

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.02,
                            g: 0.02,
                            b: 0.05,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_texture,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            render_pass.set_pipeline(&self.render_pipeline);
            render_pass.set_bind_group(0, &self.camera_bind_group, &[]);
            render_pass.set_vertex_buffer(0, self.mesh_buffer.slice(..));
            render_pass.set_vertex_buffer(1, positions.slice(..));
            render_pass.set_vertex_buffer(2, velocities.slice(..));
            render_pass.draw(0..self.mesh_vertex_count, 0..active_count);
        }

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        if self.last_title_update.elapsed() >= TITLE_REFRESH {
            self.last_title_update = Instant::now();
            let selected = self.control.selected();
            let substrate = self.substrate.as_dyn();
            let value = substrate.params().get(selected);
            self.window.set_title(&format!(
                "murmur | {} / {} agents | {:.0} fps | {} = {:.2}{}",
                substrate.active_count(),
                substrate.dims().count(),
                self.clock.fps(),
                selected,
                value,
                if paused { " | paused" } else { "" }
            ));
        }

        Ok(())
    }
}

fn camera_uniforms(camera: &Camera, config: &wgpu::SurfaceConfiguration) -> CameraUniforms {
    let aspect = config.width as f32 / config.height.max(1) as f32;
    CameraUniforms {
        view_proj: camera.view_proj(aspect).to_cols_array_2d(),
        eye: camera.position().extend(1.0).to_array(),
    }
}

fn create_depth_texture(
    device: &wgpu::Device,
    config: &wgpu::SurfaceConfiguration,
) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Depth Texture"),
        size: wgpu::Extent3d {
            width: config.width,
            height: config.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

/// winit application hosting the flock.
pub struct App {
    pending: Option<Flock>,
    backend: Backend,
    state: Option<ViewerState>,
    error: Option<SimulationError>,
    mouse_pressed: bool,
    last_mouse_pos: Option<(f64, f64)>,
}

impl App {
    pub fn new(flock: Flock, backend: Backend) -> Self {
        Self {
            pending: Some(flock),
            backend,
            state: None,
            error: None,
            mouse_pressed: false,
            last_mouse_pos: None,
        }
    }

    /// Error that ended the event loop, if any.
    pub fn take_error(&mut self) -> Option<SimulationError> {
        self.error.take()
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: SimulationError) {
        self.error = Some(err);
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let Some(flock) = self.pending.take() else {
            return;
        };

        let window_attrs = Window::default_attributes()
            .with_title("murmur")
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));

        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => return self.fail(event_loop, e.into()),
        };

        match pollster::block_on(ViewerState::new(window.clone(), flock, self.backend)) {
            Ok(state) => {
                self.state = Some(state);
                window.request_redraw();
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = self.state.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(physical_size) => {
                state.resize(physical_size);
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                if let Some(action) = ControlAction::from_key(code) {
                    state.handle_action(action);
                }
            }
            WindowEvent::MouseInput { state: button_state, button, .. } => {
                if button == MouseButton::Left {
                    self.mouse_pressed = button_state == ElementState::Pressed;
                    if !self.mouse_pressed {
                        self.last_mouse_pos = None;
                    }
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                if self.mouse_pressed {
                    if let Some((last_x, last_y)) = self.last_mouse_pos {
                        state
                            .camera
                            .orbit((position.x - last_x) as f32, (position.y - last_y) as f32);
                    }
                    self.last_mouse_pos = Some((position.x, position.y));
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 * 0.02,
                };
                state.camera.zoom(lines);
            }
            WindowEvent::RedrawRequested => {
                match state.render() {
                    Ok(()) => {}
                    Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                        let size = state.window.inner_size();
                        state.resize(size);
                    }
                    Err(wgpu::SurfaceError::OutOfMemory) => {
                        error!("Surface out of memory");
                        event_loop.exit();
                    }
                    Err(e) => warn!("Render error: {:?}", e),
                }
                state.window.request_redraw();
            }
            _ => {}
        }
    }
}

/// Open a window and run `flock` on `backend` until the window closes.
pub fn run(flock: Flock, backend: Backend) -> Result<(), SimulationError> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(flock, backend);
    event_loop.run_app(&mut app)?;

    match app.take_error() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
