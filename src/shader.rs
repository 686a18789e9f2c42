//! WGSL sources for the GPU substrate and the viewer.
//!
//! The compute module holds both kernels (`update_velocity`, then
//! `update_position`) over ping-pong storage buffers of vec4 texels. Binding
//! layout, shared by both entry points:
//!
//! | binding | buffer              | access     |
//! |---------|---------------------|------------|
//! | 0       | [`GpuUniforms`]     | uniform    |
//! | 1       | positions (front)   | read       |
//! | 2       | velocities (front)  | read       |
//! | 3       | positions (back)    | read_write |
//! | 4       | velocities (back)   | read_write |
//!
//! The position pass reads the next velocities straight from binding 4, so a
//! single bind group per parity serves both passes.

use bytemuck::{Pod, Zeroable};

use crate::params::Params;

/// Threads per compute workgroup.
pub const WORKGROUP_SIZE: u32 = 256;

/// Compute uniforms. Field order and offsets match `struct Uniforms` in
/// [`UNIFORMS_WGSL`].
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuUniforms {
    pub separation_weight: f32,
    pub alignment_weight: f32,
    pub cohesion_weight: f32,
    pub max_speed: f32,
    pub perception_radius: f32,
    pub separation_radius: f32,
    pub boundary_radius: f32,
    pub turbulence: f32,
    pub delta_time: f32,
    pub time: f32,
    pub density_scale: f32,
    pub _pad0: f32,
    pub agent_count: u32,
    pub sample_budget: u32,
    pub sample_stride: u32,
    /// Invocations per dispatch row (workgroups in x times `WORKGROUP_SIZE`).
    pub dispatch_width: u32,
}

const _: () = assert!(std::mem::size_of::<GpuUniforms>() == 64);
const _: () = assert!(std::mem::offset_of!(GpuUniforms, delta_time) == 32);
const _: () = assert!(std::mem::offset_of!(GpuUniforms, density_scale) == 40);
const _: () = assert!(std::mem::offset_of!(GpuUniforms, agent_count) == 48);
const _: () = assert!(std::mem::offset_of!(GpuUniforms, dispatch_width) == 60);

impl GpuUniforms {
    pub fn new(params: &Params, dt: f32, time: f32) -> Self {
        Self {
            separation_weight: params.separation_weight,
            alignment_weight: params.alignment_weight,
            cohesion_weight: params.cohesion_weight,
            max_speed: params.max_speed,
            perception_radius: params.perception_radius,
            separation_radius: params.separation_radius,
            boundary_radius: params.boundary_radius,
            turbulence: params.turbulence,
            delta_time: dt,
            time,
            ..Self::default()
        }
    }
}

/// Camera uniforms for the render shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct CameraUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub eye: [f32; 4],
}

const _: () = assert!(std::mem::size_of::<CameraUniforms>() == 80);

/// Hash functions. Same bit patterns as `noise::hash` / `noise::hash3`.
pub const HASH_WGSL: &str = r#"
fn hash(n: u32) -> u32 {
    var x = n;
    x = x ^ (x >> 17u);
    x = x * 0xed5ad4bbu;
    x = x ^ (x >> 11u);
    x = x * 0xac4c1b51u;
    x = x ^ (x >> 15u);
    x = x * 0x31848babu;
    x = x ^ (x >> 14u);
    return x;
}

fn hash3(p: vec3<u32>) -> u32 {
    return hash(p.x + hash(p.y + hash(p.z)));
}
"#;

/// Lattice value noise, its curl, and the helpers shared with the kernels.
pub const NOISE_WGSL: &str = r#"
const CURL_EPSILON: f32 = 0.1;

fn lerp1(a: f32, b: f32, t: f32) -> f32 {
    return a + (b - a) * t;
}

// Hard step when the edges coincide
fn smooth_step(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge0 == edge1 {
        return select(1.0, 0.0, x < edge0);
    }
    let t = clamp((x - edge0) / (edge1 - edge0), 0.0, 1.0);
    return t * t * (3.0 - 2.0 * t);
}

fn lattice_value(c: vec3<i32>) -> f32 {
    let h = hash3(bitcast<vec3<u32>>(c)) >> 8u;
    return f32(h) / 16777215.0 * 2.0 - 1.0;
}

fn value_noise(p: vec3<f32>) -> f32 {
    let cell = floor(p);
    let f = p - cell;
    let i = vec3<i32>(cell);
    let u = f * f * (3.0 - 2.0 * f);

    let c000 = lattice_value(i);
    let c100 = lattice_value(i + vec3<i32>(1, 0, 0));
    let c010 = lattice_value(i + vec3<i32>(0, 1, 0));
    let c110 = lattice_value(i + vec3<i32>(1, 1, 0));
    let c001 = lattice_value(i + vec3<i32>(0, 0, 1));
    let c101 = lattice_value(i + vec3<i32>(1, 0, 1));
    let c011 = lattice_value(i + vec3<i32>(0, 1, 1));
    let c111 = lattice_value(i + vec3<i32>(1, 1, 1));

    let x00 = lerp1(c000, c100, u.x);
    let x10 = lerp1(c010, c110, u.x);
    let x01 = lerp1(c001, c101, u.x);
    let x11 = lerp1(c011, c111, u.x);
    let y0 = lerp1(x00, x10, u.y);
    let y1 = lerp1(x01, x11, u.y);
    return lerp1(y0, y1, u.z);
}

fn curl_noise(p: vec3<f32>) -> vec3<f32> {
    let ex = vec3<f32>(CURL_EPSILON, 0.0, 0.0);
    let ey = vec3<f32>(0.0, CURL_EPSILON, 0.0);
    let ez = vec3<f32>(0.0, 0.0, CURL_EPSILON);

    let dx = value_noise(p + ex) - value_noise(p - ex);
    let dy = value_noise(p + ey) - value_noise(p - ey);
    let dz = value_noise(p + ez) - value_noise(p - ez);

    return vec3<f32>(dy - dz, dz - dx, dx - dy) / (2.0 * CURL_EPSILON);
}
"#;

/// Uniform block and storage bindings of the compute module.
pub const UNIFORMS_WGSL: &str = r#"
struct Uniforms {
    separation_weight: f32,
    alignment_weight: f32,
    cohesion_weight: f32,
    max_speed: f32,
    perception_radius: f32,
    separation_radius: f32,
    boundary_radius: f32,
    turbulence: f32,
    delta_time: f32,
    time: f32,
    density_scale: f32,
    _pad0: f32,
    agent_count: u32,
    sample_budget: u32,
    sample_stride: u32,
    dispatch_width: u32,
};

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(1) var<storage, read> positions_in: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read> velocities_in: array<vec4<f32>>;
@group(0) @binding(3) var<storage, read_write> positions_out: array<vec4<f32>>;
@group(0) @binding(4) var<storage, read_write> velocities_out: array<vec4<f32>>;

fn agent_index(gid: vec3<u32>) -> u32 {
    return gid.y * uniforms.dispatch_width + gid.x;
}
"#;

/// Velocity and position kernels.
pub const KERNELS_WGSL: &str = r#"
const EPSILON: f32 = 0.001;
const REST_EPSILON: f32 = 0.000001;
const TURBULENCE_FREQUENCY: f32 = 0.008;
const TURBULENCE_DRIFT: f32 = 0.15;
const CENTROID_PULL: f32 = 0.15;
const CONTAINMENT_START: f32 = 0.7;
const CONTAINMENT_EXCESS_LIMIT: f32 = 100.0;
const MIN_SPEED_FRACTION: f32 = 0.2;
const SEPARATION_DENSITY_CAP: f32 = 3.0;

const EXPONENT_MASK: u32 = 0x7f800000u;

// Exponent bits all set means inf or NaN
fn finite1(x: f32) -> bool {
    return (bitcast<u32>(x) & EXPONENT_MASK) != EXPONENT_MASK;
}

fn finite3(v: vec3<f32>) -> bool {
    let exponent = bitcast<vec3<u32>>(v) & vec3<u32>(EXPONENT_MASK);
    return all(exponent != vec3<u32>(EXPONENT_MASK));
}

fn clamp_speed(v: vec3<f32>, previous: vec3<f32>, max_speed_raw: f32) -> vec3<f32> {
    let max_speed = max(max_speed_raw, 0.0);
    let min_speed = MIN_SPEED_FRACTION * max_speed;
    let speed = length(v);

    if !finite1(speed) {
        if finite3(v) {
            let largest = max(max(abs(v.x), abs(v.y)), abs(v.z));
            if largest > 0.0 {
                let scaled = v / largest;
                return scaled / length(scaled) * max_speed;
            }
        }
        let previous_speed = length(previous);
        if finite1(previous_speed) && previous_speed > REST_EPSILON {
            return previous / previous_speed * max_speed;
        }
        return vec3<f32>(0.0);
    }

    if speed > max_speed {
        return v * (max_speed / speed);
    }
    if speed < min_speed {
        if speed > REST_EPSILON {
            return v * (min_speed / speed);
        }
        let previous_speed = length(previous);
        if previous_speed > REST_EPSILON {
            return previous / previous_speed * min_speed;
        }
    }
    return v;
}

@compute @workgroup_size(256)
fn update_velocity(@builtin(global_invocation_id) gid: vec3<u32>) {
    let id = agent_index(gid);
    if id >= uniforms.agent_count {
        return;
    }

    let my_pos = positions_in[id].xyz;
    let my_texel = velocities_in[id];
    let my_vel = my_texel.xyz;

    var separation_sum = vec3<f32>(0.0);
    var separation_count = 0u;
    var velocity_sum = vec3<f32>(0.0);
    var position_sum = vec3<f32>(0.0);
    var perceived_count = 0u;

    // Fixed-stride neighbor sampling; skipping self does not consume budget
    var visited = 0u;
    var j = 0u;
    loop {
        if visited >= uniforms.sample_budget || j >= uniforms.agent_count {
            break;
        }
        if j != id {
            let other_pos = positions_in[j].xyz;
            let offset = my_pos - other_pos;
            let d = length(offset);
            if d > 0.0 {
                if d < uniforms.separation_radius {
                    separation_sum += offset / d;
                    separation_count += 1u;
                }
                if d < uniforms.perception_radius {
                    velocity_sum += velocities_in[j].xyz;
                    position_sum += other_pos;
                    perceived_count += 1u;
                }
            }
            visited += 1u;
        }
        let next = j + uniforms.sample_stride;
        if next < j {
            break;
        }
        j = next;
    }

    var acceleration = vec3<f32>(0.0);

    // Separation
    if separation_count > 0u {
        let count = f32(separation_count);
        let density = min(count * uniforms.density_scale / 10.0, SEPARATION_DENSITY_CAP);
        acceleration += separation_sum / count * uniforms.separation_weight * density;
    }

    if perceived_count > 0u {
        let count = f32(perceived_count);

        // Alignment
        var align = velocity_sum / count - my_vel;
        let align_len = length(align);
        if align_len > EPSILON {
            align = align / align_len;
        }
        acceleration += align * uniforms.alignment_weight;

        // Cohesion
        let to_center = position_sum / count - my_pos;
        let dist = length(to_center);
        if dist > EPSILON {
            acceleration += to_center / dist
                * smooth_step(0.0, uniforms.perception_radius, dist)
                * uniforms.cohesion_weight;
        }
    }

    // Turbulence
    let drift = vec3<f32>(uniforms.time * TURBULENCE_DRIFT);
    acceleration += curl_noise(my_pos * TURBULENCE_FREQUENCY + drift) * uniforms.turbulence;

    // Centroid pull and soft containment
    let boundary = max(uniforms.boundary_radius, 0.0);
    let r = length(my_pos);
    if r > EPSILON {
        let inward = -my_pos / r;
        acceleration += inward
            * smooth_step(0.5 * boundary, boundary, r)
            * uniforms.cohesion_weight
            * CENTROID_PULL;

        let start = CONTAINMENT_START * boundary;
        if boundary > 0.0 && r > start {
            let excess = min((r - start) / (boundary - start), CONTAINMENT_EXCESS_LIMIT);
            acceleration += inward * 2.0 * max(uniforms.max_speed, 0.0) * excess * excess * excess;
        }
    }

    let v = my_vel + acceleration * uniforms.delta_time;
    velocities_out[id] = vec4<f32>(clamp_speed(v, my_vel, uniforms.max_speed), my_texel.w);
}

@compute @workgroup_size(256)
fn update_position(@builtin(global_invocation_id) gid: vec3<u32>) {
    let id = agent_index(gid);
    if id >= uniforms.agent_count {
        return;
    }

    let p = positions_in[id];
    let v = velocities_out[id].xyz;
    positions_out[id] = vec4<f32>(p.xyz + v * uniforms.delta_time, p.w);
}
"#;

/// Instanced bird renderer. Per-vertex mesh data in slot 0, per-instance
/// position and velocity texels in slots 1 and 2 (the storage buffers of the
/// current generation, or CPU frames uploaded into same-layout buffers).
pub const RENDER_WGSL: &str = r#"
struct Camera {
    view_proj: mat4x4<f32>,
    eye: vec4<f32>,
};

@group(0) @binding(0) var<uniform> camera: Camera;

struct VertexInput {
    @location(0) local_position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) agent_position: vec4<f32>,
    @location(3) agent_velocity: vec4<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_normal: vec3<f32>,
    @location(1) world_position: vec3<f32>,
    @location(2) speed: f32,
};

fn orientation_basis(velocity: vec3<f32>) -> mat3x3<f32> {
    var forward = vec3<f32>(0.0, 0.0, 1.0);
    let speed = length(velocity);
    if speed >= 0.001 {
        forward = velocity / speed;
    }
    var reference = vec3<f32>(0.0, 1.0, 0.0);
    if abs(forward.y) > 0.999 {
        reference = vec3<f32>(1.0, 0.0, 0.0);
    }
    let right = normalize(cross(reference, forward));
    let up = cross(forward, right);
    return mat3x3<f32>(right, up, forward);
}

fn instance_scale(speed: f32) -> f32 {
    let t = clamp(speed / 50.0, 0.0, 1.0);
    return 1.0 + t * t * (3.0 - 2.0 * t);
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    let velocity = in.agent_velocity.xyz;
    let speed = length(velocity);
    let basis = orientation_basis(velocity);
    let world = basis * (in.local_position * instance_scale(speed)) + in.agent_position.xyz;

    var out: VertexOutput;
    out.clip_position = camera.view_proj * vec4<f32>(world, 1.0);
    out.world_normal = basis * in.normal;
    out.world_position = world;
    out.speed = speed;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let light_dir = normalize(vec3<f32>(0.4, 1.0, 0.3));
    let n = normalize(in.world_normal);
    let diffuse = abs(dot(n, light_dir));

    let slow = vec3<f32>(0.15, 0.25, 0.45);
    let fast = vec3<f32>(0.85, 0.9, 1.0);
    let base = mix(slow, fast, clamp(in.speed / 50.0, 0.0, 1.0));

    // Distance fog toward the clear color
    let fog = clamp(length(in.world_position - camera.eye.xyz) / 2000.0, 0.0, 0.85);
    let lit = base * (0.25 + 0.75 * diffuse);
    return vec4<f32>(mix(lit, vec3<f32>(0.02, 0.02, 0.05), fog), 1.0);
}
"#;

/// Full compute module: hash, noise, bindings, kernels.
pub fn compute_shader() -> String {
    format!("{HASH_WGSL}{NOISE_WGSL}{UNIFORMS_WGSL}{KERNELS_WGSL}")
}

/// Render module for the viewer.
pub fn render_shader() -> String {
    RENDER_WGSL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates WGSL code using naga.
    fn validate_wgsl(code: &str) -> Result<naga::Module, String> {
        let module = naga::front::wgsl::parse_str(code)
            .map_err(|e| format!("WGSL parse error: {:?}", e))?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator
            .validate(&module)
            .map_err(|e| format!("WGSL validation error: {:?}", e))?;

        Ok(module)
    }

    fn entry_points(module: &naga::Module) -> Vec<String> {
        module.entry_points.iter().map(|ep| ep.name.clone()).collect()
    }

    #[test]
    fn test_compute_shader_valid() {
        let module = validate_wgsl(&compute_shader()).expect("compute WGSL should be valid");
        let names = entry_points(&module);
        assert!(names.contains(&"update_velocity".to_string()));
        assert!(names.contains(&"update_position".to_string()));
    }

    #[test]
    fn test_render_shader_valid() {
        let module = validate_wgsl(&render_shader()).expect("render WGSL should be valid");
        let names = entry_points(&module);
        assert!(names.contains(&"vs_main".to_string()));
        assert!(names.contains(&"fs_main".to_string()));
    }

    #[test]
    fn test_speed_clamp_guards_overflow() {
        let module = validate_wgsl(&compute_shader()).expect("compute WGSL should be valid");
        let functions: Vec<_> = module
            .functions
            .iter()
            .filter_map(|(_, f)| f.name.clone())
            .collect();
        for name in ["finite1", "finite3", "clamp_speed"] {
            assert!(functions.iter().any(|f| f == name), "missing {}", name);
        }
        assert!(KERNELS_WGSL.contains("if !finite1(speed)"));
    }

    #[test]
    fn test_workgroup_size_matches() {
        let source = compute_shader();
        assert!(source.contains(&format!("@workgroup_size({})", WORKGROUP_SIZE)));
    }

    #[test]
    fn test_uniform_struct_size_matches_wgsl() {
        let module = validate_wgsl(&compute_shader()).unwrap();
        let uniforms = module
            .types
            .iter()
            .find(|(_, ty)| ty.name.as_deref() == Some("Uniforms"))
            .map(|(_, ty)| ty.inner.clone())
            .expect("Uniforms struct present");
        match uniforms {
            naga::TypeInner::Struct { members, span } => {
                assert_eq!(span as usize, std::mem::size_of::<GpuUniforms>());
                let agent_count = members
                    .iter()
                    .find(|m| m.name.as_deref() == Some("agent_count"))
                    .unwrap();
                assert_eq!(
                    agent_count.offset as usize,
                    std::mem::offset_of!(GpuUniforms, agent_count)
                );
            }
            other => panic!("unexpected uniform type {:?}", other),
        }
    }

    #[test]
    fn test_uniforms_from_params() {
        let params = Params::default();
        let uniforms = GpuUniforms::new(&params, 0.016, 2.0);
        assert_eq!(uniforms.max_speed, params.max_speed);
        assert_eq!(uniforms.turbulence, params.turbulence);
        assert_eq!(uniforms.delta_time, 0.016);
        assert_eq!(uniforms.time, 2.0);
        assert_eq!(uniforms.agent_count, 0);
    }
}
