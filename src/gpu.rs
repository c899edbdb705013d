//! wgpu backend: every field lives in a pair of storage buffers and every
//! pass is one compute dispatch recorded into a single per-frame encoder.
//!
//! [`GpuFluid`] owns the device-side fields and compute passes and needs no
//! window. [`GpuBackend`] adds the surface and the composite render pass.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use winit::window::Window;

use crate::config::MAX_SPLATS_PER_FRAME;
use crate::error::FluidError;
use crate::field_store::PingPong;
use crate::grid::{FieldValue, Grid};
use crate::passes::Splat;
use crate::resolution::{GridDims, GridLimits, GridSize};
use crate::scheduler::{FluidBackend, FrameUniforms};

pub const WORKGROUP_SIZE: u32 = 16;

const DYE_CELL_BYTES: u64 = std::mem::size_of::<[f32; 4]>() as u64;
const VELOCITY_CELL_BYTES: u64 = std::mem::size_of::<[f32; 2]>() as u64;
const SCALAR_CELL_BYTES: u64 = std::mem::size_of::<f32>() as u64;

/// Mirrors `FluidParams` in both shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct FluidParams {
    sim_size: [u32; 2],
    dye_size: [u32; 2],
    dt: f32,
    velocity_dissipation: f32,
    dye_dissipation: f32,
    pressure_scale: f32,
    velocity_splat_count: u32,
    dye_splat_count: u32,
    _pad0: u32,
    _pad1: u32,
}

impl FluidParams {
    fn set_dims(&mut self, dims: GridDims) {
        self.sim_size = [dims.sim.width, dims.sim.height];
        self.dye_size = [dims.dye.width, dims.dye.height];
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct GpuSplat {
    point: [f32; 2],
    radius: f32,
    _pad: f32,
    value: [f32; 4],
}

impl GpuSplat {
    fn new(point: Vec2, radius: f32, value: [f32; 4]) -> Self {
        Self {
            point: point.to_array(),
            radius,
            _pad: 0.0,
            value,
        }
    }
}

const SPLAT_BYTES: u64 = std::mem::size_of::<GpuSplat>() as u64;

fn storage_entry(binding: u32, read_only: bool, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Compute bind group layouts and pipelines; independent of grid size.
struct Pipelines {
    shared_layout: wgpu::BindGroupLayout,
    field_layout: wgpu::BindGroupLayout,
    splat_velocity: wgpu::ComputePipeline,
    splat_dye: wgpu::ComputePipeline,
    advect_velocity: wgpu::ComputePipeline,
    advect_dye: wgpu::ComputePipeline,
    divergence: wgpu::ComputePipeline,
    scale_pressure: wgpu::ComputePipeline,
    jacobi_pressure: wgpu::ComputePipeline,
    subtract_gradient: wgpu::ComputePipeline,
}

impl Pipelines {
    fn new(device: &wgpu::Device) -> Self {
        let fluid_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Fluid Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/fluid.wgsl").into()),
        });

        let compute = wgpu::ShaderStages::COMPUTE;
        let shared_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Fluid Shared Layout"),
            entries: &[
                uniform_entry(0, compute),
                storage_entry(1, true, compute),
                storage_entry(2, false, compute),
            ],
        });
        // Used for velocity, dye and pressure alike: (in, out).
        let field_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Fluid Field Layout"),
            entries: &[storage_entry(0, true, compute), storage_entry(1, false, compute)],
        });

        let compute_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Fluid Pipeline Layout"),
            bind_group_layouts: &[&shared_layout, &field_layout, &field_layout, &field_layout],
            push_constant_ranges: &[],
        });

        let compute_pipeline = |label: &str, entry_point: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&compute_layout),
                module: &fluid_shader,
                entry_point,
                compilation_options: Default::default(),
                cache: None,
            })
        };

        Self {
            splat_velocity: compute_pipeline("Splat Velocity Pipeline", "splat_velocity"),
            splat_dye: compute_pipeline("Splat Dye Pipeline", "splat_dye"),
            advect_velocity: compute_pipeline("Advect Velocity Pipeline", "advect_velocity"),
            advect_dye: compute_pipeline("Advect Dye Pipeline", "advect_dye"),
            divergence: compute_pipeline("Divergence Pipeline", "compute_divergence"),
            scale_pressure: compute_pipeline("Scale Pressure Pipeline", "scale_pressure"),
            jacobi_pressure: compute_pipeline("Jacobi Pressure Pipeline", "jacobi_pressure"),
            subtract_gradient: compute_pipeline("Subtract Gradient Pipeline", "subtract_gradient"),
            shared_layout,
            field_layout,
        }
    }
}

/// Grid-sized buffers and the bind groups over them. Bind group `k` of a
/// field reads slot `k` and writes slot `1 - k`.
struct FieldBuffers {
    dims: GridDims,
    velocity: PingPong<wgpu::Buffer>,
    dye: PingPong<wgpu::Buffer>,
    pressure: PingPong<wgpu::Buffer>,
    divergence: wgpu::Buffer,
    shared_bind_group: wgpu::BindGroup,
    velocity_bind_groups: [wgpu::BindGroup; 2],
    dye_bind_groups: [wgpu::BindGroup; 2],
    pressure_bind_groups: [wgpu::BindGroup; 2],
}

fn field_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    })
}

fn field_bind_groups(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    label: &str,
    buffers: &PingPong<wgpu::Buffer>,
) -> [wgpu::BindGroup; 2] {
    let [a, b] = buffers.slots();
    let make = |input: &wgpu::Buffer, output: &wgpu::Buffer| {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: input.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: output.as_entire_binding() },
            ],
        })
    };
    [make(a, b), make(b, a)]
}

impl FieldBuffers {
    /// New buffers are zero-filled by wgpu.
    fn new(
        device: &wgpu::Device,
        pipelines: &Pipelines,
        params: &wgpu::Buffer,
        splats: &wgpu::Buffer,
        dims: GridDims,
    ) -> Self {
        let sim_cells = dims.sim.cell_count() as u64;
        let dye_cells = dims.dye.cell_count() as u64;

        let velocity = PingPong::new(
            field_buffer(device, "Velocity A", sim_cells * VELOCITY_CELL_BYTES),
            field_buffer(device, "Velocity B", sim_cells * VELOCITY_CELL_BYTES),
        );
        let dye = PingPong::new(
            field_buffer(device, "Dye A", dye_cells * DYE_CELL_BYTES),
            field_buffer(device, "Dye B", dye_cells * DYE_CELL_BYTES),
        );
        let pressure = PingPong::new(
            field_buffer(device, "Pressure A", sim_cells * SCALAR_CELL_BYTES),
            field_buffer(device, "Pressure B", sim_cells * SCALAR_CELL_BYTES),
        );
        let divergence = field_buffer(device, "Divergence", sim_cells * SCALAR_CELL_BYTES);

        let shared_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Fluid Shared Bind Group"),
            layout: &pipelines.shared_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: splats.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: divergence.as_entire_binding() },
            ],
        });

        let velocity_bind_groups =
            field_bind_groups(device, &pipelines.field_layout, "Velocity Bind Group", &velocity);
        let dye_bind_groups = field_bind_groups(device, &pipelines.field_layout, "Dye Bind Group", &dye);
        let pressure_bind_groups =
            field_bind_groups(device, &pipelines.field_layout, "Pressure Bind Group", &pressure);

        Self {
            dims,
            velocity,
            dye,
            pressure,
            divergence,
            shared_bind_group,
            velocity_bind_groups,
            dye_bind_groups,
            pressure_bind_groups,
        }
    }

    /// Bind groups for groups 0..=3 at the current read slots.
    fn bind_groups(&self) -> [&wgpu::BindGroup; 4] {
        [
            &self.shared_bind_group,
            &self.velocity_bind_groups[self.velocity.read_index()],
            &self.dye_bind_groups[self.dye.read_index()],
            &self.pressure_bind_groups[self.pressure.read_index()],
        ]
    }
}

fn workgroups(size: GridSize) -> (u32, u32) {
    (
        size.width.div_ceil(WORKGROUP_SIZE),
        size.height.div_ceil(WORKGROUP_SIZE),
    )
}

/// The frame's encoder, opened on first use.
fn frame_encoder<'a>(
    device: &wgpu::Device,
    slot: &'a mut Option<wgpu::CommandEncoder>,
) -> &'a mut wgpu::CommandEncoder {
    slot.get_or_insert_with(|| {
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Fluid Frame Encoder"),
        })
    })
}

fn encode_pass(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &wgpu::ComputePipeline,
    bind_groups: [&wgpu::BindGroup; 4],
    size: GridSize,
) {
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    for (index, group) in bind_groups.into_iter().enumerate() {
        pass.set_bind_group(index as u32, group, &[]);
    }
    let (x, y) = workgroups(size);
    pass.dispatch_workgroups(x, y, 1);
}

/// Largest grid the device's buffer and dispatch limits allow.
pub fn grid_limits(limits: &wgpu::Limits) -> GridLimits {
    let binding = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
    GridLimits {
        max_dimension: limits.max_compute_workgroups_per_dimension.saturating_mul(WORKGROUP_SIZE),
        max_cells: binding / DYE_CELL_BYTES,
    }
}

async fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue), FluidError> {
    let info = adapter.get_info();
    log::info!("Using adapter {} ({:?})", info.name, info.backend);

    let adapter_limits = adapter.limits();
    let required_limits = wgpu::Limits {
        max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
        max_buffer_size: adapter_limits.max_buffer_size,
        ..wgpu::Limits::default()
    };

    adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Fluid Device"),
                required_features: wgpu::Features::empty(),
                required_limits,
                memory_hints: Default::default(),
            },
            None,
        )
        .await
        .map_err(|err| FluidError::SurfaceUnavailable(err.to_string()))
}

/// Device-resident fields and the compute passes over them.
///
/// As a [`FluidBackend`] on its own, `composite` is a no-op: the dye stays
/// on the device until read back with [`GpuFluid::read_dye`].
pub struct GpuFluid {
    device: wgpu::Device,
    queue: wgpu::Queue,
    limits: GridLimits,
    pipelines: Pipelines,
    params: FluidParams,
    params_buffer: wgpu::Buffer,
    splat_buffer: wgpu::Buffer,
    fields: FieldBuffers,
    encoder: Option<wgpu::CommandEncoder>,
}

impl GpuFluid {
    /// Runs on any adapter, without a window.
    pub async fn new_headless(dims: GridDims) -> Result<Self, FluidError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| FluidError::SurfaceUnavailable("no GPU adapter".to_string()))?;

        let (device, queue) = request_device(&adapter).await?;
        Self::with_device(device, queue, dims)
    }

    pub fn with_device(device: wgpu::Device, queue: wgpu::Queue, dims: GridDims) -> Result<Self, FluidError> {
        let limits = grid_limits(&device.limits());
        limits.check_dims(dims)?;

        let pipelines = Pipelines::new(&device);

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Fluid Params"),
            size: std::mem::size_of::<FluidParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        // Velocity splats occupy the first region, dye splats the second.
        let splat_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Splats"),
            size: 2 * MAX_SPLATS_PER_FRAME as u64 * SPLAT_BYTES,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let fields = allocate_fields(&device, &pipelines, &params_buffer, &splat_buffer, dims, limits)?;

        let mut params = FluidParams::zeroed();
        params.set_dims(dims);
        params.pressure_scale = 1.0;

        Ok(Self {
            device,
            queue,
            limits,
            pipelines,
            params,
            params_buffer,
            splat_buffer,
            fields,
            encoder: None,
        })
    }

    /// Replaces the limits derived from the device. Allocations beyond what
    /// the device can hold still fail with `GridTooLarge`.
    pub fn with_grid_limits(mut self, limits: GridLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Writes `grid` into the current velocity buffer. Call between frames.
    pub fn upload_velocity(&self, grid: &Grid<Vec2>) {
        assert_eq!(grid.size(), self.fields.dims.sim);
        let cells: Vec<[f32; 2]> = grid.cells().iter().map(|v| v.to_array()).collect();
        self.queue.write_buffer(self.fields.velocity.read(), 0, bytemuck::cast_slice(&cells));
    }

    pub fn upload_dye(&self, grid: &Grid<Vec3>) {
        assert_eq!(grid.size(), self.fields.dims.dye);
        let cells: Vec<[f32; 4]> = grid.cells().iter().map(|c| c.extend(1.0).to_array()).collect();
        self.queue.write_buffer(self.fields.dye.read(), 0, bytemuck::cast_slice(&cells));
    }

    pub fn upload_pressure(&self, grid: &Grid<f32>) {
        assert_eq!(grid.size(), self.fields.dims.sim);
        self.queue.write_buffer(self.fields.pressure.read(), 0, bytemuck::cast_slice(grid.cells()));
    }

    pub async fn read_velocity(&self) -> Result<Grid<Vec2>, FluidError> {
        let size = self.fields.dims.sim;
        let cells: Vec<[f32; 2]> = self.read_buffer(self.fields.velocity.read(), size).await?;
        Ok(grid_from_cells(size, &cells, Vec2::from_array))
    }

    /// Copies the current dye field back to the host. Call between frames.
    pub async fn read_dye(&self) -> Result<Grid<Vec3>, FluidError> {
        let size = self.fields.dims.dye;
        let cells: Vec<[f32; 4]> = self.read_buffer(self.fields.dye.read(), size).await?;
        Ok(grid_from_cells(size, &cells, |c| Vec3::new(c[0], c[1], c[2])))
    }

    pub async fn read_pressure(&self) -> Result<Grid<f32>, FluidError> {
        let size = self.fields.dims.sim;
        let cells: Vec<f32> = self.read_buffer(self.fields.pressure.read(), size).await?;
        Ok(grid_from_cells(size, &cells, |c| c))
    }

    pub async fn read_divergence(&self) -> Result<Grid<f32>, FluidError> {
        let size = self.fields.dims.sim;
        let cells: Vec<f32> = self.read_buffer(&self.fields.divergence, size).await?;
        Ok(grid_from_cells(size, &cells, |c| c))
    }

    async fn read_buffer<T: Pod>(&self, buffer: &wgpu::Buffer, size: GridSize) -> Result<Vec<T>, FluidError> {
        let bytes = size.cell_count() as u64 * std::mem::size_of::<T>() as u64;

        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size: bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback"),
        });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging_buffer, 0, bytes);
        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .receive()
            .await
            .ok_or_else(|| FluidError::Readback("map callback dropped".to_string()))?
            .map_err(|err| FluidError::Readback(err.to_string()))?;

        let data = buffer_slice.get_mapped_range();
        let result: Vec<T> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging_buffer.unmap();

        Ok(result)
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        frame_encoder(&self.device, &mut self.encoder)
    }

    fn dispatch(&mut self, label: &str, pass: fn(&Pipelines) -> &wgpu::ComputePipeline, size: GridSize) {
        let encoder = frame_encoder(&self.device, &mut self.encoder);
        encode_pass(encoder, label, pass(&self.pipelines), self.fields.bind_groups(), size);
    }

    fn write_splats(&self, region: usize, splats: &[GpuSplat]) {
        let offset = (region * MAX_SPLATS_PER_FRAME) as u64 * SPLAT_BYTES;
        self.queue.write_buffer(&self.splat_buffer, offset, bytemuck::cast_slice(splats));
    }
}

fn grid_from_cells<C: Copy, T: FieldValue>(size: GridSize, cells: &[C], f: impl Fn(C) -> T) -> Grid<T> {
    let width = size.width as usize;
    Grid::from_fn(size, |i, j| f(cells[j * width + i]))
}

/// Builds the field buffers inside an error scope so that a failed
/// allocation surfaces as `GridTooLarge` instead of the device's
/// uncaptured-error panic.
fn allocate_fields(
    device: &wgpu::Device,
    pipelines: &Pipelines,
    params: &wgpu::Buffer,
    splats: &wgpu::Buffer,
    dims: GridDims,
    limits: GridLimits,
) -> Result<FieldBuffers, FluidError> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let fields = FieldBuffers::new(device, pipelines, params, splats, dims);
    let validation = pollster::block_on(device.pop_error_scope());
    let out_of_memory = pollster::block_on(device.pop_error_scope());

    if let Some(err) = validation.or(out_of_memory) {
        log::warn!("Field allocation failed: {err}");
        return Err(FluidError::GridTooLarge {
            requested: dims.dye,
            limits,
        });
    }

    log::info!(
        "GPU fields allocated: sim {}x{}, dye {}x{}",
        dims.sim.width,
        dims.sim.height,
        dims.dye.width,
        dims.dye.height
    );
    Ok(fields)
}

impl FluidBackend for GpuFluid {
    fn dims(&self) -> GridDims {
        self.fields.dims
    }

    fn reallocate(&mut self, dims: GridDims) -> Result<(), FluidError> {
        self.limits.check_dims(dims)?;
        self.fields = allocate_fields(
            &self.device,
            &self.pipelines,
            &self.params_buffer,
            &self.splat_buffer,
            dims,
            self.limits,
        )?;
        self.params.set_dims(dims);
        Ok(())
    }

    fn begin_frame(&mut self, uniforms: &FrameUniforms) {
        self.params.dt = uniforms.dt;
        self.params.velocity_dissipation = uniforms.velocity_dissipation;
        self.params.dye_dissipation = uniforms.dye_dissipation;
        self.params.pressure_scale = 1.0;
        self.params.velocity_splat_count = 0;
        self.params.dye_splat_count = 0;
        self.encoder();
    }

    /// Applies at most `MAX_SPLATS_PER_FRAME`; the scheduler never drains more.
    fn splat_velocity(&mut self, splats: &[Splat<Vec2>]) {
        debug_assert!(splats.len() <= MAX_SPLATS_PER_FRAME);
        let packed: Vec<GpuSplat> = splats
            .iter()
            .take(MAX_SPLATS_PER_FRAME)
            .map(|s| GpuSplat::new(s.point, s.radius, [s.value.x, s.value.y, 0.0, 0.0]))
            .collect();
        self.write_splats(0, &packed);
        self.params.velocity_splat_count = packed.len() as u32;
        self.dispatch("Splat Velocity", |p| &p.splat_velocity, self.fields.dims.sim);
        self.fields.velocity.swap();
    }

    fn splat_dye(&mut self, splats: &[Splat<Vec3>]) {
        debug_assert!(splats.len() <= MAX_SPLATS_PER_FRAME);
        let packed: Vec<GpuSplat> = splats
            .iter()
            .take(MAX_SPLATS_PER_FRAME)
            .map(|s| GpuSplat::new(s.point, s.radius, s.value.extend(0.0).to_array()))
            .collect();
        self.write_splats(1, &packed);
        self.params.dye_splat_count = packed.len() as u32;
        self.dispatch("Splat Dye", |p| &p.splat_dye, self.fields.dims.dye);
        self.fields.dye.swap();
    }

    fn advect_velocity(&mut self) {
        self.dispatch("Advect Velocity", |p| &p.advect_velocity, self.fields.dims.sim);
        self.fields.velocity.swap();
    }

    fn advect_dye(&mut self) {
        self.dispatch("Advect Dye", |p| &p.advect_dye, self.fields.dims.dye);
        self.fields.dye.swap();
    }

    fn divergence(&mut self) {
        self.dispatch("Divergence", |p| &p.divergence, self.fields.dims.sim);
    }

    fn scale_pressure(&mut self, factor: f32) {
        self.params.pressure_scale = factor;
        self.dispatch("Scale Pressure", |p| &p.scale_pressure, self.fields.dims.sim);
        self.fields.pressure.swap();
    }

    fn pressure_relax(&mut self) {
        self.dispatch("Jacobi Pressure", |p| &p.jacobi_pressure, self.fields.dims.sim);
        self.fields.pressure.swap();
    }

    fn subtract_gradient(&mut self) {
        self.dispatch("Subtract Gradient", |p| &p.subtract_gradient, self.fields.dims.sim);
        self.fields.velocity.swap();
    }

    fn composite(&mut self) -> Result<(), FluidError> {
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), FluidError> {
        // Every pass of the frame sees these values; they are only read once
        // the encoder is submitted.
        self.queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&self.params));

        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        Ok(())
    }
}

/// Full-screen dye draw onto the surface.
struct CompositePass {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::RenderPipeline,
    /// Indexed by the dye read slot.
    bind_groups: [wgpu::BindGroup; 2],
}

impl CompositePass {
    fn new(fluid: &GpuFluid, surface_format: wgpu::TextureFormat) -> Self {
        let device = &fluid.device;
        let composite_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Composite Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/composite.wgsl").into()),
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Composite Layout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::FRAGMENT),
                storage_entry(1, true, wgpu::ShaderStages::FRAGMENT),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Composite Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Composite Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &composite_shader,
                entry_point: "vs_main",
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &composite_shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
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
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
            cache: None,
        });

        let bind_groups = Self::bind_groups(fluid, &layout);
        Self {
            layout,
            pipeline,
            bind_groups,
        }
    }

    fn bind_groups(fluid: &GpuFluid, layout: &wgpu::BindGroupLayout) -> [wgpu::BindGroup; 2] {
        fluid.fields.dye.slots().each_ref().map(|buffer| {
            fluid.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Composite Bind Group"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: fluid.params_buffer.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 1, resource: buffer.as_entire_binding() },
                ],
            })
        })
    }

    /// Dye buffers are replaced on every reallocation.
    fn rebind(&mut self, fluid: &GpuFluid) {
        self.bind_groups = Self::bind_groups(fluid, &self.layout);
    }
}

/// [`GpuFluid`] presenting to a window surface.
pub struct GpuBackend {
    fluid: GpuFluid,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    composite: CompositePass,
    output: Option<wgpu::SurfaceTexture>,
}

impl GpuBackend {
    pub async fn new(window: Arc<Window>, dims: GridDims) -> Result<Self, FluidError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(|err| FluidError::SurfaceUnavailable(err.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                ..Default::default()
            })
            .await
            .ok_or_else(|| FluidError::SurfaceUnavailable("no compatible GPU adapter".to_string()))?;

        let (device, queue) = request_device(&adapter).await?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| FluidError::SurfaceUnavailable("surface reports no formats".to_string()))?;

        let size = window.inner_size();
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            desired_maximum_frame_latency: 2,
            alpha_mode: caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
        };
        surface.configure(&device, &surface_config);

        let fluid = GpuFluid::with_device(device, queue, dims)?;
        let composite = CompositePass::new(&fluid, format);

        Ok(Self {
            fluid,
            surface,
            surface_config,
            composite,
            output: None,
        })
    }

    pub fn surface_size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    /// Reconfigures the swapchain. Grid reallocation goes through the
    /// scheduler separately.
    pub fn resize_surface(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.fluid.device, &self.surface_config);
    }

    pub async fn read_dye(&self) -> Result<Grid<Vec3>, FluidError> {
        self.fluid.read_dye().await
    }
}

impl FluidBackend for GpuBackend {
    fn dims(&self) -> GridDims {
        self.fluid.dims()
    }

    fn reallocate(&mut self, dims: GridDims) -> Result<(), FluidError> {
        self.fluid.reallocate(dims)?;
        self.composite.rebind(&self.fluid);
        Ok(())
    }

    fn begin_frame(&mut self, uniforms: &FrameUniforms) {
        self.fluid.begin_frame(uniforms);
    }

    fn splat_velocity(&mut self, splats: &[Splat<Vec2>]) {
        self.fluid.splat_velocity(splats);
    }

    fn splat_dye(&mut self, splats: &[Splat<Vec3>]) {
        self.fluid.splat_dye(splats);
    }

    fn advect_velocity(&mut self) {
        self.fluid.advect_velocity();
    }

    fn advect_dye(&mut self) {
        self.fluid.advect_dye();
    }

    fn divergence(&mut self) {
        self.fluid.divergence();
    }

    fn scale_pressure(&mut self, factor: f32) {
        self.fluid.scale_pressure(factor);
    }

    fn pressure_relax(&mut self) {
        self.fluid.pressure_relax();
    }

    fn subtract_gradient(&mut self) {
        self.fluid.subtract_gradient();
    }

    fn composite(&mut self) -> Result<(), FluidError> {
        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.fluid.device, &self.surface_config);
                return Err(FluidError::SurfaceLost);
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                return Err(FluidError::SurfaceUnavailable("out of memory".to_string()));
            }
            Err(err) => {
                log::debug!("Skipping composite: {err:?}");
                return Err(FluidError::SurfaceLost);
            }
        };
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group = &self.composite.bind_groups[self.fluid.fields.dye.read_index()];
        {
            let encoder = frame_encoder(&self.fluid.device, &mut self.fluid.encoder);
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Composite Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(&self.composite.pipeline);
            render_pass.set_bind_group(0, bind_group, &[]);
            render_pass.draw(0..3, 0..1); // Full-screen triangle
        }

        self.output = Some(output);
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), FluidError> {
        let submitted = self.fluid.end_frame();
        if let Some(output) = self.output.take() {
            output.present();
        }
        submitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_layouts_match_shader_structs() {
        assert_eq!(std::mem::size_of::<FluidParams>(), 48);
        assert_eq!(std::mem::size_of::<GpuSplat>(), 32);
    }

    #[test]
    fn workgroups_cover_partial_tiles() {
        assert_eq!(workgroups(GridSize::new(512, 341)), (32, 22));
        assert_eq!(workgroups(GridSize::new(16, 1)), (1, 1));
    }

    #[test]
    fn limits_follow_buffer_binding_size() {
        let limits = grid_limits(&wgpu::Limits::default());
        assert_eq!(limits.max_cells, (128 << 20) / 16);
        assert!(limits.max_dimension >= 8192);
        assert!(limits.check(GridSize::new(1024, 1024)).is_ok());
        assert!(limits.check(GridSize::new(4096, 4096)).is_err());
    }
}
