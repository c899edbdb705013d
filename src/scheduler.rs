//! Per-frame pass ordering.
//!
//! One call to [`Scheduler::frame`] runs, in this order: queued splats,
//! Advect(velocity), Advect(dye), Divergence, PressureRelax x K,
//! GradientSubtract, Composite. Each step completes before the next starts.

use std::collections::VecDeque;
use std::time::Instant;

use glam::{Vec2, Vec3};

use crate::config::FluidSettings;
use crate::error::FluidError;
use crate::interaction::Impulse;
use crate::passes::Splat;
use crate::resolution::{DeviceClass, GridDims, Viewport};

/// Per-frame constants shared by every pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameUniforms {
    pub dt: f32,
    pub velocity_dissipation: f32,
    pub dye_dissipation: f32,
}

/// A field store plus the kernels that transform it.
///
/// Every method after `begin_frame` reads the current `read` buffers and
/// leaves its result as the new `read` buffer.
pub trait FluidBackend {
    fn dims(&self) -> GridDims;

    /// Replace every field with zeroed buffers of `dims`. On error the
    /// previous allocation must be left intact.
    fn reallocate(&mut self, dims: GridDims) -> Result<(), FluidError>;

    fn begin_frame(&mut self, uniforms: &FrameUniforms);
    fn splat_velocity(&mut self, splats: &[Splat<Vec2>]);
    fn splat_dye(&mut self, splats: &[Splat<Vec3>]);
    fn advect_velocity(&mut self);
    /// Traces through the velocity left by `advect_velocity`.
    fn advect_dye(&mut self);
    fn divergence(&mut self);
    fn scale_pressure(&mut self, factor: f32);
    /// One Jacobi iteration.
    fn pressure_relax(&mut self);
    fn subtract_gradient(&mut self);
    fn composite(&mut self) -> Result<(), FluidError>;
    fn end_frame(&mut self) -> Result<(), FluidError>;
}

/// Clamped frame timestep: `dt = clamp(now - last, 0, max_dt)` seconds.
#[derive(Debug, Clone)]
pub struct FrameClock {
    last: Instant,
    max_dt: f32,
}

impl FrameClock {
    pub fn new(start: Instant, max_dt: f32) -> Self {
        Self { last: start, max_dt }
    }

    pub fn tick(&mut self, now: Instant) -> f32 {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f32();
        if now > self.last {
            self.last = now;
        }
        elapsed.clamp(0.0, self.max_dt)
    }
}

/// FIFO of pending splats, drained once per frame boundary.
#[derive(Debug, Clone, Default)]
pub struct SplatQueue {
    velocity: VecDeque<Splat<Vec2>>,
    dye: VecDeque<Splat<Vec3>>,
}

impl SplatQueue {
    pub fn push(&mut self, impulse: Impulse) {
        self.velocity.push_back(impulse.velocity);
        self.dye.push_back(impulse.dye);
    }

    pub fn push_velocity(&mut self, splat: Splat<Vec2>) {
        self.velocity.push_back(splat);
    }

    pub fn push_dye(&mut self, splat: Splat<Vec3>) {
        self.dye.push_back(splat);
    }

    pub fn len(&self) -> usize {
        self.velocity.len() + self.dye.len()
    }

    pub fn is_empty(&self) -> bool {
        self.velocity.is_empty() && self.dye.is_empty()
    }

    /// Oldest `max` splats of each field; the remainder stays queued.
    pub fn drain(&mut self, max: usize) -> (Vec<Splat<Vec2>>, Vec<Splat<Vec3>>) {
        let nv = self.velocity.len().min(max);
        let nd = self.dye.len().min(max);
        (
            self.velocity.drain(..nv).collect(),
            self.dye.drain(..nd).collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    pub index: u64,
    pub dt: f32,
    pub splats_applied: usize,
    pub resized: bool,
}

pub struct Scheduler<B: FluidBackend> {
    backend: B,
    settings: FluidSettings,
    class: DeviceClass,
    clock: FrameClock,
    queue: SplatQueue,
    pending_resize: Option<Viewport>,
    state: SchedulerState,
    frame_index: u64,
}

impl<B: FluidBackend> Scheduler<B> {
    /// `settings` are sanitized first, so a frame never drains more splats
    /// than a backend's splat buffer holds.
    pub fn new(backend: B, mut settings: FluidSettings, class: DeviceClass, start: Instant) -> Self {
        settings.sanitize();
        let clock = FrameClock::new(start, settings.max_dt);
        Self {
            backend,
            settings,
            class,
            clock,
            queue: SplatQueue::default(),
            pending_resize: None,
            state: SchedulerState::Idle,
            frame_index: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn settings(&self) -> &FluidSettings {
        &self.settings
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn dims(&self) -> GridDims {
        self.backend.dims()
    }

    pub fn pending_splats(&self) -> usize {
        self.queue.len()
    }

    pub fn inject(&mut self, impulse: Impulse) {
        self.queue.push(impulse);
    }

    pub fn inject_velocity(&mut self, splat: Splat<Vec2>) {
        self.queue.push_velocity(splat);
    }

    pub fn inject_dye(&mut self, splat: Splat<Vec3>) {
        self.queue.push_dye(splat);
    }

    /// Recorded now, applied at the start of the next frame. Later requests
    /// replace earlier ones.
    pub fn request_resize(&mut self, viewport: Viewport) {
        self.pending_resize = Some(viewport);
    }

    fn apply_pending_resize(&mut self) -> bool {
        debug_assert_eq!(self.state, SchedulerState::Idle);

        let Some(viewport) = self.pending_resize.take() else {
            return false;
        };
        if viewport.is_empty() {
            log::debug!("Ignoring resize to empty viewport");
            return false;
        }

        let dims = self.settings.resolution.resolve(viewport, self.class);
        if dims == self.backend.dims() {
            return false;
        }

        match self.backend.reallocate(dims) {
            Ok(()) => {
                log::info!(
                    "Resized to {}x{}: sim {}x{}, dye {}x{}",
                    viewport.width,
                    viewport.height,
                    dims.sim.width,
                    dims.sim.height,
                    dims.dye.width,
                    dims.dye.height
                );
                true
            }
            Err(err) => {
                let kept = self.backend.dims();
                log::warn!(
                    "{err}; keeping sim {}x{}, dye {}x{}",
                    kept.sim.width,
                    kept.sim.height,
                    kept.dye.width,
                    kept.dye.height
                );
                false
            }
        }
    }

    /// Runs one full frame. A composite or submit failure is returned after
    /// the frame's work has been handed to the backend; fields keep their
    /// last state and the next call proceeds normally.
    pub fn frame(&mut self, now: Instant) -> Result<FrameReport, FluidError> {
        let resized = self.apply_pending_resize();

        self.state = SchedulerState::Running;
        let dt = self.clock.tick(now);
        let uniforms = FrameUniforms {
            dt,
            velocity_dissipation: self.settings.velocity_dissipation,
            dye_dissipation: self.settings.dye_dissipation,
        };

        self.backend.begin_frame(&uniforms);

        let (velocity_splats, dye_splats) = self.queue.drain(self.settings.max_splats_per_frame);
        if !velocity_splats.is_empty() {
            self.backend.splat_velocity(&velocity_splats);
        }
        if !dye_splats.is_empty() {
            self.backend.splat_dye(&dye_splats);
        }

        self.backend.advect_velocity();
        self.backend.advect_dye();
        self.backend.divergence();
        if self.settings.pressure_retention != 1.0 {
            self.backend.scale_pressure(self.settings.pressure_retention);
        }
        for _ in 0..self.settings.pressure_iterations {
            self.backend.pressure_relax();
        }
        self.backend.subtract_gradient();

        let composited = self.backend.composite();
        let submitted = self.backend.end_frame();

        self.state = SchedulerState::Idle;
        let index = self.frame_index;
        self.frame_index += 1;

        composited?;
        submitted?;

        log::trace!("frame {index}: dt {dt:.4}");
        Ok(FrameReport {
            index,
            dt,
            splats_applied: velocity_splats.len() + dye_splats.len(),
            resized,
        })
    }
}
