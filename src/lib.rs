//! GPU-resident stable-fluids dye simulation.
//!
//! [`Scheduler`] drives a [`FluidBackend`] through one fixed pass sequence
//! per display frame. [`GpuFluid`] runs the passes as wgpu compute
//! dispatches and [`GpuBackend`] presents them to a window; [`CpuBackend`]
//! runs the same kernels on the host.

pub mod compositor;
pub mod config;
pub mod cpu;
pub mod error;
pub mod field_store;
pub mod gpu;
pub mod grid;
pub mod interaction;
pub mod passes;
pub mod resolution;
pub mod scheduler;

pub use config::{FluidSettings, InteractionSettings};
pub use cpu::CpuBackend;
pub use error::FluidError;
pub use gpu::{GpuBackend, GpuFluid};
pub use interaction::{Impulse, InteractionAdapter, PointerId};
pub use resolution::{DeviceClass, GridDims, GridLimits, GridSize, ResolutionPolicy, Viewport};
pub use scheduler::{FluidBackend, FrameReport, Scheduler, SchedulerState};
