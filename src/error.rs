use crate::resolution::{GridLimits, GridSize};

/// Failures the fluid core reports to its host.
#[derive(Debug)]
pub enum FluidError {
    /// No compatible rendering context. Fatal to the fluid subsystem only.
    SurfaceUnavailable(String),
    /// Requested grid exceeds what the device (or configured limit) allows.
    /// The previous allocation is left untouched.
    GridTooLarge { requested: GridSize, limits: GridLimits },
    /// The surface texture could not be acquired this frame.
    SurfaceLost,
    /// Mapping a GPU buffer back to the host failed.
    Readback(String),
}

impl std::fmt::Display for FluidError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FluidError::SurfaceUnavailable(reason) => {
                write!(f, "rendering surface unavailable: {}", reason)
            }
            FluidError::GridTooLarge { requested, limits } => write!(
                f,
                "grid {}x{} exceeds device limits ({} per axis, {} cells)",
                requested.width, requested.height, limits.max_dimension, limits.max_cells
            ),
            FluidError::SurfaceLost => write!(f, "surface lost"),
            FluidError::Readback(reason) => write!(f, "buffer readback failed: {}", reason),
        }
    }
}

impl std::error::Error for FluidError {}
