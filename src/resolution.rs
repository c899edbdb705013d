//! Grid sizing from viewport and device class.

use serde::{Deserialize, Serialize};

use crate::error::FluidError;

/// Width and height of a grid, in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridSize {
    pub width: u32,
    pub height: u32,
}

impl GridSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// (1/width, 1/height): the spatial step of every finite-difference kernel.
    pub fn texel_size(&self) -> [f32; 2] {
        [1.0 / self.width as f32, 1.0 / self.height as f32]
    }
}

/// Simulation-resolution fields (velocity, pressure, divergence) and
/// display-resolution fields (dye) are sized independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridDims {
    pub sim: GridSize,
    pub dye: GridSize,
}

/// Drawable surface size in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Coarse capability tier, supplied by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceClass {
    #[default]
    Desktop,
    Mobile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionPolicy {
    pub reference_width: f32,
    pub reference_height: f32,
    pub desktop_sim_base: f32,
    pub desktop_dye_base: f32,
    pub mobile_sim_base: f32,
    pub mobile_dye_base: f32,
    pub sim_floor: u32,
    pub dye_floor: u32,
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        Self {
            reference_width: 1200.0,
            reference_height: 800.0,
            desktop_sim_base: 512.0,
            desktop_dye_base: 1024.0,
            mobile_sim_base: 256.0,
            mobile_dye_base: 512.0,
            sim_floor: 32,
            dye_floor: 128,
        }
    }
}

impl ResolutionPolicy {
    /// `max(floor, base * viewport / reference)`, per axis.
    pub fn resolve(&self, viewport: Viewport, class: DeviceClass) -> GridDims {
        let (sim_base, dye_base) = match class {
            DeviceClass::Desktop => (self.desktop_sim_base, self.desktop_dye_base),
            DeviceClass::Mobile => (self.mobile_sim_base, self.mobile_dye_base),
        };

        let sx = viewport.width as f32 / self.reference_width;
        let sy = viewport.height as f32 / self.reference_height;

        GridDims {
            sim: GridSize::new(
                scaled(sim_base, sx, self.sim_floor),
                scaled(sim_base, sy, self.sim_floor),
            ),
            dye: GridSize::new(
                scaled(dye_base, sx, self.dye_floor),
                scaled(dye_base, sy, self.dye_floor),
            ),
        }
    }

    pub fn sanitize(&mut self) {
        self.reference_width = self.reference_width.max(1.0);
        self.reference_height = self.reference_height.max(1.0);
        self.desktop_sim_base = self.desktop_sim_base.clamp(1.0, 8192.0);
        self.desktop_dye_base = self.desktop_dye_base.clamp(1.0, 8192.0);
        self.mobile_sim_base = self.mobile_sim_base.clamp(1.0, 8192.0);
        self.mobile_dye_base = self.mobile_dye_base.clamp(1.0, 8192.0);
        self.sim_floor = self.sim_floor.clamp(1, 4096);
        self.dye_floor = self.dye_floor.clamp(1, 4096);
    }
}

fn scaled(base: f32, factor: f32, floor: u32) -> u32 {
    let value = (base * factor).round();
    if value.is_finite() && value > floor as f32 {
        value as u32
    } else {
        floor
    }
}

/// Largest grid a backend can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLimits {
    pub max_dimension: u32,
    pub max_cells: u64,
}

impl Default for GridLimits {
    fn default() -> Self {
        Self {
            max_dimension: 8192,
            max_cells: 8192 * 8192,
        }
    }
}

impl GridLimits {
    pub fn check(&self, size: GridSize) -> Result<(), FluidError> {
        let fits = size.width >= 1
            && size.height >= 1
            && size.width <= self.max_dimension
            && size.height <= self.max_dimension
            && (size.cell_count() as u64) <= self.max_cells;

        if fits {
            Ok(())
        } else {
            Err(FluidError::GridTooLarge {
                requested: size,
                limits: *self,
            })
        }
    }

    pub fn check_dims(&self, dims: GridDims) -> Result<(), FluidError> {
        self.check(dims.sim)?;
        self.check(dims.dye)
    }
}
