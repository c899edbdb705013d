//! Host-memory backend built on [`FieldStore`] and the [`passes`] kernels.
//!
//! Deterministic and adapter-free; used by tests and `crema_headless`.

use glam::{Vec2, Vec3};

use crate::compositor::{self, Frame};
use crate::error::FluidError;
use crate::field_store::FieldStore;
use crate::passes::{self, Splat};
use crate::resolution::{GridDims, GridLimits, GridSize};
use crate::scheduler::{FluidBackend, FrameUniforms};

pub struct CpuBackend {
    store: FieldStore,
    limits: GridLimits,
    uniforms: FrameUniforms,
    output_size: Option<GridSize>,
    frame: Frame,
}

impl CpuBackend {
    pub fn new(dims: GridDims, limits: GridLimits) -> Result<Self, FluidError> {
        limits.check_dims(dims)?;
        Ok(Self {
            store: FieldStore::new(dims),
            limits,
            uniforms: FrameUniforms {
                dt: 0.0,
                velocity_dissipation: 1.0,
                dye_dissipation: 1.0,
            },
            output_size: None,
            frame: Frame::new(dims.dye.width, dims.dye.height),
        })
    }

    /// Composite into a frame of this size instead of the dye resolution.
    pub fn with_output_size(mut self, size: GridSize) -> Self {
        self.output_size = Some(size);
        self.frame = Frame::new(size.width, size.height);
        self
    }

    pub fn store(&self) -> &FieldStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut FieldStore {
        &mut self.store
    }

    /// Output of the most recent composite.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    fn output_size(&self) -> GridSize {
        self.output_size.unwrap_or(self.store.dims().dye)
    }
}

impl FluidBackend for CpuBackend {
    fn dims(&self) -> GridDims {
        self.store.dims()
    }

    fn reallocate(&mut self, dims: GridDims) -> Result<(), FluidError> {
        self.limits.check_dims(dims)?;
        self.store = FieldStore::new(dims);
        let out = self.output_size();
        self.frame = Frame::new(out.width, out.height);
        Ok(())
    }

    fn begin_frame(&mut self, uniforms: &FrameUniforms) {
        self.uniforms = *uniforms;
    }

    fn splat_velocity(&mut self, splats: &[Splat<Vec2>]) {
        let (read, write) = self.store.velocity.split();
        passes::splat(read, splats, write);
        self.store.velocity.swap();
    }

    fn splat_dye(&mut self, splats: &[Splat<Vec3>]) {
        let (read, write) = self.store.dye.split();
        passes::splat(read, splats, write);
        self.store.dye.swap();
    }

    fn advect_velocity(&mut self) {
        let FrameUniforms { dt, velocity_dissipation, .. } = self.uniforms;
        let (read, write) = self.store.velocity.split();
        passes::advect(read, read, write, dt, velocity_dissipation);
        self.store.velocity.swap();
    }

    fn advect_dye(&mut self) {
        let FrameUniforms { dt, dye_dissipation, .. } = self.uniforms;
        let velocity = self.store.velocity.read();
        let (read, write) = self.store.dye.split();
        passes::advect(velocity, read, write, dt, dye_dissipation);
        self.store.dye.swap();
    }

    fn divergence(&mut self) {
        passes::divergence(self.store.velocity.read(), &mut self.store.divergence);
    }

    fn scale_pressure(&mut self, factor: f32) {
        let (read, write) = self.store.pressure.split();
        passes::scale(read, factor, write);
        self.store.pressure.swap();
    }

    fn pressure_relax(&mut self) {
        let (read, write) = self.store.pressure.split();
        passes::pressure_relax(read, &self.store.divergence, write);
        self.store.pressure.swap();
    }

    fn subtract_gradient(&mut self) {
        let pressure = self.store.pressure.read();
        let (read, write) = self.store.velocity.split();
        passes::subtract_gradient(pressure, read, write);
        self.store.velocity.swap();
    }

    fn composite(&mut self) -> Result<(), FluidError> {
        compositor::composite(self.store.dye.read(), &mut self.frame);
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), FluidError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> GridDims {
        GridDims {
            sim: GridSize::new(32, 32),
            dye: GridSize::new(64, 64),
        }
    }

    #[test]
    fn rejects_grids_over_limit() {
        let limits = GridLimits {
            max_dimension: 48,
            max_cells: u64::MAX,
        };
        assert!(CpuBackend::new(dims(), limits).is_err());
    }

    #[test]
    fn failed_reallocate_keeps_fields() {
        let limits = GridLimits {
            max_dimension: 64,
            max_cells: u64::MAX,
        };
        let mut backend = CpuBackend::new(dims(), limits).unwrap();
        backend.store_mut().dye.read_mut().fill(Vec3::ONE);

        let too_big = GridDims {
            sim: GridSize::new(32, 32),
            dye: GridSize::new(128, 128),
        };
        assert!(backend.reallocate(too_big).is_err());
        assert_eq!(backend.dims(), dims());
        assert_eq!(backend.store().dye.read().at(3, 3), Vec3::ONE);
    }

    #[test]
    fn reallocate_discards_content() {
        let mut backend = CpuBackend::new(dims(), GridLimits::default()).unwrap();
        backend.store_mut().dye.read_mut().fill(Vec3::ONE);
        let bigger = GridDims {
            sim: GridSize::new(48, 40),
            dye: GridSize::new(96, 80),
        };
        backend.reallocate(bigger).unwrap();
        assert_eq!(backend.dims(), bigger);
        assert!(backend.store().dye.read().cells().iter().all(|c| *c == Vec3::ZERO));
        assert_eq!(backend.frame().width(), 96);
    }

    #[test]
    fn each_pass_swaps_its_field() {
        let mut backend = CpuBackend::new(dims(), GridLimits::default()).unwrap();
        let v0 = backend.store().velocity.read_index();
        let p0 = backend.store().pressure.read_index();
        backend.advect_velocity();
        backend.subtract_gradient();
        assert_eq!(backend.store().velocity.read_index(), v0);
        backend.pressure_relax();
        assert_ne!(backend.store().pressure.read_index(), p0);
    }
}
