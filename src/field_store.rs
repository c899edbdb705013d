//! Double-buffered field storage.
//!
//! Every pass reads from the `read` slot and writes into the `write` slot;
//! `swap` then promotes the freshly written buffer. `split` hands out the two
//! slots as disjoint borrows, so a pass can never read and write the same
//! buffer.

use glam::{Vec2, Vec3};

use crate::grid::{FieldValue, Grid};
use crate::resolution::{GridDims, GridSize};

/// An owned pair of same-shaped buffers plus the index of the current read
/// slot.
#[derive(Debug, Clone)]
pub struct PingPong<T> {
    slots: [T; 2],
    read: usize,
}

impl<T> PingPong<T> {
    pub fn new(a: T, b: T) -> Self {
        Self {
            slots: [a, b],
            read: 0,
        }
    }

    /// Slot index currently holding the latest state.
    pub fn read_index(&self) -> usize {
        self.read
    }

    pub fn write_index(&self) -> usize {
        1 - self.read
    }

    pub fn read(&self) -> &T {
        &self.slots[self.read]
    }

    pub fn read_mut(&mut self) -> &mut T {
        &mut self.slots[self.read]
    }

    pub fn write(&self) -> &T {
        &self.slots[1 - self.read]
    }

    /// `(read, write)` as non-aliasing borrows.
    pub fn split(&mut self) -> (&T, &mut T) {
        let (a, b) = self.slots.split_at_mut(1);
        if self.read == 0 {
            (&a[0], &mut b[0])
        } else {
            (&b[0], &mut a[0])
        }
    }

    pub fn swap(&mut self) {
        self.read = 1 - self.read;
    }

    pub fn slots(&self) -> &[T; 2] {
        &self.slots
    }
}

impl<T: FieldValue> PingPong<Grid<T>> {
    pub fn with_size(size: GridSize) -> Self {
        Self::new(Grid::new(size), Grid::new(size))
    }

    pub fn size(&self) -> GridSize {
        self.read().size()
    }
}

/// Exclusive owner of every simulation buffer.
#[derive(Debug, Clone)]
pub struct FieldStore {
    pub velocity: PingPong<Grid<Vec2>>,
    pub dye: PingPong<Grid<Vec3>>,
    pub pressure: PingPong<Grid<f32>>,
    pub divergence: Grid<f32>,
}

impl FieldStore {
    pub fn new(dims: GridDims) -> Self {
        log::info!(
            "Allocating fields: sim {}x{}, dye {}x{}",
            dims.sim.width,
            dims.sim.height,
            dims.dye.width,
            dims.dye.height
        );
        Self {
            velocity: PingPong::with_size(dims.sim),
            dye: PingPong::with_size(dims.dye),
            pressure: PingPong::with_size(dims.sim),
            divergence: Grid::new(dims.sim),
        }
    }

    pub fn dims(&self) -> GridDims {
        GridDims {
            sim: self.velocity.size(),
            dye: self.dye.size(),
        }
    }
}
