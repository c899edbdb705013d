use std::ops::{Add, Mul, Sub};

use glam::{Vec2, Vec3};

use crate::resolution::GridSize;

/// Values a grid cell can hold: scalars (pressure, divergence), 2D vectors
/// (velocity) and RGB colors (dye).
pub trait FieldValue:
    Copy
    + Default
    + PartialEq
    + std::fmt::Debug
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<f32, Output = Self>
{
}

impl FieldValue for f32 {}
impl FieldValue for Vec2 {}
impl FieldValue for Vec3 {}

/// A 2D array of cells stored row-major with row 0 at the bottom edge.
///
/// Normalized coordinate (0,0) is the bottom-left corner of cell (0,0) and
/// (1,1) the top-right corner of the last cell, so cell (i,j) is centered at
/// `((i + 0.5) / width, (j + 0.5) / height)`. Reads outside the grid clamp to
/// the nearest edge cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    size: GridSize,
    cells: Vec<T>,
}

impl<T: FieldValue> Grid<T> {
    pub fn new(size: GridSize) -> Self {
        Self {
            size,
            cells: vec![T::default(); size.cell_count()],
        }
    }

    pub fn from_fn(size: GridSize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut cells = Vec::with_capacity(size.cell_count());
        for j in 0..size.height as usize {
            for i in 0..size.width as usize {
                cells.push(f(i, j));
            }
        }
        Self { size, cells }
    }

    pub fn size(&self) -> GridSize {
        self.size
    }

    pub fn width(&self) -> usize {
        self.size.width as usize
    }

    pub fn height(&self) -> usize {
        self.size.height as usize
    }

    pub fn texel_size(&self) -> Vec2 {
        Vec2::from(self.size.texel_size())
    }

    pub fn cells(&self) -> &[T] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [T] {
        &mut self.cells
    }

    pub fn fill(&mut self, value: T) {
        self.cells.fill(value);
    }

    #[inline]
    fn index(&self, i: usize, j: usize) -> usize {
        j * self.width() + i
    }

    #[inline]
    pub fn at(&self, i: usize, j: usize) -> T {
        self.cells[self.index(i, j)]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: T) {
        let idx = self.index(i, j);
        self.cells[idx] = value;
    }

    /// Cell read with edge clamping for out-of-range indices.
    #[inline]
    pub fn clamped(&self, i: isize, j: isize) -> T {
        let i = i.clamp(0, self.width() as isize - 1) as usize;
        let j = j.clamp(0, self.height() as isize - 1) as usize;
        self.at(i, j)
    }

    /// Normalized coordinate of the center of cell (i, j).
    pub fn cell_center(&self, i: usize, j: usize) -> Vec2 {
        Vec2::new(
            (i as f32 + 0.5) / self.width() as f32,
            (j as f32 + 0.5) / self.height() as f32,
        )
    }

    /// Bilinear sample in cell-index space: (i, j) as floats land exactly on
    /// cell (i, j).
    pub fn sample_cell(&self, x: f32, y: f32) -> T {
        let max_x = (self.width() - 1) as f32;
        let max_y = (self.height() - 1) as f32;
        let x = if x.is_nan() { 0.0 } else { x.clamp(0.0, max_x) };
        let y = if y.is_nan() { 0.0 } else { y.clamp(0.0, max_y) };

        let i0 = x.floor() as usize;
        let j0 = y.floor() as usize;
        let i1 = (i0 + 1).min(self.width() - 1);
        let j1 = (j0 + 1).min(self.height() - 1);

        let s = x - i0 as f32;
        let t = y - j0 as f32;

        let bottom = self.at(i0, j0) * (1.0 - s) + self.at(i1, j0) * s;
        let top = self.at(i0, j1) * (1.0 - s) + self.at(i1, j1) * s;
        bottom * (1.0 - t) + top * t
    }

    /// Bilinear sample at a normalized coordinate.
    pub fn sample(&self, uv: Vec2) -> T {
        self.sample_cell(
            uv.x * self.width() as f32 - 0.5,
            uv.y * self.height() as f32 - 0.5,
        )
    }
}

impl Grid<f32> {
    pub fn sum_of_squares(&self) -> f64 {
        self.cells.iter().map(|&v| (v as f64) * (v as f64)).sum()
    }
}
