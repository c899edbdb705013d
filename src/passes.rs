//! Grid-transform kernels. Each reads from borrowed input grids and writes
//! every cell of its output grid; none keeps state between calls.
//!
//! Velocity is measured in simulation cells per second. The divergence,
//! Jacobi and gradient stencils use one-cell offsets (h = 1).

use glam::Vec2;

use crate::grid::{FieldValue, Grid};

/// Semi-Lagrangian advection of `source` through `velocity`:
/// `out(x) = dissipation * source(x - dt * V(x) * simTexel)`.
///
/// `velocity` may be coarser than `source`; it is sampled bilinearly at each
/// output cell center.
pub fn advect<T: FieldValue>(
    velocity: &Grid<Vec2>,
    source: &Grid<T>,
    out: &mut Grid<T>,
    dt: f32,
    dissipation: f32,
) {
    assert_eq!(source.size(), out.size());

    let (sw, sh) = (source.width() as f32, source.height() as f32);
    let (vw, vh) = (velocity.width() as f32, velocity.height() as f32);
    // source cells per velocity cell
    let to_source = Vec2::new(sw / vw, sh / vh);
    let to_velocity = Vec2::new(vw / sw, vh / sh);

    for j in 0..out.height() {
        for i in 0..out.width() {
            let vx = (i as f32 + 0.5) * to_velocity.x - 0.5;
            let vy = (j as f32 + 0.5) * to_velocity.y - 0.5;
            let v = velocity.sample_cell(vx, vy);

            let back = v * dt * to_source;
            let value = source.sample_cell(i as f32 - back.x, j as f32 - back.y);
            out.set(i, j, value * dissipation);
        }
    }
}

/// Central-difference divergence with edge clamping.
pub fn divergence(velocity: &Grid<Vec2>, out: &mut Grid<f32>) {
    assert_eq!(velocity.size(), out.size());

    for j in 0..out.height() {
        for i in 0..out.width() {
            let (x, y) = (i as isize, j as isize);
            let l = velocity.clamped(x - 1, y).x;
            let r = velocity.clamped(x + 1, y).x;
            let b = velocity.clamped(x, y - 1).y;
            let t = velocity.clamped(x, y + 1).y;
            out.set(i, j, 0.5 * ((r - l) + (t - b)));
        }
    }
}

/// One Jacobi iteration of `lap(p) = div`.
pub fn pressure_relax(pressure: &Grid<f32>, divergence: &Grid<f32>, out: &mut Grid<f32>) {
    assert_eq!(pressure.size(), out.size());
    assert_eq!(divergence.size(), out.size());

    for j in 0..out.height() {
        for i in 0..out.width() {
            let (x, y) = (i as isize, j as isize);
            let sum = pressure.clamped(x - 1, y)
                + pressure.clamped(x + 1, y)
                + pressure.clamped(x, y - 1)
                + pressure.clamped(x, y + 1);
            out.set(i, j, (sum - divergence.at(i, j)) * 0.25);
        }
    }
}

/// `out = velocity - grad(p)`, central differences.
pub fn subtract_gradient(pressure: &Grid<f32>, velocity: &Grid<Vec2>, out: &mut Grid<Vec2>) {
    assert_eq!(pressure.size(), velocity.size());
    assert_eq!(velocity.size(), out.size());

    for j in 0..out.height() {
        for i in 0..out.width() {
            let (x, y) = (i as isize, j as isize);
            let grad = Vec2::new(
                pressure.clamped(x + 1, y) - pressure.clamped(x - 1, y),
                pressure.clamped(x, y + 1) - pressure.clamped(x, y - 1),
            );
            out.set(i, j, velocity.at(i, j) - grad * 0.5);
        }
    }
}

/// One additive Gaussian impulse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Splat<T> {
    /// Normalized injection point.
    pub point: Vec2,
    pub value: T,
    pub radius: f32,
}

/// `out(x) = target(x) + sum(value * exp(-|x - c|^2 / radius))` over `splats`.
pub fn splat<T: FieldValue>(target: &Grid<T>, splats: &[Splat<T>], out: &mut Grid<T>) {
    assert_eq!(target.size(), out.size());

    for j in 0..out.height() {
        for i in 0..out.width() {
            let uv = target.cell_center(i, j);
            let mut value = target.at(i, j);
            for s in splats {
                let d = uv - s.point;
                value = value + s.value * (-d.length_squared() / s.radius).exp();
            }
            out.set(i, j, value);
        }
    }
}

/// `out = source * factor`.
pub fn scale<T: FieldValue>(source: &Grid<T>, factor: f32, out: &mut Grid<T>) {
    assert_eq!(source.size(), out.size());

    for (dst, &src) in out.cells_mut().iter_mut().zip(source.cells()) {
        *dst = src * factor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::GridSize;
    use approx::assert_abs_diff_eq;
    use glam::Vec3;

    const SIZE: GridSize = GridSize::new(24, 16);

    fn blob() -> Grid<Vec3> {
        Grid::from_fn(SIZE, |i, j| {
            Vec3::new(i as f32 * 0.1, j as f32 * 0.2, ((i * j) % 7) as f32)
        })
    }

    #[test]
    fn advect_without_flow_is_identity() {
        let velocity = Grid::new(SIZE);
        let source = blob();
        let mut out = Grid::new(SIZE);
        advect(&velocity, &source, &mut out, 0.033, 1.0);
        assert_eq!(out, source);
    }

    #[test]
    fn advect_without_flow_decays() {
        let velocity = Grid::new(GridSize::new(6, 4));
        let source = blob();
        let mut out = Grid::new(SIZE);
        advect(&velocity, &source, &mut out, 0.016, 0.9);
        for (o, s) in out.cells().iter().zip(source.cells()) {
            assert_eq!(*o, *s * 0.9);
        }
    }

    #[test]
    fn advect_moves_along_flow() {
        // 1 cell per 0.5 s to the right.
        let velocity = Grid::from_fn(SIZE, |_, _| Vec2::new(2.0, 0.0));
        let source = Grid::from_fn(SIZE, |i, _| if i == 5 { 1.0f32 } else { 0.0 });
        let mut out = Grid::new(SIZE);
        advect(&velocity, &source, &mut out, 0.5, 1.0);
        assert_abs_diff_eq!(out.at(6, 3), 1.0);
        assert_abs_diff_eq!(out.at(5, 3), 0.0);
    }

    #[test]
    fn advect_trace_clamps_at_edge() {
        let velocity = Grid::from_fn(SIZE, |_, _| Vec2::new(1000.0, 0.0));
        let source = Grid::from_fn(SIZE, |i, _| i as f32);
        let mut out = Grid::new(SIZE);
        advect(&velocity, &source, &mut out, 0.033, 1.0);
        // Every trace lands far past the left edge and picks up column 0.
        assert!(out.cells().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn rotation_has_no_interior_divergence() {
        let (cx, cy) = (SIZE.width as f32 * 0.5, SIZE.height as f32 * 0.5);
        let velocity = Grid::from_fn(SIZE, |i, j| Vec2::new(-(j as f32 - cy), i as f32 - cx));
        let mut div = Grid::new(SIZE);
        divergence(&velocity, &mut div);
        for j in 1..SIZE.height as usize - 1 {
            for i in 1..SIZE.width as usize - 1 {
                assert_abs_diff_eq!(div.at(i, j), 0.0, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn expansion_has_unit_divergence() {
        let velocity = Grid::from_fn(SIZE, |i, j| Vec2::new(i as f32, j as f32) * 0.5);
        let mut div = Grid::new(SIZE);
        divergence(&velocity, &mut div);
        assert_abs_diff_eq!(div.at(5, 5), 1.0);
    }

    #[test]
    fn jacobi_fixed_point_is_left_unchanged() {
        // Constant pressure with zero divergence is already a solution.
        let pressure = Grid::from_fn(SIZE, |_, _| 3.0f32);
        let div = Grid::new(SIZE);
        let mut out = Grid::new(SIZE);
        pressure_relax(&pressure, &div, &mut out);
        assert_eq!(out, pressure);
    }

    #[test]
    fn jacobi_single_step_stencil() {
        let pressure = Grid::from_fn(SIZE, |i, j| (i + 2 * j) as f32);
        let div = Grid::from_fn(SIZE, |_, _| 4.0f32);
        let mut out = Grid::new(SIZE);
        pressure_relax(&pressure, &div, &mut out);
        // Linear field: neighbour average equals the center value.
        assert_abs_diff_eq!(out.at(3, 3), pressure.at(3, 3) - 1.0);
    }

    #[test]
    fn gradient_of_linear_pressure_is_removed() {
        let pressure = Grid::from_fn(SIZE, |i, _| i as f32 * 2.0);
        let velocity = Grid::from_fn(SIZE, |_, _| Vec2::new(5.0, 1.0));
        let mut out = Grid::new(SIZE);
        subtract_gradient(&pressure, &velocity, &mut out);
        let v = out.at(4, 4);
        assert_abs_diff_eq!(v.x, 3.0);
        assert_abs_diff_eq!(v.y, 1.0);
    }

    #[test]
    fn splat_peaks_at_point() {
        let target = Grid::new(SIZE);
        let mut out = Grid::new(SIZE);
        let s = Splat {
            point: target.cell_center(12, 8),
            value: 2.0f32,
            radius: 0.01,
        };
        splat(&target, &[s], &mut out);
        assert_abs_diff_eq!(out.at(12, 8), 2.0);
        assert!(out.at(13, 8) < 2.0);
        assert!(out.at(0, 0) < 1e-3);
    }

    #[test]
    fn splats_accumulate() {
        let target = Grid::from_fn(SIZE, |i, j| Vec2::new(i as f32, j as f32));
        let point = Vec2::new(0.3, 0.6);
        let a = Splat { point, value: Vec2::new(1.0, -2.0), radius: 0.05 };
        let b = Splat { point, value: Vec2::new(0.5, 4.0), radius: 0.05 };
        let combined = Splat { point, value: a.value + b.value, radius: 0.05 };

        let mut once = Grid::new(SIZE);
        let mut twice = Grid::new(SIZE);
        splat(&target, &[a], &mut once);
        splat(&once, &[b], &mut twice);

        let mut merged = Grid::new(SIZE);
        splat(&target, &[combined], &mut merged);

        for (x, y) in twice.cells().iter().zip(merged.cells()) {
            assert_abs_diff_eq!(x.x, y.x, epsilon = 1e-4);
            assert_abs_diff_eq!(x.y, y.y, epsilon = 1e-4);
        }
    }

    #[test]
    fn zero_splat_leaves_field_unchanged() {
        let target = Grid::from_fn(SIZE, |i, j| Vec2::new(i as f32, -(j as f32)));
        let mut out = Grid::new(SIZE);
        let s = Splat {
            point: Vec2::new(0.5, 0.5),
            value: Vec2::ZERO,
            radius: 0.02,
        };
        splat(&target, &[s], &mut out);
        assert_eq!(out, target);
    }

    #[test]
    fn scale_multiplies_every_cell() {
        let source = Grid::from_fn(SIZE, |i, _| i as f32);
        let mut out = Grid::new(SIZE);
        scale(&source, 0.5, &mut out);
        assert_eq!(out.at(10, 2), 5.0);
    }
}
