use crema::grid::Grid;
use crema::passes;
use crema::resolution::GridSize;
use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const N: u32 = 64;

/// Sum of a few Gaussian velocity bumps, kept away from the walls.
fn smooth_random_field(seed: u64) -> Grid<Vec2> {
    let mut rng = StdRng::seed_from_u64(seed);
    let bumps: Vec<(Vec2, Vec2, f32)> = (0..4)
        .map(|_| {
            let center = Vec2::new(rng.gen_range(24.0..40.0), rng.gen_range(24.0..40.0));
            let amplitude = Vec2::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
            let sigma = rng.gen_range(3.0..5.0);
            (center, amplitude, sigma)
        })
        .collect();

    Grid::from_fn(GridSize::new(N, N), |i, j| {
        let p = Vec2::new(i as f32, j as f32);
        bumps.iter().fold(Vec2::ZERO, |acc, &(center, amplitude, sigma)| {
            let d2 = (p - center).length_squared();
            acc + amplitude * (-d2 / (2.0 * sigma * sigma)).exp()
        })
    })
}

fn divergence_of(velocity: &Grid<Vec2>) -> Grid<f32> {
    let mut div = Grid::new(velocity.size());
    passes::divergence(velocity, &mut div);
    div
}

/// Divergence, `iterations` Jacobi sweeps from zero pressure, then gradient
/// subtraction.
fn project(velocity: &Grid<Vec2>, iterations: u32) -> Grid<Vec2> {
    let size = velocity.size();
    let div = divergence_of(velocity);

    let mut pressure = Grid::new(size);
    let mut scratch = Grid::new(size);
    for _ in 0..iterations {
        passes::pressure_relax(&pressure, &div, &mut scratch);
        std::mem::swap(&mut pressure, &mut scratch);
    }

    let mut out = Grid::new(size);
    passes::subtract_gradient(&pressure, velocity, &mut out);
    out
}

#[test]
fn projection_reduces_divergence() {
    for seed in 0..4 {
        let velocity = smooth_random_field(seed);
        let before = divergence_of(&velocity).sum_of_squares();
        let after = divergence_of(&project(&velocity, 20)).sum_of_squares();
        assert!(before > 0.0);
        assert!(after < before, "seed {seed}: {after} >= {before}");
    }
}

#[test]
fn more_iterations_remove_more_divergence() {
    let velocity = smooth_random_field(7);
    let coarse = divergence_of(&project(&velocity, 4)).sum_of_squares();
    let fine = divergence_of(&project(&velocity, 40)).sum_of_squares();
    assert!(fine < coarse, "{fine} >= {coarse}");
}

#[test]
fn zero_iterations_leave_velocity_unchanged() {
    let velocity = smooth_random_field(3);
    assert_eq!(project(&velocity, 0), velocity);
}

#[test]
fn uniform_flow_is_already_divergence_free() {
    let velocity = Grid::from_fn(GridSize::new(N, N), |_, _| Vec2::new(3.0, -1.5));
    assert_eq!(divergence_of(&velocity).sum_of_squares(), 0.0);
    assert_eq!(project(&velocity, 20), velocity);
}
