use std::time::{Duration, Instant};

use approx::assert_abs_diff_eq;
use crema::passes::Splat;
use crema::{
    CpuBackend, DeviceClass, FluidBackend, FluidSettings, GridDims, GridLimits, GridSize,
    InteractionAdapter, PointerId, Scheduler, Viewport,
};
use glam::{Vec2, Vec3};

const FRAME: Duration = Duration::from_micros(16_667);
const COLOR: Vec3 = Vec3::new(0.42, 0.28, 0.16);

fn small_settings() -> FluidSettings {
    let mut settings = FluidSettings::default();
    settings.resolution.desktop_sim_base = 32.0;
    settings.resolution.desktop_dye_base = 64.0;
    settings.resolution.sim_floor = 8;
    settings.resolution.dye_floor = 16;
    settings
}

fn dims() -> GridDims {
    GridDims {
        sim: GridSize::new(32, 32),
        dye: GridSize::new(64, 64),
    }
}

fn scheduler_with(limits: GridLimits) -> (Scheduler<CpuBackend>, Instant) {
    let start = Instant::now();
    let backend = CpuBackend::new(dims(), limits).unwrap();
    let scheduler = Scheduler::new(backend, small_settings(), DeviceClass::Desktop, start);
    (scheduler, start)
}

fn dye_centroid(scheduler: &Scheduler<CpuBackend>) -> Vec2 {
    let dye = scheduler.backend().store().dye.read();
    let mut weighted = Vec2::ZERO;
    let mut total = 0.0;
    for j in 0..dye.height() {
        for i in 0..dye.width() {
            let w = dye.at(i, j).x;
            weighted += dye.cell_center(i, j) * w;
            total += w;
        }
    }
    weighted / total
}

#[test]
fn dye_splat_shows_up_in_composited_frame() {
    let (mut scheduler, start) = scheduler_with(GridLimits::default());
    scheduler.inject_dye(Splat {
        point: Vec2::splat(0.5),
        value: COLOR,
        radius: 0.055,
    });

    let report = scheduler.frame(start + FRAME).unwrap();
    assert_eq!(report.splats_applied, 1);

    let frame = scheduler.backend().frame();
    let center = frame.pixel_at(Vec2::splat(0.5));
    let corner = frame.pixel_at(Vec2::splat(0.05));
    assert!(center.distance(COLOR) < corner.distance(COLOR));
    assert_abs_diff_eq!(center.x, COLOR.x * 0.97, epsilon = 0.01);
}

#[test]
fn zero_dt_frame_only_dissipates() {
    let (mut scheduler, start) = scheduler_with(GridLimits::default());
    scheduler.inject_dye(Splat {
        point: Vec2::new(0.3, 0.6),
        value: Vec3::ONE,
        radius: 0.01,
    });
    scheduler.frame(start + FRAME).unwrap();
    let before = scheduler.backend().store().dye.read().clone();

    // Same timestamp again: dt = 0.
    let report = scheduler.frame(start + FRAME).unwrap();
    assert_eq!(report.dt, 0.0);

    let after = scheduler.backend().store().dye.read();
    for (a, b) in after.cells().iter().zip(before.cells()) {
        assert_abs_diff_eq!(a.x, b.x * 0.97, epsilon = 1e-6);
    }
}

#[test]
fn velocity_impulse_carries_dye_downstream() {
    let (mut scheduler, start) = scheduler_with(GridLimits::default());
    scheduler.inject_dye(Splat {
        point: Vec2::splat(0.5),
        value: Vec3::ONE,
        radius: 0.002,
    });
    scheduler.frame(start + FRAME).unwrap();
    let initial = dye_centroid(&scheduler);

    for k in 2..12u32 {
        scheduler.inject_velocity(Splat {
            point: Vec2::splat(0.5),
            value: Vec2::new(30.0, 0.0),
            radius: 0.01,
        });
        scheduler.frame(start + FRAME * k).unwrap();
    }

    let moved = dye_centroid(&scheduler);
    assert!(moved.x > initial.x + 0.5 / 64.0, "{initial} -> {moved}");
    assert_abs_diff_eq!(moved.y, initial.y, epsilon = 0.02);
}

#[test]
fn pointer_drag_paints_along_its_path() {
    let (mut scheduler, start) = scheduler_with(GridLimits::default());
    let mut interaction =
        InteractionAdapter::new(scheduler.settings().interaction.clone(), Viewport::new(640, 640));

    for k in 0..8u32 {
        let x = 160.0 + 40.0 * k as f32;
        if let Some(impulse) = interaction.pointer_moved(PointerId::Mouse, x, 320.0) {
            scheduler.inject(impulse);
        }
        let report = scheduler.frame(start + FRAME * (k + 1)).unwrap();
        assert_eq!(report.splats_applied, 2);
    }

    let dye = scheduler.backend().store().dye.read();
    assert!(dye.sample(Vec2::new(0.5, 0.5)).x > 0.05);
    assert!(dye.sample(Vec2::new(0.5, 0.05)).x < dye.sample(Vec2::new(0.5, 0.5)).x);
}

#[test]
fn resize_takes_effect_on_next_frame() {
    let (mut scheduler, start) = scheduler_with(GridLimits::default());
    scheduler.inject_dye(Splat {
        point: Vec2::splat(0.5),
        value: Vec3::ONE,
        radius: 0.05,
    });
    scheduler.frame(start + FRAME).unwrap();

    scheduler.request_resize(Viewport::new(2400, 800));
    assert_eq!(scheduler.dims(), dims());

    let report = scheduler.frame(start + FRAME * 2).unwrap();
    assert!(report.resized);
    assert_eq!(scheduler.dims().sim, GridSize::new(64, 32));
    assert_eq!(scheduler.dims().dye, GridSize::new(128, 64));
    assert!(scheduler.backend().store().dye.read().cells().iter().all(|c| *c == Vec3::ZERO));
}

#[test]
fn oversized_resize_keeps_running_at_old_resolution() {
    let limits = GridLimits {
        max_dimension: 100,
        max_cells: u64::MAX,
    };
    let (mut scheduler, start) = scheduler_with(limits);
    scheduler.inject_dye(Splat {
        point: Vec2::splat(0.5),
        value: Vec3::ONE,
        radius: 0.05,
    });
    scheduler.frame(start + FRAME).unwrap();

    scheduler.request_resize(Viewport::new(2400, 1600));
    let report = scheduler.frame(start + FRAME * 2).unwrap();
    assert!(!report.resized);
    assert_eq!(scheduler.backend().dims(), dims());
    assert!(scheduler.backend().store().dye.read().sample(Vec2::splat(0.5)).x > 0.0);
}
