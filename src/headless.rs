//! Runs the host backend with scripted pointer and scroll input and writes
//! the final composited frame as a PNG.
//!
//! Usage: `crema_headless [frames] [output.png]`

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;

use crema::{CpuBackend, DeviceClass, FluidSettings, GridLimits, InteractionAdapter, PointerId, Scheduler, Viewport};

const VIEWPORT: Viewport = Viewport::new(1200, 800);
const FRAME_SPACING: Duration = Duration::from_micros(16_667);
const SCROLL_EVERY: u32 = 30;

fn main() -> anyhow::Result<()> {
    use env_logger::Env;
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let frames: u32 = match args.next() {
        Some(arg) => arg.parse().with_context(|| format!("invalid frame count {arg:?}"))?,
        None => 120,
    };
    let output = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("crema_frame.png"));

    let settings = FluidSettings::default();
    let dims = settings.resolution.resolve(VIEWPORT, DeviceClass::Desktop);
    let backend = CpuBackend::new(dims, GridLimits::default())?;

    let mut interaction = InteractionAdapter::new(settings.interaction.clone(), VIEWPORT);
    let start = Instant::now();
    let mut scheduler = Scheduler::new(backend, settings, DeviceClass::Desktop, start);

    log::info!(
        "Running {frames} frames: sim {}x{}, dye {}x{}",
        dims.sim.width,
        dims.sim.height,
        dims.dye.width,
        dims.dye.height
    );

    let center_x = VIEWPORT.width as f32 * 0.5;
    let center_y = VIEWPORT.height as f32 * 0.5;
    let radius = VIEWPORT.height as f32 * 0.3;

    for frame in 0..frames {
        let angle = frame as f32 * 0.08;
        let x = center_x + radius * angle.cos();
        let y = center_y + radius * angle.sin();
        if let Some(impulse) = interaction.pointer_moved(PointerId::Mouse, x, y) {
            scheduler.inject(impulse);
        }
        if frame % SCROLL_EVERY == SCROLL_EVERY - 1 {
            if let Some(impulse) = interaction.scroll(1.0) {
                scheduler.inject(impulse);
            }
        }

        let report = scheduler.frame(start + FRAME_SPACING * (frame + 1))?;
        if report.index % 30 == 0 {
            log::info!("frame {}: dt {:.4}s, {} splats", report.index, report.dt, report.splats_applied);
        }
    }

    scheduler
        .backend()
        .frame()
        .save_png(&output)
        .with_context(|| format!("failed to write {:?}", output))?;
    log::info!("Saved {:?}", output);
    Ok(())
}
