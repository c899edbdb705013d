use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, KeyEvent, MouseScrollDelta, TouchPhase, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crema::compositor::{self, Frame};
use crema::{
    DeviceClass, FluidError, FluidSettings, GpuBackend, InteractionAdapter, PointerId, Scheduler,
    Viewport,
};

const WINDOW_TITLE: &str = "Crema";

struct Args {
    class: DeviceClass,
    settings_path: PathBuf,
}

impl Args {
    fn parse() -> Self {
        let mut class = DeviceClass::Desktop;
        let mut settings_path = FluidSettings::default_path();
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--mobile" => class = DeviceClass::Mobile,
                "--settings" => match args.next() {
                    Some(path) => settings_path = PathBuf::from(path),
                    None => log::warn!("--settings needs a path; using {:?}", settings_path),
                },
                other => log::warn!("Ignoring unknown argument {other:?}"),
            }
        }
        Self { class, settings_path }
    }
}

/// Rolling FPS over half-second windows.
struct FrameStats {
    frame_count: u32,
    frame_time_sum: f32,
    last_update: Instant,
}

impl FrameStats {
    fn new() -> Self {
        Self {
            frame_count: 0,
            frame_time_sum: 0.0,
            last_update: Instant::now(),
        }
    }

    fn record(&mut self, dt: f32) {
        self.frame_count += 1;
        self.frame_time_sum += dt;
    }

    fn fps_and_frame_time(&mut self) -> Option<(f32, f32)> {
        let elapsed = self.last_update.elapsed().as_secs_f32();
        if elapsed < 0.5 || self.frame_count == 0 {
            return None;
        }
        let fps = self.frame_count as f32 / elapsed;
        let avg_frame_time_ms = self.frame_time_sum / self.frame_count as f32 * 1000.0;
        self.frame_count = 0;
        self.frame_time_sum = 0.0;
        self.last_update = Instant::now();
        Some((fps, avg_frame_time_ms))
    }
}

struct App {
    class: DeviceClass,
    settings: FluidSettings,
    window: Option<Arc<Window>>,
    scheduler: Option<Scheduler<GpuBackend>>,
    interaction: InteractionAdapter,
    stats: FrameStats,
    snapshot_requested: bool,
    snapshot_count: u32,
}

impl App {
    fn new(settings: FluidSettings, class: DeviceClass) -> Self {
        let interaction = InteractionAdapter::new(settings.interaction.clone(), Viewport::new(0, 0));
        Self {
            class,
            settings,
            window: None,
            scheduler: None,
            interaction,
            stats: FrameStats::new(),
            snapshot_requested: false,
            snapshot_count: 0,
        }
    }

    fn update_window_title(&mut self) {
        let (Some(window), Some(scheduler)) = (&self.window, &self.scheduler) else {
            return;
        };
        if let Some((fps, frame_time_ms)) = self.stats.fps_and_frame_time() {
            let dims = scheduler.dims();
            window.set_title(&format!(
                "{WINDOW_TITLE} - sim {}x{} dye {}x{} | {:.0} FPS | {:.2} ms/frame",
                dims.sim.width, dims.sim.height, dims.dye.width, dims.dye.height, fps, frame_time_ms
            ));
        }
    }

    fn save_snapshot(&mut self) {
        let Some(scheduler) = &self.scheduler else {
            return;
        };
        let backend = scheduler.backend();
        let dye = match pollster::block_on(backend.read_dye()) {
            Ok(dye) => dye,
            Err(err) => {
                log::warn!("Snapshot failed: {err}");
                return;
            }
        };

        let (width, height) = backend.surface_size();
        let mut frame = Frame::new(width, height);
        compositor::composite(&dye, &mut frame);

        let path = PathBuf::from(format!("crema_snapshot_{:03}.png", self.snapshot_count));
        match frame.save_png(&path) {
            Ok(()) => {
                log::info!("Saved snapshot to {:?}", path);
                self.snapshot_count += 1;
            }
            Err(err) => log::warn!("Failed to save snapshot {:?}: {err:?}", path),
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(scheduler) = self.scheduler.as_mut() else {
            return;
        };
        match scheduler.frame(Instant::now()) {
            Ok(report) => self.stats.record(report.dt),
            Err(FluidError::SurfaceLost) => log::debug!("Surface lost; frame not presented"),
            Err(err @ FluidError::SurfaceUnavailable(_)) => {
                log::error!("{err}; stopping fluid view");
                event_loop.exit();
                return;
            }
            Err(err) => log::warn!("{err}"),
        }

        if self.snapshot_requested {
            self.snapshot_requested = false;
            self.save_snapshot();
        }
        self.update_window_title();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match event_loop.create_window(
            Window::default_attributes()
                .with_title(WINDOW_TITLE)
                .with_inner_size(PhysicalSize::new(1200, 800)),
        ) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("Failed to create window: {err}");
                event_loop.exit();
                return;
            }
        };

        let size = window.inner_size();
        let viewport = Viewport::new(size.width.max(1), size.height.max(1));
        let dims = self.settings.resolution.resolve(viewport, self.class);

        match pollster::block_on(GpuBackend::new(window.clone(), dims)) {
            Ok(backend) => {
                self.interaction.set_surface(viewport);
                self.scheduler = Some(Scheduler::new(
                    backend,
                    self.settings.clone(),
                    self.class,
                    Instant::now(),
                ));
                self.window = Some(window);
            }
            Err(err) => {
                // Nothing to fall back to in a standalone window.
                log::error!("Fluid simulation unavailable: {err}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        let Some(scheduler) = self.scheduler.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => event_loop.exit(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::KeyS),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => self.snapshot_requested = true,
            WindowEvent::Resized(size) => {
                let viewport = Viewport::new(size.width, size.height);
                scheduler.backend_mut().resize_surface(size.width, size.height);
                self.interaction.set_surface(viewport);
                scheduler.request_resize(viewport);
            }
            WindowEvent::CursorMoved { position, .. } => {
                if let Some(impulse) =
                    self.interaction
                        .pointer_moved(PointerId::Mouse, position.x as f32, position.y as f32)
                {
                    scheduler.inject(impulse);
                }
            }
            WindowEvent::CursorLeft { .. } => self.interaction.pointer_up(PointerId::Mouse),
            WindowEvent::Touch(touch) => {
                let id = PointerId::Touch(touch.id);
                match touch.phase {
                    TouchPhase::Started | TouchPhase::Moved => {
                        if let Some(impulse) = self.interaction.pointer_moved(
                            id,
                            touch.location.x as f32,
                            touch.location.y as f32,
                        ) {
                            scheduler.inject(impulse);
                        }
                    }
                    TouchPhase::Ended | TouchPhase::Cancelled => self.interaction.pointer_up(id),
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let amount = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32,
                };
                if let Some(impulse) = self.interaction.scroll(amount) {
                    scheduler.inject(impulse);
                }
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() -> anyhow::Result<()> {
    use env_logger::Env;
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let settings = FluidSettings::load_or_default(&args.settings_path);
    log::info!(
        "Starting with {:?} resolution bases, {} pressure iterations",
        args.class,
        settings.pressure_iterations
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(settings, args.class);
    event_loop.run_app(&mut app)?;
    Ok(())
}
