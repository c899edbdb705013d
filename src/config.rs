use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::resolution::ResolutionPolicy;

pub const SETTINGS_FILE_NAME: &str = "fluid_settings.json";

/// Capacity of each per-frame splat region on the GPU.
pub const MAX_SPLATS_PER_FRAME: usize = 64;

/// Pointer, touch and scroll impulse shaping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionSettings {
    /// Velocity impulse per unit of normalized pointer displacement.
    pub velocity_gain: f32,
    pub velocity_radius: f32,
    pub dye_radius: f32,
    pub dye_color: [f32; 3],
    pub scroll_force: f32,
    pub scroll_center_x: f32,
    /// Radians the scroll injection point advances per scroll event.
    pub scroll_phase_step: f32,
}

impl Default for InteractionSettings {
    fn default() -> Self {
        Self {
            velocity_gain: 300.0,
            velocity_radius: 0.02,
            dye_radius: 0.055,
            dye_color: [0.42, 0.28, 0.16],
            scroll_force: 40.0,
            scroll_center_x: 0.5,
            scroll_phase_step: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluidSettings {
    /// Jacobi iterations per frame. Never convergence-checked.
    pub pressure_iterations: u32,
    /// Fraction of last frame's pressure kept as the Jacobi initial guess.
    pub pressure_retention: f32,
    pub velocity_dissipation: f32,
    pub dye_dissipation: f32,
    /// Upper bound on the per-frame timestep, in seconds.
    pub max_dt: f32,
    pub max_splats_per_frame: usize,
    pub interaction: InteractionSettings,
    pub resolution: ResolutionPolicy,
}

impl Default for FluidSettings {
    fn default() -> Self {
        Self {
            pressure_iterations: 20,
            pressure_retention: 1.0,
            velocity_dissipation: 0.98,
            dye_dissipation: 0.97,
            max_dt: 0.033,
            max_splats_per_frame: MAX_SPLATS_PER_FRAME,
            interaction: InteractionSettings::default(),
            resolution: ResolutionPolicy::default(),
        }
    }
}

impl FluidSettings {
    pub fn default_path() -> PathBuf {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(SETTINGS_FILE_NAME)
    }

    pub fn load_from_disk(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let mut settings: Self = serde_json::from_str(&data)?;
        settings.sanitize();
        Ok(settings)
    }

    pub fn save_to_disk(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Loads `path`, falling back to defaults (and rewriting the file) when it
    /// is missing or unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load_from_disk(path) {
            Ok(settings) => settings,
            Err(err) => {
                log::warn!("Failed to load fluid settings from {:?}: {err:?}", path);
                let settings = Self::default();
                if let Err(err) = settings.save_to_disk(path) {
                    log::warn!("Failed to write default fluid settings to {:?}: {err:?}", path);
                }
                settings
            }
        }
    }

    pub fn sanitize(&mut self) {
        self.pressure_iterations = self.pressure_iterations.clamp(0, 500);
        self.pressure_retention = clamp_or(self.pressure_retention, 0.0, 1.0, 1.0);
        self.velocity_dissipation = clamp_or(self.velocity_dissipation, 0.0, 1.0, 0.98);
        self.dye_dissipation = clamp_or(self.dye_dissipation, 0.0, 1.0, 0.97);
        self.max_dt = clamp_or(self.max_dt, 0.0, 0.033, 0.033);
        self.max_splats_per_frame = self.max_splats_per_frame.clamp(1, MAX_SPLATS_PER_FRAME);

        let i = &mut self.interaction;
        i.velocity_gain = clamp_or(i.velocity_gain, 0.0, 1.0e5, 300.0);
        i.velocity_radius = clamp_or(i.velocity_radius, 1.0e-5, 1.0, 0.02);
        i.dye_radius = clamp_or(i.dye_radius, 1.0e-5, 1.0, 0.055);
        for c in &mut i.dye_color {
            *c = clamp_or(*c, 0.0, 1.0, 0.0);
        }
        i.scroll_force = clamp_or(i.scroll_force, 0.0, 1.0e5, 40.0);
        i.scroll_center_x = clamp_or(i.scroll_center_x, 0.0, 1.0, 0.5);
        i.scroll_phase_step = clamp_or(i.scroll_phase_step, 0.0, std::f32::consts::TAU, 0.9);

        self.resolution.sanitize();
    }
}

fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}
