//! Dye field to display color: `color = dye * vignette(|uv - 0.5|)`.

use std::path::Path;

use glam::{Vec2, Vec3};
use image::{Rgb, RgbImage};

use crate::grid::Grid;

const VIGNETTE_INNER: f32 = 0.25;
const VIGNETTE_OUTER: f32 = 0.75;
const VIGNETTE_STRENGTH: f32 = 0.65;
const GAMMA_CORRECTION_EXPONENT: f32 = 2.2;

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Full brightness near the center, falling off toward the corners.
/// Must match `vignette` in `shaders/composite.wgsl`.
pub fn vignette(distance_from_center: f32) -> f32 {
    1.0 - VIGNETTE_STRENGTH * smoothstep(VIGNETTE_INNER, VIGNETTE_OUTER, distance_from_center)
}

/// Linear RGB image, row 0 at the top of the screen.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<Vec3>,
}

impl Frame {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Vec3::ZERO; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> Vec3 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    /// Normalized coordinate (y up) of the center of pixel (x, y).
    pub fn pixel_uv(&self, x: u32, y: u32) -> Vec2 {
        Vec2::new(
            (x as f32 + 0.5) / self.width as f32,
            1.0 - (y as f32 + 0.5) / self.height as f32,
        )
    }

    /// Pixel whose center is closest to a normalized coordinate.
    pub fn pixel_at(&self, uv: Vec2) -> Vec3 {
        let x = (uv.x * self.width as f32).floor().clamp(0.0, (self.width - 1) as f32);
        let y = ((1.0 - uv.y) * self.height as f32)
            .floor()
            .clamp(0.0, (self.height - 1) as f32);
        self.pixel(x as u32, y as u32)
    }

    pub fn to_image(&self) -> RgbImage {
        let mut img = RgbImage::new(self.width, self.height);
        for (x, y, px) in img.enumerate_pixels_mut() {
            let c = self.pixel(x, y);
            *px = Rgb([encode(c.x), encode(c.y), encode(c.z)]);
        }
        img
    }

    pub fn save_png(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.to_image().save(path)?;
        Ok(())
    }
}

fn encode(linear: f32) -> u8 {
    let v = linear.clamp(0.0, 1.0).powf(1.0 / GAMMA_CORRECTION_EXPONENT);
    (v * 255.0).round() as u8
}

/// Renders `dye` into every pixel of `frame`.
pub fn composite(dye: &Grid<Vec3>, frame: &mut Frame) {
    let center = Vec2::splat(0.5);
    for y in 0..frame.height {
        for x in 0..frame.width {
            let uv = frame.pixel_uv(x, y);
            let color = dye.sample(uv) * vignette(uv.distance(center));
            frame.pixels[y as usize * frame.width as usize + x as usize] = color;
        }
    }
}
