//! Pointer, touch and scroll events to splat impulses.

use std::collections::HashMap;

use glam::{Vec2, Vec3};

use crate::config::InteractionSettings;
use crate::passes::Splat;
use crate::resolution::Viewport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerId {
    Mouse,
    Touch(u64),
}

/// A velocity splat and the dye splat that visualizes it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Impulse {
    pub velocity: Splat<Vec2>,
    pub dye: Splat<Vec3>,
}

#[derive(Debug, Clone)]
pub struct InteractionAdapter {
    settings: InteractionSettings,
    surface: Viewport,
    pointers: HashMap<PointerId, Vec2>,
    scroll_phase: f32,
}

impl InteractionAdapter {
    pub fn new(settings: InteractionSettings, surface: Viewport) -> Self {
        Self {
            settings,
            surface,
            pointers: HashMap::new(),
            scroll_phase: 0.0,
        }
    }

    pub fn set_surface(&mut self, surface: Viewport) {
        self.surface = surface;
    }

    /// Surface pixels (y down) to normalized grid coordinates (y up), clamped
    /// to [0,1]. `None` for non-finite input or an empty surface.
    pub fn normalize(&self, x: f32, y: f32) -> Option<Vec2> {
        if self.surface.is_empty() || !x.is_finite() || !y.is_finite() {
            return None;
        }
        let nx = x / self.surface.width as f32;
        let ny = 1.0 - y / self.surface.height as f32;
        Some(Vec2::new(nx.clamp(0.0, 1.0), ny.clamp(0.0, 1.0)))
    }

    /// Every reported position injects, including first contact and a
    /// pointer that has not moved (zero delta).
    pub fn pointer_moved(&mut self, id: PointerId, x: f32, y: f32) -> Option<Impulse> {
        let point = self.normalize(x, y)?;
        let delta = match self.pointers.insert(id, point) {
            Some(previous) => point - previous,
            None => Vec2::ZERO,
        };
        Some(self.impulse(point, delta * self.settings.velocity_gain))
    }

    /// Forget a pointer; its next event counts as first contact.
    pub fn pointer_up(&mut self, id: PointerId) {
        self.pointers.remove(&id);
    }

    pub fn active_pointers(&self) -> usize {
        self.pointers.len()
    }

    /// One downward impulse per non-zero scroll delta, at a fixed x and a
    /// y that cycles through the middle of the surface.
    pub fn scroll(&mut self, delta: f32) -> Option<Impulse> {
        if delta == 0.0 || !delta.is_finite() {
            return None;
        }
        let y = 0.5 + 0.3 * self.scroll_phase.sin();
        self.scroll_phase =
            (self.scroll_phase + self.settings.scroll_phase_step) % std::f32::consts::TAU;

        let point = Vec2::new(self.settings.scroll_center_x, y);
        Some(self.impulse(point, Vec2::new(0.0, -self.settings.scroll_force)))
    }

    fn impulse(&self, point: Vec2, velocity: Vec2) -> Impulse {
        Impulse {
            velocity: Splat {
                point,
                value: velocity,
                radius: self.settings.velocity_radius,
            },
            dye: Splat {
                point,
                value: Vec3::from(self.settings.dye_color),
                radius: self.settings.dye_radius,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn adapter() -> InteractionAdapter {
        InteractionAdapter::new(InteractionSettings::default(), Viewport::new(800, 400))
    }

    #[test]
    fn normalize_flips_y() {
        let a = adapter();
        assert_eq!(a.normalize(0.0, 0.0), Some(Vec2::new(0.0, 1.0)));
        assert_eq!(a.normalize(400.0, 300.0), Some(Vec2::new(0.5, 0.25)));
    }

    #[test]
    fn out_of_surface_coordinates_clamp() {
        let a = adapter();
        assert_eq!(a.normalize(-50.0, 900.0), Some(Vec2::new(0.0, 0.0)));
        assert_eq!(a.normalize(1e9, -1e9), Some(Vec2::new(1.0, 1.0)));
        assert_eq!(a.normalize(f32::NAN, 10.0), None);
    }

    #[test]
    fn first_contact_injects_stationary_impulse() {
        let mut a = adapter();
        let imp = a.pointer_moved(PointerId::Mouse, 400.0, 200.0).unwrap();
        assert_eq!(imp.velocity.value, Vec2::ZERO);
        assert_eq!(imp.dye.value, Vec3::new(0.42, 0.28, 0.16));
        assert_eq!(imp.dye.point, Vec2::new(0.5, 0.5));
        assert!(imp.dye.radius > imp.velocity.radius);
    }

    #[test]
    fn motion_scales_delta_by_gain() {
        let mut a = adapter();
        a.pointer_moved(PointerId::Mouse, 400.0, 200.0);
        let imp = a.pointer_moved(PointerId::Mouse, 408.0, 196.0).unwrap();
        // dx = 8/800, dy = +4/400 (screen up is grid up)
        assert_abs_diff_eq!(imp.velocity.value.x, 0.01 * 300.0, epsilon = 1e-3);
        assert_abs_diff_eq!(imp.velocity.value.y, 0.01 * 300.0, epsilon = 1e-3);

        // hovering in place still injects
        let still = a.pointer_moved(PointerId::Mouse, 408.0, 196.0).unwrap();
        assert_eq!(still.velocity.value, Vec2::ZERO);
    }

    #[test]
    fn touches_track_independently() {
        let mut a = adapter();
        a.pointer_moved(PointerId::Touch(1), 100.0, 100.0);
        let other = a.pointer_moved(PointerId::Touch(2), 700.0, 300.0).unwrap();
        assert_eq!(other.velocity.value, Vec2::ZERO);
        assert_eq!(a.active_pointers(), 2);

        a.pointer_up(PointerId::Touch(1));
        let again = a.pointer_moved(PointerId::Touch(1), 500.0, 100.0).unwrap();
        assert_eq!(again.velocity.value, Vec2::ZERO);
    }

    #[test]
    fn empty_surface_ignores_pointer() {
        let mut a = adapter();
        a.set_surface(Viewport::new(0, 0));
        assert!(a.pointer_moved(PointerId::Mouse, 1.0, 1.0).is_none());
    }

    #[test]
    fn scroll_pushes_down_at_cycling_height() {
        let mut a = adapter();
        assert!(a.scroll(0.0).is_none());

        let first = a.scroll(1.0).unwrap();
        let second = a.scroll(-3.0).unwrap();
        assert_eq!(first.velocity.point.x, 0.5);
        assert_eq!(first.velocity.point.y, 0.5);
        assert_ne!(second.velocity.point.y, first.velocity.point.y);
        assert!(second.velocity.point.y >= 0.2 && second.velocity.point.y <= 0.8);
        assert_eq!(first.velocity.value, Vec2::new(0.0, -40.0));

        for _ in 0..50 {
            let p = a.scroll(1.0).unwrap().dye.point;
            assert!(p.y >= 0.2 - 1e-6 && p.y <= 0.8 + 1e-6);
        }
    }
}
