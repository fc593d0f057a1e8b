//! Frame composition: trajectories, markers and heading chevrons.

use tracing::trace;

use crate::{
    kinematics::MovementStatus,
    projection::{PixelPoint, ViewState},
    surface::{Color, Stroke, Surface},
    trajectory::{TrackedEntity, TrajectoryStore},
};

#[derive(Clone, Debug, PartialEq)]
pub struct RenderStyle {
    pub followed_trail: Stroke,
    pub other_trail: Stroke,
    pub followed_marker_radius: f64,
    pub other_marker_radius: f64,
    pub moving_color: Color,
    pub stationary_color: Color,
    /// Glow radius as a multiple of the marker radius.
    pub glow_factor: f64,
    pub glow_alpha: f64,
    pub ring_color: Color,
    pub ring_width: f64,
    pub chevron: Stroke,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            followed_trail: Stroke {
                color: Color::hex(0x135bec),
                alpha: 0.8,
                width: 3.0,
            },
            other_trail: Stroke {
                color: Color::hex(0x999999),
                alpha: 0.3,
                width: 1.0,
            },
            followed_marker_radius: 12.0,
            other_marker_radius: 8.0,
            moving_color: Color::hex(0x22c55e),
            stationary_color: Color::hex(0xeab308),
            glow_factor: 3.0,
            glow_alpha: 0x40 as f64 / 255.0,
            ring_color: Color::WHITE,
            ring_width: 2.0,
            chevron: Stroke {
                color: Color::hex(0x135bec),
                alpha: 1.0,
                width: 2.0,
            },
        }
    }
}

pub struct Renderer {
    surface: Surface,
    view: ViewState,
    style: RenderStyle,
}

impl Renderer {
    pub fn new(view: ViewState, dpr: f64, style: RenderStyle) -> Self {
        let surface = Surface::new(view.width, view.height, dpr);
        Self {
            surface,
            view,
            style,
        }
    }

    /// Match the surface to a new CSS box and pixel density. Drawing keeps
    /// using CSS coordinates.
    pub fn resize(&mut self, css_width: f64, css_height: f64, dpr: f64) {
        self.surface.resize(css_width, css_height, dpr);
        let (width, height) = self.surface.css_size();
        self.view.width = width;
        self.view.height = height;
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    /// Redraw the whole frame. When `followed` names a known entity the view
    /// snaps to its current position before anything is projected.
    pub fn draw(&mut self, store: &TrajectoryStore, followed: Option<&str>) {
        self.surface.clear();
        self.view.followed = followed.map(str::to_string);

        if let Some(center) = followed
            .and_then(|id| store.get(id))
            .and_then(TrackedEntity::position)
        {
            self.view.center = center;
        }

        for id in store.ids() {
            let Some(entity) = store.get(id) else { continue };
            let is_followed = followed == Some(id);
            self.draw_trajectory(entity, is_followed);
            self.draw_marker(entity, is_followed);
        }
        trace!(entities = store.len(), "Frame drawn");
    }

    fn draw_trajectory(&mut self, entity: &TrackedEntity, is_followed: bool) {
        if entity.trajectory.len() < 2 {
            return;
        }
        let path: Vec<PixelPoint> = entity
            .trajectory
            .iter()
            .map(|point| self.view.project(*point))
            .collect();
        let stroke = if is_followed {
            self.style.followed_trail
        } else {
            self.style.other_trail
        };
        self.surface.stroke_path(&[path], &stroke);
    }

    fn draw_marker(&mut self, entity: &TrackedEntity, is_followed: bool) {
        let Some(position) = entity.position() else {
            return;
        };
        let center = self.view.project(position);
        let size = if is_followed {
            self.style.followed_marker_radius
        } else {
            self.style.other_marker_radius
        };
        let color = match entity.kinematics.status {
            MovementStatus::Moving => self.style.moving_color,
            MovementStatus::Stationary => self.style.stationary_color,
        };

        self.surface.radial_glow(
            center,
            size * self.style.glow_factor,
            color,
            self.style.glow_alpha,
        );
        self.surface.fill_circle(center, size, color, 1.0);
        self.surface
            .stroke_ring(center, size, self.style.ring_width, self.style.ring_color);

        if entity.kinematics.is_moving() {
            let chevron = chevron(center, size, entity.kinematics.heading);
            self.surface.stroke_path(&[chevron], &self.style.chevron);
        }
    }
}

/// Chevron arms in the marker frame (y down, tip toward north), rotated
/// clockwise by `heading_deg` about `center`.
fn chevron(center: PixelPoint, size: f64, heading_deg: f64) -> Vec<PixelPoint> {
    let (sin, cos) = heading_deg.to_radians().sin_cos();
    let place =
        |x: f64, y: f64| PixelPoint::new(center.x + x * cos - y * sin, center.y + x * sin + y * cos);
    vec![
        place(-0.8 * size, -0.8 * size),
        place(0.0, -2.0 * size),
        place(0.8 * size, -0.8 * size),
    ]
}
