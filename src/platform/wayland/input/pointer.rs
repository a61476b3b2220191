use crate::utils::{Point, Vector2D};

/// Cursor position as seen through the overlay surfaces.
#[derive(Debug, Default)]
pub struct Pointer {
    /// Global logical position, once known.
    pub position: Option<Point>,
    pub monitor_idx: Option<usize>,
}

impl Pointer {
    pub fn handle_enter(&mut self, monitor_idx: usize, global: Point) {
        self.monitor_idx = Some(monitor_idx);
        self.position = Some(global);
    }

    pub fn handle_leave(&mut self) {
        // Keep the last position; the cursor is somewhere we can't see
        self.monitor_idx = None;
    }

    pub fn handle_motion(&mut self, global: Point) {
        self.position = Some(global);
    }
}

/// Convert surface coordinates on an overlay to global logical coordinates.
///
/// Some compositors (Hyprland) report global coordinates for displays left
/// of or above the origin; negative values are folded back into the surface.
pub fn to_global(surface_x: f64, surface_y: f64, origin: Point, size: Vector2D) -> Point {
    let local_x = if surface_x < 0.0 {
        size.x + surface_x
    } else {
        surface_x
    };
    let local_y = if surface_y < 0.0 {
        size.y + surface_y
    } else {
        surface_y
    };

    Point::new(
        origin.x + local_x.floor() as i32,
        origin.y + local_y.floor() as i32,
    )
}
