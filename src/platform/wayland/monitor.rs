use super::pool_buffer::PoolBuffer;
use super::protocols::ZxdgOutputV1;
use crate::utils::{Point, Rect, Vector2D};
use anyhow::{bail, Result};
use wayland_client::protocol::wl_output::WlOutput;

/// One display as advertised by the compositor.
///
/// Geometry is tracked in two spaces: `logical_*` in the compositor's global
/// layout (what the pointer and the tracker see) and `size` in buffer pixels
/// (what screencopy hands back).
pub struct Monitor {
    pub name: String,
    pub output: WlOutput,
    pub xdg_output: Option<ZxdgOutputV1>,
    pub wayland_name: u32,
    pub size: Vector2D,
    pub scale: i32,
    pub logical_position: Point,
    pub logical_size: Option<(i32, i32)>,

    // Last completed capture, read by the renderer
    pub screen_buffer: Option<PoolBuffer>,
    pub screen_y_invert: bool,

    // Buffer the compositor is copying into; swapped in when the frame is ready
    pub capture_target: Option<PoolBuffer>,
    pub capture_y_invert: bool,

    // Set once xdg-output reports a position; wl_output geometry is then ignored
    has_xdg_position: bool,
}

impl Monitor {
    pub fn new(output: WlOutput, wayland_name: u32) -> Self {
        Self {
            name: String::new(),
            output,
            xdg_output: None,
            wayland_name,
            size: Vector2D::default(),
            scale: 1,
            logical_position: Point::default(),
            logical_size: None,
            screen_buffer: None,
            screen_y_invert: false,
            capture_target: None,
            capture_y_invert: false,
            has_xdg_position: false,
        }
    }

    /// Logical size, falling back to mode size over integer scale when the
    /// compositor has no xdg-output support.
    pub fn get_logical_size(&self) -> Vector2D {
        logical_size(self.size, self.scale, self.logical_size)
    }

    /// Display bounds in global logical coordinates.
    pub fn bounds(&self) -> Rect {
        let size = self.get_logical_size();
        Rect::from_origin_size(
            self.logical_position.x,
            self.logical_position.y,
            size.x as i32,
            size.y as i32,
        )
    }

    /// Capture pixels per logical unit.
    pub fn capture_scale(&self) -> Option<Vector2D> {
        let buffer = self.screen_buffer.as_ref()?;
        let logical = self.get_logical_size();
        if !logical.is_positive() {
            return None;
        }
        Some(buffer.pixel_size / logical)
    }

    /// Promote the finished capture to the one panels sample from. The
    /// previous capture becomes the target of the next copy.
    pub fn finish_capture(&mut self) {
        std::mem::swap(&mut self.screen_buffer, &mut self.capture_target);
        self.screen_y_invert = self.capture_y_invert;
        if let Some(buffer) = &self.screen_buffer {
            buffer.mark_dirty();
        }
    }

    pub fn drop_captures(&mut self) {
        self.screen_buffer = None;
        self.capture_target = None;
    }

    pub fn set_geometry(&mut self, x: i32, y: i32) {
        if !self.has_xdg_position {
            self.logical_position = Point::new(x, y);
        }
        log::debug!("Monitor {} geometry: at ({}, {})", self.wayland_name, x, y);
    }

    pub fn set_mode(&mut self, width: i32, height: i32, refresh: i32) {
        self.size = Vector2D::new(width as f64, height as f64);
        log::debug!(
            "Monitor {} mode: {}x{} @ {}Hz",
            self.wayland_name,
            width,
            height,
            refresh / 1000
        );
    }

    pub fn set_scale(&mut self, scale: i32) {
        self.scale = scale;
        log::debug!("Monitor {} scale: {}", self.wayland_name, scale);
    }

    pub fn set_logical_position(&mut self, x: i32, y: i32) {
        self.has_xdg_position = true;
        self.logical_position = Point::new(x, y);
        log::debug!("Monitor {} logical position: ({}, {})", self.wayland_name, x, y);
    }

    pub fn set_logical_size(&mut self, width: i32, height: i32) {
        if width > 0 && height > 0 {
            self.logical_size = Some((width, height));
        }
        log::debug!("Monitor {} logical size: {}x{}", self.wayland_name, width, height);
    }

    pub fn set_name(&mut self, name: String) {
        self.name = name;
        log::debug!("Monitor {} name: {}", self.wayland_name, self.name);
    }

    pub fn set_done(&self) {
        log::info!(
            "Monitor {} ready: {} ({}x{} @ scale {}, bounds {})",
            self.wayland_name,
            self.name,
            self.size.x,
            self.size.y,
            self.scale,
            self.bounds()
        );
    }
}

fn logical_size(mode: Vector2D, scale: i32, reported: Option<(i32, i32)>) -> Vector2D {
    match reported {
        Some((w, h)) => Vector2D::new(w as f64, h as f64),
        None => {
            let scale = scale.max(1) as f64;
            Vector2D::new(mode.x / scale, mode.y / scale)
        }
    }
}

/// The display bounds containing `point`, or the nearest ones when the
/// point falls in a gap between displays.
pub fn bounds_containing(bounds: impl IntoIterator<Item = Rect>, point: Point) -> Option<Rect> {
    let mut nearest: Option<(i64, Rect)> = None;
    for b in bounds.into_iter().filter(|b| !b.is_empty()) {
        if b.contains_point(point) {
            return Some(b);
        }
        let d = b.distance_sq(point);
        if nearest.map_or(true, |(best, _)| d < best) {
            nearest = Some((d, b));
        }
    }
    nearest.map(|(_, b)| b)
}

/// Index of the first display that fully contains `rect`.
pub fn display_index_containing(bounds: impl IntoIterator<Item = Rect>, rect: Rect) -> Option<usize> {
    bounds.into_iter().position(|b| b.contains_rect(&rect))
}

/// Check that `rect` can be sampled: non-empty and entirely on one display.
pub fn validate_source(bounds: impl IntoIterator<Item = Rect>, rect: Rect) -> Result<()> {
    if rect.is_empty() {
        bail!("Source rectangle {} is empty", rect);
    }
    if display_index_containing(bounds, rect).is_none() {
        bail!("Source rectangle {} is not on any display", rect);
    }
    Ok(())
}
