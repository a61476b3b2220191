use crate::platform::SurfaceId;
use crate::utils::Rect;
use anyhow::{Context, Result};

/// Gap between panels and from the display edge, in logical pixels.
pub const PANEL_MARGIN: i32 = 50;

/// A magnifier surface: a box on the primary overlay showing the sampled
/// source rectangle scaled by `zoom`.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    pub id: SurfaceId,
    pub index: usize,
    pub rect: Rect,
    pub zoom: f32,
    pub source: Option<Rect>,
}

impl Panel {
    pub fn new(id: SurfaceId, index: usize, rect: Rect, zoom: f32) -> Self {
        Self {
            id,
            index,
            rect,
            zoom,
            source: None,
        }
    }

    /// Record a new source rectangle. Returns whether it differs from the
    /// previous one.
    pub fn update_source(&mut self, rect: Rect) -> bool {
        if self.source == Some(rect) {
            return false;
        }
        self.source = Some(rect);
        true
    }

    pub fn label(&self) -> String {
        if self.zoom.fract() == 0.0 {
            format!("{:.0}×", self.zoom)
        } else {
            format!("{:.2}×", self.zoom)
        }
    }
}

/// Slot of the `index`-th panel on `display`.
///
/// Panels are a quarter of the display wide, keep its aspect ratio and stack
/// down the left edge.
pub fn panel_rect(index: usize, display: Rect) -> Rect {
    let width = display.width() / 4;
    let height = (width as i64 * display.height() as i64 / display.width().max(1) as i64) as i32;
    let top = display.top + PANEL_MARGIN + index as i32 * (height + PANEL_MARGIN);
    Rect::from_origin_size(display.left + PANEL_MARGIN, top, width, height)
}

pub fn find_panel_mut(panels: &mut [Panel], id: SurfaceId) -> Result<&mut Panel> {
    panels
        .iter_mut()
        .find(|p| p.id == id)
        .with_context(|| format!("Unknown magnifier surface {:?}", id))
}
