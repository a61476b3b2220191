//! Cairo drawing for the magnifier panels.
//!
//! A panel shows a rectangle of a captured display, scaled by its zoom
//! transform, inside a dark backdrop with an outline and a zoom label.

use crate::utils::Vector2D;
use anyhow::Result;
use cairo::{Filter, ImageSurface, Matrix, SurfacePattern};
use pango::FontDescription;

const LABEL_POINT_SIZE: f64 = 13.0;

/// Where a panel sits on its overlay and how it scales what it shows.
#[derive(Debug, Clone, Copy)]
pub struct PanelFrame {
    /// Top-left corner in overlay buffer pixels.
    pub origin: Vector2D,
    /// Size in overlay buffer pixels.
    pub size: Vector2D,
    /// Overlay buffer pixels per logical pixel.
    pub output_scale: Vector2D,
    pub zoom: f64,
}

/// The captured display region a panel samples from.
pub struct Sample<'a> {
    pub capture: &'a ImageSurface,
    /// Top-left of the source rectangle in capture pixels.
    pub origin: Vector2D,
    /// Source rectangle size in logical pixels.
    pub size: Vector2D,
    /// Capture pixels per logical pixel.
    pub capture_scale: Vector2D,
    pub y_invert: bool,
}

pub struct Renderer {
    font: FontDescription,
}

impl Renderer {
    pub fn new() -> Self {
        Self {
            font: FontDescription::from_string("Sans Bold"),
        }
    }

    /// Draw one panel: backdrop, magnified sample (if any) and outline.
    pub fn render_panel(
        &self,
        ctx: &cairo::Context,
        frame: &PanelFrame,
        sample: Option<&Sample<'_>>,
    ) -> Result<()> {
        ctx.save()?;
        ctx.rectangle(frame.origin.x, frame.origin.y, frame.size.x, frame.size.y);
        ctx.set_source_rgba(0.08, 0.08, 0.08, 0.92);
        ctx.fill()?;
        ctx.restore()?;

        if let Some(sample) = sample {
            self.render_sample(ctx, frame, sample)?;
        }

        self.draw_outline(ctx, frame)
    }

    fn render_sample(
        &self,
        ctx: &cairo::Context,
        frame: &PanelFrame,
        sample: &Sample<'_>,
    ) -> Result<()> {
        let pattern = SurfacePattern::create(sample.capture);
        pattern.set_filter(if frame.zoom >= 1.0 {
            Filter::Nearest
        } else {
            Filter::Bilinear
        });
        pattern.set_matrix(sample_matrix(frame, sample));

        // The zoomed source may be smaller than the panel
        let shown = sample.size * frame.zoom * frame.output_scale;
        let clip_w = shown.x.min(frame.size.x);
        let clip_h = shown.y.min(frame.size.y);

        ctx.save()?;
        ctx.set_source(&pattern)?;
        ctx.rectangle(frame.origin.x, frame.origin.y, clip_w, clip_h);
        ctx.clip();
        ctx.paint()?;
        ctx.restore()?;

        Ok(())
    }

    fn draw_outline(&self, ctx: &cairo::Context, frame: &PanelFrame) -> Result<()> {
        ctx.save()?;
        ctx.rectangle(frame.origin.x, frame.origin.y, frame.size.x, frame.size.y);
        ctx.set_source_rgba(150.0 / 255.0, 150.0 / 255.0, 150.0 / 255.0, 1.0);
        ctx.set_line_width(2.0 * frame.output_scale.x);
        ctx.stroke()?;
        ctx.restore()?;

        Ok(())
    }

    /// Draw `text` in the panel's top-left corner.
    pub fn draw_label(&self, ctx: &cairo::Context, frame: &PanelFrame, text: &str) -> Result<()> {
        let mut font = self.font.clone();
        font.set_absolute_size(LABEL_POINT_SIZE * frame.output_scale.y * pango::SCALE as f64);

        let layout = pangocairo::functions::create_layout(ctx);
        layout.set_font_description(Some(&font));
        layout.set_text(text);

        let pad = 8.0 * frame.output_scale.x;
        ctx.save()?;
        ctx.move_to(frame.origin.x + pad, frame.origin.y + pad);
        ctx.set_source_rgba(1.0, 1.0, 1.0, 0.9);
        pangocairo::functions::show_layout(ctx, &layout);
        ctx.restore()?;

        Ok(())
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Pattern matrix mapping overlay pixels inside `frame` to capture pixels.
///
/// Cairo applies the most recently added operation first, so reading the
/// calls bottom-up: move to the panel origin, shrink by the zoom, move to
/// the source origin, then flip vertically for bottom-up captures.
fn sample_matrix(frame: &PanelFrame, sample: &Sample<'_>) -> Matrix {
    let k = sample.capture_scale / (frame.output_scale * frame.zoom);

    let mut matrix = Matrix::identity();
    if sample.y_invert {
        matrix.translate(0.0, sample.capture.height() as f64);
        matrix.scale(1.0, -1.0);
    }
    matrix.translate(sample.origin.x, sample.origin.y);
    matrix.scale(k.x, k.y);
    matrix.translate(-frame.origin.x, -frame.origin.y);
    matrix
}
