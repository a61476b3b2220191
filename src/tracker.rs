//! Cursor-follow viewport computation.
//!
//! Every tick the driver asks, once per magnifier, which part of the display
//! should be sampled. The answer is a rectangle centered on the cursor,
//! sized by the zoom factor, shaped like the display and pushed back inside
//! the display when the cursor is near an edge.

use crate::error::{MagnifierError, Result};
use crate::utils::{Point, Rect};

/// Width of the sampled region at 1x, in screen pixels.
pub const DEFAULT_BASE_SAMPLE_WIDTH: u32 = 400;

/// Smallest sample edge the tracker will produce. Keeps the halves non-zero.
const MIN_SAMPLE_WIDTH: i64 = 2;

/// Zoom configuration of one magnifier. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    zoom_factor: f32,
    base_sample_width: u32,
}

impl Viewport {
    pub fn new(zoom_factor: f32, base_sample_width: u32) -> Result<Self> {
        if !zoom_factor.is_finite() || zoom_factor <= 0.0 {
            return Err(MagnifierError::InvalidViewport(format!(
                "zoom factor must be a positive number, got {}",
                zoom_factor
            )));
        }
        if base_sample_width == 0 {
            return Err(MagnifierError::InvalidViewport(
                "base sample width must be positive".to_string(),
            ));
        }

        Ok(Self {
            zoom_factor,
            base_sample_width,
        })
    }

    pub fn zoom_factor(&self) -> f32 {
        self.zoom_factor
    }

    pub fn base_sample_width(&self) -> u32 {
        self.base_sample_width
    }

    /// Size of the sampled region on a display of `screen_width` x
    /// `screen_height`.
    ///
    /// The width is capped at the display width and the height derived from
    /// the capped width, so the sample always fits on the display and the
    /// horizontal and vertical clamps in [`compute_source_rect`] never fight.
    pub fn sample_size(&self, screen_width: i32, screen_height: i32) -> (i32, i32) {
        let screen_width = screen_width.max(1);
        let screen_height = screen_height.max(1);

        let raw = (self.base_sample_width as f64 / self.zoom_factor as f64) as i64;
        let width = raw.max(MIN_SAMPLE_WIDTH).min(screen_width as i64) as i32;

        let aspect = screen_height as f64 / screen_width as f64;
        let height = ((width as f64 * aspect) as i32)
            .max(MIN_SAMPLE_WIDTH as i32)
            .min(screen_height);

        (width, height)
    }
}

/// Rectangle of `screen` to sample for `viewport` with the cursor at
/// `cursor`.
///
/// Centered on the cursor unless that would cross an edge of `screen`, in
/// which case the center slides just far enough to put the rectangle back
/// on the edge. Pure: identical inputs always give identical output.
pub fn compute_source_rect(cursor: Point, screen: Rect, viewport: &Viewport) -> Rect {
    let (width, height) = viewport.sample_size(screen.width(), screen.height());
    let half_w = i64::from(width / 2);
    let half_h = i64::from(height / 2);

    // Edges are computed in i64: the cursor may sit anywhere in i32 space
    let (left, right) = (i64::from(screen.left), i64::from(screen.right));
    let (top, bottom) = (i64::from(screen.top), i64::from(screen.bottom));
    let mut x = i64::from(cursor.x);
    let mut y = i64::from(cursor.y);

    if x - half_w < left {
        x = left + half_w;
    }
    if x + half_w > right {
        x = right - half_w;
    }
    if y - half_h < top {
        y = top + half_h;
    }
    if y + half_h > bottom {
        y = bottom - half_h;
    }

    // The sample fits on the screen, so every edge is back inside i32
    Rect::new(
        clamp_to_i32(x - half_w),
        clamp_to_i32(y - half_h),
        clamp_to_i32(x + half_w),
        clamp_to_i32(y + half_h),
    )
}

fn clamp_to_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_HD: Rect = Rect::new(0, 0, 1920, 1080);

    fn viewport(zoom: f32) -> Viewport {
        Viewport::new(zoom, DEFAULT_BASE_SAMPLE_WIDTH).unwrap()
    }

    #[test]
    fn test_viewport_rejects_bad_zoom() {
        assert!(Viewport::new(0.0, 400).is_err());
        assert!(Viewport::new(-2.0, 400).is_err());
        assert!(Viewport::new(f32::NAN, 400).is_err());
        assert!(Viewport::new(f32::INFINITY, 400).is_err());
        assert!(Viewport::new(2.0, 0).is_err());
        assert!(Viewport::new(0.25, 400).is_ok());
    }

    #[test]
    fn test_sample_size_follows_zoom_and_aspect() {
        assert_eq!(viewport(4.0).sample_size(1920, 1080), (100, 56));
        assert_eq!(viewport(1.0).sample_size(1920, 1080), (400, 225));
        assert_eq!(viewport(2.0).sample_size(1280, 1024), (200, 160));
    }

    #[test]
    fn test_top_left_corner_clamps() {
        let rect = compute_source_rect(Point::new(0, 0), FULL_HD, &viewport(4.0));
        assert_eq!(rect.left, 0);
        assert_eq!(rect.right, 100);
        assert_eq!(rect.top, 0);
        assert_eq!(rect.bottom, 56);
    }

    #[test]
    fn test_bottom_right_corner_clamps() {
        let rect = compute_source_rect(Point::new(1919, 1079), FULL_HD, &viewport(4.0));
        assert_eq!(rect, Rect::new(1820, 1024, 1920, 1080));
    }

    #[test]
    fn test_centered_when_margins_are_ample() {
        let cursor = Point::new(960, 540);
        let rect = compute_source_rect(cursor, FULL_HD, &viewport(4.0));
        assert_eq!(rect, Rect::new(910, 512, 1010, 568));
        assert_eq!(rect.center(), cursor);

        let rect = compute_source_rect(Point::new(700, 300), FULL_HD, &viewport(1.0));
        assert_eq!(rect.center(), Point::new(700, 300));
    }

    #[test]
    fn test_stays_inside_screen() {
        let screens = [
            FULL_HD,
            Rect::new(-2560, -200, 0, 1240),
            Rect::new(1920, 0, 3200, 1024),
        ];
        let zooms = [1.0, 1.5, 2.0, 4.0, 8.0];

        for screen in screens {
            for zoom in zooms {
                let vp = viewport(zoom);
                for x in (screen.left - 300..screen.right + 300).step_by(97) {
                    for y in (screen.top - 300..screen.bottom + 300).step_by(89) {
                        let rect = compute_source_rect(Point::new(x, y), screen, &vp);
                        assert!(
                            screen.contains_rect(&rect),
                            "{} escapes {} at cursor ({}, {}) zoom {}",
                            rect,
                            screen,
                            x,
                            y,
                            zoom
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_aspect_ratio_preserved() {
        for (screen, zoom) in [
            (FULL_HD, 1.0),
            (FULL_HD, 2.0),
            (Rect::new(0, 0, 2560, 1600), 1.0),
            (Rect::new(0, 0, 1280, 1024), 1.25),
        ] {
            let rect = compute_source_rect(screen.center(), screen, &viewport(zoom));
            let expected = screen.width() as f64 / screen.height() as f64;
            let actual = rect.width() as f64 / rect.height() as f64;
            assert!(
                (expected - actual).abs() < 0.05,
                "aspect {} vs {} for {} at zoom {}",
                actual,
                expected,
                screen,
                zoom
            );
        }
    }

    #[test]
    fn test_same_inputs_same_output() {
        let vp = viewport(4.0);
        let cursor = Point::new(13, 1070);
        let first = compute_source_rect(cursor, FULL_HD, &vp);
        let second = compute_source_rect(cursor, FULL_HD, &vp);
        assert_eq!(first, second);
    }

    #[test]
    fn test_sample_wider_than_screen_is_defined() {
        // 400 / 0.1 = 4000 px wide on a 1920 px display.
        let vp = viewport(0.1);
        for cursor in [Point::new(0, 0), Point::new(960, 540), Point::new(1919, 1079)] {
            let rect = compute_source_rect(cursor, FULL_HD, &vp);
            assert!(!rect.is_empty());
            assert!(FULL_HD.contains_rect(&rect));
            assert_eq!(rect, FULL_HD);
        }
    }

    #[test]
    fn test_cursor_at_coordinate_limits() {
        let screens = [FULL_HD, Rect::new(-2560, -200, 0, 1240)];
        let cursors = [
            Point::new(i32::MIN, i32::MIN),
            Point::new(i32::MAX, i32::MAX),
            Point::new(i32::MIN, i32::MAX),
            Point::new(i32::MAX, i32::MIN),
        ];

        for screen in screens {
            for zoom in [0.1, 1.0, 4.0] {
                for cursor in cursors {
                    let rect = compute_source_rect(cursor, screen, &viewport(zoom));
                    assert!(!rect.is_empty());
                    assert!(screen.contains_rect(&rect), "{} escapes {}", rect, screen);
                }
            }
        }

        let rect = compute_source_rect(Point::new(i32::MAX, i32::MAX), FULL_HD, &viewport(4.0));
        assert_eq!(rect, Rect::new(1820, 1024, 1920, 1080));
        let rect = compute_source_rect(Point::new(i32::MIN, i32::MIN), FULL_HD, &viewport(4.0));
        assert_eq!(rect, Rect::new(0, 0, 100, 56));
    }

    #[test]
    fn test_extreme_zoom_keeps_minimum_sample() {
        let rect = compute_source_rect(Point::new(500, 500), FULL_HD, &viewport(1000.0));
        assert_eq!(rect.width(), 2);
        assert!(!rect.is_empty());
        assert!(FULL_HD.contains_rect(&rect));
    }
}
