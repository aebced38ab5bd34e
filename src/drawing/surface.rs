//! Freehand raster surface
//!
//! Strokes are rasterized as round-capped lines by stamping discs along
//! each segment. The untouched surface is fully transparent.

use std::io::Cursor;

use image::{ImageFormat, Rgba, RgbaImage};
use tracing::debug;

use super::DrawingError;

pub const SURFACE_SIZE: u32 = 300;
pub const STROKE_WIDTH: f32 = 4.0;
/// Emerald ink, #059669
pub const INK: Rgba<u8> = Rgba([0x05, 0x96, 0x69, 0xff]);

/// Raster the learner draws on during the Write stage
pub struct DrawingSurface {
    canvas: RgbaImage,
    /// Last point of the stroke in progress
    pen: Option<(f32, f32)>,
}

impl Default for DrawingSurface {
    fn default() -> Self {
        Self::new(SURFACE_SIZE, SURFACE_SIZE)
    }
}

impl DrawingSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbaImage::new(width, height),
            pen: None,
        }
    }

    pub fn is_pen_down(&self) -> bool {
        self.pen.is_some()
    }

    /// Start a stroke at `(x, y)`
    pub fn pen_down(&mut self, x: f32, y: f32) {
        if !(x.is_finite() && y.is_finite()) {
            debug!(x, y, "non-finite pen position ignored");
            return;
        }
        self.pen = Some((x, y));
    }

    /// Extend the current stroke to `(x, y)`; ignored with the pen up
    pub fn pen_move(&mut self, x: f32, y: f32) {
        if !(x.is_finite() && y.is_finite()) {
            debug!(x, y, "non-finite pen position ignored");
            return;
        }
        if let Some(from) = self.pen {
            self.stroke(from, (x, y));
            self.pen = Some((x, y));
        }
    }

    pub fn pen_up(&mut self) {
        self.pen = None;
    }

    /// Wipe every pixel and drop the stroke in progress
    pub fn clear(&mut self) {
        self.canvas.pixels_mut().for_each(|p| *p = Rgba([0, 0, 0, 0]));
        self.pen = None;
    }

    /// True when no pixel has been drawn
    pub fn is_blank(&self) -> bool {
        self.canvas.pixels().all(|p| p[3] == 0)
    }

    /// Encode the surface as PNG
    pub fn to_png(&self) -> Result<Vec<u8>, DrawingError> {
        let mut buf = Cursor::new(Vec::new());
        self.canvas.write_to(&mut buf, ImageFormat::Png)?;
        Ok(buf.into_inner())
    }

    /// Stamp along the part of the segment that can touch the canvas
    ///
    /// The step count follows the clipped length, so far-off endpoints
    /// cost no more than a segment across the surface.
    fn stroke(&mut self, from: (f32, f32), to: (f32, f32)) {
        let (width, height) = self.canvas.dimensions();
        let Some((from, to)) = clip_segment(
            from,
            to,
            -STROKE_WIDTH,
            width as f32 + STROKE_WIDTH,
            height as f32 + STROKE_WIDTH,
        ) else {
            return;
        };

        let (dx, dy) = (to.0 - from.0, to.1 - from.1);
        let steps = (dx.hypot(dy) * 2.0).ceil().max(1.0) as u32;

        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            self.stamp(from.0 + dx * t, from.1 + dy * t);
        }
    }

    fn stamp(&mut self, cx: f32, cy: f32) {
        let radius = STROKE_WIDTH / 2.0;
        let (width, height) = self.canvas.dimensions();

        let min_x = (cx - radius).floor().max(0.0) as u32;
        let min_y = (cy - radius).floor().max(0.0) as u32;
        let max_x = (cx + radius).ceil().min(width as f32 - 1.0);
        let max_y = (cy + radius).ceil().min(height as f32 - 1.0);
        if max_x < 0.0 || max_y < 0.0 {
            return;
        }

        for y in min_y..=max_y as u32 {
            for x in min_x..=max_x as u32 {
                let (px, py) = (x as f32 + 0.5 - cx, y as f32 + 0.5 - cy);
                if px * px + py * py <= radius * radius {
                    self.canvas.put_pixel(x, y, INK);
                }
            }
        }
    }
}

/// Liang-Barsky clip of `from..to` to the square-cornered box
/// `[min, max_x] x [min, max_y]`
///
/// Computed in f64 so endpoints near `f32::MAX` cannot overflow.
fn clip_segment(
    from: (f32, f32),
    to: (f32, f32),
    min: f32,
    max_x: f32,
    max_y: f32,
) -> Option<((f32, f32), (f32, f32))> {
    let (x0, y0) = (f64::from(from.0), f64::from(from.1));
    let (dx, dy) = (f64::from(to.0) - x0, f64::from(to.1) - y0);
    let (min, max_x, max_y) = (f64::from(min), f64::from(max_x), f64::from(max_y));

    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    for (p, q) in [
        (-dx, x0 - min),
        (dx, max_x - x0),
        (-dy, y0 - min),
        (dy, max_y - y0),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }

    let at = |t: f64| ((x0 + dx * t) as f32, (y0 + dy * t) as f32);
    Some((at(t0), at(t1)))
}
