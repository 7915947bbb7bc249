//! Paint targets.
//!
//! The scene never draws pixels to screen itself. It issues drawing
//! operations against a [`PaintTarget`] supplied by the display layer.

use crate::geometry::RectF;
use crate::image::{Color, ImageBuffer};

/// Drawing surface supplied by the display layer.
pub trait PaintTarget {
    /// Draw `image` scaled into `dest` (scene coordinates).
    fn draw_image(&mut self, dest: RectF, image: &ImageBuffer);

    /// Fill a pie segment of the ellipse inscribed in `bounds`.
    ///
    /// Angles are in degrees, counter-clockwise from three o'clock.
    fn draw_pie(&mut self, bounds: RectF, start_angle: f64, span_angle: f64, color: Color, opacity: f64);

    /// Outline a rectangle. Used for debug overlays; targets may ignore it.
    fn stroke_rect(&mut self, _rect: RectF, _color: Color) {}
}

/// A drawing operation captured by [`RecordingTarget`]
#[derive(Debug, Clone, PartialEq)]
pub enum PaintOp {
    Image { dest: RectF, has_content: bool },
    Pie {
        bounds: RectF,
        start_angle: f64,
        span_angle: f64,
        color: Color,
        opacity: f64,
    },
    Outline { rect: RectF, color: Color },
}

/// Headless target that records every operation.
#[derive(Debug, Default)]
pub struct RecordingTarget {
    ops: Vec<PaintOp>,
}

impl RecordingTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[PaintOp] {
        &self.ops
    }

    /// Destination rectangles of all recorded image draws, in order
    pub fn image_rects(&self) -> Vec<RectF> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                PaintOp::Image { dest, .. } => Some(*dest),
                _ => None,
            })
            .collect()
    }

    /// All recorded pie segments as `(bounds, span_angle)`
    pub fn pies(&self) -> Vec<(RectF, f64)> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                PaintOp::Pie {
                    bounds, span_angle, ..
                } => Some((*bounds, *span_angle)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }
}

impl PaintTarget for RecordingTarget {
    fn draw_image(&mut self, dest: RectF, image: &ImageBuffer) {
        self.ops.push(PaintOp::Image {
            dest,
            has_content: image.has_content(),
        });
    }

    fn draw_pie(&mut self, bounds: RectF, start_angle: f64, span_angle: f64, color: Color, opacity: f64) {
        self.ops.push(PaintOp::Pie {
            bounds,
            start_angle,
            span_angle,
            color,
            opacity,
        });
    }

    fn stroke_rect(&mut self, rect: RectF, color: Color) {
        self.ops.push(PaintOp::Outline { rect, color });
    }
}
