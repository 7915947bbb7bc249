//! RGBA8 patch images.
//!
//! Buffers are allocated lazily: a fresh [`ImageBuffer`] is fully
//! transparent and holds no pixel memory until something is drawn into it.
//! Pixels use straight (non-premultiplied) alpha.

use crate::error::RenderError;
use crate::geometry::{PointF, RectF};

/// RGBA color with 8 bits per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const GREEN: Color = Color::rgb(0, 255, 0);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, 255)
    }

    fn to_bytes(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    fn from_bytes(px: &[u8]) -> Self {
        Self::rgba(px[0], px[1], px[2], px[3])
    }
}

/// Pen used for brushing strokes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrokeStyle {
    pub color: Color,
    /// Pen width in pixels
    pub width: u32,
}

impl StrokeStyle {
    pub fn new(color: Color, width: u32) -> Self {
        Self { color, width }
    }
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self::new(Color::BLACK, 1)
    }
}

/// Lazily allocated RGBA8 image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    /// Empty until first written; `width * height * 4` bytes afterwards
    pixels: Vec<u8>,
}

impl ImageBuffer {
    /// Create a transparent image without allocating pixel memory.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: Vec::new(),
        }
    }

    /// Create an image filled with `color`.
    pub fn filled(width: u32, height: u32, color: Color) -> Self {
        let mut image = Self::new(width, height);
        image.fill(color);
        image
    }

    /// Wrap existing RGBA8 pixel data.
    ///
    /// # Errors
    /// Returns [`RenderError::BufferSize`] if `pixels` is not exactly
    /// `width * height * 4` bytes long.
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, RenderError> {
        let expected = Self::required_bytes(width, height);
        if pixels.len() != expected {
            return Err(RenderError::BufferSize {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    fn required_bytes(width: u32, height: u32) -> usize {
        width as usize * height as usize * 4
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_allocated(&self) -> bool {
        !self.pixels.is_empty()
    }

    /// Bytes of pixel memory currently held
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    /// Raw RGBA8 bytes, empty if unallocated.
    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    /// Drop the pixel memory, leaving a transparent image. Returns the bytes released.
    pub fn release(&mut self) -> usize {
        let bytes = self.pixels.len();
        self.pixels = Vec::new();
        bytes
    }

    fn allocate(&mut self) -> &mut [u8] {
        if self.pixels.is_empty() {
            self.pixels = vec![0u8; Self::required_bytes(self.width, self.height)];
        }
        &mut self.pixels
    }

    /// Fill the whole image with `color`.
    ///
    /// Filling an unallocated image with transparent is a no-op.
    pub fn fill(&mut self, color: Color) {
        if color == Color::TRANSPARENT && !self.is_allocated() {
            return;
        }
        let bytes = color.to_bytes();
        for px in self.allocate().chunks_exact_mut(4) {
            px.copy_from_slice(&bytes);
        }
    }

    /// Color at `(x, y)`; transparent outside the image or if unallocated.
    pub fn pixel(&self, x: u32, y: u32) -> Color {
        if x >= self.width || y >= self.height || !self.is_allocated() {
            return Color::TRANSPARENT;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        Color::from_bytes(&self.pixels[offset..offset + 4])
    }

    /// Set the pixel at `(x, y)`; coordinates outside the image are ignored.
    pub fn set_pixel(&mut self, x: i64, y: i64, color: Color) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        self.allocate()[offset..offset + 4].copy_from_slice(&color.to_bytes());
    }

    /// Whether any pixel has non-zero alpha
    pub fn has_content(&self) -> bool {
        self.pixels.chunks_exact(4).any(|px| px[3] != 0)
    }

    /// Draw a line segment in image coordinates, clipped to the image.
    ///
    /// The segment is first cut to the image grown by the pen width, so only
    /// the visible part is stepped through. Segments entirely outside and
    /// segments with non-finite end points draw nothing. Uses Bresenham
    /// stepping between the rounded end points and stamps a square pen of
    /// `style.width` pixels at every step.
    pub fn draw_line(&mut self, from: PointF, to: PointF, style: &StrokeStyle) {
        let margin = style.width.max(1) as f64 + 1.0;
        let bounds = RectF::new(
            -margin,
            -margin,
            self.width as f64 + 2.0 * margin,
            self.height as f64 + 2.0 * margin,
        );
        let Some((from, to)) = clip_segment(from, to, &bounds) else {
            return;
        };

        let (mut x0, mut y0) = (from.x.round() as i64, from.y.round() as i64);
        let (x1, y1) = (to.x.round() as i64, to.y.round() as i64);

        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        loop {
            self.stamp(x0, y0, style);
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    fn stamp(&mut self, cx: i64, cy: i64, style: &StrokeStyle) {
        let width = style.width.max(1) as i64;
        let start = -(width - 1) / 2;
        for oy in start..start + width {
            for ox in start..start + width {
                self.set_pixel(cx + ox, cy + oy, style.color);
            }
        }
    }

    /// Composite `src` over this image (source-over), aligned at the top-left.
    ///
    /// Only the overlapping area is touched. An unallocated source is fully
    /// transparent and leaves this image unchanged.
    pub fn blend_over(&mut self, src: &ImageBuffer) {
        if !src.is_allocated() {
            return;
        }
        let width = self.width.min(src.width) as usize;
        let height = self.height.min(src.height) as usize;
        let dst_stride = self.width as usize * 4;
        let src_stride = src.width as usize * 4;
        let dst = self.allocate();

        for y in 0..height {
            let dst_row = &mut dst[y * dst_stride..y * dst_stride + width * 4];
            let src_row = &src.pixels[y * src_stride..y * src_stride + width * 4];
            for (d, s) in dst_row.chunks_exact_mut(4).zip(src_row.chunks_exact(4)) {
                let out = blend_pixel(Color::from_bytes(d), Color::from_bytes(s));
                d.copy_from_slice(&out.to_bytes());
            }
        }
    }
}

const OUT_LEFT: u8 = 1;
const OUT_RIGHT: u8 = 2;
const OUT_TOP: u8 = 4;
const OUT_BOTTOM: u8 = 8;

fn outcode(p: PointF, bounds: &RectF) -> u8 {
    let mut code = 0;
    if p.x < bounds.x {
        code |= OUT_LEFT;
    } else if p.x > bounds.right() {
        code |= OUT_RIGHT;
    }
    if p.y < bounds.y {
        code |= OUT_TOP;
    } else if p.y > bounds.bottom() {
        code |= OUT_BOTTOM;
    }
    code
}

/// Cohen-Sutherland clipping of the segment `a`-`b` to `bounds`.
///
/// Intersections put the clipped coordinate exactly on the edge, so end
/// points far outside do not lose precision on the inside.
fn clip_segment(mut a: PointF, mut b: PointF, bounds: &RectF) -> Option<(PointF, PointF)> {
    if ![a.x, a.y, b.x, b.y].iter().all(|v| v.is_finite()) {
        return None;
    }

    let mut code_a = outcode(a, bounds);
    let mut code_b = outcode(b, bounds);
    // Each pass moves one end point onto an edge; rounding may need a second.
    for _ in 0..8 {
        if code_a | code_b == 0 {
            return Some((a, b));
        }
        if code_a & code_b != 0 {
            return None;
        }

        let out = if code_a != 0 { code_a } else { code_b };
        let (dx, dy) = (b.x - a.x, b.y - a.y);
        let p = if out & OUT_TOP != 0 {
            PointF::new(a.x + dx * (bounds.y - a.y) / dy, bounds.y)
        } else if out & OUT_BOTTOM != 0 {
            PointF::new(a.x + dx * (bounds.bottom() - a.y) / dy, bounds.bottom())
        } else if out & OUT_LEFT != 0 {
            PointF::new(bounds.x, a.y + dy * (bounds.x - a.x) / dx)
        } else {
            PointF::new(bounds.right(), a.y + dy * (bounds.right() - a.x) / dx)
        };

        if out == code_a {
            a = p;
            code_a = outcode(a, bounds);
        } else {
            b = p;
            code_b = outcode(b, bounds);
        }
    }
    None
}

/// Straight-alpha source-over for one pixel.
fn blend_pixel(base: Color, top: Color) -> Color {
    if top.a == 0 {
        return base;
    }
    if top.a == 255 || base.a == 0 {
        return top;
    }

    let ta = top.a as f32 / 255.0;
    let ba = base.a as f32 / 255.0;
    let out_a = ta + ba * (1.0 - ta);

    let channel = |t: u8, b: u8| {
        let value = (t as f32 * ta + b as f32 * ba * (1.0 - ta)) / out_a;
        value.round().clamp(0.0, 255.0) as u8
    };

    Color::rgba(
        channel(top.r, base.r),
        channel(top.g, base.g),
        channel(top.b, base.b),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    )
}
