//! Plane geometry
//!
//! Integer and floating rectangles, points, and the affine transform that
//! maps between data and scene coordinates.
//!
//! Rectangles are half-open: a rectangle at `x` with width `w` covers
//! `x <= px < x + w`. Two rectangles intersect only if they share a region
//! of positive area, so tiles that merely touch do not intersect.

use std::ops::{Add, Sub};

/// Point in floating scene coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointF {
    pub x: f64,
    pub y: f64,
}

impl PointF {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl Add for PointF {
    type Output = PointF;

    fn add(self, rhs: PointF) -> PointF {
        PointF::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for PointF {
    type Output = PointF;

    fn sub(self, rhs: PointF) -> PointF {
        PointF::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Integer rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl Rect {
    pub const fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self { x, y, width, height }
    }

    /// Exclusive right edge
    pub fn right(&self) -> i64 {
        self.x + self.width
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> i64 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Whether the two rectangles share a non-empty region.
    pub fn intersects(&self, other: &Rect) -> bool {
        !self.intersected(other).is_empty()
    }

    /// The common region, empty if there is none.
    pub fn intersected(&self, other: &Rect) -> Rect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        Rect::new(x, y, (right - x).max(0), (bottom - y).max(0))
    }

    pub fn to_f(&self) -> RectF {
        RectF::new(
            self.x as f64,
            self.y as f64,
            self.width as f64,
            self.height as f64,
        )
    }
}

/// Floating rectangle
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RectF {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl RectF {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle spanning two corner points, in any order.
    pub fn from_corners(a: PointF, b: PointF) -> Self {
        let x = a.x.min(b.x);
        let y = a.y.min(b.y);
        Self::new(x, y, a.x.max(b.x) - x, a.y.max(b.y) - y)
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn top_left(&self) -> PointF {
        PointF::new(self.x, self.y)
    }

    pub fn center(&self) -> PointF {
        PointF::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Empty if either extent is not positive (or NaN).
    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    pub fn contains(&self, p: PointF) -> bool {
        p.x >= self.x && p.x < self.right() && p.y >= self.y && p.y < self.bottom()
    }

    pub fn intersects(&self, other: &RectF) -> bool {
        !self.intersected(other).is_empty()
    }

    pub fn intersected(&self, other: &RectF) -> RectF {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        RectF::new(x, y, (right - x).max(0.0), (bottom - y).max(0.0))
    }

    /// Smallest rectangle containing both. Empty rectangles are ignored.
    pub fn united(&self, other: &RectF) -> RectF {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        RectF::new(
            x,
            y,
            self.right().max(other.right()) - x,
            self.bottom().max(other.bottom()) - y,
        )
    }

    /// Integer rectangle covering this one.
    pub fn to_aligned_rect(&self) -> Rect {
        let x = self.x.floor() as i64;
        let y = self.y.floor() as i64;
        Rect::new(
            x,
            y,
            self.right().ceil() as i64 - x,
            self.bottom().ceil() as i64 - y,
        )
    }
}

/// 2D affine transform
///
/// Row-vector convention: a point maps as
/// `x' = m11 * x + m21 * y + dx` and `y' = m12 * x + m22 * y + dy`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub m11: f64,
    pub m12: f64,
    pub m21: f64,
    pub m22: f64,
    pub dx: f64,
    pub dy: f64,
}

impl Transform {
    pub const fn new(m11: f64, m12: f64, m21: f64, m22: f64, dx: f64, dy: f64) -> Self {
        Self {
            m11,
            m12,
            m21,
            m22,
            dx,
            dy,
        }
    }

    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    /// Exchanges the x and y axes.
    ///
    /// Data arrays index the vertical screen axis first, so this is the
    /// default mapping from data to scene coordinates.
    pub const fn swap_axes() -> Self {
        Self::new(0.0, 1.0, 1.0, 0.0, 0.0, 0.0)
    }

    pub fn map_point(&self, p: PointF) -> PointF {
        PointF::new(
            self.m11 * p.x + self.m21 * p.y + self.dx,
            self.m12 * p.x + self.m22 * p.y + self.dy,
        )
    }

    /// Bounding rectangle of the mapped corners.
    pub fn map_rect_f(&self, r: &RectF) -> RectF {
        let corners = [
            self.map_point(PointF::new(r.x, r.y)),
            self.map_point(PointF::new(r.right(), r.y)),
            self.map_point(PointF::new(r.x, r.bottom())),
            self.map_point(PointF::new(r.right(), r.bottom())),
        ];
        let (mut min, mut max) = (corners[0], corners[0]);
        for c in &corners[1..] {
            min = PointF::new(min.x.min(c.x), min.y.min(c.y));
            max = PointF::new(max.x.max(c.x), max.y.max(c.y));
        }
        RectF::from_corners(min, max)
    }

    /// Bounding integer rectangle of the mapped corners.
    pub fn map_rect(&self, r: &Rect) -> Rect {
        self.map_rect_f(&r.to_f()).to_aligned_rect()
    }

    pub fn determinant(&self) -> f64 {
        self.m11 * self.m22 - self.m12 * self.m21
    }

    /// Inverse transform, or `None` if the transform is singular.
    pub fn inverted(&self) -> Option<Transform> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let m11 = self.m22 / det;
        let m12 = -self.m12 / det;
        let m21 = -self.m21 / det;
        let m22 = self.m11 / det;
        Some(Transform::new(
            m11,
            m12,
            m21,
            m22,
            -(self.dx * m11 + self.dy * m21),
            -(self.dx * m12 + self.dy * m22),
        ))
    }

    /// Transposes the linear part. Translation is not carried over.
    pub fn transposed(&self) -> Transform {
        Transform::new(self.m11, self.m21, self.m12, self.m22, 0.0, 0.0)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}
