//! Tile grid
//!
//! Partitions the data plane into fixed-size tiles and answers geometric
//! queries in scene coordinates. A grid is immutable; the scene builds a new
//! one whenever the plane shape changes.

use crate::geometry::{PointF, Rect, RectF, Transform};

/// Dense tile index, row-major in data coordinates.
pub type TileId = usize;

/// Fixed-size subdivision of a 2D data plane.
///
/// Edge tiles are clipped to the plane, so they may be smaller than
/// `tile_size`.
///
/// # Example
///
/// ```
/// use tilescene_render::{PointF, RectF, TileGrid, Transform};
///
/// // 300 x 200 data pixels, 128 pixel tiles: 3 x 2 tiles.
/// let grid = TileGrid::new((300, 200), Transform::identity(), 128);
/// assert_eq!(grid.len(), 6);
///
/// assert_eq!(grid.contains_point_f(PointF::new(130.0, 10.0)), Some(2));
/// assert_eq!(grid.intersected_f(&RectF::new(0.0, 0.0, 140.0, 10.0)), vec![0, 2]);
/// ```
#[derive(Debug, Clone)]
pub struct TileGrid {
    tile_size: usize,
    data_shape: (usize, usize),
    data_to_scene: Transform,
    data_rects: Vec<Rect>,
    scene_rects: Vec<Rect>,
    scene_rects_f: Vec<RectF>,
    bounding: RectF,
}

impl TileGrid {
    /// Tile a data plane of `data_shape` (extent along data x, data y).
    ///
    /// A zero `tile_size` is treated as 1.
    pub fn new(data_shape: (usize, usize), data_to_scene: Transform, tile_size: usize) -> Self {
        let tile_size = tile_size.max(1);
        let (width, height) = data_shape;

        let mut data_rects = Vec::new();
        for x in (0..width).step_by(tile_size) {
            for y in (0..height).step_by(tile_size) {
                let w = tile_size.min(width - x);
                let h = tile_size.min(height - y);
                data_rects.push(Rect::new(x as i64, y as i64, w as i64, h as i64));
            }
        }

        let scene_rects_f: Vec<RectF> = data_rects
            .iter()
            .map(|r| data_to_scene.map_rect_f(&r.to_f()))
            .collect();
        let scene_rects = scene_rects_f.iter().map(RectF::to_aligned_rect).collect();
        let bounding = scene_rects_f
            .iter()
            .fold(RectF::default(), |acc, r| acc.united(r));

        Self {
            tile_size,
            data_shape,
            data_to_scene,
            data_rects,
            scene_rects,
            scene_rects_f,
            bounding,
        }
    }

    /// Number of tiles
    pub fn len(&self) -> usize {
        self.data_rects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_rects.is_empty()
    }

    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    pub fn data_shape(&self) -> (usize, usize) {
        self.data_shape
    }

    pub fn data_to_scene(&self) -> &Transform {
        &self.data_to_scene
    }

    /// Tile rectangle in data coordinates
    pub fn data_rect(&self, id: TileId) -> Option<Rect> {
        self.data_rects.get(id).copied()
    }

    /// Tile rectangle in scene coordinates
    pub fn scene_rect(&self, id: TileId) -> Option<Rect> {
        self.scene_rects.get(id).copied()
    }

    /// Tile rectangle in scene coordinates, floating precision
    pub fn scene_rect_f(&self, id: TileId) -> Option<RectF> {
        self.scene_rects_f.get(id).copied()
    }

    /// All tile rectangles in scene coordinates, indexed by tile id
    pub fn scene_rects_f(&self) -> &[RectF] {
        &self.scene_rects_f
    }

    /// Union of all tiles in scene coordinates
    pub fn bounding_rect_f(&self) -> RectF {
        self.bounding
    }

    /// The tile containing the scene point `p`, if any.
    pub fn contains_point_f(&self, p: PointF) -> Option<TileId> {
        if !self.bounding.contains(p) {
            return None;
        }
        self.scene_rects_f.iter().position(|r| r.contains(p))
    }

    /// Ids of all tiles overlapping `rect` in scene coordinates, ascending.
    pub fn intersected(&self, rect: &Rect) -> Vec<TileId> {
        if rect.is_empty() {
            return Vec::new();
        }
        self.scene_rects
            .iter()
            .enumerate()
            .filter(|(_, r)| r.intersects(rect))
            .map(|(id, _)| id)
            .collect()
    }

    /// Ids of all tiles overlapping `rect` in scene coordinates, ascending.
    pub fn intersected_f(&self, rect: &RectF) -> Vec<TileId> {
        if rect.is_empty() || !rect.intersects(&self.bounding) {
            return Vec::new();
        }
        self.scene_rects_f
            .iter()
            .enumerate()
            .filter(|(_, r)| r.intersects(rect))
            .map(|(id, _)| id)
            .collect()
    }
}
