//! Per-tile progress overlay.
//!
//! A tile is complete once every layer patch shows its current data. Tiles
//! that are not complete get a red pie whose span is proportional to the
//! fraction of layers still missing.

use crate::geometry::{PointF, RectF};
use crate::grid::{TileGrid, TileId};
use crate::image::Color;
use crate::surface::PaintTarget;

const DIRTY_COLOR: Color = Color::RED;
const OPACITY: f64 = 0.5;

/// Progress overlay for all tiles of a grid
#[derive(Debug, Clone)]
pub struct DirtyIndicator {
    /// Completion per tile in [0, 1]
    progress: Vec<f64>,
    visible: bool,
}

impl DirtyIndicator {
    /// Indicator for `num_tiles` tiles, all complete.
    pub fn new(num_tiles: usize) -> Self {
        Self {
            progress: vec![1.0; num_tiles],
            visible: true,
        }
    }

    pub fn len(&self) -> usize {
        self.progress.len()
    }

    pub fn is_empty(&self) -> bool {
        self.progress.is_empty()
    }

    /// Set a tile's progress, clamped to [0, 1]. Unknown tiles are ignored.
    pub fn set_tile_progress(&mut self, tile: TileId, progress: f64) {
        if let Some(slot) = self.progress.get_mut(tile) {
            *slot = if progress.is_nan() {
                0.0
            } else {
                progress.clamp(0.0, 1.0)
            };
        }
    }

    pub fn tile_progress(&self, tile: TileId) -> Option<f64> {
        self.progress.get(tile).copied()
    }

    /// Set every tile to the same progress.
    pub fn reset(&mut self, progress: f64) {
        for tile in 0..self.progress.len() {
            self.set_tile_progress(tile, progress);
        }
    }

    /// Number of tiles not yet complete
    pub fn incomplete_tiles(&self) -> usize {
        self.progress.iter().filter(|&&p| p < 1.0).count()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Bounds of a tile's pie: a square of half the tile's shorter side,
    /// centered on the tile.
    pub fn pie_bounds(tile_rect: &RectF) -> RectF {
        let r = tile_rect.width.min(tile_rect.height);
        let c = tile_rect.center();
        RectF::from_corners(
            PointF::new(c.x - r / 4.0, c.y - r / 4.0),
            PointF::new(c.x + r / 4.0, c.y + r / 4.0),
        )
    }

    /// Draw pies for all incomplete tiles of `grid`.
    pub fn paint(&self, target: &mut dyn PaintTarget, grid: &TileGrid) {
        if !self.visible {
            return;
        }
        for (tile, rect) in grid.scene_rects_f().iter().enumerate() {
            let progress = self.progress.get(tile).copied().unwrap_or(1.0);
            if progress >= 1.0 {
                continue;
            }
            let span = ((1.0 - progress) * 360.0).min(360.0);
            target.draw_pie(Self::pie_bounds(rect), 0.0, span, DIRTY_COLOR, OPACITY);
        }
    }
}
