//! Tiled Scene Render Library
//!
//! Progressive compositing of a stack of 2D layers over a fixed tile grid.
//! Layer patches are recomputed on worker threads, blended into a composite
//! per tile and painted as they arrive, with a brushing overlay on top and a
//! progress pie over tiles still waiting for data.
//!
//! ```
//! use tilescene_render::{PointF, RectF, TileGrid, Transform};
//!
//! let grid = TileGrid::new((300, 200), Transform::swap_axes(), 256);
//! assert_eq!(grid.len(), 2);
//! assert_eq!(grid.bounding_rect_f(), RectF::new(0.0, 0.0, 200.0, 300.0));
//! assert_eq!(grid.contains_point_f(PointF::new(10.0, 280.0)), Some(1));
//! ```

pub mod config;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod image;
pub mod indicator;
pub mod patch;
pub mod renderer;
pub mod scene;
pub mod store;
pub mod surface;

pub use config::{SceneConfig, TILE_SIZE};
pub use error::{ConfigError, RenderError, RenderResult};
pub use geometry::{PointF, Rect, RectF, Transform};
pub use grid::{TileGrid, TileId};
pub use image::{Color, ImageBuffer, StrokeStyle};
pub use indicator::DirtyIndicator;
pub use patch::{PatchGuard, PatchVersions, TilePatch};
pub use renderer::{
    composite_tile, CompletionCallback, PatchRenderer, PatchSource, RepaintQueue, StoreHandle,
    StoreSet,
};
pub use scene::TileScene;
pub use store::{LayeredTileStore, StoreRole};
pub use surface::{PaintOp, PaintTarget, RecordingTarget};
