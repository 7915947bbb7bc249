//! Tiled scene compositor
//!
//! [`TileScene`] owns the tile grid, one store per layer plus the composite
//! and brushing stores, and the progress overlay. It runs the paint and
//! invalidation protocol on the display thread and hands recomputation to a
//! [`PatchScheduler`].
//!
//! # Paint protocol
//!
//! On every background paint over a region, each stale layer patch that has
//! not been requested at its current data version is requested exactly once.
//! The composite patches are drawn, and per-tile progress is recomputed as
//! the share of layers showing their current data. Results arrive on worker
//! threads, which write the patch, re-composite the tile and queue the tile
//! for repaint; the next paint pass picks them up.
//!
//! Completions for superseded data versions are written but leave the patch
//! stale, so it is requested again at its new version.

use crate::config::SceneConfig;
use crate::error::RenderResult;
use crate::geometry::{PointF, Rect, RectF, Transform};
use crate::grid::TileId;
use crate::image::{Color, StrokeStyle};
use crate::indicator::DirtyIndicator;
use crate::renderer::{
    composite_tile, PatchRenderer, PatchSource, RepaintQueue, StoreHandle, StoreSet,
};
use crate::surface::PaintTarget;
use std::sync::Arc;
use tilescene_cache::{CacheGraph, CacheId};
use tilescene_scheduler::{PatchRequest, PatchScheduler, RenderService};

const DEBUG_OUTLINE: Color = Color::rgb(0, 0, 255);

/// The scene's node in a cache graph and the store caches below it
struct CacheAttachment {
    graph: Arc<CacheGraph>,
    node: CacheId,
    stores: Vec<CacheId>,
}

/// Tiled 2D scene compositing several asynchronously computed layers
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tilescene_render::{
///     Color, ImageBuffer, PatchSource, Rect, RecordingTarget, SceneConfig, TileScene,
/// };
/// use tilescene_scheduler::CancellationToken;
///
/// struct Gray;
///
/// impl PatchSource for Gray {
///     fn render(
///         &self,
///         _layer: usize,
///         _data_rect: Rect,
///         size: (u32, u32),
///         _token: &CancellationToken,
///     ) -> Option<ImageBuffer> {
///         Some(ImageBuffer::filled(size.0, size.1, Color::rgb(128, 128, 128)))
///     }
/// }
///
/// let config = SceneConfig::default().with_workers(2);
/// let mut scene = TileScene::new(config, Arc::new(Gray)).unwrap();
/// scene.set_scene_shape((512, 512)).unwrap();
/// scene.on_about_to_resize(2).unwrap();
/// scene.on_stack_changed();
///
/// let mut target = RecordingTarget::new();
/// let region = scene.stores().grid().bounding_rect_f();
/// scene.paint_background(&mut target, region);
/// scene.paint_dirty_indicator(&mut target);
///
/// // Workers report finished tiles; repaint those regions.
/// for rect in scene.take_repaints() {
///     scene.paint_background(&mut target, rect);
/// }
/// ```
pub struct TileScene {
    config: SceneConfig,
    data_to_scene: Transform,
    scene_to_data: Transform,
    /// Scene extent as (width, height)
    scene_shape: (usize, usize),
    num_layers: usize,
    stores: Arc<StoreHandle>,
    indicator: DirtyIndicator,
    scheduler: Arc<dyn PatchScheduler>,
    repaints: Arc<RepaintQueue>,
    show_debug_patches: bool,
    slicing_position_settled: bool,
    cache: Option<CacheAttachment>,
}

impl TileScene {
    /// Create an empty scene rendering through worker threads.
    ///
    /// `source` computes layer patches on the workers.
    ///
    /// # Errors
    /// Fails if the configuration is invalid or the workers cannot be started.
    pub fn new(config: SceneConfig, source: Arc<dyn PatchSource>) -> RenderResult<Self> {
        config.validate()?;

        let stores = Arc::new(StoreHandle::new(StoreSet::empty()));
        let repaints = Arc::new(RepaintQueue::new());

        let completion = {
            let stores = stores.clone();
            let repaints = repaints.clone();
            Arc::new(move |_layer: usize, tile: TileId| {
                if let Some(rect) = stores.load().grid().scene_rect_f(tile) {
                    repaints.push(rect);
                }
            })
        };
        let executor = PatchRenderer::new(stores.clone(), source)
            .with_completion(completion)
            .into_executor();
        let scheduler = Arc::new(RenderService::new(executor, config.worker_pool()));

        Self::assemble(config, stores, repaints, scheduler)
    }

    /// Create an empty scene using an external scheduler.
    ///
    /// The scheduler's workers are expected to write results into
    /// [`TileScene::store_handle`] and call [`TileScene::on_patch_available`].
    pub fn with_scheduler(config: SceneConfig, scheduler: Arc<dyn PatchScheduler>) -> RenderResult<Self> {
        config.validate()?;
        let stores = Arc::new(StoreHandle::new(StoreSet::empty()));
        Self::assemble(config, stores, Arc::new(RepaintQueue::new()), scheduler)
    }

    fn assemble(
        config: SceneConfig,
        stores: Arc<StoreHandle>,
        repaints: Arc<RepaintQueue>,
        scheduler: Arc<dyn PatchScheduler>,
    ) -> RenderResult<Self> {
        let data_to_scene = Transform::swap_axes();
        scheduler.start()?;

        Ok(Self {
            config,
            data_to_scene,
            scene_to_data: data_to_scene.transposed(),
            scene_shape: (0, 0),
            num_layers: 0,
            stores,
            indicator: DirtyIndicator::new(0),
            scheduler,
            repaints,
            show_debug_patches: false,
            slicing_position_settled: true,
            cache: None,
        })
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    /// Maps data coordinates (x down, y right) to scene coordinates.
    pub fn data_to_scene(&self) -> &Transform {
        &self.data_to_scene
    }

    pub fn scene_to_data(&self) -> &Transform {
        &self.scene_to_data
    }

    /// Scene extent as (width, height), x pointing right and y down.
    pub fn scene_shape(&self) -> (usize, usize) {
        self.scene_shape
    }

    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    /// Snapshot of the current grid and stores
    pub fn stores(&self) -> Arc<StoreSet> {
        self.stores.load()
    }

    /// Shared handle through which workers reach the current stores
    pub fn store_handle(&self) -> &Arc<StoreHandle> {
        &self.stores
    }

    pub fn scheduler(&self) -> &Arc<dyn PatchScheduler> {
        &self.scheduler
    }

    pub fn indicator(&self) -> &DirtyIndicator {
        &self.indicator
    }

    /// Progress last computed for a tile, in [0, 1]
    pub fn tile_progress(&self, tile: TileId) -> Option<f64> {
        self.indicator.tile_progress(tile)
    }

    /// Resize the scene. Rebuilds the grid and all stores.
    pub fn set_scene_shape(&mut self, shape: (usize, usize)) -> RenderResult<()> {
        self.on_plane_shape_will_change(shape);
        self.on_plane_shape_did_change()
    }

    /// Stop rendering ahead of a change to `shape`.
    ///
    /// Must be followed by [`TileScene::on_plane_shape_did_change`].
    pub fn on_plane_shape_will_change(&mut self, shape: (usize, usize)) {
        self.scheduler.stop();
        self.scene_shape = shape;
    }

    /// Rebuild for the new plane shape and resume rendering.
    pub fn on_plane_shape_did_change(&mut self) -> RenderResult<()> {
        self.initialize_patches()
    }

    /// The layer stack is about to hold `num_layers` layers.
    pub fn on_about_to_resize(&mut self, num_layers: usize) -> RenderResult<()> {
        self.scheduler.stop();
        self.num_layers = num_layers;
        self.initialize_patches()
    }

    /// The layer stack changed in content or order: invalidate everything.
    pub fn on_stack_changed(&mut self) {
        self.invalidate_rect(None);
    }

    /// Stop, rebuild grid, stores and indicator in their initial current
    /// state, restart.
    fn initialize_patches(&mut self) -> RenderResult<()> {
        self.scheduler.stop();

        let (width, height) = self.scene_shape;
        let data = self
            .scene_to_data
            .map_rect(&Rect::new(0, 0, width as i64, height as i64));
        let grid = crate::grid::TileGrid::new(
            (data.width.max(0) as usize, data.height.max(0) as usize),
            self.data_to_scene,
            self.config.tile_size,
        );

        let visible = self.indicator.is_visible();
        self.indicator = DirtyIndicator::new(grid.len());
        self.indicator.set_visible(visible);

        log::info!(
            "initializing scene patches: {} tiles, {} layers",
            grid.len(),
            self.num_layers
        );
        self.stores.replace(StoreSet::new(grid, self.num_layers));

        self.scheduler.start()?;
        self.register_stores()
    }

    /// Data of `layer` changed within `region` (scene coordinates).
    ///
    /// `None` means the whole plane changed. Unknown layers are ignored.
    pub fn on_layer_dirty(&mut self, layer: usize, region: Option<Rect>) {
        let stores = self.stores.load();
        let Some(store) = stores.layer(layer) else {
            log::warn!(
                "ignoring dirty notification for unknown layer {} ({} layers)",
                layer,
                stores.num_layers()
            );
            return;
        };

        match region {
            Some(rect) => {
                for tile in stores.grid().intersected(&rect) {
                    if let Some(patch) = store.patch(tile) {
                        patch.lock().bump_data_version();
                    }
                }
                self.invalidate_rect(Some(rect.to_f()));
            }
            None => self.invalidate_rect(None),
        }
    }

    /// Invalidate `region` (scene coordinates), or everything for `None`.
    ///
    /// Full invalidation cancels all outstanding requests, clears the
    /// brushing overlay, marks every layer patch stale and resets all progress
    /// to zero. In both cases the affected composite patches are marked stale
    /// and queued for repaint. Tiles whose layers are all current get no
    /// completion that would rebuild them, so they are re-composited here.
    pub fn invalidate_rect(&mut self, region: Option<RectF>) {
        let stores = self.stores.load();

        let region = match region {
            Some(rect) => rect,
            None => {
                self.scheduler.cancel_all();

                for patch in stores.brushing().iter() {
                    let mut guard = patch.lock();
                    guard.image_mut().release();
                    guard.mark_current();
                }
                for store in stores.layers() {
                    for patch in store.iter() {
                        patch.lock().bump_data_version();
                    }
                }
                self.indicator.reset(0.0);

                log::info!(
                    "full invalidation: {} tiles, {} layers",
                    stores.grid().len(),
                    stores.num_layers()
                );
                stores.grid().bounding_rect_f()
            }
        };

        for tile in stores.grid().intersected_f(&region) {
            if let Some(patch) = stores.composite().patch(tile) {
                patch.lock().bump_data_version();
            }
            if layers_current(&stores, tile) {
                composite_tile(&stores, tile);
            }
            self.schedule_patch_redraw(&stores, tile);
        }
    }

    /// A worker finished a patch of `layer` on `tile`; queue its repaint.
    ///
    /// Safe to call from any thread.
    pub fn on_patch_available(&self, layer: usize, tile: TileId) {
        let stores = self.stores.load();
        if layer >= stores.num_layers() || tile >= stores.grid().len() {
            log::warn!(
                "ignoring patch notification for layer {} tile {} ({} layers, {} tiles)",
                layer,
                tile,
                stores.num_layers(),
                stores.grid().len()
            );
            return;
        }
        self.schedule_patch_redraw(&stores, tile);
    }

    fn schedule_patch_redraw(&self, stores: &StoreSet, tile: TileId) {
        if let Some(rect) = stores.grid().scene_rect_f(tile) {
            self.repaints.push(rect);
        }
    }

    /// Drain the scene regions that need repainting.
    pub fn take_repaints(&self) -> Vec<RectF> {
        self.repaints.take()
    }

    /// Brush a line segment (scene coordinates) into the overlay.
    ///
    /// Only the tile containing `to` is drawn into. Returns whether a tile
    /// was hit.
    pub fn draw_stroke(&self, from: PointF, to: PointF, style: &StrokeStyle) -> bool {
        let stores = self.stores.load();
        let Some(tile) = stores.grid().contains_point_f(to) else {
            return false;
        };
        let Some(patch) = stores.brushing().patch(tile) else {
            return false;
        };

        {
            let origin = patch.scene_rect().top_left();
            let mut guard = patch.lock();
            guard.image_mut().draw_line(from - origin, to - origin, style);
            guard.bump_data_version();
        }
        stores.brushing().touch();

        self.schedule_patch_redraw(&stores, tile);
        true
    }

    /// Paint the composite for `region` and request stale layer patches.
    ///
    /// A stale composite over current layers, for example one whose memory
    /// was reclaimed, is rebuilt before painting. Returns the number of
    /// requests issued.
    pub fn paint_background(&mut self, target: &mut dyn PaintTarget, region: RectF) -> usize {
        let stores = self.stores.load();
        let tiles = stores.grid().intersected_f(&region);
        let mut issued = 0;

        for &tile in &tiles {
            for (layer, store) in stores.layers().iter().enumerate() {
                let Some(patch) = store.patch(tile) else {
                    continue;
                };
                let mut guard = patch.lock();
                if guard.needs_request() {
                    let version = guard.mark_requested();
                    log::debug!(
                        "requesting layer={} tile={} version={} rect={:?}",
                        layer,
                        tile,
                        version,
                        patch.scene_rect()
                    );
                    self.scheduler
                        .request_patch(PatchRequest::new(layer, tile, version));
                    issued += 1;
                }
            }
        }

        for &tile in &tiles {
            let Some(patch) = stores.composite().patch(tile) else {
                continue;
            };
            if patch.versions().is_stale() && layers_current(&stores, tile) {
                log::trace!("re-compositing tile {}", tile);
                composite_tile(&stores, tile);
            }
            patch.paint(target);
            if self.show_debug_patches {
                target.stroke_rect(patch.scene_rect(), DEBUG_OUTLINE);
            }
        }

        let num_layers = stores.num_layers();
        for &tile in &tiles {
            // Advisory: versions may change under us without harm.
            let dirty = stores
                .layers()
                .iter()
                .filter_map(|store| store.patch(tile))
                .filter(|patch| patch.peek_versions().is_stale())
                .count();
            let progress = if num_layers == 0 {
                1.0
            } else {
                1.0 - dirty as f64 / num_layers as f64
            };
            self.indicator.set_tile_progress(tile, progress);
        }

        if !tiles.is_empty() {
            stores.composite().touch();
            for store in stores.layers() {
                store.touch();
            }
        }
        issued
    }

    /// Paint brushing patches in `region` that changed since they were last
    /// made current. Returns the number of patches drawn.
    pub fn paint_foreground(&self, target: &mut dyn PaintTarget, region: RectF) -> usize {
        let stores = self.stores.load();
        let mut painted = 0;
        for tile in stores.grid().intersected_f(&region) {
            let Some(patch) = stores.brushing().patch(tile) else {
                continue;
            };
            let guard = patch.lock();
            if guard.is_stale() {
                target.draw_image(patch.scene_rect(), guard.image());
                painted += 1;
            }
        }
        painted
    }

    /// Paint the progress pies over incomplete tiles.
    pub fn paint_dirty_indicator(&self, target: &mut dyn PaintTarget) {
        let stores = self.stores.load();
        self.indicator.paint(target, stores.grid());
    }

    pub fn show_debug_patches(&self) -> bool {
        self.show_debug_patches
    }

    /// Toggle tile outlines in the background pass. Invalidates everything.
    pub fn set_show_debug_patches(&mut self, show: bool) {
        self.show_debug_patches = show;
        self.invalidate_rect(None);
    }

    /// Show the progress overlay only while the slicing position is settled.
    pub fn indicate_slicing_position_settled(&mut self, settled: bool) {
        self.indicator.set_visible(settled);
        self.slicing_position_settled = settled;
    }

    pub fn is_slicing_position_settled(&self) -> bool {
        self.slicing_position_settled
    }

    /// Report the scene's stores as first-class caches of `graph`.
    ///
    /// A plain node for the scene is inserted under `parent`, and one cache
    /// per store below it. The store caches are replaced whenever the scene
    /// rebuilds. Returns the scene node.
    pub fn attach_cache_graph(
        &mut self,
        graph: Arc<CacheGraph>,
        parent: Option<CacheId>,
    ) -> RenderResult<CacheId> {
        self.detach_cache_graph();
        let node = graph.insert_plain(parent, "tile scene")?;
        self.cache = Some(CacheAttachment {
            graph,
            node,
            stores: Vec::new(),
        });
        self.register_stores()?;
        Ok(node)
    }

    /// Remove the scene node and its store caches from the attached graph.
    pub fn detach_cache_graph(&mut self) {
        if let Some(attachment) = self.cache.take() {
            if let Err(err) = attachment.graph.remove(attachment.node) {
                log::debug!("scene cache node already removed: {}", err);
            }
        }
    }

    /// The scene's node in the attached cache graph
    pub fn cache_node(&self) -> Option<CacheId> {
        self.cache.as_ref().map(|attachment| attachment.node)
    }

    fn register_stores(&mut self) -> RenderResult<()> {
        let Some(attachment) = self.cache.as_mut() else {
            return Ok(());
        };

        for id in attachment.stores.drain(..) {
            if let Err(err) = attachment.graph.remove(id) {
                log::debug!("store cache already removed: {}", err);
            }
        }

        let stores = self.stores.load();
        for store in stores.all_stores() {
            let id = attachment.graph.insert_cache(Some(attachment.node), store.clone())?;
            attachment.stores.push(id);
        }
        Ok(())
    }
}

/// Whether every layer patch of `tile` shows its current data
fn layers_current(stores: &StoreSet, tile: TileId) -> bool {
    stores
        .layers()
        .iter()
        .filter_map(|store| store.patch(tile))
        .all(|patch| !patch.versions().is_stale())
}

impl Drop for TileScene {
    fn drop(&mut self) {
        self.scheduler.stop();
        self.detach_cache_graph();
    }
}
