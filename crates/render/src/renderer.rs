//! Worker-side patch rendering
//!
//! The [`PatchRenderer`] runs on render workers. For each request it asks
//! the [`PatchSource`] for the layer's image, writes it into the layer
//! patch, re-composites the tile, and reports the tile as available.
//!
//! Lock order: a composite patch may be locked before layer patches, never
//! the other way round.

use crate::error::RenderError;
use crate::geometry::{Rect, RectF};
use crate::grid::{TileGrid, TileId};
use crate::image::ImageBuffer;
use crate::store::{LayeredTileStore, StoreRole};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tilescene_scheduler::{CancellationToken, PatchExecutor, PatchRequest};

/// Backend computing layer images.
pub trait PatchSource: Send + Sync {
    /// Compute `layer` for the data rectangle of one tile.
    ///
    /// `size` is the `(width, height)` of the patch image in scene pixels;
    /// the returned image must have exactly that size. Return `None` if no
    /// image can be produced, for example because `token` was cancelled.
    fn render(
        &self,
        layer: usize,
        data_rect: Rect,
        size: (u32, u32),
        token: &CancellationToken,
    ) -> Option<ImageBuffer>;
}

/// Invoked with `(layer, tile)` after a patch has been written.
pub type CompletionCallback = Arc<dyn Fn(usize, TileId) + Send + Sync>;

/// The grid and all stores of a scene at one point in time
#[derive(Debug)]
pub struct StoreSet {
    grid: TileGrid,
    layers: Vec<Arc<LayeredTileStore>>,
    composite: Arc<LayeredTileStore>,
    brushing: Arc<LayeredTileStore>,
}

impl StoreSet {
    pub fn new(grid: TileGrid, num_layers: usize) -> Self {
        let layers = (0..num_layers)
            .map(|i| {
                Arc::new(LayeredTileStore::new(
                    format!("layer {}", i),
                    StoreRole::Layer,
                    &grid,
                ))
            })
            .collect();
        let composite = Arc::new(LayeredTileStore::new("composite", StoreRole::Composite, &grid));
        let brushing = Arc::new(LayeredTileStore::new("brushing", StoreRole::Brushing, &grid));
        Self {
            grid,
            layers,
            composite,
            brushing,
        }
    }

    /// A set without tiles or layers
    pub fn empty() -> Self {
        Self::new(TileGrid::new((0, 0), Default::default(), 1), 0)
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> &[Arc<LayeredTileStore>] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&Arc<LayeredTileStore>> {
        self.layers.get(index)
    }

    pub fn composite(&self) -> &Arc<LayeredTileStore> {
        &self.composite
    }

    pub fn brushing(&self) -> &Arc<LayeredTileStore> {
        &self.brushing
    }

    /// Layer stores, then composite, then brushing
    pub fn all_stores(&self) -> impl Iterator<Item = &Arc<LayeredTileStore>> {
        self.layers
            .iter()
            .chain(std::iter::once(&self.composite))
            .chain(std::iter::once(&self.brushing))
    }
}

/// Shared, swappable reference to the current [`StoreSet`]
///
/// Workers load a snapshot per request, so a rebuild never pulls stores out
/// from under running work.
#[derive(Debug)]
pub struct StoreHandle {
    current: RwLock<Arc<StoreSet>>,
}

impl StoreHandle {
    pub fn new(stores: StoreSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(stores)),
        }
    }

    pub fn load(&self) -> Arc<StoreSet> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install a new set, returning the previous one.
    pub fn replace(&self, stores: StoreSet) -> Arc<StoreSet> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, Arc::new(stores))
    }
}

/// Scene regions waiting to be repainted by the display layer
#[derive(Debug, Default)]
pub struct RepaintQueue {
    rects: Mutex<Vec<RectF>>,
}

impl RepaintQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `rect` unless it is already waiting.
    pub fn push(&self, rect: RectF) {
        let mut rects = self.rects.lock().unwrap_or_else(PoisonError::into_inner);
        if !rects.contains(&rect) {
            rects.push(rect);
        }
    }

    /// Drain all queued regions in the order they were pushed.
    pub fn take(&self) -> Vec<RectF> {
        std::mem::take(&mut *self.rects.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.rects.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Computes layer patches and composites tiles on worker threads
pub struct PatchRenderer {
    stores: Arc<StoreHandle>,
    source: Arc<dyn PatchSource>,
    on_complete: Option<CompletionCallback>,
}

impl PatchRenderer {
    pub fn new(stores: Arc<StoreHandle>, source: Arc<dyn PatchSource>) -> Self {
        Self {
            stores,
            source,
            on_complete: None,
        }
    }

    /// Set the callback fired after each written patch.
    pub fn with_completion(mut self, callback: CompletionCallback) -> Self {
        self.on_complete = Some(callback);
        self
    }

    /// Wrap this renderer as a scheduler executor.
    pub fn into_executor(self) -> PatchExecutor {
        let renderer = Arc::new(self);
        Arc::new(move |request: &PatchRequest, token: &CancellationToken| {
            renderer.execute(request, token)
        })
    }

    /// Handle one request: render, write back, composite, notify.
    ///
    /// Requests for patches that no longer exist and cancelled requests are
    /// dropped. Write-back failures are logged.
    pub fn execute(&self, request: &PatchRequest, token: &CancellationToken) {
        let stores = self.stores.load();
        let Some(patch) = stores
            .layer(request.layer)
            .and_then(|store| store.patch(request.tile))
        else {
            log::trace!(
                "dropping request for missing patch layer={} tile={}",
                request.layer,
                request.tile
            );
            return;
        };

        if token.is_cancelled() {
            return;
        }

        let size = {
            let guard = patch.lock();
            (guard.image().width(), guard.image().height())
        };
        let Some(image) = self
            .source
            .render(request.layer, patch.data_rect(), size, token)
        else {
            return;
        };

        if token.is_cancelled() {
            log::trace!(
                "discarding cancelled result layer={} tile={}",
                request.layer,
                request.tile
            );
            return;
        }

        if let Err(err) = self.store_result(&stores, request, image) {
            log::warn!(
                "failed to store patch layer={} tile={}: {}",
                request.layer,
                request.tile,
                err
            );
        }
    }

    /// Write a computed layer image and re-composite its tile.
    ///
    /// The patch's rendered version advances to at most `request.version`;
    /// if the data changed since the request, the patch stays stale and is
    /// requested again on the next paint pass. Returns whether the layer
    /// patch is current afterwards.
    ///
    /// # Errors
    /// Returns [`RenderError::BufferSize`] if `image` does not fit the patch.
    pub fn store_result(
        &self,
        stores: &StoreSet,
        request: &PatchRequest,
        image: ImageBuffer,
    ) -> Result<bool, RenderError> {
        let Some(store) = stores.layer(request.layer) else {
            return Ok(false);
        };
        let Some(patch) = store.patch(request.tile) else {
            return Ok(false);
        };

        let current = {
            let mut guard = patch.lock();
            guard.replace_image(image)?;
            guard.mark_rendered(request.version)
        };
        if !current {
            log::trace!(
                "stale completion layer={} tile={} version={}",
                request.layer,
                request.tile,
                request.version
            );
        }
        store.touch();

        composite_tile(stores, request.tile);

        if let Some(callback) = &self.on_complete {
            callback(request.layer, request.tile);
        }
        Ok(current)
    }
}

/// Rebuild a tile's composite from its layer patches.
///
/// Layer 0 is the top of the stack. The composite is marked current only if
/// every layer patch is current. Returns whether it was.
pub fn composite_tile(stores: &StoreSet, tile: TileId) -> bool {
    let Some(target) = stores.composite().patch(tile) else {
        return false;
    };

    let mut guard = target.lock();
    let mut image = ImageBuffer::new(guard.image().width(), guard.image().height());
    let mut all_current = true;

    for store in stores.layers().iter().rev() {
        if let Some(patch) = store.patch(tile) {
            let layer = patch.lock();
            image.blend_over(layer.image());
            all_current &= !layer.is_stale();
        }
    }

    *guard.image_mut() = image;
    if all_current {
        guard.mark_current();
    }
    stores.composite().touch();
    all_current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Transform;
    use crate::image::Color;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fills every patch with one color per layer.
    struct SolidSource {
        colors: Vec<Color>,
        calls: AtomicUsize,
    }

    impl PatchSource for SolidSource {
        fn render(
            &self,
            layer: usize,
            _data_rect: Rect,
            size: (u32, u32),
            _token: &CancellationToken,
        ) -> Option<ImageBuffer> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let color = *self.colors.get(layer)?;
            Some(ImageBuffer::filled(size.0, size.1, color))
        }
    }

    fn setup(colors: Vec<Color>) -> (Arc<StoreHandle>, Arc<SolidSource>) {
        let grid = TileGrid::new((64, 64), Transform::swap_axes(), 32);
        let stores = Arc::new(StoreHandle::new(StoreSet::new(grid, colors.len())));
        let source = Arc::new(SolidSource {
            colors,
            calls: AtomicUsize::new(0),
        });
        (stores, source)
    }

    fn invalidate(stores: &StoreSet, layer: usize, tile: TileId) -> u64 {
        let mut guard = stores.layer(layer).unwrap().patch(tile).unwrap().lock();
        guard.bump_data_version();
        guard.mark_requested()
    }

    #[test]
    fn test_store_set_layout() {
        let set = StoreSet::new(TileGrid::new((64, 64), Transform::identity(), 32), 3);
        assert_eq!(set.num_layers(), 3);
        assert_eq!(set.all_stores().count(), 5);
        assert_eq!(set.layer(2).unwrap().name(), "layer 2");
        assert_eq!(set.composite().len(), 4);
        assert!(StoreSet::empty().grid().is_empty());
    }

    #[test]
    fn test_store_handle_replace() {
        let handle = StoreHandle::new(StoreSet::empty());
        let snapshot = handle.load();
        let old = handle.replace(StoreSet::new(TileGrid::new((32, 32), Transform::identity(), 32), 1));
        assert!(Arc::ptr_eq(&snapshot, &old));
        assert_eq!(handle.load().num_layers(), 1);
    }

    #[test]
    fn test_repaint_queue() {
        let queue = RepaintQueue::new();
        queue.push(RectF::new(0.0, 0.0, 1.0, 1.0));
        queue.push(RectF::new(1.0, 0.0, 1.0, 1.0));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.take().len(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_repaint_queue_coalesces_tiles() {
        let queue = RepaintQueue::new();
        let tile = RectF::new(0.0, 0.0, 256.0, 256.0);
        for _ in 0..50 {
            queue.push(tile);
        }
        queue.push(RectF::new(256.0, 0.0, 256.0, 256.0));
        queue.push(tile);
        assert_eq!(queue.take(), vec![tile, RectF::new(256.0, 0.0, 256.0, 256.0)]);

        // Drained rects may be queued again.
        queue.push(tile);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_execute_writes_and_composites() {
        let (stores, source) = setup(vec![Color::RED]);
        let completed = Arc::new(Mutex::new(Vec::new()));
        let completed_clone = completed.clone();
        let renderer = PatchRenderer::new(stores.clone(), source.clone()).with_completion(Arc::new(
            move |layer: usize, tile: TileId| completed_clone.lock().unwrap().push((layer, tile)),
        ));

        let set = stores.load();
        let version = invalidate(&set, 0, 2);
        set.composite().patch(2).unwrap().lock().bump_data_version();

        renderer.execute(&PatchRequest::new(0, 2, version), &CancellationToken::new());

        let layer = set.layer(0).unwrap().patch(2).unwrap().lock();
        assert!(!layer.is_stale());
        assert_eq!(layer.image().pixel(0, 0), Color::RED);
        drop(layer);

        let composite = set.composite().patch(2).unwrap().lock();
        assert!(!composite.is_stale());
        assert_eq!(composite.image().pixel(5, 5), Color::RED);
        drop(composite);

        assert_eq!(*completed.lock().unwrap(), vec![(0, 2)]);
    }

    #[test]
    fn test_composite_waits_for_all_layers() {
        let (stores, source) = setup(vec![Color::rgba(0, 255, 0, 128), Color::rgb(0, 0, 255)]);
        let renderer = PatchRenderer::new(stores.clone(), source);
        let set = stores.load();

        let v0 = invalidate(&set, 0, 1);
        let v1 = invalidate(&set, 1, 1);
        set.composite().patch(1).unwrap().lock().bump_data_version();

        renderer.execute(&PatchRequest::new(1, 1, v1), &CancellationToken::new());
        assert!(set.composite().patch(1).unwrap().versions().is_stale());

        renderer.execute(&PatchRequest::new(0, 1, v0), &CancellationToken::new());
        let composite = set.composite().patch(1).unwrap().lock();
        assert!(!composite.is_stale());
        // Layer 0 is on top of layer 1.
        let px = composite.image().pixel(0, 0);
        assert_eq!(px.a, 255);
        assert!(px.g > 120 && px.b > 120);
    }

    #[test]
    fn test_superseded_result_leaves_patch_stale() {
        let (stores, source) = setup(vec![Color::RED]);
        let renderer = PatchRenderer::new(stores.clone(), source);
        let set = stores.load();

        let requested = invalidate(&set, 0, 3);
        set.layer(0).unwrap().patch(3).unwrap().lock().bump_data_version();

        let image = ImageBuffer::filled(32, 32, Color::RED);
        let current = renderer
            .store_result(&set, &PatchRequest::new(0, 3, requested), image)
            .unwrap();
        assert!(!current);

        let versions = set.layer(0).unwrap().patch(3).unwrap().versions();
        assert_eq!(versions.rendered, requested);
        assert!(versions.needs_request());
    }

    #[test]
    fn test_wrong_size_is_rejected() {
        let (stores, source) = setup(vec![Color::RED]);
        let renderer = PatchRenderer::new(stores.clone(), source);
        let set = stores.load();
        let version = invalidate(&set, 0, 0);

        let result = renderer.store_result(
            &set,
            &PatchRequest::new(0, 0, version),
            ImageBuffer::new(8, 8),
        );
        assert!(matches!(result, Err(RenderError::BufferSize { .. })));
        assert!(set.layer(0).unwrap().patch(0).unwrap().versions().is_stale());
    }

    #[test]
    fn test_cancelled_request_is_not_rendered() {
        let (stores, source) = setup(vec![Color::RED]);
        let renderer = PatchRenderer::new(stores.clone(), source.clone());
        let set = stores.load();
        let version = invalidate(&set, 0, 0);

        let token = CancellationToken::new();
        token.cancel();
        renderer.execute(&PatchRequest::new(0, 0, version), &token);

        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert!(set.layer(0).unwrap().patch(0).unwrap().versions().is_stale());
    }

    #[test]
    fn test_unknown_layer_is_dropped() {
        let (stores, source) = setup(vec![Color::RED]);
        let renderer = PatchRenderer::new(stores, source.clone());
        renderer.execute(&PatchRequest::new(5, 0, 1), &CancellationToken::new());
        renderer.execute(&PatchRequest::new(0, 99, 1), &CancellationToken::new());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
