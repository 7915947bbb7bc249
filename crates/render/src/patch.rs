//! Versioned tile patches
//!
//! A [`TilePatch`] is one tile's image plus three version counters:
//!
//! - *data*: bumped whenever the patch's source content changes
//! - *rendered*: the data version the image currently shows
//! - *requested*: the data version a recomputation was last requested for
//!
//! The counters only grow and never exceed the data version. The image and
//! the counters are guarded by one mutex per patch; all mutation goes
//! through a [`PatchGuard`], which releases the lock on every exit path.

use crate::error::RenderError;
use crate::geometry::{Rect, RectF};
use crate::grid::TileId;
use crate::image::ImageBuffer;
use crate::surface::PaintTarget;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Snapshot of a patch's version counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatchVersions {
    pub data: u64,
    pub rendered: u64,
    pub requested: u64,
}

impl PatchVersions {
    /// The image does not show the current data.
    pub fn is_stale(&self) -> bool {
        self.rendered != self.data
    }

    /// A recomputation for the current data is outstanding.
    pub fn is_pending(&self) -> bool {
        self.requested == self.data && self.rendered != self.data
    }

    /// Stale and not yet requested at the current data version.
    pub fn needs_request(&self) -> bool {
        self.rendered != self.data && self.requested != self.data
    }
}

/// One tile's image and version counters
#[derive(Debug)]
pub struct TilePatch {
    tile: TileId,
    data_rect: Rect,
    scene_rect: RectF,
    image: Mutex<ImageBuffer>,
    // Written only while `image` is locked. Atomics so that advisory
    // readers can peek without taking the lock.
    data_version: AtomicU64,
    rendered_version: AtomicU64,
    requested_version: AtomicU64,
}

impl TilePatch {
    /// Create a current, empty patch for a tile.
    ///
    /// The image is sized to the tile's scene rectangle.
    pub fn new(tile: TileId, data_rect: Rect, scene_rect: RectF) -> Self {
        let pixels = scene_rect.to_aligned_rect();
        Self {
            tile,
            data_rect,
            scene_rect,
            image: Mutex::new(ImageBuffer::new(
                pixels.width.max(0) as u32,
                pixels.height.max(0) as u32,
            )),
            data_version: AtomicU64::new(0),
            rendered_version: AtomicU64::new(0),
            requested_version: AtomicU64::new(0),
        }
    }

    pub fn tile(&self) -> TileId {
        self.tile
    }

    pub fn data_rect(&self) -> Rect {
        self.data_rect
    }

    pub fn scene_rect(&self) -> RectF {
        self.scene_rect
    }

    /// Lock the patch for reading or writing.
    ///
    /// A lock poisoned by a panicking writer is recovered; the counters stay
    /// consistent because each update is a single store.
    pub fn lock(&self) -> PatchGuard<'_> {
        PatchGuard {
            patch: self,
            image: self.image.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Read the counters without locking.
    ///
    /// The three values may come from different moments. Only suitable for
    /// advisory display such as progress indicators.
    pub fn peek_versions(&self) -> PatchVersions {
        PatchVersions {
            data: self.data_version.load(Ordering::Relaxed),
            rendered: self.rendered_version.load(Ordering::Relaxed),
            requested: self.requested_version.load(Ordering::Relaxed),
        }
    }

    /// Locked snapshot of the counters
    pub fn versions(&self) -> PatchVersions {
        self.lock().versions()
    }

    /// Bytes of pixel memory held
    pub fn byte_size(&self) -> usize {
        self.lock().image().byte_size()
    }

    /// Draw the image at the tile's scene rectangle. Writers are blocked meanwhile.
    pub fn paint(&self, target: &mut dyn PaintTarget) {
        let guard = self.lock();
        target.draw_image(self.scene_rect, guard.image());
    }
}

/// Exclusive access to a [`TilePatch`]
pub struct PatchGuard<'a> {
    patch: &'a TilePatch,
    image: MutexGuard<'a, ImageBuffer>,
}

impl PatchGuard<'_> {
    pub fn image(&self) -> &ImageBuffer {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut ImageBuffer {
        &mut self.image
    }

    /// Replace the image with one of the same dimensions.
    ///
    /// # Errors
    /// Returns [`RenderError::BufferSize`] if the dimensions differ.
    pub fn replace_image(&mut self, image: ImageBuffer) -> Result<(), RenderError> {
        if image.width() != self.image.width() || image.height() != self.image.height() {
            return Err(RenderError::BufferSize {
                expected: self.image.width() as usize * self.image.height() as usize * 4,
                actual: image.width() as usize * image.height() as usize * 4,
            });
        }
        *self.image = image;
        Ok(())
    }

    pub fn versions(&self) -> PatchVersions {
        self.patch.peek_versions()
    }

    pub fn data_version(&self) -> u64 {
        self.patch.data_version.load(Ordering::Relaxed)
    }

    pub fn rendered_version(&self) -> u64 {
        self.patch.rendered_version.load(Ordering::Relaxed)
    }

    pub fn requested_version(&self) -> u64 {
        self.patch.requested_version.load(Ordering::Relaxed)
    }

    pub fn is_stale(&self) -> bool {
        self.versions().is_stale()
    }

    pub fn needs_request(&self) -> bool {
        self.versions().needs_request()
    }

    /// Record a change of the source data. Returns the new data version.
    pub fn bump_data_version(&mut self) -> u64 {
        self.patch.data_version.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record that the image now shows data `version`.
    ///
    /// Never moves the rendered version backwards or past the data version,
    /// so a completion for a superseded request leaves the patch stale.
    /// Returns whether the patch is current afterwards.
    pub fn mark_rendered(&mut self, version: u64) -> bool {
        let data = self.data_version();
        let version = version.min(data);
        self.patch
            .rendered_version
            .fetch_max(version, Ordering::Relaxed);
        self.rendered_version() == data
    }

    /// Mark the image as showing the current data.
    pub fn mark_current(&mut self) {
        let data = self.data_version();
        self.patch.rendered_version.store(data, Ordering::Relaxed);
    }

    /// Record that a recomputation was requested. Returns the requested version.
    pub fn mark_requested(&mut self) -> u64 {
        let data = self.data_version();
        self.patch.requested_version.store(data, Ordering::Relaxed);
        data
    }
}
