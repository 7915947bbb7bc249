//! Layered tile stores
//!
//! A [`LayeredTileStore`] holds exactly one [`TilePatch`] per tile of a grid.
//! The scene keeps one store per layer plus one for the composite and one
//! for the brushing overlay. Stores are never resized; the scene builds new
//! ones when the grid or the layer count changes.
//!
//! Stores are managed caches and report the pixel memory they hold. What
//! counts as reclaimable depends on the [`StoreRole`]: computed stores count
//! stale patches as dirty and release them on request, while the brushing
//! store holds strokes that exist nowhere else and reclaims nothing.

use crate::grid::{TileGrid, TileId};
use crate::patch::TilePatch;
use tilescene_cache::{AccessClock, Cache, CacheError, CacheResult, ManagedCache, ObservableCache};

/// What the patches of a store hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    /// Layer images computed by the workers
    Layer,
    /// Tiles blended from the layer patches
    Composite,
    /// Strokes drawn by the user; a stale patch is one currently shown
    Brushing,
}

impl StoreRole {
    /// Whether a stale patch holds superseded content that can be recomputed
    pub fn is_computed(self) -> bool {
        !matches!(self, StoreRole::Brushing)
    }
}

/// One patch per tile, all on the same grid
#[derive(Debug)]
pub struct LayeredTileStore {
    name: String,
    role: StoreRole,
    patches: Vec<TilePatch>,
    clock: AccessClock,
}

impl LayeredTileStore {
    /// Create current, empty patches for every tile of `grid`.
    pub fn new(name: impl Into<String>, role: StoreRole, grid: &TileGrid) -> Self {
        let patches = grid
            .scene_rects_f()
            .iter()
            .enumerate()
            .map(|(id, scene_rect)| {
                let data_rect = grid.data_rect(id).unwrap_or_default();
                TilePatch::new(id, data_rect, *scene_rect)
            })
            .collect();

        Self {
            name: name.into(),
            role,
            patches,
            clock: AccessClock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> StoreRole {
        self.role
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// The patch of `tile`, or `None` if the tile is not on this store's grid.
    pub fn patch(&self, tile: TileId) -> Option<&TilePatch> {
        self.patches.get(tile)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TilePatch> {
        self.patches.iter()
    }

    /// Record an access for least-recently-used cleanup.
    pub fn touch(&self) {
        self.clock.touch();
    }

    /// Number of patches whose image does not show their current data
    pub fn stale_patches(&self) -> usize {
        self.patches.iter().filter(|p| p.versions().is_stale()).count()
    }

    /// `(used, dirty)` pixel bytes. Only computed stores have dirty bytes.
    fn memory_usage(&self) -> (usize, usize) {
        let computed = self.role.is_computed();
        self.patches.iter().fold((0, 0), |(used, dirty), patch| {
            let guard = patch.lock();
            let bytes = guard.image().byte_size();
            let stale = if computed && guard.is_stale() { bytes } else { 0 };
            (used + bytes, dirty + stale)
        })
    }
}

impl<'a> IntoIterator for &'a LayeredTileStore {
    type Item = &'a TilePatch;
    type IntoIter = std::slice::Iter<'a, TilePatch>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Cache for LayeredTileStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "LayeredTileStore"
    }

    fn dtype(&self) -> Option<String> {
        Some("rgba8".to_string())
    }

    fn info(&self) -> Option<String> {
        Some(format!("{} tiles, {} stale", self.len(), self.stale_patches()))
    }

    fn as_observable(&self) -> Option<&dyn ObservableCache> {
        Some(self)
    }

    fn as_managed(&self) -> Option<&dyn ManagedCache> {
        Some(self)
    }
}

impl ObservableCache for LayeredTileStore {
    fn own_memory(&self) -> usize {
        self.memory_usage().0
    }

    fn fraction_of_used_memory_dirty(&self) -> f64 {
        match self.memory_usage() {
            (0, _) => 0.0,
            (used, dirty) => dirty as f64 / used as f64,
        }
    }
}

impl ManagedCache for LayeredTileStore {
    fn access_clock(&self) -> &AccessClock {
        &self.clock
    }

    /// Release the images of stale patches.
    ///
    /// Their content is superseded and will be recomputed on the next paint
    /// pass. Current patches are kept. The brushing store cannot reclaim
    /// anything and reports [`CacheError::NotImplemented`].
    fn free_own_memory(&self) -> CacheResult<usize> {
        if !self.role.is_computed() {
            return Err(CacheError::NotImplemented {
                name: self.name.clone(),
            });
        }
        let freed = self
            .patches
            .iter()
            .map(|patch| {
                let mut guard = patch.lock();
                if guard.is_stale() {
                    guard.image_mut().release()
                } else {
                    0
                }
            })
            .sum();
        Ok(freed)
    }
}
