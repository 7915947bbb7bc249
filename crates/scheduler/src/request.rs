//! Patch recomputation requests.

/// Identifies the patch a request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PatchKey {
    /// Layer index within the scene's layer stack
    pub layer: usize,

    /// Tile id within the scene's grid
    pub tile: usize,
}

/// Request to recompute one layer patch at a given data version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatchRequest {
    /// Layer index within the scene's layer stack
    pub layer: usize,

    /// Tile id within the scene's grid
    pub tile: usize,

    /// Data version of the patch at the time of the request
    pub version: u64,
}

impl PatchRequest {
    pub fn new(layer: usize, tile: usize, version: u64) -> Self {
        Self { layer, tile, version }
    }

    /// The de-duplication key of this request.
    pub fn key(&self) -> PatchKey {
        PatchKey {
            layer: self.layer,
            tile: self.tile,
        }
    }
}
