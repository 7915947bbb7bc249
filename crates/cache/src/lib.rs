//! Tilescene Cache Library
//!
//! Cache capability traits, an arena-backed cache graph, memory reports and
//! a registry that polls first-class caches and reclaims memory under pressure.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tilescene_cache::{Cache, CacheGraph, CacheRegistry, ObservableCache};
//!
//! struct Blocks {
//!     bytes: usize,
//! }
//!
//! impl Cache for Blocks {
//!     fn name(&self) -> &str {
//!         "blocks"
//!     }
//!
//!     fn as_observable(&self) -> Option<&dyn ObservableCache> {
//!         Some(self)
//!     }
//! }
//!
//! impl ObservableCache for Blocks {
//!     fn own_memory(&self) -> usize {
//!         self.bytes
//!     }
//! }
//!
//! let registry = Arc::new(CacheRegistry::with_default_budget());
//! let graph = CacheGraph::new(registry.clone());
//!
//! let id = graph.insert_cache(None, Arc::new(Blocks { bytes: 4096 })).unwrap();
//! assert_eq!(graph.used_memory(id), Some(4096));
//! assert_eq!(registry.first_class_caches(), vec![id]);
//! ```

mod capability;
mod clock;
mod error;
mod graph;
pub mod memory_budget;
mod registry;
mod report;

pub use capability::{Cache, ManagedCache, ObservableCache};
pub use clock::{AccessClock, Timestamp};
pub use error::{CacheError, CacheResult};
pub use graph::{CacheGraph, CacheId};
pub use memory_budget::{MemoryBudget, MemoryBudgetConfig, MemoryPressure};
pub use registry::{CacheRegistration, CacheRegistry, CleanupOutcome, Registration};
pub use report::{MemoryReportNode, RegionOfInterest};
