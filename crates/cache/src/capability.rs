//! Cache capability traits
//!
//! Three layered capabilities describe what a cache can tell the memory
//! tooling about itself:
//!
//! - [`Cache`]: identity only. Every cache registers with the registry.
//! - [`ObservableCache`]: additionally reports memory usage and dirtiness.
//! - [`ManagedCache`]: additionally reports its last access time and can be
//!   asked to release memory.
//!
//! A concrete type opts into the richer capabilities by implementing the
//! trait and returning `Some(self)` from the matching probe on [`Cache`].
//! Reports and memory accounting dispatch on those probes.

use crate::clock::{AccessClock, Timestamp};
use crate::error::{CacheError, CacheResult};
use crate::report::RegionOfInterest;

/// Base capability shared by all caches.
pub trait Cache: Send + Sync {
    /// Display name used in reports.
    fn name(&self) -> &str;

    /// Type tag used in reports.
    fn kind(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Element data type of cached values, if applicable.
    fn dtype(&self) -> Option<String> {
        None
    }

    /// Region of interest this cache is assigned to, if applicable.
    fn roi(&self) -> Option<RegionOfInterest> {
        None
    }

    /// Additional details for reports.
    fn info(&self) -> Option<String> {
        None
    }

    /// Probe for the observable capability.
    fn as_observable(&self) -> Option<&dyn ObservableCache> {
        None
    }

    /// Probe for the managed capability.
    fn as_managed(&self) -> Option<&dyn ManagedCache> {
        None
    }
}

/// A cache that can report how much memory it holds.
pub trait ObservableCache: Cache {
    /// Bytes held by this cache alone, excluding children.
    ///
    /// Must be side-effect free. The graph adds observable children on top.
    fn own_memory(&self) -> usize;

    /// Fraction of used memory that is allocated but no longer usable.
    ///
    /// Caches without dirtiness management report 0. Values outside [0, 1]
    /// are clamped when reported.
    fn fraction_of_used_memory_dirty(&self) -> f64 {
        0.0
    }
}

/// A cache that can be cleaned up by the memory manager.
pub trait ManagedCache: ObservableCache {
    /// Clock updated by the implementation on every access.
    fn access_clock(&self) -> &AccessClock;

    /// Timestamp of the most recent access.
    fn last_access_time(&self) -> Timestamp {
        self.access_clock().last()
    }

    /// Release as much of this cache's own memory as possible.
    ///
    /// Returns the bytes actually freed; afterwards `own_memory()` must have
    /// dropped by exactly that amount. Implementations that cannot reclaim
    /// memory keep the default, which reports [`CacheError::NotImplemented`].
    fn free_own_memory(&self) -> CacheResult<usize> {
        Err(CacheError::NotImplemented {
            name: self.name().to_string(),
        })
    }
}
