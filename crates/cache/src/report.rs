//! Memory report tree
//!
//! A [`MemoryReportNode`] aggregates the status of one cache: its identity,
//! memory usage, dirtiness and access time, plus one child report per
//! cache-capable child. The tree mirrors the reporting subset of the cache
//! hierarchy. A field left as `None` means "not applicable", never zero.

use crate::clock::Timestamp;
use crate::error::CacheResult;
use serde::Serialize;

/// Region of interest a cache is assigned to, as half-open `[start, stop)` bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionOfInterest {
    pub start: Vec<i64>,
    pub stop: Vec<i64>,
}

impl RegionOfInterest {
    pub fn new(start: Vec<i64>, stop: Vec<i64>) -> Self {
        Self { start, stop }
    }
}

/// Aggregated status of one cache and its reporting children.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryReportNode {
    /// Cache type tag
    pub kind: Option<String>,

    /// Identity token of the cache within its graph
    pub id: Option<u64>,

    /// Display name
    pub name: Option<String>,

    /// Bytes used by the cache and its observable children
    pub used_memory: Option<usize>,

    /// Element data type of the cached values
    pub dtype: Option<String>,

    /// Region of interest the cache is assigned to
    pub roi: Option<RegionOfInterest>,

    /// Fraction of used memory that is dirty, in [0, 1]
    pub fraction_of_used_memory_dirty: Option<f64>,

    /// Timestamp of the last access
    pub last_access_time: Option<Timestamp>,

    /// Free-form details supplied by the cache implementation
    pub info: Option<String>,

    /// Reports of cache-capable children, in child order
    pub children: Vec<MemoryReportNode>,
}

impl MemoryReportNode {
    /// Create an empty report node.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes in this report tree, including this one.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Self::node_count).sum::<usize>()
    }

    /// Find the first node (depth-first, pre-order) with the given name.
    pub fn find(&self, name: &str) -> Option<&MemoryReportNode> {
        if self.name.as_deref() == Some(name) {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }

    /// Serialize the report tree for memory tooling.
    pub fn to_json_pretty(&self) -> CacheResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
