//! Error types for cache reporting and reclamation.

/// Errors surfaced by the cache graph and registry.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cache claims the managed capability but has no reclamation logic.
    ///
    /// Distinct from successfully freeing zero bytes: a memory manager should
    /// skip this cache instead of retrying it.
    #[error("cache '{name}' does not implement memory reclamation")]
    NotImplemented { name: String },

    /// Memory reclamation was requested on a node without the managed capability.
    #[error("node '{name}' is not a managed cache")]
    NotManaged { name: String },

    /// A report was requested for a graph node that is not a cache.
    #[error("node '{name}' is not a cache")]
    NotACache { name: String },

    /// The handle does not refer to a live node of the graph.
    #[error("unknown cache graph node")]
    UnknownNode,

    /// A memory report could not be serialized.
    #[error("report serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
