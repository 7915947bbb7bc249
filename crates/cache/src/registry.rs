//! Cache registry and memory manager
//!
//! Every cache registers itself exactly once, right after it has been fully
//! linked into a [`CacheGraph`]. Top-level caches are tracked as first-class;
//! caches whose parent is itself a cache are tracked as nested. The registry
//! polls first-class caches for reports and, under memory pressure, frees the
//! least recently used managed caches until the budget target is met.

use crate::error::{CacheError, CacheResult};
use crate::graph::{CacheGraph, CacheId};
use crate::memory_budget::{MemoryBudget, MemoryPressure};
use crate::report::MemoryReportNode;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Registration calls a [`CacheGraph`] makes for each new cache.
pub trait CacheRegistration: Send + Sync {
    /// Register a cache without a cache-capable parent.
    fn add_first_class_cache(&self, id: CacheId);

    /// Register a cache nested inside another cache.
    fn add_cache(&self, id: CacheId);

    /// Forget a cache that was removed from its graph.
    fn remove_cache(&self, _id: CacheId) {}
}

/// How a cache was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    FirstClass,
    Nested,
}

/// Result of a memory cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupOutcome {
    /// Bytes the budget asked to release
    pub requested: usize,

    /// Bytes actually released
    pub freed: usize,

    /// Number of caches that released memory
    pub caches_freed: usize,

    /// Number of caches skipped because they cannot be reclaimed
    pub skipped: usize,
}

#[derive(Default)]
struct RegistryState {
    /// First-class caches in registration order
    first_class: Vec<CacheId>,

    /// Registration kind of every live cache
    registrations: HashMap<CacheId, Registration>,
}

/// Registry tracking all live caches of a graph.
///
/// Constructed explicitly and handed to [`CacheGraph::new`]; there is no
/// process-wide instance.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tilescene_cache::{CacheGraph, CacheRegistry, MemoryBudget};
///
/// let registry = Arc::new(CacheRegistry::new(MemoryBudget::with_limit_mb(64)));
/// let graph = CacheGraph::new(registry.clone());
///
/// // ... insert caches ...
///
/// let reports = registry.reports(&graph);
/// assert!(reports.is_empty());
///
/// let outcome = registry.cleanup(&graph);
/// assert_eq!(outcome.freed, 0);
/// ```
pub struct CacheRegistry {
    state: Mutex<RegistryState>,
    budget: MemoryBudget,
}

impl CacheRegistry {
    /// Create a registry enforcing the given memory budget.
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            budget,
        }
    }

    /// Create a registry with the default memory budget.
    pub fn with_default_budget() -> Self {
        Self::new(MemoryBudget::default())
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, id: CacheId, registration: Registration) {
        let mut state = self.state();
        if let Some(existing) = state.registrations.get(&id) {
            log::warn!("cache {} already registered as {:?}", id.token(), existing);
            return;
        }
        state.registrations.insert(id, registration);
        if registration == Registration::FirstClass {
            state.first_class.push(id);
        }
    }

    /// The memory budget used for cleanup decisions.
    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    /// How a cache was registered, if it is registered.
    pub fn registration(&self, id: CacheId) -> Option<Registration> {
        self.state().registrations.get(&id).copied()
    }

    /// First-class caches in registration order.
    pub fn first_class_caches(&self) -> Vec<CacheId> {
        self.state().first_class.clone()
    }

    /// Nested caches (unordered).
    pub fn nested_caches(&self) -> Vec<CacheId> {
        self.state()
            .registrations
            .iter()
            .filter(|(_, r)| **r == Registration::Nested)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Number of registered caches.
    pub fn len(&self) -> usize {
        self.state().registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().registrations.is_empty()
    }

    /// Poll a report from every first-class cache.
    pub fn reports(&self, graph: &CacheGraph) -> Vec<MemoryReportNode> {
        self.first_class_caches()
            .into_iter()
            .filter_map(|id| match graph.report(id) {
                Ok(report) => Some(report),
                Err(err) => {
                    log::debug!("no report for cache {}: {err}", id.token());
                    None
                }
            })
            .collect()
    }

    /// Reports of all first-class caches as pretty-printed JSON.
    pub fn report_json(&self, graph: &CacheGraph) -> CacheResult<String> {
        Ok(serde_json::to_string_pretty(&self.reports(graph))?)
    }

    /// Total memory used by all observable first-class caches.
    pub fn total_used_memory(&self, graph: &CacheGraph) -> usize {
        self.first_class_caches()
            .into_iter()
            .filter_map(|id| graph.used_memory(id))
            .sum()
    }

    /// Synchronize the budget with the graph and return the resulting pressure.
    pub fn refresh_pressure(&self, graph: &CacheGraph) -> MemoryPressure {
        self.budget.set_usage(self.total_used_memory(graph));
        self.budget.pressure()
    }

    /// Free memory until the budget's target utilization is reached.
    ///
    /// Managed first-class caches are reclaimed in order of their last access,
    /// oldest first. Caches that cannot be reclaimed are skipped.
    pub fn cleanup(&self, graph: &CacheGraph) -> CleanupOutcome {
        self.refresh_pressure(graph);
        let requested = self.budget.bytes_to_evict();
        let mut outcome = CleanupOutcome {
            requested,
            ..Default::default()
        };
        if requested == 0 {
            return outcome;
        }

        let mut candidates: Vec<_> = self
            .first_class_caches()
            .into_iter()
            .filter_map(|id| graph.last_access_time(id).map(|at| (at, id)))
            .collect();
        candidates.sort();

        for (_, id) in candidates {
            if outcome.freed >= requested {
                break;
            }
            match graph.free_memory(id) {
                Ok(freed) => {
                    self.budget.record_deallocation(freed);
                    outcome.freed += freed;
                    if freed > 0 {
                        outcome.caches_freed += 1;
                    }
                }
                Err(CacheError::NotImplemented { name }) => {
                    log::debug!("cache '{name}' cannot be reclaimed, skipping");
                    outcome.skipped += 1;
                }
                Err(err) => {
                    log::debug!("cleanup of cache {} failed: {err}", id.token());
                    outcome.skipped += 1;
                }
            }
        }

        log::info!(
            "memory cleanup released {} of {} requested bytes ({} caches, {} skipped)",
            outcome.freed,
            outcome.requested,
            outcome.caches_freed,
            outcome.skipped
        );
        outcome
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::with_default_budget()
    }
}

impl CacheRegistration for CacheRegistry {
    fn add_first_class_cache(&self, id: CacheId) {
        self.register(id, Registration::FirstClass);
    }

    fn add_cache(&self, id: CacheId) {
        self.register(id, Registration::Nested);
    }

    fn remove_cache(&self, id: CacheId) {
        let mut state = self.state();
        if state.registrations.remove(&id) == Some(Registration::FirstClass) {
            state.first_class.retain(|&c| c != id);
        }
    }
}
