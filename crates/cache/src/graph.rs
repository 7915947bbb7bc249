//! Arena-backed cache hierarchy
//!
//! The graph owns every node in a slot map. Each node is either a plain
//! operator or a cache; children are kept in insertion order and owned by
//! their parent, while the parent link is only a handle used to decide how a
//! new cache registers itself.
//!
//! Nodes are only ever added as leaves, so the hierarchy is always a tree and
//! the recursive queries below terminate.

use crate::capability::Cache;
use crate::clock::Timestamp;
use crate::error::{CacheError, CacheResult};
use crate::registry::CacheRegistration;
use crate::report::MemoryReportNode;
use slotmap::{Key, SlotMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

slotmap::new_key_type! {
    /// Handle to a node of a [`CacheGraph`].
    pub struct CacheId;
}

impl CacheId {
    /// Identity token used in memory reports.
    pub fn token(&self) -> u64 {
        self.data().as_ffi()
    }
}

enum NodeKind {
    Plain,
    Cache(Arc<dyn Cache>),
}

struct GraphNode {
    name: String,
    kind: NodeKind,
    parent: Option<CacheId>,
    children: Vec<CacheId>,
}

impl GraphNode {
    fn cache(&self) -> Option<&dyn Cache> {
        match &self.kind {
            NodeKind::Cache(cache) => Some(cache.as_ref()),
            NodeKind::Plain => None,
        }
    }
}

type Nodes = SlotMap<CacheId, GraphNode>;

/// Hierarchy of operators and caches.
///
/// All methods take `&self`; the node table sits behind a read/write lock so
/// the registry can poll reports while other threads add or remove caches.
pub struct CacheGraph {
    nodes: RwLock<Nodes>,
    registry: Arc<dyn CacheRegistration>,
}

impl CacheGraph {
    /// Create an empty graph whose caches register with `registry`.
    pub fn new(registry: Arc<dyn CacheRegistration>) -> Self {
        Self {
            nodes: RwLock::new(SlotMap::with_key()),
            registry,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Nodes> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Nodes> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a plain (non-cache) operator node.
    pub fn insert_plain(&self, parent: Option<CacheId>, name: impl Into<String>) -> CacheResult<CacheId> {
        self.link(parent, name.into(), NodeKind::Plain)
    }

    /// Add a cache node and register it.
    ///
    /// Registration happens once, after the node is fully linked into the
    /// graph: nested when the parent is itself a cache, first-class otherwise.
    pub fn insert_cache(&self, parent: Option<CacheId>, cache: Arc<dyn Cache>) -> CacheResult<CacheId> {
        let name = cache.name().to_string();
        let id = self.link(parent, name, NodeKind::Cache(cache))?;

        let nested = parent
            .map(|p| self.read().get(p).is_some_and(|node| node.cache().is_some()))
            .unwrap_or(false);

        // The write lock is released before the registry sees the new node.
        if nested {
            self.registry.add_cache(id);
        } else {
            self.registry.add_first_class_cache(id);
        }

        Ok(id)
    }

    fn link(&self, parent: Option<CacheId>, name: String, kind: NodeKind) -> CacheResult<CacheId> {
        let mut nodes = self.write();
        if let Some(p) = parent {
            if !nodes.contains_key(p) {
                return Err(CacheError::UnknownNode);
            }
        }

        let id = nodes.insert(GraphNode {
            name,
            kind,
            parent,
            children: Vec::new(),
        });

        if let Some(p) = parent {
            if let Some(parent_node) = nodes.get_mut(p) {
                parent_node.children.push(id);
            }
        }

        Ok(id)
    }

    /// Remove a node and its whole subtree, unregistering every cache in it.
    pub fn remove(&self, id: CacheId) -> CacheResult<()> {
        let removed_caches = {
            let mut nodes = self.write();
            let parent = nodes.get(id).ok_or(CacheError::UnknownNode)?.parent;

            if let Some(p) = parent {
                if let Some(parent_node) = nodes.get_mut(p) {
                    parent_node.children.retain(|&child| child != id);
                }
            }

            let mut removed_caches = Vec::new();
            let mut stack = vec![id];
            while let Some(next) = stack.pop() {
                if let Some(node) = nodes.remove(next) {
                    if node.cache().is_some() {
                        removed_caches.push(next);
                    }
                    stack.extend(node.children);
                }
            }
            removed_caches
        };

        for cache in removed_caches {
            self.registry.remove_cache(cache);
        }
        Ok(())
    }

    /// Whether the handle refers to a live node.
    pub fn contains(&self, id: CacheId) -> bool {
        self.read().contains_key(id)
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn name(&self, id: CacheId) -> Option<String> {
        self.read().get(id).map(|node| node.name.clone())
    }

    pub fn parent(&self, id: CacheId) -> Option<CacheId> {
        self.read().get(id).and_then(|node| node.parent)
    }

    /// Children of a node in insertion order.
    pub fn children(&self, id: CacheId) -> Vec<CacheId> {
        self.read()
            .get(id)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    /// The cache stored at a node, if the node is a cache.
    pub fn cache(&self, id: CacheId) -> Option<Arc<dyn Cache>> {
        match &self.read().get(id)?.kind {
            NodeKind::Cache(cache) => Some(cache.clone()),
            NodeKind::Plain => None,
        }
    }

    /// Bytes used by an observable cache plus all of its observable children.
    ///
    /// Returns `None` when the node is missing or not observable.
    pub fn used_memory(&self, id: CacheId) -> Option<usize> {
        let nodes = self.read();
        nodes.get(id)?.cache()?.as_observable()?;
        Some(used_memory_in(&nodes, id))
    }

    /// Dirty fraction of an observable cache, clamped to [0, 1].
    pub fn fraction_dirty(&self, id: CacheId) -> Option<f64> {
        let nodes = self.read();
        let observable = nodes.get(id)?.cache()?.as_observable()?;
        Some(clamp_fraction(observable.fraction_of_used_memory_dirty()))
    }

    /// Last access time of a managed cache.
    pub fn last_access_time(&self, id: CacheId) -> Option<Timestamp> {
        let nodes = self.read();
        Some(nodes.get(id)?.cache()?.as_managed()?.last_access_time())
    }

    /// Reclaim memory held by a managed cache and its managed descendants.
    ///
    /// The cache itself must support reclamation, otherwise the call fails
    /// before anything is freed. Children that report
    /// [`CacheError::NotImplemented`] are skipped. After a successful call
    /// `used_memory(id)` has dropped by exactly the returned amount.
    pub fn free_memory(&self, id: CacheId) -> CacheResult<usize> {
        let nodes = self.read();
        free_memory_in(&nodes, id)
    }

    /// Fill `report` for the cache at `id`, recursing into cache children.
    pub fn generate_report(&self, id: CacheId, report: &mut MemoryReportNode) -> CacheResult<()> {
        let nodes = self.read();
        generate_report_in(&nodes, id, report)
    }

    /// Convenience wrapper returning a fresh report tree.
    pub fn report(&self, id: CacheId) -> CacheResult<MemoryReportNode> {
        let mut report = MemoryReportNode::new();
        self.generate_report(id, &mut report)?;
        Ok(report)
    }
}

fn clamp_fraction(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn used_memory_in(nodes: &Nodes, id: CacheId) -> usize {
    let Some(node) = nodes.get(id) else {
        return 0;
    };
    let own = node
        .cache()
        .and_then(|cache| cache.as_observable())
        .map(|observable| observable.own_memory())
        .unwrap_or(0);

    let children: usize = node
        .children
        .iter()
        .filter(|&&child| {
            nodes
                .get(child)
                .and_then(|n| n.cache())
                .is_some_and(|cache| cache.as_observable().is_some())
        })
        .map(|&child| used_memory_in(nodes, child))
        .sum();

    own + children
}

fn free_memory_in(nodes: &Nodes, id: CacheId) -> CacheResult<usize> {
    let node = nodes.get(id).ok_or(CacheError::UnknownNode)?;
    let managed = node
        .cache()
        .and_then(|cache| cache.as_managed())
        .ok_or_else(|| CacheError::NotManaged {
            name: node.name.clone(),
        })?;

    let mut freed = managed.free_own_memory()?;

    for &child in &node.children {
        let child_is_managed = nodes
            .get(child)
            .and_then(|n| n.cache())
            .is_some_and(|cache| cache.as_managed().is_some());
        if !child_is_managed {
            continue;
        }

        match free_memory_in(nodes, child) {
            Ok(bytes) => freed += bytes,
            Err(err) => {
                log::debug!("skipping reclamation of child cache: {err}");
            }
        }
    }

    Ok(freed)
}

fn generate_report_in(nodes: &Nodes, id: CacheId, report: &mut MemoryReportNode) -> CacheResult<()> {
    let node = nodes.get(id).ok_or(CacheError::UnknownNode)?;
    let cache = node.cache().ok_or_else(|| CacheError::NotACache {
        name: node.name.clone(),
    })?;

    // Base capability: identity and children.
    let mut children = Vec::new();
    for &child in &node.children {
        let child_is_cache = nodes.get(child).is_some_and(|n| n.cache().is_some());
        if !child_is_cache {
            continue;
        }
        let mut child_report = MemoryReportNode::new();
        generate_report_in(nodes, child, &mut child_report)?;
        children.push(child_report);
    }
    report.children = children;
    report.kind = Some(cache.kind().to_string());
    report.id = Some(id.token());
    report.name = Some(node.name.clone());
    report.dtype = cache.dtype();
    report.roi = cache.roi();
    report.info = cache.info();

    // Observable capability extends the base report.
    if let Some(observable) = cache.as_observable() {
        report.used_memory = Some(used_memory_in(nodes, id));
        report.fraction_of_used_memory_dirty =
            Some(clamp_fraction(observable.fraction_of_used_memory_dirty()));
    }

    // Managed capability extends the observable report.
    if let Some(managed) = cache.as_managed() {
        report.last_access_time = Some(managed.last_access_time());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{ManagedCache, ObservableCache};
    use crate::clock::AccessClock;
    use crate::registry::{CacheRegistry, Registration};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Plain {
        name: &'static str,
    }

    impl Cache for Plain {
        fn name(&self) -> &str {
            self.name
        }
    }

    struct Observed {
        name: &'static str,
        bytes: usize,
        dirty: f64,
    }

    impl Cache for Observed {
        fn name(&self) -> &str {
            self.name
        }

        fn as_observable(&self) -> Option<&dyn ObservableCache> {
            Some(self)
        }
    }

    impl ObservableCache for Observed {
        fn own_memory(&self) -> usize {
            self.bytes
        }

        fn fraction_of_used_memory_dirty(&self) -> f64 {
            self.dirty
        }
    }

    struct Managed {
        name: &'static str,
        bytes: AtomicUsize,
        clock: AccessClock,
        reclaimable: bool,
    }

    impl Managed {
        fn new(name: &'static str, bytes: usize) -> Self {
            Self {
                name,
                bytes: AtomicUsize::new(bytes),
                clock: AccessClock::new(),
                reclaimable: true,
            }
        }

        fn unreclaimable(name: &'static str, bytes: usize) -> Self {
            Self {
                reclaimable: false,
                ..Self::new(name, bytes)
            }
        }
    }

    impl Cache for Managed {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> &'static str {
            "Managed"
        }

        fn as_observable(&self) -> Option<&dyn ObservableCache> {
            Some(self)
        }

        fn as_managed(&self) -> Option<&dyn ManagedCache> {
            Some(self)
        }
    }

    impl ObservableCache for Managed {
        fn own_memory(&self) -> usize {
            self.bytes.load(Ordering::SeqCst)
        }
    }

    impl ManagedCache for Managed {
        fn access_clock(&self) -> &AccessClock {
            &self.clock
        }

        fn free_own_memory(&self) -> CacheResult<usize> {
            if !self.reclaimable {
                return Err(CacheError::NotImplemented {
                    name: self.name.to_string(),
                });
            }
            Ok(self.bytes.swap(0, Ordering::SeqCst))
        }
    }

    fn graph() -> (Arc<CacheRegistry>, CacheGraph) {
        let registry = Arc::new(CacheRegistry::with_default_budget());
        let graph = CacheGraph::new(registry.clone());
        (registry, graph)
    }

    #[test]
    fn test_used_memory_sums_observable_children() {
        let (_registry, graph) = graph();
        let root = graph.insert_cache(None, Arc::new(Managed::new("root", 100))).unwrap();
        graph
            .insert_cache(Some(root), Arc::new(Observed { name: "a", bytes: 10, dirty: 0.0 }))
            .unwrap();
        graph.insert_cache(Some(root), Arc::new(Plain { name: "b" })).unwrap();
        let plain = graph.insert_plain(Some(root), "op").unwrap();
        // Hidden behind a plain operator: not a direct observable child.
        graph
            .insert_cache(Some(plain), Arc::new(Observed { name: "c", bytes: 1000, dirty: 0.0 }))
            .unwrap();

        assert_eq!(graph.used_memory(root), Some(110));
    }

    #[test]
    fn test_used_memory_not_applicable_for_plain_cache() {
        let (_registry, graph) = graph();
        let id = graph.insert_cache(None, Arc::new(Plain { name: "p" })).unwrap();
        assert_eq!(graph.used_memory(id), None);
        assert_eq!(graph.fraction_dirty(id), None);
        assert_eq!(graph.last_access_time(id), None);
    }

    #[test]
    fn test_fraction_dirty_is_clamped() {
        let (_registry, graph) = graph();
        let high = graph
            .insert_cache(None, Arc::new(Observed { name: "h", bytes: 1, dirty: 3.0 }))
            .unwrap();
        let low = graph
            .insert_cache(None, Arc::new(Observed { name: "l", bytes: 1, dirty: -1.0 }))
            .unwrap();
        assert_eq!(graph.fraction_dirty(high), Some(1.0));
        assert_eq!(graph.fraction_dirty(low), Some(0.0));
    }

    #[test]
    fn test_registration_path_follows_parent_capability() {
        let (registry, graph) = graph();
        let top = graph.insert_cache(None, Arc::new(Plain { name: "top" })).unwrap();
        let nested = graph.insert_cache(Some(top), Arc::new(Plain { name: "nested" })).unwrap();
        let op = graph.insert_plain(None, "operator").unwrap();
        let under_op = graph.insert_cache(Some(op), Arc::new(Plain { name: "under-op" })).unwrap();

        assert_eq!(registry.registration(top), Some(Registration::FirstClass));
        assert_eq!(registry.registration(nested), Some(Registration::Nested));
        assert_eq!(registry.registration(under_op), Some(Registration::FirstClass));
        assert_eq!(registry.registration(op), None);
    }

    #[test]
    fn test_insert_under_unknown_parent_fails() {
        let (registry, graph) = graph();
        let id = graph.insert_plain(None, "gone").unwrap();
        graph.remove(id).unwrap();

        let result = graph.insert_cache(Some(id), Arc::new(Plain { name: "x" }));
        assert!(matches!(result, Err(CacheError::UnknownNode)));
        assert!(registry.first_class_caches().is_empty());
    }

    #[test]
    fn test_remove_subtree_unregisters() {
        let (registry, graph) = graph();
        let root = graph.insert_cache(None, Arc::new(Managed::new("root", 1))).unwrap();
        let child = graph.insert_cache(Some(root), Arc::new(Managed::new("child", 1))).unwrap();

        graph.remove(root).unwrap();

        assert!(!graph.contains(root));
        assert!(!graph.contains(child));
        assert!(graph.is_empty());
        assert_eq!(registry.registration(root), None);
        assert_eq!(registry.registration(child), None);
        assert!(matches!(graph.remove(root), Err(CacheError::UnknownNode)));
    }

    #[test]
    fn test_remove_child_detaches_from_parent() {
        let (_registry, graph) = graph();
        let root = graph.insert_cache(None, Arc::new(Managed::new("root", 5))).unwrap();
        let a = graph.insert_cache(Some(root), Arc::new(Managed::new("a", 7))).unwrap();
        let b = graph.insert_cache(Some(root), Arc::new(Managed::new("b", 9))).unwrap();

        graph.remove(a).unwrap();
        assert_eq!(graph.children(root), vec![b]);
        assert_eq!(graph.used_memory(root), Some(14));
        assert_eq!(graph.parent(b), Some(root));
    }

    #[test]
    fn test_free_memory_contract() {
        let (_registry, graph) = graph();
        let root = graph.insert_cache(None, Arc::new(Managed::new("root", 100))).unwrap();
        graph.insert_cache(Some(root), Arc::new(Managed::new("child", 40))).unwrap();
        graph
            .insert_cache(Some(root), Arc::new(Observed { name: "fixed", bytes: 8, dirty: 0.0 }))
            .unwrap();
        graph
            .insert_cache(Some(root), Arc::new(Managed::unreclaimable("stubborn", 16)))
            .unwrap();

        let before = graph.used_memory(root).unwrap();
        let freed = graph.free_memory(root).unwrap();

        assert_eq!(freed, 140);
        assert_eq!(graph.used_memory(root).unwrap(), before - freed);
    }

    #[test]
    fn test_free_memory_not_implemented_is_distinct() {
        let (_registry, graph) = graph();
        let root = graph
            .insert_cache(None, Arc::new(Managed::unreclaimable("stubborn", 16)))
            .unwrap();
        let child = graph.insert_cache(Some(root), Arc::new(Managed::new("child", 4))).unwrap();

        assert!(matches!(
            graph.free_memory(root),
            Err(CacheError::NotImplemented { .. })
        ));
        // Nothing was freed on failure.
        assert_eq!(graph.used_memory(child), Some(4));
    }

    #[test]
    fn test_free_memory_requires_managed() {
        let (_registry, graph) = graph();
        let id = graph
            .insert_cache(None, Arc::new(Observed { name: "o", bytes: 3, dirty: 0.0 }))
            .unwrap();
        assert!(matches!(graph.free_memory(id), Err(CacheError::NotManaged { .. })));
    }

    #[test]
    fn test_report_layers_capabilities() {
        let (_registry, graph) = graph();
        let managed = Managed::new("root", 64);
        managed.clock.touch_at(Timestamp::from_micros(42));
        let root = graph.insert_cache(None, Arc::new(managed)).unwrap();
        graph
            .insert_cache(Some(root), Arc::new(Observed { name: "obs", bytes: 8, dirty: 0.5 }))
            .unwrap();
        graph.insert_plain(Some(root), "skipped-op").unwrap();
        graph.insert_cache(Some(root), Arc::new(Plain { name: "plain" })).unwrap();

        let report = graph.report(root).unwrap();
        assert_eq!(report.name.as_deref(), Some("root"));
        assert_eq!(report.kind.as_deref(), Some("Managed"));
        assert_eq!(report.id, Some(root.token()));
        assert_eq!(report.used_memory, Some(72));
        assert_eq!(report.fraction_of_used_memory_dirty, Some(0.0));
        assert_eq!(report.last_access_time, Some(Timestamp::from_micros(42)));

        let names: Vec<_> = report
            .children
            .iter()
            .map(|c| c.name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["obs", "plain"]);

        let obs = &report.children[0];
        assert_eq!(obs.used_memory, Some(8));
        assert_eq!(obs.fraction_of_used_memory_dirty, Some(0.5));
        assert!(obs.last_access_time.is_none());

        let plain = &report.children[1];
        assert!(plain.used_memory.is_none());
        assert!(plain.kind.as_deref().unwrap().ends_with("Plain"));
    }

    #[test]
    fn test_report_on_plain_node_fails() {
        let (_registry, graph) = graph();
        let op = graph.insert_plain(None, "op").unwrap();
        assert!(matches!(graph.report(op), Err(CacheError::NotACache { .. })));
    }
}
