//! Run-scoped analysis context.
//!
//! An [`AnalysisRun`] owns every cache of one analysis: the resolved proxies
//! and their kernel handles, the relationship maps per tolerance and the
//! link-existence cache of the import pipeline. It is created when a run
//! starts and dropped when it ends; nothing is process-wide, so concurrent
//! runs never see each other's state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};

use crate::element::ElementId;
use crate::extract::{ExtractedMap, MapKind};
use crate::kernel::Tier;
use crate::relation::RelationshipKind;

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

/// Index of a kernel shape in a run's handle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(usize);

impl HandleId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Resolved geometric abstraction of one element.
#[derive(Debug, Clone, PartialEq)]
pub struct TopologicalProxy {
    pub source: ElementId,
    pub tier: Tier,
    pub handle: HandleId,
    /// Tolerance the proxy was finally built with.
    pub tolerance: f64,
    /// Construction attempts it took, across all tiers.
    pub attempts: usize,
}

/// What a link-cache entry stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOp {
    Node,
    Link(RelationshipKind),
}

/// Key of the link-existence cache: operation kind and identifier pair.
pub type CacheKey = (CacheOp, ElementId, ElementId);

/// Hit/miss statistics of a [`LinkCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Remembers which writes were already issued in this run.
#[derive(Debug, Default)]
pub struct LinkCache {
    marked: DashSet<CacheKey>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LinkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` as written. Returns `true` the first time, `false` on a
    /// repeat.
    pub fn check_and_mark(&self, key: CacheKey) -> bool {
        if self.marked.insert(key) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.marked.contains(key)
    }

    /// Forget `key`, so a later write may retry it.
    pub fn release(&self, key: &CacheKey) {
        self.marked.remove(key);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.marked.len(),
        }
    }

    pub fn clear(&self) {
        self.marked.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

/// Context object of one analysis run, generic over the kernel shape type.
pub struct AnalysisRun<S> {
    id: u64,
    started: Instant,
    proxies: DashMap<ElementId, TopologicalProxy>,
    handles: RwLock<Vec<S>>,
    unresolved: DashMap<ElementId, String>,
    maps: DashMap<(MapKind, u64), Arc<ExtractedMap>>,
    links: LinkCache,
}

impl<S> AnalysisRun<S> {
    pub fn new() -> Self {
        let id = NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(run = id, "analysis run started");
        Self {
            id,
            started: Instant::now(),
            proxies: DashMap::new(),
            handles: RwLock::new(Vec::new()),
            unresolved: DashMap::new(),
            maps: DashMap::new(),
            links: LinkCache::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// Store a resolved proxy and its kernel shape.
    ///
    /// A second proxy for the same element replaces the first; the old
    /// shape stays in the handle table until the run ends.
    pub fn insert_proxy(
        &self,
        source: ElementId,
        tier: Tier,
        shape: S,
        tolerance: f64,
        attempts: usize,
    ) -> TopologicalProxy {
        let handle = {
            let mut handles = self.handles.write().expect("handle table lock poisoned");
            handles.push(shape);
            HandleId(handles.len() - 1)
        };
        let proxy = TopologicalProxy {
            source: source.clone(),
            tier,
            handle,
            tolerance,
            attempts,
        };
        self.unresolved.remove(&source);
        self.proxies.insert(source, proxy.clone());
        proxy
    }

    pub fn proxy(&self, id: &str) -> Option<TopologicalProxy> {
        self.proxies.get(id).map(|p| p.value().clone())
    }

    pub fn is_resolved(&self, id: &str) -> bool {
        self.proxies.contains_key(id)
    }

    pub fn mark_unresolved(&self, id: ElementId, reason: String) {
        self.unresolved.insert(id, reason);
    }

    pub fn unresolved_reason(&self, id: &str) -> Option<String> {
        self.unresolved.get(id).map(|r| r.value().clone())
    }

    pub fn is_unresolved(&self, id: &str) -> bool {
        self.unresolved.contains_key(id)
    }

    pub fn resolved_count(&self) -> usize {
        self.proxies.len()
    }

    pub fn unresolved_count(&self) -> usize {
        self.unresolved.len()
    }

    /// Unresolved element identifiers, sorted.
    pub fn unresolved_ids(&self) -> Vec<ElementId> {
        let mut ids: Vec<ElementId> = self.unresolved.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Run `f` with read access to the handle table.
    pub fn with_handles<R>(&self, f: impl FnOnce(&[S]) -> R) -> R {
        let handles = self.handles.read().expect("handle table lock poisoned");
        f(&handles)
    }

    /// A cached relationship map, if one was computed at this tolerance.
    pub fn cached_map(&self, kind: MapKind, tolerance: f64) -> Option<Arc<ExtractedMap>> {
        self.maps
            .get(&(kind, tolerance.to_bits()))
            .map(|m| Arc::clone(m.value()))
    }

    /// Store `map` unless another thread got there first; returns the map
    /// that is now cached.
    pub fn cache_map(&self, kind: MapKind, tolerance: f64, map: ExtractedMap) -> Arc<ExtractedMap> {
        let entry = self
            .maps
            .entry((kind, tolerance.to_bits()))
            .or_insert_with(|| Arc::new(map));
        Arc::clone(entry.value())
    }

    /// Drop every cached relationship map.
    pub fn invalidate_maps(&self) {
        self.maps.clear();
    }

    pub fn link_cache(&self) -> &LinkCache {
        &self.links
    }
}

impl<S> Default for AnalysisRun<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Drop for AnalysisRun<S> {
    fn drop(&mut self) {
        tracing::debug!(
            run = self.id,
            proxies = self.proxies.len(),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "analysis run ended"
        );
    }
}

impl<S> std::fmt::Debug for AnalysisRun<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisRun")
            .field("id", &self.id)
            .field("resolved", &self.proxies.len())
            .field("unresolved", &self.unresolved.len())
            .field("cached_maps", &self.maps.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_get_distinct_ids() {
        let a: AnalysisRun<()> = AnalysisRun::new();
        let b: AnalysisRun<()> = AnalysisRun::new();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn proxies_index_into_handle_table() {
        let run: AnalysisRun<&'static str> = AnalysisRun::new();
        run.mark_unresolved("w1".into(), "no geometry".into());
        let proxy = run.insert_proxy("w1".into(), Tier::Surface, "shape-a", 0.001, 2);
        assert!(run.is_resolved("w1"));
        assert!(!run.is_unresolved("w1"));
        assert_eq!(run.with_handles(|h| h[proxy.handle.index()]), "shape-a");
    }

    #[test]
    fn link_cache_counts_hits_and_misses() {
        let cache = LinkCache::new();
        let key = (
            CacheOp::Link(RelationshipKind::Adjacency),
            ElementId::from("a"),
            ElementId::from("b"),
        );
        assert!(cache.check_and_mark(key.clone()));
        assert!(!cache.check_and_mark(key.clone()));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.size), (1, 1, 1));
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);

        cache.release(&key);
        assert!(cache.check_and_mark(key));
    }

    #[test]
    fn map_cache_keeps_first_insert() {
        let run: AnalysisRun<()> = AnalysisRun::new();
        assert!(run.cached_map(MapKind::Adjacency, 0.001).is_none());
        let first = run.cache_map(MapKind::Adjacency, 0.001, ExtractedMap::default());
        let second = run.cache_map(MapKind::Adjacency, 0.001, ExtractedMap::default());
        assert!(Arc::ptr_eq(&first, &second));
        assert!(run.cached_map(MapKind::Adjacency, 0.01).is_none());
    }
}
