// Memoized flow graphs keyed by compilation-unit fingerprint

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use super::FlowGraph;

/// Bounded graph cache shared across sessions. Oldest insertions are evicted
/// first once `capacity` is reached.
#[derive(Debug)]
pub struct AnalysisCache {
    entries: DashMap<String, Arc<FlowGraph>>,
    order: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl AnalysisCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn get(&self, fingerprint: &str) -> Option<Arc<FlowGraph>> {
        self.entries.get(fingerprint).map(|entry| Arc::clone(entry.value()))
    }

    pub fn insert(&self, fingerprint: String, graph: FlowGraph) -> Arc<FlowGraph> {
        let graph = Arc::new(graph);
        if self.capacity == 0 {
            return graph;
        }

        let mut order = self.order.lock();
        if self.entries.insert(fingerprint.clone(), Arc::clone(&graph)).is_none() {
            order.push_back(fingerprint);
            while order.len() > self.capacity {
                if let Some(oldest) = order.pop_front() {
                    debug!("Evicting cached graph {}", &oldest[..oldest.len().min(12)]);
                    self.entries.remove(&oldest);
                }
            }
        }
        graph
    }

    /// Return the cached graph or build and cache it.
    pub fn get_or_build(&self, fingerprint: &str, build: impl FnOnce() -> FlowGraph) -> Arc<FlowGraph> {
        if let Some(graph) = self.get(fingerprint) {
            debug!("Graph cache hit");
            return graph;
        }
        self.insert(fingerprint.to_string(), build())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        let mut order = self.order.lock();
        order.clear();
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_skips_build() {
        let cache = AnalysisCache::new(4);
        cache.get_or_build("abc", FlowGraph::default);
        let graph = cache.get_or_build("abc", || panic!("should not rebuild"));
        assert!(graph.nodes.is_empty());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_oldest_entry_evicted() {
        let cache = AnalysisCache::new(2);
        for key in ["a", "b", "c"] {
            cache.insert(key.to_string(), FlowGraph::default());
        }
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_zero_capacity_disables_caching() {
        let cache = AnalysisCache::new(0);
        cache.insert("a".into(), FlowGraph::default());
        assert!(cache.is_empty());
    }
}
