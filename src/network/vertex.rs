// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Per-junction search state and the vertex cache.
use hashbrown::HashMap;
use petgraph::graph::{EdgeIndex, NodeIndex};

use super::EdgeKey;

/// Heuristic estimate attached to a vertex for one incoming edge.
#[derive(Clone, Copy, Debug)]
struct HValue {
    edge: EdgeIndex,
    value: f64,
}

/// Heuristic estimates of one vertex, keyed by the incoming edge used for the estimation.
///
/// The list is small (one entry per incoming edge that settled the vertex) so a plain vector is
/// scanned instead of a map.
#[derive(Clone, Debug, Default)]
struct VertexHeuristics {
    values: Vec<HValue>,
}

impl VertexHeuristics {
    /// Keeps the lower of the stored and proposed estimates for the edge.
    fn update(&mut self, edge: EdgeIndex, value: f64) {
        for h in self.values.iter_mut() {
            if h.edge == edge {
                if value < h.value {
                    h.value = value;
                }
                return;
            }
        }
        self.values.push(HValue { edge, value });
    }

    fn min(&self) -> Option<f64> {
        self.values.iter().map(|h| h.value).reduce(f64::min)
    }
}

/// Search state of one junction during one search.
#[derive(Clone, Copy, Debug)]
pub struct SearchVertex {
    /// Cost from the search sources.
    pub g: f64,
    /// Edge leading to this vertex in the current search tree.
    pub previous: Option<EdgeKey>,
    /// Penalty added to every estimate going through this vertex.
    pub global_penalty: f64,
    /// Whether the vertex has been settled by the search.
    pub closed: bool,
}

impl SearchVertex {
    fn new() -> Self {
        SearchVertex {
            g: f64::INFINITY,
            previous: None,
            global_penalty: 0.0,
            closed: false,
        }
    }
}

/// Owner of the vertex search state and of the persistent heuristics.
///
/// The cache guarantees at most one live [SearchVertex] per junction per search. The search
/// table is cleared between searches without releasing its storage, so allocator pressure stays
/// bounded across the many searches of a solve. The heuristics survive across searches; they are
/// rebuilt by CARMA when the edge costs moved.
#[derive(Debug, Default)]
pub struct VertexCache {
    heuristics: HashMap<NodeIndex, VertexHeuristics>,
    search: HashMap<NodeIndex, SearchVertex>,
    outside_heuristic: f64,
}

impl VertexCache {
    /// Creates an empty VertexCache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live vertex of a junction, creating it if the search has not touched it yet.
    pub fn get(&mut self, junction: NodeIndex) -> &mut SearchVertex {
        self.search.entry(junction).or_insert_with(SearchVertex::new)
    }

    /// Returns the live vertex of a junction if the search already touched it.
    pub fn get_existing(&self, junction: NodeIndex) -> Option<&SearchVertex> {
        self.search.get(&junction)
    }

    /// Forgets the search state of every vertex, keeping the allocated storage.
    pub fn reset_search(&mut self) {
        self.search.clear();
    }

    /// Records a heuristic estimate for a junction, keyed by the incoming edge.
    ///
    /// Updates are monotone: a lower estimate is kept, a higher one is ignored.
    pub fn update_heuristic(&mut self, junction: NodeIndex, edge: EdgeIndex, value: f64) {
        self.heuristics.entry(junction).or_default().update(edge, value);
    }

    /// Drops every stored heuristic, before a full CARMA rebuild.
    pub fn clear_heuristics(&mut self) {
        self.heuristics.clear();
    }

    /// Returns the smallest heuristic estimate of a junction.
    ///
    /// Junctions the backward search never settled get the outside-tree value (zero), which is
    /// always admissible.
    pub fn h_min(&self, junction: NodeIndex) -> f64 {
        self.heuristics
            .get(&junction)
            .and_then(VertexHeuristics::min)
            .unwrap_or(self.outside_heuristic)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use petgraph::graph::{edge_index, node_index};

    #[test]
    fn one_live_vertex_per_junction() {
        let mut cache = VertexCache::new();
        cache.get(node_index(3)).g = 5.0;
        assert_eq!(cache.get(node_index(3)).g, 5.0);
        cache.reset_search();
        assert!(cache.get(node_index(3)).g.is_infinite());
    }

    #[test]
    fn heuristic_updates_are_monotone() {
        let mut cache = VertexCache::new();
        cache.update_heuristic(node_index(0), edge_index(0), 10.0);
        cache.update_heuristic(node_index(0), edge_index(0), 12.0);
        assert_eq!(cache.h_min(node_index(0)), 10.0);
        cache.update_heuristic(node_index(0), edge_index(0), 8.0);
        assert_eq!(cache.h_min(node_index(0)), 8.0);
        // A second incoming edge keeps its own estimate.
        cache.update_heuristic(node_index(0), edge_index(1), 6.0);
        assert_eq!(cache.h_min(node_index(0)), 6.0);
    }

    #[test]
    fn vertices_outside_the_tree_get_the_default_heuristic() {
        let mut cache = VertexCache::new();
        assert_eq!(cache.h_min(node_index(9)), 0.0);
        cache.update_heuristic(node_index(9), edge_index(0), 7.0);
        cache.clear_heuristics();
        assert_eq!(cache.h_min(node_index(9)), 0.0);
    }

    #[test]
    fn heuristics_survive_a_search_reset() {
        let mut cache = VertexCache::new();
        cache.update_heuristic(node_index(1), edge_index(0), 4.0);
        cache.get(node_index(1)).g = 1.0;
        cache.reset_search();
        assert_eq!(cache.h_min(node_index(1)), 4.0);
    }
}
