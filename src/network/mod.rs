// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Read-only view of the road network the evacuation is solved on.
pub mod edge;
pub mod traffic;
pub mod vertex;

use anyhow::{bail, Result};
use petgraph::graph::{edge_index, node_index, DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction::{Incoming, Outgoing};
use schemars::JsonSchema;
use serde_derive::{Deserialize, Serialize};

/// Travel direction on a road edge, relative to the direction the edge was digitized in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum TravelDirection {
    /// From the source junction to the target junction.
    Along,
    /// From the target junction to the source junction.
    Against,
}

impl TravelDirection {
    /// Returns the opposite travel direction.
    pub const fn reversed(&self) -> Self {
        match self {
            Self::Along => Self::Against,
            Self::Against => Self::Along,
        }
    }
}

/// Identifier of one traversable edge: a road edge together with a travel direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    /// Index of the road edge in the graph.
    pub index: EdgeIndex,
    /// Direction the edge is traversed in.
    pub direction: TravelDirection,
}

impl EdgeKey {
    /// Creates a new EdgeKey.
    pub const fn new(index: EdgeIndex, direction: TravelDirection) -> Self {
        EdgeKey { index, direction }
    }

    /// Returns the key of the same road edge traversed the other way.
    pub const fn reversed(&self) -> Self {
        EdgeKey {
            index: self.index,
            direction: self.direction.reversed(),
        }
    }
}

/// A junction of the road network.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct RoadJunction {}

/// Directions a road edge can be traversed in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum EdgeDirections {
    /// The edge can be traversed both ways.
    #[default]
    Both,
    /// One-way, in the digitized direction only.
    AlongOnly,
    /// One-way, against the digitized direction only.
    AgainstOnly,
}

impl EdgeDirections {
    /// Returns `true` if the edge can be traversed in the given direction.
    pub const fn allows(&self, direction: TravelDirection) -> bool {
        matches!(
            (self, direction),
            (Self::Both, _)
                | (Self::AlongOnly, TravelDirection::Along)
                | (Self::AgainstOnly, TravelDirection::Against)
        )
    }
}

/// Static attributes of a road edge, as read from the host data.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema)]
pub struct RoadEdge {
    /// Free-flow travel cost of the edge.
    pub cost: f64,
    /// Capacity of the edge, in population units.
    pub capacity: f64,
    /// Directions the edge can be traversed in.
    #[serde(default)]
    pub directions: EdgeDirections,
}

/// One row of the edge table of a scenario.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema)]
#[schemars(title = "Road Edge Record")]
#[schemars(description = "One directed road edge of the scenario network.")]
pub struct RoadEdgeRecord {
    /// Index of the source junction.
    pub from: u32,
    /// Index of the target junction.
    pub to: u32,
    /// Free-flow travel cost of the edge.
    pub cost: f64,
    /// Capacity of the edge, in population units.
    pub capacity: f64,
    /// Directions the edge can be traversed in.
    #[serde(default)]
    pub directions: EdgeDirections,
}

/// Read-only view of the road graph: junctions, directed edges and adjacency.
///
/// Internally the network is a [DiGraph]; a graph edge represents a road edge and is traversable
/// in up to two [TravelDirection]s.
#[derive(Clone, Debug)]
pub struct RoadNetwork {
    graph: DiGraph<RoadJunction, RoadEdge>,
}

impl RoadNetwork {
    /// Creates a new RoadNetwork from an already-built graph.
    pub const fn new(graph: DiGraph<RoadJunction, RoadEdge>) -> Self {
        RoadNetwork { graph }
    }

    /// Builds a RoadNetwork from the junction count and edge records of a scenario.
    pub fn from_records(nb_junctions: usize, records: &[RoadEdgeRecord]) -> Result<Self> {
        let mut graph = DiGraph::with_capacity(nb_junctions, records.len());
        for _ in 0..nb_junctions {
            graph.add_node(RoadJunction {});
        }
        for (i, record) in records.iter().enumerate() {
            if record.from as usize >= nb_junctions || record.to as usize >= nb_junctions {
                bail!(
                    "Edge {} connects junction {} to {} but the network has only {} junctions",
                    i,
                    record.from,
                    record.to,
                    nb_junctions
                );
            }
            if record.cost < 0.0 {
                bail!("Edge {} has a negative cost: {}", i, record.cost);
            }
            if record.capacity <= 0.0 {
                bail!("Edge {} has a non-positive capacity: {}", i, record.capacity);
            }
            graph.add_edge(
                node_index(record.from as usize),
                node_index(record.to as usize),
                RoadEdge {
                    cost: record.cost,
                    capacity: record.capacity,
                    directions: record.directions,
                },
            );
        }
        Ok(RoadNetwork { graph })
    }

    /// Returns the number of junctions in the network.
    pub fn junction_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of road edges in the network.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns the static attributes of a road edge.
    pub fn edge(&self, index: EdgeIndex) -> &RoadEdge {
        &self.graph[index]
    }

    /// Returns `true` if the road edge can be traversed in the direction of the key.
    pub fn allows(&self, key: EdgeKey) -> bool {
        self.graph[key.index].directions.allows(key.direction)
    }

    /// Returns the junction reached when traversing the edge in the direction of the key.
    pub fn head(&self, key: EdgeKey) -> NodeIndex {
        let (source, target) = self
            .graph
            .edge_endpoints(key.index)
            .expect("Edge index out of bounds");
        match key.direction {
            TravelDirection::Along => target,
            TravelDirection::Against => source,
        }
    }

    /// Returns the junction the traversal of the edge starts from.
    pub fn tail(&self, key: EdgeKey) -> NodeIndex {
        self.head(key.reversed())
    }

    /// Returns the traversable edges leaving a junction, excluding the U-turn on the leading
    /// edge.
    ///
    /// The leading edge is the edge the search arrived on; the turn restriction the graph
    /// expresses is that a traversal cannot immediately go back on the same road edge.
    pub fn edges_out_of(
        &self,
        junction: NodeIndex,
        leading: Option<EdgeKey>,
    ) -> impl Iterator<Item = EdgeKey> + '_ {
        let forward = self
            .graph
            .edges_directed(junction, Outgoing)
            .map(|e| EdgeKey::new(e.id(), TravelDirection::Along));
        let backward = self
            .graph
            .edges_directed(junction, Incoming)
            .map(|e| EdgeKey::new(e.id(), TravelDirection::Against));
        forward
            .chain(backward)
            .filter(move |key| self.allows(*key) && leading != Some(key.reversed()))
    }

    /// Returns the traversable edges whose head is the given junction.
    ///
    /// This is the adjacency used by the backward CARMA search.
    pub fn edges_into(&self, junction: NodeIndex) -> impl Iterator<Item = EdgeKey> + '_ {
        let forward = self
            .graph
            .edges_directed(junction, Incoming)
            .map(|e| EdgeKey::new(e.id(), TravelDirection::Along));
        let backward = self
            .graph
            .edges_directed(junction, Outgoing)
            .map(|e| EdgeKey::new(e.id(), TravelDirection::Against));
        forward.chain(backward).filter(move |key| self.allows(*key))
    }

    /// Returns an iterator over all the traversable edge keys of the network.
    pub fn iter_edge_keys(&self) -> impl Iterator<Item = EdgeKey> + '_ {
        self.graph.edge_indices().flat_map(move |index| {
            [TravelDirection::Along, TravelDirection::Against]
                .into_iter()
                .map(move |direction| EdgeKey::new(index, direction))
                .filter(|key| self.allows(*key))
        })
    }
}

/// Shorthand to build an [EdgeKey] in the digitized direction.
pub fn along(index: u32) -> EdgeKey {
    EdgeKey::new(edge_index(index as usize), TravelDirection::Along)
}

/// Shorthand to build an [EdgeKey] against the digitized direction.
pub fn against(index: u32) -> EdgeKey {
    EdgeKey::new(edge_index(index as usize), TravelDirection::Against)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_network() -> RoadNetwork {
        // Three junctions in a line, the second edge is one-way towards junction 2.
        RoadNetwork::from_records(
            3,
            &[
                RoadEdgeRecord {
                    from: 0,
                    to: 1,
                    cost: 10.0,
                    capacity: 100.0,
                    directions: EdgeDirections::Both,
                },
                RoadEdgeRecord {
                    from: 1,
                    to: 2,
                    cost: 5.0,
                    capacity: 50.0,
                    directions: EdgeDirections::AlongOnly,
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn adjacency_respects_oneway_edges() {
        let network = line_network();
        let out: Vec<_> = network.edges_out_of(node_index(1), None).collect();
        assert!(out.contains(&along(1)));
        assert!(out.contains(&against(0)));
        assert_eq!(out.len(), 2);
        // Junction 2 cannot go back on the one-way edge.
        let out: Vec<_> = network.edges_out_of(node_index(2), None).collect();
        assert!(out.is_empty());
    }

    #[test]
    fn adjacency_excludes_u_turns() {
        let network = line_network();
        let out: Vec<_> = network.edges_out_of(node_index(1), Some(along(0))).collect();
        assert_eq!(out, vec![along(1)]);
    }

    #[test]
    fn head_and_tail_follow_the_travel_direction() {
        let network = line_network();
        assert_eq!(network.head(along(0)), node_index(1));
        assert_eq!(network.tail(along(0)), node_index(0));
        assert_eq!(network.head(against(0)), node_index(0));
    }

    #[test]
    fn invalid_records_are_rejected() {
        assert!(RoadNetwork::from_records(
            1,
            &[RoadEdgeRecord {
                from: 0,
                to: 1,
                cost: 1.0,
                capacity: 1.0,
                directions: EdgeDirections::Both,
            }]
        )
        .is_err());
    }
}
