// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! CARMA: the backward multi-source search producing heuristics and the evacuee order.
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use hashbrown::HashMap;
use log::debug;
use petgraph::graph::NodeIndex;

use crate::evacuee::{EvacueeId, EvacueeList, EvacueeStatus, SafeZoneTable};
use crate::network::edge::EdgeCache;
use crate::network::vertex::VertexCache;
use crate::network::RoadNetwork;
use crate::parameters::Parameters;

/// Entry of the backward-search queue.
///
/// The ordering is reversed so that the std max-heap pops the smallest cost first; ties break on
/// the junction index for determinism.
#[derive(Debug)]
struct QueueEntry {
    cost: f64,
    junction: NodeIndex,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.junction.index().cmp(&self.junction.index()))
    }
}

/// Runs one CARMA pass: rebuilds the heuristics and returns the evacuees to route, sorted.
///
/// The pass expands a multi-source shortest-path tree backward from the safe zones, using the
/// cost method of the parameters. Every settled junction gets a heuristic estimate; every
/// unprocessed evacuee discovered on the way gets a predicted cost and a place in the returned
/// order. Evacuees the tree never reaches are marked unreachable.
///
/// When no edge changed since the last pass and every waiting evacuee already carries a finite
/// prediction, the previous heuristics are still exact and the search is skipped: only the sort
/// is redone.
pub fn carma_pass(
    network: &RoadNetwork,
    cache: &mut EdgeCache,
    vertices: &mut VertexCache,
    evacuees: &mut EvacueeList,
    zones: &SafeZoneTable,
    parameters: &Parameters,
) -> Vec<EvacueeId> {
    let method = parameters.cost_method;

    // Reset the predictions of the continuous sort variants.
    if parameters.carma_sort.is_continuous() {
        for evacuee in evacuees.iter_mut() {
            if evacuee.status == EvacueeStatus::Unprocessed {
                evacuee.predicted_cost = f64::INFINITY;
            }
        }
    }

    // Collect the evacuees the pass must look for and their anchor junctions.
    let mut anchored: HashMap<NodeIndex, Vec<EvacueeId>> = HashMap::new();
    let mut looking = 0usize;
    let mut can_skip = !cache.any_dirty() && !parameters.carma_sort.is_continuous();
    for evacuee in evacuees.iter_mut() {
        if evacuee.status != EvacueeStatus::Unprocessed || evacuee.population <= 0.0 {
            continue;
        }
        // An evacuee whose discovery leaf got an infinite cost is trapped for sure.
        if let Some(leaf) = evacuee.discovery_leaf {
            if cache.edge(leaf).original_cost.is_infinite() {
                evacuee.status = EvacueeStatus::Unreachable;
                continue;
            }
        }
        can_skip &= evacuee.predicted_cost.is_finite();
        evacuee.status = EvacueeStatus::CarmaLooking;
        looking += 1;
        for anchor in &evacuee.anchors {
            anchored.entry(anchor.vertex).or_default().push(evacuee.id);
        }
    }
    if looking == 0 {
        return Vec::new();
    }

    let mut sorted: Vec<EvacueeId> = Vec::with_capacity(looking);
    if can_skip {
        debug!("No dirty edge: keeping the previous heuristics and predictions");
        for evacuee in evacuees.iter_mut() {
            if evacuee.status == EvacueeStatus::CarmaLooking {
                evacuee.status = EvacueeStatus::Unprocessed;
                sorted.push(evacuee.id);
            }
        }
    } else {
        vertices.clear_heuristics();
        vertices.reset_search();
        let mut queue = BinaryHeap::new();
        for zone in zones.iter() {
            let cost = zone.cost(0.0, method, parameters.cost_per_density, cache);
            if !cost.is_finite() {
                continue;
            }
            let vertex = vertices.get(zone.vertex);
            if cost < vertex.g {
                vertex.g = cost;
                vertex.previous = None;
                queue.push(QueueEntry {
                    cost,
                    junction: zone.vertex,
                });
            }
        }

        let mut found = 0usize;
        while let Some(entry) = queue.pop() {
            let junction = entry.junction;
            let (g, tree_edge) = {
                let vertex = vertices.get(junction);
                if vertex.closed {
                    continue;
                }
                vertex.closed = true;
                (vertex.g, vertex.previous)
            };
            if let Some(edge) = tree_edge {
                vertices.update_heuristic(junction, edge.index, g);
            }

            // Discover the evacuees anchored on this junction.
            if let Some(ids) = anchored.remove(&junction) {
                for id in ids {
                    let evacuee = evacuees.get_mut(id);
                    if evacuee.status != EvacueeStatus::CarmaLooking {
                        continue;
                    }
                    let anchor = evacuee
                        .anchors
                        .iter()
                        .find(|a| a.vertex == junction)
                        .expect("Anchored evacuee without a matching anchor");
                    let edge_cost = match anchor.behind_edge {
                        Some(edge) => cache.cost_with(edge, evacuee.population, method),
                        None => 0.0,
                    };
                    if edge_cost.is_finite() {
                        let prediction = g + anchor.portion * edge_cost + evacuee.starting_cost;
                        evacuee.predicted_cost = evacuee.predicted_cost.min(prediction);
                        evacuee.status = EvacueeStatus::Unprocessed;
                        // This edge helped find the evacuee: it seeds the next pass.
                        if let Some(edge) = tree_edge {
                            evacuee.discovery_leaf = Some(edge);
                        }
                        sorted.push(id);
                        found += 1;
                    } else {
                        evacuee.status = EvacueeStatus::Unreachable;
                        found += 1;
                    }
                }
            }
            if found == looking {
                break;
            }

            // Relax backward: candidate predecessors are the tails of the edges arriving here.
            for key in network.edges_into(junction) {
                let edge_cost = cache.current_cost(key, method);
                if !edge_cost.is_finite() {
                    continue;
                }
                let tail = network.tail(key);
                let new_cost = g + edge_cost;
                let improved = {
                    let neighbor = vertices.get(tail);
                    if !neighbor.closed && new_cost < neighbor.g {
                        neighbor.g = new_cost;
                        neighbor.previous = Some(key);
                        true
                    } else {
                        false
                    }
                };
                if improved {
                    queue.push(QueueEntry {
                        cost: new_cost,
                        junction: tail,
                    });
                }
            }
        }

        // Whoever is still being looked for cannot reach any safe zone.
        for evacuee in evacuees.iter_mut() {
            if evacuee.status == EvacueeStatus::CarmaLooking {
                evacuee.status = EvacueeStatus::Unreachable;
            } else if evacuee.status == EvacueeStatus::Unprocessed
                && evacuee.predicted_cost.is_infinite()
                && sorted.contains(&evacuee.id)
            {
                evacuee.status = EvacueeStatus::Unreachable;
            }
        }
        sorted.retain(|id| evacuees.get(*id).status == EvacueeStatus::Unprocessed);

        // The heuristics now match the current costs.
        cache.set_all_clean();
    }

    sorted.sort_by(|a, b| {
        let ea = evacuees.get(*a);
        let eb = evacuees.get(*b);
        ea.predicted_cost
            .total_cmp(&eb.predicted_cost)
            .then_with(|| ea.population.total_cmp(&eb.population))
    });
    if parameters.carma_sort.is_backward() {
        sorted.reverse();
    }
    debug!("CARMA pass found {} evacuees to route", sorted.len());
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evacuee::{EvacueeRecord, SafeZoneRecord};
    use crate::network::RoadEdgeRecord;
    use crate::parameters::CarmaSort;
    use petgraph::graph::node_index;

    /// Line 0 -> 1 -> 2 -> 3, safe zone on 3, evacuees near 0 and 2.
    fn build() -> (RoadNetwork, EdgeCache, VertexCache, EvacueeList, SafeZoneTable, Parameters) {
        let network = RoadNetwork::from_records(
            4,
            &[
                RoadEdgeRecord {
                    from: 0,
                    to: 1,
                    cost: 10.0,
                    capacity: 100.0,
                    directions: Default::default(),
                },
                RoadEdgeRecord {
                    from: 1,
                    to: 2,
                    cost: 10.0,
                    capacity: 100.0,
                    directions: Default::default(),
                },
                RoadEdgeRecord {
                    from: 2,
                    to: 3,
                    cost: 10.0,
                    capacity: 100.0,
                    directions: Default::default(),
                },
            ],
        )
        .unwrap();
        let parameters = Parameters::default();
        let cache = EdgeCache::new(&network, &parameters);
        let evacuees = EvacueeList::from_records(
            &[
                EvacueeRecord {
                    name: "far".to_owned(),
                    population: 1.0,
                    anchors: vec![crate::evacuee::AnchorRecord {
                        edge: 0,
                        direction: crate::network::TravelDirection::Along,
                        position: 0.0,
                    }],
                },
                EvacueeRecord {
                    name: "near".to_owned(),
                    population: 1.0,
                    anchors: vec![crate::evacuee::AnchorRecord {
                        edge: 2,
                        direction: crate::network::TravelDirection::Along,
                        position: 0.0,
                    }],
                },
            ],
            &network,
        )
        .unwrap();
        let zones = SafeZoneTable::from_records(
            &[SafeZoneRecord {
                junction: 3,
                behind_edge: None,
                position_along: 0.0,
                capacity: 0.0,
                name: "zone".to_owned(),
            }],
            &network,
        )
        .unwrap();
        (network, cache, VertexCache::new(), evacuees, zones, parameters)
    }

    #[test]
    fn evacuees_are_sorted_by_predicted_cost() {
        let (network, mut cache, mut vertices, mut evacuees, zones, parameters) = build();
        let sorted = carma_pass(
            &network,
            &mut cache,
            &mut vertices,
            &mut evacuees,
            &zones,
            &parameters,
        );
        // The near evacuee (cost 10) comes before the far one (cost 30).
        assert_eq!(sorted, vec![1, 0]);
        assert!((evacuees.get(1).predicted_cost - 10.0).abs() < 1e-9);
        assert!((evacuees.get(0).predicted_cost - 30.0).abs() < 1e-9);
    }

    #[test]
    fn backward_sort_reverses_the_order() {
        let (network, mut cache, mut vertices, mut evacuees, zones, parameters) = build();
        let parameters = Parameters {
            carma_sort: CarmaSort::Backward,
            ..parameters
        };
        let sorted = carma_pass(
            &network,
            &mut cache,
            &mut vertices,
            &mut evacuees,
            &zones,
            &parameters,
        );
        assert_eq!(sorted, vec![0, 1]);
    }

    #[test]
    fn heuristics_are_consistent_along_the_tree() {
        let (network, mut cache, mut vertices, mut evacuees, zones, parameters) = build();
        carma_pass(
            &network,
            &mut cache,
            &mut vertices,
            &mut evacuees,
            &zones,
            &parameters,
        );
        // h(v) <= c(v, w) + h(w) along every edge of the line.
        for (from, to, cost) in [(0, 1, 10.0), (1, 2, 10.0), (2, 3, 10.0)] {
            let h_from = vertices.h_min(node_index(from));
            let h_to = vertices.h_min(node_index(to));
            assert!(h_from <= cost + h_to + 1e-9);
        }
        assert_eq!(vertices.h_min(node_index(3)), 0.0);
    }

    #[test]
    fn disconnected_evacuees_are_unreachable() {
        let network = RoadNetwork::from_records(
            4,
            &[
                RoadEdgeRecord {
                    from: 0,
                    to: 1,
                    cost: 10.0,
                    capacity: 100.0,
                    directions: Default::default(),
                },
                RoadEdgeRecord {
                    from: 2,
                    to: 3,
                    cost: 10.0,
                    capacity: 100.0,
                    directions: Default::default(),
                },
            ],
        )
        .unwrap();
        let parameters = Parameters::default();
        let mut cache = EdgeCache::new(&network, &parameters);
        let mut vertices = VertexCache::new();
        let mut evacuees = EvacueeList::from_records(
            &[EvacueeRecord {
                name: "stuck".to_owned(),
                population: 1.0,
                anchors: vec![crate::evacuee::AnchorRecord {
                    edge: 0,
                    direction: crate::network::TravelDirection::Along,
                    position: 0.0,
                }],
            }],
            &network,
        )
        .unwrap();
        let zones = SafeZoneTable::from_records(
            &[SafeZoneRecord {
                junction: 3,
                behind_edge: None,
                position_along: 0.0,
                capacity: 0.0,
                name: "zone".to_owned(),
            }],
            &network,
        )
        .unwrap();
        let sorted = carma_pass(
            &network,
            &mut cache,
            &mut vertices,
            &mut evacuees,
            &zones,
            &parameters,
        );
        assert!(sorted.is_empty());
        assert_eq!(evacuees.get(0).status, EvacueeStatus::Unreachable);
    }
}
