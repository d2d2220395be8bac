// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Capacity-aware forward A* routing one evacuee to its best safe zone.
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use log::{debug, warn};
use petgraph::graph::NodeIndex;

use crate::evacuee::{Evacuee, EvacueeStatus, SafeZoneTable};
use crate::network::edge::EdgeCache;
use crate::network::vertex::VertexCache;
use crate::network::RoadNetwork;
use crate::parameters::Parameters;
use crate::path::{EvcPath, PathSegment, PathStatus};

/// Entry of the forward-search queue.
///
/// The ordering is reversed for the std max-heap; equal `f` prefers the lower `h` (closer to the
/// goal), further ties break on the junction index for determinism.
#[derive(Debug)]
struct QueueEntry {
    f: f64,
    h: f64,
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
            .f
            .total_cmp(&self.f)
            .then_with(|| other.h.total_cmp(&self.h))
            .then_with(|| other.junction.index().cmp(&self.junction.index()))
    }
}

/// Routes one evacuee to the reachable safe zone with the smallest total cost.
///
/// Returns `true` if a path was found and attached to the evacuee; otherwise the evacuee is
/// marked unreachable. The path reserves every edge it crosses and the safe-zone population,
/// and receives the next global order from `order_counter`.
pub fn route_evacuee(
    network: &RoadNetwork,
    cache: &mut EdgeCache,
    vertices: &mut VertexCache,
    zones: &mut SafeZoneTable,
    evacuee: &mut Evacuee,
    parameters: &Parameters,
    order_counter: &mut u32,
) -> bool {
    let method = parameters.solver_method;
    let population = evacuee.population;
    vertices.reset_search();
    let mut queue = BinaryHeap::new();

    // Seed the open set with the anchor vertices. An anchor behind a blocked edge cannot reach
    // its junction and does not seed.
    for anchor in &evacuee.anchors {
        if let Some(edge) = anchor.behind_edge {
            if !cache.cost_with(edge, population, method).is_finite() {
                continue;
            }
        }
        let h = vertices.h_min(anchor.vertex);
        let vertex = vertices.get(anchor.vertex);
        if vertex.g > 0.0 {
            vertex.g = 0.0;
            vertex.previous = None;
            queue.push(QueueEntry {
                f: h,
                h,
                junction: anchor.vertex,
            });
        }
    }

    let mut best: Option<NodeIndex> = None;
    let mut best_total = f64::INFINITY;
    let mut found_restricted = false;
    while let Some(entry) = queue.pop() {
        // No open node can beat the best candidate anymore.
        if entry.f >= best_total {
            break;
        }
        let junction = entry.junction;
        let (g, leading, penalty) = {
            let vertex = vertices.get(junction);
            if vertex.closed {
                continue;
            }
            vertex.closed = true;
            (vertex.g, vertex.previous, vertex.global_penalty)
        };

        // A safe zone on this junction is a candidate, unless it is restricted.
        if let Some(zone) = zones.get(junction) {
            if zone.is_restricted(network, leading, parameters.cost_per_density) {
                found_restricted = true;
            } else {
                let total = g
                    + penalty
                    + zone.cost(population, method, parameters.cost_per_density, cache);
                if total < best_total {
                    best_total = total;
                    best = Some(junction);
                }
            }
        }

        for key in network.edges_out_of(junction, leading) {
            let edge_cost = cache.cost_with(key, population, method);
            if !edge_cost.is_finite() {
                continue;
            }
            let head = network.head(key);
            let new_g = g + edge_cost;
            let improved = {
                let neighbor = vertices.get(head);
                if !neighbor.closed && new_g < neighbor.g {
                    neighbor.g = new_g;
                    neighbor.previous = Some(key);
                    true
                } else {
                    false
                }
            };
            if improved {
                let h = vertices.h_min(head);
                queue.push(QueueEntry {
                    f: new_g + h,
                    h,
                    junction: head,
                });
            }
        }
    }

    let Some(zone_junction) = best else {
        if found_restricted {
            warn!(
                "Evacuee `{}` can only reach restricted safe zones",
                evacuee.name
            );
        }
        evacuee.status = EvacueeStatus::Unreachable;
        return false;
    };

    // Walk the predecessor chain back to the anchor.
    let mut edges = Vec::new();
    let mut junction = zone_junction;
    while let Some(edge) = vertices.get_existing(junction).and_then(|v| v.previous) {
        edges.push(edge);
        junction = network.tail(edge);
    }
    edges.reverse();

    *order_counter += 1;
    let mut path = EvcPath::new(
        evacuee,
        *order_counter,
        zone_junction,
        cache.traffic.init_delay_cost_per_pop,
    );
    // Fractional first segment covering the anchor's share of its edge.
    if let Some(anchor) = evacuee.anchors.iter().find(|a| a.vertex == junction) {
        if let Some(edge) = anchor.behind_edge {
            if anchor.portion > 0.0 {
                path.add_segment(
                    cache,
                    method,
                    PathSegment::new(edge, 1.0 - anchor.portion, 1.0),
                );
            }
        }
    }
    for edge in edges {
        path.add_segment(cache, method, PathSegment::whole(edge));
    }
    // Fractional last segment up to the safe-zone entrance.
    let zone = zones
        .get_mut(zone_junction)
        .expect("Best candidate is not a safe zone");
    if let Some(edge) = zone.behind_edge {
        if zone.position_along > 0.0 {
            path.add_segment(cache, method, PathSegment::new(edge, 0.0, zone.position_along));
        }
    }
    zone.reserve(population);
    debug_assert_eq!(path.status, PathStatus::ActiveComplete);
    debug!(
        "Evacuee `{}` routed to `{}` with reserve cost {:.3} (predicted {:.3})",
        evacuee.name, zone.name, path.reserve_evacuation_cost, evacuee.predicted_cost
    );

    evacuee.final_cost = path.reserve_evacuation_cost;
    evacuee.status = EvacueeStatus::Processed;
    evacuee.paths.push_front(path);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evacuee::{EvacueeList, EvacueeRecord, SafeZoneRecord};
    use crate::network::{RoadEdgeRecord, TravelDirection};
    use crate::solver::carma::carma_pass;

    /// A diamond: 0 -> 1 -> 3 (cheap but narrow) and 0 -> 2 -> 3 (expensive but wide).
    fn diamond() -> (RoadNetwork, EvacueeList, SafeZoneTable) {
        let network = RoadNetwork::from_records(
            4,
            &[
                RoadEdgeRecord {
                    from: 0,
                    to: 1,
                    cost: 1.0,
                    capacity: 100.0,
                    directions: Default::default(),
                },
                RoadEdgeRecord {
                    from: 1,
                    to: 3,
                    cost: 10.0,
                    capacity: 1.0,
                    directions: Default::default(),
                },
                RoadEdgeRecord {
                    from: 0,
                    to: 2,
                    cost: 1.0,
                    capacity: 100.0,
                    directions: Default::default(),
                },
                RoadEdgeRecord {
                    from: 2,
                    to: 3,
                    cost: 30.0,
                    capacity: 100.0,
                    directions: Default::default(),
                },
            ],
        )
        .unwrap();
        let evacuees = EvacueeList::from_records(
            &[EvacueeRecord {
                name: "group".to_owned(),
                population: 10.0,
                anchors: vec![crate::evacuee::AnchorRecord {
                    edge: 0,
                    direction: TravelDirection::Along,
                    position: 1.0,
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
        (network, evacuees, zones)
    }

    fn route_with(parameters: &Parameters) -> (EvacueeList, EdgeCache) {
        let (network, mut evacuees, mut zones) = diamond();
        let mut cache = EdgeCache::new(&network, parameters);
        let mut vertices = VertexCache::new();
        let mut order = 0;
        let sorted = carma_pass(
            &network,
            &mut cache,
            &mut vertices,
            &mut evacuees,
            &zones,
            parameters,
        );
        for id in sorted {
            route_evacuee(
                &network,
                &mut cache,
                &mut vertices,
                &mut zones,
                evacuees.get_mut(id),
                parameters,
                &mut order,
            );
        }
        (evacuees, cache)
    }

    #[test]
    fn sp_takes_the_short_narrow_route() {
        let parameters = Parameters {
            solver_method: crate::parameters::SolverMethod::Sp,
            cost_method: crate::parameters::SolverMethod::Sp,
            ..Default::default()
        };
        let (evacuees, _) = route_with(&parameters);
        let path = evacuees.get(0).front_path().unwrap();
        // Anchor is at position 1.0 of edge 0: the path starts at junction 1.
        assert_eq!(path.segments.len(), 1);
        assert_eq!(path.segments[0].edge, crate::network::along(1));
        assert!((path.reserve_evacuation_cost - 10.0).abs() < 1e-9);
    }

    #[test]
    fn ccrp_routes_around_the_full_edge() {
        let parameters = Parameters {
            solver_method: crate::parameters::SolverMethod::Ccrp,
            cost_method: crate::parameters::SolverMethod::Ccrp,
            ..Default::default()
        };
        let (evacuees, _) = route_with(&parameters);
        let path = evacuees.get(0).front_path().unwrap();
        // Population 10 exceeds the capacity-1 narrow edge: CCRP goes the long way.
        let edges: Vec<_> = path.segments.iter().map(|s| s.edge).collect();
        assert!(edges.contains(&crate::network::along(3)));
        assert!(!edges.contains(&crate::network::along(1)));
    }

    #[test]
    fn casper_weighs_congestion_against_the_detour() {
        let parameters = Parameters::default();
        let (evacuees, _) = route_with(&parameters);
        let path = evacuees.get(0).front_path().unwrap();
        // Packing 10 people through the capacity-1 edge would cost 10 / 0.2 = 50; the detour
        // through junctions 0 and 2 costs 32 and wins.
        let edges: Vec<_> = path.segments.iter().map(|s| s.edge).collect();
        assert!(edges.contains(&crate::network::along(3)));
        assert!((path.reserve_evacuation_cost - 32.0).abs() < 1e-9);
    }

    #[test]
    fn unreachable_without_zone() {
        let (network, mut evacuees, _) = diamond();
        let parameters = Parameters::default();
        let mut cache = EdgeCache::new(&network, &parameters);
        let mut vertices = VertexCache::new();
        let mut zones = SafeZoneTable::default();
        let mut order = 0;
        let routed = route_evacuee(
            &network,
            &mut cache,
            &mut vertices,
            &mut zones,
            evacuees.get_mut(0),
            &parameters,
            &mut order,
        );
        assert!(!routed);
        assert_eq!(evacuees.get(0).status, EvacueeStatus::Unreachable);
        assert!(evacuees.get(0).paths.is_empty());
    }
}
