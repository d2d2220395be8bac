// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Canonical per-direction edge objects, their reservations and the edge cache.
use hashbrown::HashMap;
use petgraph::graph::EdgeIndex;

use super::traffic::TrafficModel;
use super::{EdgeKey, RoadNetwork, TravelDirection};
use crate::parameters::{Parameters, SolverMethod};
use crate::path::PathKey;

/// A claim by a path on the capacity of an edge.
#[derive(Clone, Copy, Debug)]
pub struct Reservation {
    /// Path holding the claim.
    pub path: PathKey,
    /// Population routed by the path.
    pub population: f64,
}

/// Reservations of one edge, together with the dirty flag.
///
/// When the two directions of a road share their capacity, the two per-direction edges consult
/// the same bucket.
#[derive(Clone, Debug, Default)]
pub struct EdgeReservations {
    list: Vec<Reservation>,
    reserved_pop: f64,
    dirty: bool,
}

impl EdgeReservations {
    /// Returns the total population reserved on the edge.
    pub const fn reserved_pop(&self) -> f64 {
        self.reserved_pop
    }

    /// Returns the reservations of the edge.
    pub fn iter(&self) -> impl Iterator<Item = &Reservation> + '_ {
        self.list.iter()
    }
}

/// Canonical object for one `(edge, direction)` pair.
///
/// The original cost and capacity are the host attributes scaled by the dynamic multipliers
/// currently applied; the attribute values themselves are kept so that multipliers can be
/// undone.
#[derive(Clone, Copy, Debug)]
pub struct Edge {
    /// Key of the edge.
    pub key: EdgeKey,
    /// Free-flow cost, dynamic multiplier included.
    pub original_cost: f64,
    /// Capacity, dynamic multiplier included.
    pub original_capacity: f64,
    attribute_cost: f64,
    attribute_capacity: f64,
    cost_ratio: f64,
    capacity_ratio: f64,
    /// Cost under the active traffic model at the last dirty-pass refresh.
    cached_cost: f64,
}

impl Edge {
    fn new(key: EdgeKey, cost: f64, capacity: f64) -> Self {
        Edge {
            key,
            original_cost: cost,
            original_capacity: capacity,
            attribute_cost: cost,
            attribute_capacity: capacity,
            cost_ratio: 1.0,
            capacity_ratio: 1.0,
            cached_cost: cost,
        }
    }

    /// Returns the dynamic multipliers currently applied to the edge, as `(cost, capacity)`.
    pub const fn ratios(&self) -> (f64, f64) {
        (self.cost_ratio, self.capacity_ratio)
    }

    /// Applies dynamic multipliers to the edge.
    fn apply_ratios(&mut self, cost_ratio: f64, capacity_ratio: f64) {
        self.cost_ratio = cost_ratio;
        self.capacity_ratio = capacity_ratio;
        self.original_cost = self.attribute_cost * cost_ratio;
        self.original_capacity = self.attribute_capacity * capacity_ratio;
    }
}

/// Owner of every per-direction edge object and of their reservations.
///
/// There is exactly one [Edge] per traversable `(edge, direction)` pair for the whole solve.
#[derive(Debug)]
pub struct EdgeCache {
    cache_along: HashMap<EdgeIndex, Edge>,
    cache_against: HashMap<EdgeIndex, Edge>,
    res_along: HashMap<EdgeIndex, EdgeReservations>,
    res_against: HashMap<EdgeIndex, EdgeReservations>,
    two_way_roads_share_capacity: bool,
    /// Traffic model converting reserved flow into edge cost.
    pub traffic: TrafficModel,
}

impl EdgeCache {
    /// Builds the edge cache for a network, creating one edge per traversable key.
    pub fn new(network: &RoadNetwork, parameters: &Parameters) -> Self {
        let mut cache = EdgeCache {
            cache_along: HashMap::with_capacity(network.edge_count()),
            cache_against: HashMap::new(),
            res_along: HashMap::new(),
            res_against: HashMap::new(),
            two_way_roads_share_capacity: parameters.two_way_roads_share_capacity,
            traffic: TrafficModel::from_parameters(parameters),
        };
        for key in network.iter_edge_keys() {
            let attributes = network.edge(key.index);
            let table = match key.direction {
                TravelDirection::Along => &mut cache.cache_along,
                TravelDirection::Against => &mut cache.cache_against,
            };
            table.insert(key.index, Edge::new(key, attributes.cost, attributes.capacity));
        }
        cache
    }

    /// Returns the edge object for a key.
    pub fn edge(&self, key: EdgeKey) -> &Edge {
        self.edge_table(key.direction)
            .get(&key.index)
            .expect("No edge for this key")
    }

    fn edge_mut(&mut self, key: EdgeKey) -> &mut Edge {
        match key.direction {
            TravelDirection::Along => self.cache_along.get_mut(&key.index),
            TravelDirection::Against => self.cache_against.get_mut(&key.index),
        }
        .expect("No edge for this key")
    }

    const fn edge_table(&self, direction: TravelDirection) -> &HashMap<EdgeIndex, Edge> {
        match direction {
            TravelDirection::Along => &self.cache_along,
            TravelDirection::Against => &self.cache_against,
        }
    }

    fn reservations(&self, key: EdgeKey) -> Option<&EdgeReservations> {
        let table = if self.two_way_roads_share_capacity {
            &self.res_along
        } else {
            match key.direction {
                TravelDirection::Along => &self.res_along,
                TravelDirection::Against => &self.res_against,
            }
        };
        table.get(&key.index)
    }

    fn reservations_mut(&mut self, key: EdgeKey) -> &mut EdgeReservations {
        let table = if self.two_way_roads_share_capacity {
            &mut self.res_along
        } else {
            match key.direction {
                TravelDirection::Along => &mut self.res_along,
                TravelDirection::Against => &mut self.res_against,
            }
        };
        table.entry(key.index).or_default()
    }

    /// Returns the total population currently reserved on an edge.
    pub fn reserved_pop(&self, key: EdgeKey) -> f64 {
        self.reservations(key).map_or(0.0, |r| r.reserved_pop)
    }

    /// Returns the cost of the edge under the given method and its current reservations.
    pub fn current_cost(&self, key: EdgeKey, method: SolverMethod) -> f64 {
        self.cost_with(key, 0.0, method)
    }

    /// Returns the cost of the edge as if `added_pop` more people were reserved on it.
    ///
    /// The reservations are not mutated.
    pub fn cost_with(&self, key: EdgeKey, added_pop: f64, method: SolverMethod) -> f64 {
        let edge = self.edge(key);
        match method {
            SolverMethod::Sp => edge.original_cost,
            SolverMethod::Ccrp => {
                let left = self.traffic.left_capacity(
                    edge.original_capacity,
                    self.reserved_pop(key),
                    edge.original_cost,
                );
                if added_pop > left || left <= 0.0 {
                    f64::INFINITY
                } else {
                    edge.original_cost
                }
            }
            SolverMethod::Casper => {
                let flow = self.reserved_pop(key) + added_pop;
                edge.original_cost / self.traffic.speed_ratio(edge.original_capacity, flow)
            }
        }
    }

    /// Adds a reservation for a path on an edge and marks the edge dirty.
    pub fn add_reservation(&mut self, key: EdgeKey, path: PathKey, population: f64) {
        let reservations = self.reservations_mut(key);
        reservations.list.push(Reservation { path, population });
        reservations.reserved_pop += population;
        reservations.dirty = true;
    }

    /// Removes the reservation of a path from an edge.
    pub fn remove_reservation(&mut self, key: EdgeKey, path: PathKey, touch_dirty: bool) {
        let reservations = self.reservations_mut(key);
        if let Some(position) = reservations.list.iter().position(|r| r.path == path) {
            let reservation = reservations.list.swap_remove(position);
            reservations.reserved_pop -= reservation.population;
            debug_assert!(
                reservations.reserved_pop >= -1e-9,
                "Negative reserved flow on {key:?}"
            );
            reservations.reserved_pop = reservations.reserved_pop.max(0.0);
            if touch_dirty {
                reservations.dirty = true;
            }
        }
    }

    /// Re-attributes a reservation from one path to another, atomically.
    ///
    /// Used when a path is split by the dynamic engine: the population does not change, so the
    /// reserved flow and the dirty flag are left untouched.
    pub fn swap_reservation(&mut self, key: EdgeKey, old: PathKey, new: PathKey) {
        let reservations = self.reservations_mut(key);
        for reservation in reservations.list.iter_mut() {
            if reservation.path == old {
                reservation.path = new;
                return;
            }
        }
        debug_assert!(false, "No reservation of {old:?} on {key:?}");
    }

    /// Returns the distinct paths currently reserving an edge, in reservation order.
    pub fn unique_crossing_paths(&self, key: EdgeKey) -> Vec<PathKey> {
        let mut paths = Vec::new();
        if let Some(reservations) = self.reservations(key) {
            for reservation in &reservations.list {
                if !paths.contains(&reservation.path) {
                    paths.push(reservation.path);
                }
            }
        }
        paths
    }

    /// Returns `true` if the reservations of the edge changed since the last cost refresh.
    pub fn is_dirty(&self, key: EdgeKey) -> bool {
        self.reservations(key).is_some_and(|r| r.dirty)
    }

    /// Returns `true` if any edge of the cache is dirty.
    pub fn any_dirty(&self) -> bool {
        self.res_along.values().any(|r| r.dirty)
            || (!self.two_way_roads_share_capacity && self.res_against.values().any(|r| r.dirty))
    }

    /// Clears the dirty flag of every edge.
    pub fn set_all_clean(&mut self) {
        for reservations in self.res_along.values_mut() {
            reservations.dirty = false;
        }
        for reservations in self.res_against.values_mut() {
            reservations.dirty = false;
        }
    }

    /// Refreshes the cached cost of the given dirty edges.
    ///
    /// An edge stays dirty only when its cost moved by more than `tolerance` (relative to the
    /// previously cached cost), so that the next CARMA pass treats it as changed; edges whose
    /// cost settled back are cleaned. Edges that are not dirty are skipped.
    pub fn how_dirty_exhaustive(
        &mut self,
        keys: impl IntoIterator<Item = EdgeKey>,
        method: SolverMethod,
        tolerance: f64,
    ) {
        for key in keys {
            if !self.is_dirty(key) {
                continue;
            }
            let new_cost = self.current_cost(key, method);
            let edge = self.edge(key);
            let old_cost = edge.cached_cost;
            let change = if old_cost == new_cost {
                // Covers the infinite-to-infinite case.
                0.0
            } else if old_cost > 0.0 && old_cost.is_finite() {
                (new_cost - old_cost).abs() / old_cost
            } else {
                f64::INFINITY
            };
            self.edge_mut(key).cached_cost = new_cost;
            self.reservations_mut(key).dirty = change > tolerance;
        }
    }

    /// Applies dynamic multipliers to an edge and marks it dirty.
    pub fn apply_ratios(&mut self, key: EdgeKey, cost_ratio: f64, capacity_ratio: f64) {
        self.edge_mut(key).apply_ratios(cost_ratio, capacity_ratio);
        self.reservations_mut(key).dirty = true;
    }

    /// Returns an iterator over every edge of the cache with its reserved population.
    pub fn iter_edges(&self) -> impl Iterator<Item = (&Edge, f64)> + '_ {
        self.cache_along
            .values()
            .chain(self.cache_against.values())
            .map(|edge| (edge, self.reserved_pop(edge.key)))
    }
}
