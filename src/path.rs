// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Evacuation paths, their segments and the second-chance bookkeeping.
use hashbrown::{HashMap, HashSet};
use log::debug;
use petgraph::graph::NodeIndex;

use crate::evacuee::{Evacuee, EvacueeId, EvacueeList, EvacueeStatus, SafeZoneTable};
use crate::network::edge::EdgeCache;
use crate::network::EdgeKey;
use crate::parameters::{Parameters, SolverMethod};

/// Stable identifier of a path: its owning evacuee and its global order.
///
/// Reservations refer to paths through this key, never through ownership, so that edges and
/// paths reference each other without a cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PathKey {
    /// Owning evacuee.
    pub evacuee: EvacueeId,
    /// Global creation order of the path.
    pub order: u32,
}

/// Status of a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathStatus {
    /// A live, complete path from the evacuee to a safe zone.
    ActiveComplete,
    /// A complete path frozen by elapsed simulated time; it cannot be rerouted.
    FrozenComplete,
    /// The already-traversed half of a path split by the dynamic engine.
    FrozenSplitted,
}

/// A slice of an edge traversed by a path.
///
/// Ratios are measured along the travel direction of the edge key: `0.0` is the tail junction,
/// `1.0` the head junction.
#[derive(Clone, Copy, Debug)]
pub struct PathSegment {
    /// Edge the segment slices.
    pub edge: EdgeKey,
    /// Start of the slice.
    pub from_ratio: f64,
    /// End of the slice.
    pub to_ratio: f64,
}

impl PathSegment {
    /// Creates a new PathSegment.
    pub fn new(edge: EdgeKey, from_ratio: f64, to_ratio: f64) -> Self {
        debug_assert!((0.0..=1.0).contains(&from_ratio));
        debug_assert!((0.0..=1.0).contains(&to_ratio));
        debug_assert!(from_ratio <= to_ratio);
        PathSegment {
            edge,
            from_ratio,
            to_ratio,
        }
    }

    /// Covers the whole edge.
    pub fn whole(edge: EdgeKey) -> Self {
        Self::new(edge, 0.0, 1.0)
    }

    /// Returns the share of the edge covered by the segment.
    pub fn portion(&self) -> f64 {
        self.to_ratio - self.from_ratio
    }

    /// Returns the cost of traversing the segment under the current reservations.
    ///
    /// This is a realized cost: the CCRP admission infinity does not apply to population that
    /// was already admitted.
    pub fn current_cost(&self, cache: &EdgeCache, method: SolverMethod) -> f64 {
        cache.current_cost(self.edge, method.realized()) * self.portion()
    }
}

/// An evacuation path: an ordered sequence of segments from an evacuee anchor to a safe zone.
#[derive(Clone, Debug)]
pub struct EvcPath {
    /// Owning evacuee.
    pub evacuee: EvacueeId,
    /// Global creation order; lower order was routed earlier.
    pub order: u32,
    /// Safe zone the path evacuates to.
    pub safe_zone: NodeIndex,
    /// Population routed on the path.
    pub routed_pop: f64,
    /// Simulated time at which the path starts (non-zero after a dynamic split).
    pub path_start_cost: f64,
    /// Evacuation cost as accumulated when the path was routed.
    pub reserve_evacuation_cost: f64,
    /// Evacuation cost recomputed once every other path was finalized.
    pub final_evacuation_cost: f64,
    /// Flow-free evacuation cost.
    pub original_cost: f64,
    /// Status of the path.
    pub status: PathStatus,
    /// Segments, ordered from the evacuee anchor to the safe zone.
    pub segments: Vec<PathSegment>,
}

impl EvcPath {
    /// Creates an empty path for an evacuee.
    ///
    /// The initial-delay and starting costs are charged up front; segment costs accumulate as
    /// segments are added.
    pub fn new(
        evacuee: &Evacuee,
        order: u32,
        safe_zone: NodeIndex,
        init_delay_cost_per_pop: f64,
    ) -> Self {
        let base_cost = evacuee.population * init_delay_cost_per_pop + evacuee.starting_cost;
        EvcPath {
            evacuee: evacuee.id,
            order,
            safe_zone,
            routed_pop: evacuee.population,
            path_start_cost: evacuee.starting_cost,
            reserve_evacuation_cost: base_cost,
            final_evacuation_cost: base_cost,
            original_cost: base_cost,
            status: PathStatus::ActiveComplete,
            segments: Vec::new(),
        }
    }

    /// Returns the key of the path.
    pub const fn key(&self) -> PathKey {
        PathKey {
            evacuee: self.evacuee,
            order: self.order,
        }
    }

    /// Appends a segment to the path, reserving its edge.
    ///
    /// The reservation is pushed before the cost is read, so the accumulated reserve cost
    /// includes the congestion the path itself creates.
    pub fn add_segment(
        &mut self,
        cache: &mut EdgeCache,
        method: SolverMethod,
        segment: PathSegment,
    ) {
        cache.add_reservation(segment.edge, self.key(), self.routed_pop);
        let portion = segment.portion();
        self.reserve_evacuation_cost +=
            cache.current_cost(segment.edge, method.realized()) * portion;
        self.original_cost += cache.edge(segment.edge).original_cost * portion;
        self.segments.push(segment);
    }

    /// Recomputes the evacuation cost of the path under the final reservations.
    ///
    /// Returns the final cost, so the caller can fold it into the evacuee and iteration maxima.
    pub fn calculate_final_cost(
        &mut self,
        cache: &EdgeCache,
        method: SolverMethod,
        init_delay_cost_per_pop: f64,
    ) -> f64 {
        let mut cost = self.routed_pop * init_delay_cost_per_pop + self.path_start_cost;
        for segment in &self.segments {
            cost += segment.current_cost(cache, method);
        }
        self.final_evacuation_cost = cost;
        cost
    }

    /// Releases every reservation held by the path, in reverse traversal order.
    ///
    /// Touched edges are recorded for the next dirty pass. The safe-zone population is released
    /// by the caller, which owns the zone table.
    pub fn release_reservations(&self, cache: &mut EdgeCache, touched: &mut HashSet<EdgeKey>) {
        for segment in self.segments.iter().rev() {
            cache.remove_reservation(segment.edge, self.key(), true);
            touched.insert(segment.edge);
        }
    }
}

/// Detaches the active paths of an evacuee so it can be routed again.
///
/// Frozen paths are kept: they describe population already on the move. Reservations of the
/// released paths are removed and their edges recorded for a dirty pass.
pub fn detach_active_paths(
    evacuee: &mut Evacuee,
    cache: &mut EdgeCache,
    zones: &mut SafeZoneTable,
    touched: &mut HashSet<EdgeKey>,
) {
    let mut kept = std::collections::VecDeque::with_capacity(evacuee.paths.len());
    while let Some(path) = evacuee.paths.pop_front() {
        if path.status != PathStatus::ActiveComplete {
            kept.push_back(path);
            continue;
        }
        if let Some(zone) = zones.get_mut(path.safe_zone) {
            zone.reserve(-path.routed_pop);
        }
        path.release_reservations(cache, touched);
    }
    evacuee.paths = kept;
}

/// Flags the evacuees whose paths diverged too much from their predictions.
///
/// A path whose prediction error or congestion error exceeds `threshold_for_cost` (relative to
/// the iteration maximum cost) demotes its evacuee; the paths overlapping it with a weighted
/// frequency above `threshold_for_path_overlap` of the maximum drag their evacuees along.
/// Returns the evacuees to demote, in discovery order.
pub fn second_chance_demotions(
    evacuees: &EvacueeList,
    cache: &EdgeCache,
    parameters: &Parameters,
    max_evacuation_cost: f64,
) -> Vec<EvacueeId> {
    let mut demoted = Vec::new();
    if max_evacuation_cost <= 0.0 {
        return demoted;
    }
    let method = parameters.solver_method;
    for evacuee in evacuees.iter() {
        for path in &evacuee.paths {
            if path.status != PathStatus::ActiveComplete {
                continue;
            }
            let prediction_error =
                (path.reserve_evacuation_cost - evacuee.predicted_cost) / max_evacuation_cost;
            let congestion_error =
                (path.final_evacuation_cost - path.reserve_evacuation_cost) / max_evacuation_cost;
            if prediction_error < parameters.threshold_for_cost
                && congestion_error < parameters.threshold_for_cost
            {
                continue;
            }
            debug!(
                "Path {} of evacuee {} diverged (prediction {:.3}, congestion {:.3})",
                path.order, evacuee.id, prediction_error, congestion_error
            );
            if evacuee.status == EvacueeStatus::Processed && !demoted.contains(&evacuee.id) {
                // The prediction was bad, so the evacuee probably carries more weight than
                // average: it should be processed sooner next iteration.
                demoted.push(evacuee.id);
            }

            // Paths sharing edges with this one, weighted by the shared cost.
            let mut overlap_weights: HashMap<PathKey, f64> = HashMap::new();
            let mut max_weight: f64 = 0.0;
            for segment in &path.segments {
                let weight = segment.current_cost(cache, method);
                for crossing in cache.unique_crossing_paths(segment.edge) {
                    if crossing == path.key() {
                        continue;
                    }
                    let entry = overlap_weights.entry(crossing).or_insert(0.0);
                    *entry += weight;
                    max_weight = max_weight.max(*entry);
                }
            }
            let cutoff = parameters.threshold_for_path_overlap * max_weight;
            for (crossing_key, weight) in overlap_weights {
                if weight <= cutoff {
                    continue;
                }
                let Some(crossing) = evacuees.find_path(crossing_key) else {
                    continue;
                };
                let owner = evacuees.get(crossing_key.evacuee);
                if crossing.status == PathStatus::ActiveComplete
                    && owner.status == EvacueeStatus::Processed
                    && !demoted.contains(&crossing_key.evacuee)
                {
                    demoted.push(crossing_key.evacuee);
                }
            }
        }
    }
    demoted
}
