// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Result records and the end-of-solve summary report.
use schemars::JsonSchema;
use serde_derive::{Deserialize, Serialize};

use crate::network::TravelDirection;

/// One routed evacuee in the output.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[schemars(title = "Route Record")]
pub struct RouteRecord {
    /// Name of the evacuee.
    pub evacuee_name: String,
    /// Realized evacuation time of the route.
    pub evacuation_time: f64,
    /// Flow-free travel time of the same route.
    pub original_time: f64,
    /// Population routed on the route.
    pub routed_population: f64,
    /// Name of the safe zone the route ends in.
    pub safe_zone_name: String,
    /// Edge slices of the route, in traversal order.
    pub edges: Vec<RouteEdgeRecord>,
}

/// One edge slice of an output route.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema)]
pub struct RouteEdgeRecord {
    /// Index of the edge.
    pub edge: u32,
    /// Direction the edge is traversed in.
    pub direction: TravelDirection,
    /// Start of the slice along the travel direction.
    pub from_ratio: f64,
    /// End of the slice along the travel direction.
    pub to_ratio: f64,
}

/// Final state of one edge, written when edge statistics are enabled.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[schemars(title = "Edge Statistics Record")]
pub struct EdgeStatRecord {
    /// Index of the edge.
    pub edge: u32,
    /// Direction of the edge object.
    pub direction: TravelDirection,
    /// Total population reserved on the edge.
    pub reserved_pop: f64,
    /// Cost of the edge under the final reservations.
    pub final_cost: f64,
    /// Free-flow cost of the edge, dynamic multipliers included.
    pub original_cost: f64,
}

/// Summary statistics of a solve.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[schemars(title = "Solve Report")]
pub struct SolveReport {
    /// Number of evacuees after grouping.
    pub nb_evacuees: usize,
    /// Number of evacuees routed to a safe zone.
    pub nb_processed: usize,
    /// Number of evacuees no safe zone is reachable from.
    pub nb_unreachable: usize,
    /// Number of outer iterations run, over all time slices.
    pub outer_iterations: u32,
    /// Number of time slices processed by the dynamic engine.
    pub nb_time_slices: usize,
    /// Largest realized evacuation time.
    pub max_evacuation_cost: f64,
    /// Average realized evacuation time, weighted by routed population.
    pub avg_evacuation_cost: f64,
    /// Share of traffic-model computations answered from the cache, in percent.
    pub traffic_cache_hit_percentage: f64,
    /// Wall-clock duration of the solve, in seconds.
    pub running_time: f64,
}

/// Everything a solve produces.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SolveOutput {
    /// One record per routed evacuee.
    pub routes: Vec<RouteRecord>,
    /// Per-edge statistics; empty unless enabled in the parameters.
    pub edge_stats: Vec<EdgeStatRecord>,
    /// Summary statistics.
    pub report: SolveReport,
}
