// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Definition of the solver parameters and of the enums they are built from.
use std::path::PathBuf;

use anyhow::{bail, Result};
use schemars::JsonSchema;
use serde_derive::{Deserialize, Serialize};

/// Flow-cost coupling used when computing the cost of an edge.
///
/// The same enum is used for the forward search (`solver_method`) and for the CARMA heuristic
/// (`cost_method`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum SolverMethod {
    /// Shortest path: reservations are ignored, the edge always costs its original cost.
    Sp,
    /// Capacity-constrained routing: flow is admitted up to the critical density, then the edge
    /// becomes impassable (infinite cost).
    Ccrp,
    /// Capacity-aware routing: the edge cost grows with the reserved flow, following the active
    /// traffic model.
    #[default]
    Casper,
}

impl SolverMethod {
    /// Returns the method used to value costs actually incurred on a path.
    ///
    /// CCRP constrains admission with an infinite search cost; population already admitted
    /// travels at the free-flow cost.
    pub const fn realized(self) -> Self {
        match self {
            Self::Ccrp => Self::Sp,
            method => method,
        }
    }
}

/// Curve converting the reserved flow of an edge into a speed ratio.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum TrafficModelKind {
    /// Evacuees always travel at full speed.
    Flat,
    /// Full speed below the critical density, a fixed reduced speed above it.
    Step,
    /// Full speed below the critical density, then a linear degradation down to the saturation
    /// floor.
    Linear,
    /// Full speed below the critical density, then a smooth capped-throughput curve reaching the
    /// floor at the saturation density.
    #[default]
    Casper,
}

/// Order in which CARMA hands the evacuees to the forward search.
///
/// The continuous variants reset the predicted cost of every evacuee before each CARMA pass; the
/// other two keep the last estimate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum CarmaSort {
    /// Closest evacuee (smallest predicted cost) first.
    #[default]
    Forward,
    /// Farthest evacuee first.
    Backward,
    /// Closest first, predictions recomputed from scratch at each pass.
    ForwardContinuous,
    /// Farthest first, predictions recomputed from scratch at each pass.
    BackwardContinuous,
}

impl CarmaSort {
    /// Returns `true` for the variants that reset the predicted costs between two CARMA passes.
    pub const fn is_continuous(&self) -> bool {
        matches!(self, Self::ForwardContinuous | Self::BackwardContinuous)
    }

    /// Returns `true` for the variants that route the farthest evacuees first.
    pub const fn is_backward(&self) -> bool {
        matches!(self, Self::Backward | Self::BackwardContinuous)
    }
}

/// Behavior of the dynamic time-frame engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum DynamicMode {
    /// The dynamic-changes table is ignored.
    #[default]
    Disabled,
    /// All changes are applied at time zero and never lifted.
    Simple,
    /// One time slice per distinct change start/end time; only the paths crossing a reshaped edge
    /// are replanned.
    Smart,
    /// Same slicing as `Smart` but every path is moved along at each slice, not only the affected
    /// ones.
    Full,
}

/// How evacuees sharing a location are grouped before routing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct EvacueeGrouping {
    /// Merge evacuees anchored to the same edge within the merge distance into one.
    #[serde(default)]
    pub merge: bool,
    /// Split every evacuee into unit-population groups that can be routed independently.
    #[serde(default)]
    pub separate: bool,
}

fn default_critical_density() -> f64 {
    1.0
}

fn default_saturation_density() -> f64 {
    5.0
}

fn default_iteration_ceiling() -> u32 {
    10
}

fn default_threshold_for_cost() -> f64 {
    0.1
}

fn default_threshold_for_path_overlap() -> f64 {
    0.75
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("output")
}

/// Set of parameters controlling a solve.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[schemars(title = "Solver Parameters")]
#[schemars(description = "Set of parameters controlling an evacuation solve.")]
pub struct Parameters {
    /// Flow-cost coupling used by the forward search.
    #[serde(default)]
    pub solver_method: SolverMethod,
    /// Flow-cost coupling used by the CARMA heuristic.
    #[serde(default)]
    pub cost_method: SolverMethod,
    /// Curve used to convert reserved flow into edge cost.
    #[serde(default)]
    pub traffic_model: TrafficModelKind,
    /// Density per unit of capacity at which congestion sets in.
    #[serde(default = "default_critical_density")]
    pub critical_density_per_cap: f64,
    /// Density per unit of capacity at which the speed ratio reaches its floor.
    ///
    /// Must be strictly greater than `critical_density_per_cap`.
    #[serde(default = "default_saturation_density")]
    pub saturation_density_per_cap: f64,
    /// Weight of the safe-zone overflow penalty.
    #[serde(default)]
    pub cost_per_density: f64,
    /// Departure delay charged per person at the start of a path.
    #[serde(default)]
    pub init_delay_cost_per_pop: f64,
    /// Whether the two directions of a two-way road draw from the same reservation bucket.
    #[serde(default)]
    pub two_way_roads_share_capacity: bool,
    /// Pre-split clustered evacuees before routing.
    #[serde(default)]
    pub separable_evacuee: bool,
    /// Merge / separate grouping flags.
    #[serde(default)]
    pub evacuee_grouping: EvacueeGrouping,
    /// Distance (in cost units) below which two evacuees on the same edge are merged.
    #[serde(default)]
    pub evacuee_merge_distance: f64,
    /// Order in which CARMA hands evacuees to the forward search.
    #[serde(default)]
    pub carma_sort: CarmaSort,
    /// Behavior of the dynamic time-frame engine.
    #[serde(default)]
    pub dynamic_mode: DynamicMode,
    /// Maximum number of outer iterations per time slice.
    #[serde(default = "default_iteration_ceiling")]
    pub iteration_ceiling: u32,
    /// Cost-divergence ratio above which a path gets a second chance.
    #[serde(default = "default_threshold_for_cost")]
    pub threshold_for_cost: f64,
    /// Overlap-frequency ratio above which a crossing path is dragged into a second chance.
    #[serde(default = "default_threshold_for_path_overlap")]
    pub threshold_for_path_overlap: f64,
    /// Whether per-edge statistics are written next to the routes.
    #[serde(default)]
    pub export_edge_stats: bool,
    /// Directory where the results and the log file are written.
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            solver_method: SolverMethod::default(),
            cost_method: SolverMethod::default(),
            traffic_model: TrafficModelKind::default(),
            critical_density_per_cap: default_critical_density(),
            saturation_density_per_cap: default_saturation_density(),
            cost_per_density: 0.0,
            init_delay_cost_per_pop: 0.0,
            two_way_roads_share_capacity: false,
            separable_evacuee: false,
            evacuee_grouping: EvacueeGrouping::default(),
            evacuee_merge_distance: 0.0,
            carma_sort: CarmaSort::default(),
            dynamic_mode: DynamicMode::default(),
            iteration_ceiling: default_iteration_ceiling(),
            threshold_for_cost: default_threshold_for_cost(),
            threshold_for_path_overlap: default_threshold_for_path_overlap(),
            export_edge_stats: false,
            output_directory: default_output_directory(),
        }
    }
}

impl Parameters {
    /// Checks the coherence of the parameters and fixes the values that can be fixed.
    ///
    /// A saturation density that does not exceed the critical density is shifted above it, the
    /// way a degenerate input is accepted instead of rejected; truly invalid values return an
    /// error.
    pub fn validate(&mut self) -> Result<()> {
        if self.critical_density_per_cap <= 0.0 {
            bail!(
                "critical_density_per_cap must be positive, got {}",
                self.critical_density_per_cap
            );
        }
        if self.saturation_density_per_cap <= self.critical_density_per_cap {
            self.saturation_density_per_cap += self.critical_density_per_cap;
        }
        if self.cost_per_density < 0.0 {
            bail!(
                "cost_per_density must be non-negative, got {}",
                self.cost_per_density
            );
        }
        if self.init_delay_cost_per_pop < 0.0 {
            bail!(
                "init_delay_cost_per_pop must be non-negative, got {}",
                self.init_delay_cost_per_pop
            );
        }
        if self.iteration_ceiling == 0 {
            bail!("iteration_ceiling must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.threshold_for_cost) {
            bail!(
                "threshold_for_cost must be in [0, 1], got {}",
                self.threshold_for_cost
            );
        }
        if !(0.0..=1.0).contains(&self.threshold_for_path_overlap) {
            bail!(
                "threshold_for_path_overlap must be in [0, 1], got {}",
                self.threshold_for_path_overlap
            );
        }
        Ok(())
    }

    /// Returns `true` if evacuees must be pre-split before routing.
    ///
    /// Separation is disabled when the dynamic engine can split paths itself: a separated crowd
    /// and a split path would otherwise double-count the same population.
    pub fn effective_separation(&self) -> bool {
        let wanted = self.separable_evacuee || self.evacuee_grouping.separate;
        wanted && !matches!(self.dynamic_mode, DynamicMode::Smart | DynamicMode::Full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturation_is_shifted_above_critical() {
        let mut parameters = Parameters {
            critical_density_per_cap: 2.0,
            saturation_density_per_cap: 1.5,
            ..Default::default()
        };
        parameters.validate().unwrap();
        assert_eq!(parameters.saturation_density_per_cap, 3.5);
    }

    #[test]
    fn invalid_thresholds_are_rejected() {
        let mut parameters = Parameters {
            threshold_for_cost: 1.5,
            ..Default::default()
        };
        assert!(parameters.validate().is_err());
    }

    #[test]
    fn separation_is_disabled_under_dynamic_modes() {
        let mut parameters = Parameters {
            separable_evacuee: true,
            ..Default::default()
        };
        assert!(parameters.effective_separation());
        parameters.dynamic_mode = DynamicMode::Smart;
        assert!(!parameters.effective_separation());
    }
}
