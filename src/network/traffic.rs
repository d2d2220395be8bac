// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Traffic model: conversion of a reserved flow into a speed ratio.
use std::cell::{Cell, RefCell};

use hashbrown::HashMap;

use crate::parameters::{Parameters, TrafficModelKind};

/// Traffic model used to compute the congestion of an edge.
///
/// The model is a pure function `(capacity, flow) -> speed ratio`, memoized by a two-level
/// `capacity -> flow -> ratio` map. A speed ratio of `1.0` means the edge is uncongested; the
/// cost of an edge under flow is its free-flow cost divided by the ratio.
#[derive(Debug)]
pub struct TrafficModel {
    kind: TrafficModelKind,
    critical_density_per_cap: f64,
    saturation_density_per_cap: f64,
    /// Departure delay charged per person at the start of a path.
    pub init_delay_cost_per_pop: f64,
    /// Cached ratios, keyed by the bit patterns of capacity and flow.
    cache: RefCell<HashMap<u64, HashMap<u64, f64>>>,
    cache_hit: Cell<u64>,
    cache_miss: Cell<u64>,
}

impl TrafficModel {
    /// Creates a new TrafficModel.
    pub fn new(
        kind: TrafficModelKind,
        critical_density_per_cap: f64,
        saturation_density_per_cap: f64,
        init_delay_cost_per_pop: f64,
    ) -> Self {
        debug_assert!(saturation_density_per_cap > critical_density_per_cap);
        TrafficModel {
            kind,
            critical_density_per_cap,
            saturation_density_per_cap,
            init_delay_cost_per_pop,
            cache: RefCell::new(HashMap::new()),
            cache_hit: Cell::new(0),
            cache_miss: Cell::new(0),
        }
    }

    /// Creates a TrafficModel from the solver parameters.
    pub fn from_parameters(parameters: &Parameters) -> Self {
        Self::new(
            parameters.traffic_model,
            parameters.critical_density_per_cap,
            parameters.saturation_density_per_cap,
            parameters.init_delay_cost_per_pop,
        )
    }

    /// Returns the speed ratio in `(0, 1]` for an edge of the given capacity carrying the given
    /// flow.
    pub fn speed_ratio(&self, capacity: f64, flow: f64) -> f64 {
        let mut cache = self.cache.borrow_mut();
        let by_flow = cache.entry(capacity.to_bits()).or_default();
        if let Some(ratio) = by_flow.get(&flow.to_bits()) {
            self.cache_hit.set(self.cache_hit.get() + 1);
            return *ratio;
        }
        self.cache_miss.set(self.cache_miss.get() + 1);
        let ratio = self.compute_ratio(capacity, flow);
        by_flow.insert(flow.to_bits(), ratio);
        ratio
    }

    /// Computes the speed ratio without going through the cache.
    fn compute_ratio(&self, capacity: f64, flow: f64) -> f64 {
        debug_assert!(capacity > 0.0);
        debug_assert!(flow >= 0.0);
        let critical = self.critical_density_per_cap;
        let saturation = self.saturation_density_per_cap;
        // Speed ratio at the saturation density, shared by all the congested curves.
        let floor = critical / saturation;
        let density = flow / capacity;
        match self.kind {
            TrafficModelKind::Flat => 1.0,
            TrafficModelKind::Step => {
                if density <= critical {
                    1.0
                } else {
                    floor
                }
            }
            TrafficModelKind::Linear => {
                if density <= critical {
                    1.0
                } else if density >= saturation {
                    floor
                } else {
                    let coef = (density - critical) / (saturation - critical);
                    1.0 + coef * (floor - 1.0)
                }
            }
            TrafficModelKind::Casper => {
                if density <= critical {
                    1.0
                } else if density >= saturation {
                    floor
                } else {
                    // Capped throughput: the speed degrades so that density times speed stays at
                    // the critical level, reaching the floor exactly at saturation.
                    critical / density
                }
            }
        }
    }

    /// Returns the additional flow the edge can accept before congestion sets in.
    ///
    /// This is the CCRP admission bound: flow is admitted up to the critical density. When the
    /// initial delay is positive, the bound is further capped by the population that can depart
    /// before the head of the group exits the edge.
    pub fn left_capacity(&self, capacity: f64, reserved_flow: f64, original_cost: f64) -> f64 {
        let mut left = self.critical_density_per_cap * capacity - reserved_flow;
        if self.init_delay_cost_per_pop > 0.0 {
            left = left.min(original_cost / self.init_delay_cost_per_pop);
        }
        left.max(0.0)
    }

    /// Returns the share of ratio computations answered from the cache, in percent.
    pub fn cache_hit_percentage(&self) -> f64 {
        let hit = self.cache_hit.get();
        let miss = self.cache_miss.get();
        if hit + miss == 0 {
            return 0.0;
        }
        100.0 * hit as f64 / (hit + miss) as f64
    }
}
