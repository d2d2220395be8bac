// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! The evacuation solver: CARMA passes, forward searches and second chances, driven across the
//! dynamic time slices.
pub mod carma;
pub mod search;

use std::fmt;

use anyhow::Result;
use hashbrown::HashSet;
use log::{debug, info};
use time::Instant;

use crate::dynamic::DynamicScenario;
use crate::evacuee::{EvacueeList, EvacueeStatus, SafeZoneTable};
use crate::network::edge::EdgeCache;
use crate::network::vertex::VertexCache;
use crate::network::RoadNetwork;
use crate::parameters::Parameters;
use crate::path::{detach_active_paths, second_chance_demotions, PathStatus};
use crate::progress_bar::{CasperProgressBar, Spinner};
use crate::report::{EdgeStatRecord, RouteEdgeRecord, RouteRecord, SolveOutput, SolveReport};

/// Error returned when the user cancels the solve through the cooperative callback.
#[derive(Clone, Copy, Debug)]
pub struct Cancelled {
    /// Number of evacuees routed before the cancellation.
    pub processed: usize,
}

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Solve cancelled after {} routed evacuees", self.processed)
    }
}

impl std::error::Error for Cancelled {}

/// Cooperative cancellation callback: answers `true` to keep going.
///
/// Polled between evacuees and between paths during output; never called concurrently.
pub type CancelPoll<'a> = Option<&'a dyn Fn() -> bool>;

fn check_cancel(cancel: CancelPoll, processed: usize) -> Result<()> {
    if let Some(keep_going) = cancel {
        if !keep_going() {
            return Err(anyhow::Error::new(Cancelled { processed }));
        }
    }
    Ok(())
}

/// The evacuation solver.
#[derive(Clone, Debug)]
pub struct EvcSolver {
    parameters: Parameters,
}

impl EvcSolver {
    /// Creates a new EvcSolver from validated parameters.
    pub const fn new(parameters: Parameters) -> Self {
        EvcSolver { parameters }
    }

    /// Returns a reference to the parameters of the solver.
    pub const fn get_parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Solves the evacuation: routes every evacuee across the dynamic time slices.
    ///
    /// The evacuee list is mutated in place; the returned [SolveOutput] carries the routes, the
    /// optional edge statistics and the summary report.
    pub fn solve(
        &self,
        network: &RoadNetwork,
        evacuees: &mut EvacueeList,
        zones: &mut SafeZoneTable,
        dynamic: &mut DynamicScenario,
        cancel: CancelPoll,
    ) -> Result<SolveOutput> {
        let started = Instant::now();
        evacuees.finalize_groupings(&self.parameters, network);
        info!(
            "Solving for {} evacuees and {} safe zones",
            evacuees.len(),
            zones.len()
        );

        let mut cache = EdgeCache::new(network, &self.parameters);
        let mut vertices = VertexCache::new();
        let mut order_counter: u32 = 0;
        let mut outer_iterations = 0;
        let progress = CasperProgressBar::new(evacuees.len()).with_message("Routing evacuees");

        let nb_time_slices = dynamic.reset();
        for _ in 0..nb_time_slices {
            let slice = dynamic.process_next_slice(
                network,
                &mut cache,
                evacuees,
                zones,
                &mut order_counter,
            )?;
            if slice.is_final {
                break;
            }
            if slice.queued > 0 {
                progress.suspend(|| {
                    info!(
                        "Time slice {}: {} evacuees queued for reprocessing",
                        slice.time, slice.queued
                    )
                });
            }
            outer_iterations += self.run_iterations(
                network,
                &mut cache,
                &mut vertices,
                evacuees,
                zones,
                &mut order_counter,
                cancel,
                &progress,
            )?;
        }
        progress.finish();

        let mut spinner = Spinner::new("Writing results");
        let (routes, edge_stats) = self.build_results(evacuees, zones, &cache, cancel)?;
        spinner.finish();
        let report = build_report(
            evacuees,
            &cache,
            &routes,
            outer_iterations,
            nb_time_slices,
            started,
        );
        info!(
            "Solve done: {}/{} evacuees routed, max evacuation cost {:.3}",
            report.nb_processed, report.nb_evacuees, report.max_evacuation_cost
        );
        debug!(
            "Traffic-model cache hit rate: {:.1}%",
            report.traffic_cache_hit_percentage
        );
        Ok(SolveOutput {
            routes,
            edge_stats,
            report,
        })
    }

    /// Runs CARMA / forward / second-chance iterations until convergence or the ceiling.
    ///
    /// Returns the number of iterations run.
    #[allow(clippy::too_many_arguments)]
    fn run_iterations(
        &self,
        network: &RoadNetwork,
        cache: &mut EdgeCache,
        vertices: &mut VertexCache,
        evacuees: &mut EvacueeList,
        zones: &mut SafeZoneTable,
        order_counter: &mut u32,
        cancel: CancelPoll,
        progress: &CasperProgressBar,
    ) -> Result<u32> {
        let method = self.parameters.solver_method;
        let init_delay = self.parameters.init_delay_cost_per_pop;
        let mut iteration = 0;
        loop {
            iteration += 1;
            let sorted = carma::carma_pass(
                network,
                cache,
                vertices,
                evacuees,
                zones,
                &self.parameters,
            );
            if sorted.is_empty() {
                iteration -= 1;
                break;
            }
            debug!("Iteration {iteration}: routing {} evacuees", sorted.len());
            for id in sorted {
                check_cancel(cancel, count_processed(evacuees))?;
                search::route_evacuee(
                    network,
                    cache,
                    vertices,
                    zones,
                    evacuees.get_mut(id),
                    &self.parameters,
                    order_counter,
                );
                progress.inc();
            }

            // Realized costs, now that every other path of the iteration is in place.
            let mut max_cost: f64 = 0.0;
            for evacuee in evacuees.iter_mut() {
                let mut final_cost = f64::NEG_INFINITY;
                for path in evacuee
                    .paths
                    .iter_mut()
                    .filter(|p| p.status == PathStatus::ActiveComplete)
                {
                    let cost = path.calculate_final_cost(cache, method, init_delay);
                    final_cost = final_cost.max(cost);
                }
                if final_cost.is_finite() {
                    evacuee.final_cost = final_cost;
                    max_cost = max_cost.max(final_cost);
                }
            }

            if iteration >= self.parameters.iteration_ceiling {
                info!("Iteration ceiling reached");
                break;
            }
            let demoted = second_chance_demotions(evacuees, cache, &self.parameters, max_cost);
            if demoted.is_empty() {
                break;
            }
            progress.suspend(|| {
                info!(
                    "Iteration {iteration}: {} evacuees get a second chance",
                    demoted.len()
                )
            });
            let mut touched = HashSet::new();
            for id in demoted {
                let evacuee = evacuees.get_mut(id);
                evacuee.status = EvacueeStatus::Unprocessed;
                detach_active_paths(evacuee, cache, zones, &mut touched);
            }
            cache.how_dirty_exhaustive(touched, self.parameters.cost_method, 0.0);
        }
        Ok(iteration)
    }

    /// Builds the route and edge-statistics records from the solved state.
    fn build_results(
        &self,
        evacuees: &EvacueeList,
        zones: &SafeZoneTable,
        cache: &EdgeCache,
        cancel: CancelPoll,
    ) -> Result<(Vec<RouteRecord>, Vec<EdgeStatRecord>)> {
        let mut routes = Vec::new();
        for evacuee in evacuees.iter() {
            if evacuee.status != EvacueeStatus::Processed {
                continue;
            }
            let Some(path) = evacuee.front_path() else {
                continue;
            };
            check_cancel(cancel, routes.len())?;
            let safe_zone_name = zones
                .get(path.safe_zone)
                .map(|z| z.name.clone())
                .unwrap_or_default();
            routes.push(RouteRecord {
                evacuee_name: evacuee.name.clone(),
                evacuation_time: path.final_evacuation_cost,
                original_time: path.original_cost,
                routed_population: path.routed_pop,
                safe_zone_name,
                edges: path
                    .segments
                    .iter()
                    .map(|s| RouteEdgeRecord {
                        edge: s.edge.index.index() as u32,
                        direction: s.edge.direction,
                        from_ratio: s.from_ratio,
                        to_ratio: s.to_ratio,
                    })
                    .collect(),
            });
        }

        let mut edge_stats = Vec::new();
        if self.parameters.export_edge_stats {
            for (edge, reserved_pop) in cache.iter_edges() {
                if reserved_pop <= 0.0 {
                    continue;
                }
                edge_stats.push(EdgeStatRecord {
                    edge: edge.key.index.index() as u32,
                    direction: edge.key.direction,
                    reserved_pop,
                    final_cost: cache
                        .current_cost(edge.key, self.parameters.solver_method.realized()),
                    original_cost: edge.original_cost,
                });
            }
            edge_stats.sort_by_key(|s| (s.edge, s.direction == crate::network::TravelDirection::Against));
        }
        Ok((routes, edge_stats))
    }
}

fn count_processed(evacuees: &EvacueeList) -> usize {
    evacuees
        .iter()
        .filter(|e| e.status == EvacueeStatus::Processed)
        .count()
}

fn build_report(
    evacuees: &EvacueeList,
    cache: &EdgeCache,
    routes: &[RouteRecord],
    outer_iterations: u32,
    nb_time_slices: usize,
    started: Instant,
) -> SolveReport {
    let routed_pop: f64 = routes.iter().map(|r| r.routed_population).sum();
    let weighted_cost: f64 = routes
        .iter()
        .map(|r| r.routed_population * r.evacuation_time)
        .sum();
    SolveReport {
        nb_evacuees: evacuees.len(),
        nb_processed: count_processed(evacuees),
        nb_unreachable: evacuees
            .iter()
            .filter(|e| e.status == EvacueeStatus::Unreachable)
            .count(),
        outer_iterations,
        nb_time_slices,
        max_evacuation_cost: routes
            .iter()
            .map(|r| r.evacuation_time)
            .fold(0.0, f64::max),
        avg_evacuation_cost: if routed_pop > 0.0 {
            weighted_cost / routed_pop
        } else {
            0.0
        },
        traffic_cache_hit_percentage: cache.traffic.cache_hit_percentage(),
        running_time: (Instant::now() - started).as_seconds_f64(),
    }
}
