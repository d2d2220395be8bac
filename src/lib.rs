// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Library for CASPER: a capacity-aware shortest-path evacuation routing solver.
#![doc(html_no_source)]

pub mod dynamic;
pub mod evacuee;
pub mod io;
pub mod logging;
pub mod network;
pub mod parameters;
pub mod path;
pub mod progress_bar;
pub mod report;
pub mod solver;

use std::path::Path;

use anyhow::{bail, Context, Result};
use log::warn;

// Dependencies only used in the bins.
use clap as _;

// Re-exports.
pub use solver::{CancelPoll, Cancelled, EvcSolver};

/// Deserializes a scenario, solves it and stores the results to its output directory.
///
/// This function takes as argument the path to the scenario JSON file.
pub fn run_scenario(path: &Path) -> Result<()> {
    run_scenario_with_cancel(path, None)
}

/// Deserializes a scenario, solves it and stores the results to its output directory.
///
/// The cancel callback, when given, is polled between units of work; answering `false` aborts
/// the solve and only the partial progress count is reported.
pub fn run_scenario_with_cancel(path: &Path, cancel: CancelPoll) -> Result<()> {
    let mut scenario = io::read_scenario(path)?;
    scenario.parameters.validate()?;

    // Create output directory if it does not exists yet.
    std::fs::create_dir_all(&scenario.parameters.output_directory).with_context(|| {
        format!(
            "Failed to create output directory `{:?}`",
            scenario.parameters.output_directory
        )
    })?;

    logging::initialize_logging(&scenario.parameters.output_directory)?;

    let network = network::RoadNetwork::from_records(scenario.nb_junctions, &scenario.edges)?;
    let mut evacuees = evacuee::EvacueeList::from_records(&scenario.evacuees, &network)?;
    let mut zones = evacuee::SafeZoneTable::from_records(&scenario.safe_zones, &network)?;
    if zones.is_empty() {
        bail!("The scenario has no safe zone");
    }
    let mut dynamic = dynamic::DynamicScenario::from_records(
        &scenario.dynamic_changes,
        &network,
        &scenario.parameters,
    )?;
    if dynamic.bad_snapping {
        warn!("Some dynamic changes were badly snapped to the network and were ignored");
    }

    let solver = EvcSolver::new(scenario.parameters);
    let output = match solver.solve(&network, &mut evacuees, &mut zones, &mut dynamic, cancel) {
        Ok(output) => output,
        Err(err) => {
            if let Some(cancelled) = err.downcast_ref::<Cancelled>() {
                warn!("{cancelled}");
            }
            return Err(err);
        }
    };
    io::write_results(&output, solver.get_parameters())
}
