// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Reading scenarios and writing results.
pub mod json;

use std::path::Path;

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde_derive::{Deserialize, Serialize};

use crate::dynamic::DynamicChangeRecord;
use crate::evacuee::{EvacueeRecord, SafeZoneRecord};
use crate::network::RoadEdgeRecord;
use crate::parameters::Parameters;
use crate::report::SolveOutput;

/// A full scenario: the network, the demand, the destinations and the parameters.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[schemars(title = "Scenario")]
#[schemars(description = "An evacuation scenario: network, evacuees, safe zones and parameters.")]
pub struct Scenario {
    /// Solver parameters.
    #[serde(default)]
    pub parameters: Parameters,
    /// Number of junctions in the network.
    pub nb_junctions: usize,
    /// Edge table of the network.
    pub edges: Vec<RoadEdgeRecord>,
    /// Evacuee table.
    pub evacuees: Vec<EvacueeRecord>,
    /// Safe-zone table.
    pub safe_zones: Vec<SafeZoneRecord>,
    /// Optional dynamic-changes table.
    #[serde(default)]
    pub dynamic_changes: Vec<DynamicChangeRecord>,
}

/// Deserializes a scenario from a JSON file.
pub fn read_scenario(path: &Path) -> Result<Scenario> {
    json::read_json(path).context("Failed to read scenario")
}

/// Writes the results of a solve to the output directory.
///
/// The routes always go to `routes.json` and the summary to `report.json`; the per-edge
/// statistics go to `edge_stats.json` when they were collected.
pub fn write_results(output: &SolveOutput, parameters: &Parameters) -> Result<()> {
    let dir = &parameters.output_directory;
    json::write_json(&output.routes, dir, "routes").context("Failed to write routes")?;
    if parameters.export_edge_stats {
        json::write_json(&output.edge_stats, dir, "edge_stats")
            .context("Failed to write edge statistics")?;
    }
    json::write_json(&output.report, dir, "report").context("Failed to write report")?;
    Ok(())
}
