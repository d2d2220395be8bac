// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Dynamic time-frame engine: edge multipliers that activate and deactivate over time, and the
//! splitting and merging of paths frozen by elapsed simulated time.
use anyhow::{bail, Result};
use hashbrown::{HashMap, HashSet};
use log::{debug, info, warn};
use petgraph::graph::edge_index;
use schemars::JsonSchema;
use serde_derive::{Deserialize, Serialize};

use crate::evacuee::{EvacueeList, EvacueeStatus, SafeZoneTable};
use crate::network::edge::EdgeCache;
use crate::network::{EdgeDirections, EdgeKey, RoadNetwork, TravelDirection};
use crate::parameters::{DynamicMode, Parameters, SolverMethod};
use crate::path::{EvcPath, PathKey, PathSegment, PathStatus};

/// Largest multiplier a dynamic change can apply to an edge cost.
pub const MAX_COST_RATIO: f64 = 1000.0;
/// Smallest multiplier a dynamic change can apply to an edge cost.
pub const MIN_COST_RATIO: f64 = 1.0 / 1000.0;
/// Largest multiplier a dynamic change can apply to an edge capacity.
pub const MAX_CAPACITY_RATIO: f64 = 1000.0;
/// Smallest multiplier a dynamic change can apply to an edge capacity.
pub const MIN_CAPACITY_RATIO: f64 = 1.0 / 100.0;
/// Tolerance on the shared split ratio when two half-paths are merged.
const MERGE_RATIO_TOLERANCE: f64 = 1e-4;

/// One row of the dynamic-changes table of a scenario.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[schemars(title = "Dynamic Change Record")]
pub struct DynamicChangeRecord {
    /// Travel directions the change applies to.
    #[serde(default)]
    pub directions: EdgeDirections,
    /// Simulated time at which the change activates.
    pub start_time: f64,
    /// Simulated time at which the change deactivates; absent means never.
    #[serde(default)]
    pub end_time: Option<f64>,
    /// Multiplier applied to the cost of the enclosed edges.
    #[serde(default = "default_multiplier")]
    pub cost_multiplier: f64,
    /// Multiplier applied to the capacity of the enclosed edges.
    #[serde(default = "default_multiplier")]
    pub capacity_multiplier: f64,
    /// Indices of the enclosed edges.
    pub edges: Vec<u32>,
}

fn default_multiplier() -> f64 {
    1.0
}

/// A validated dynamic change.
#[derive(Clone, Debug)]
struct SingleDynamicChange {
    directions: EdgeDirections,
    start_time: f64,
    end_time: f64,
    cost_multiplier: f64,
    capacity_multiplier: f64,
    edges: Vec<EdgeKey>,
}

/// One critical time: a moment the engine takes a slice at, with the changes active then.
#[derive(Clone, Debug)]
struct CriticalTime {
    time: f64,
    active: Vec<usize>,
}

/// What one processed time slice reports back to the solver.
#[derive(Clone, Copy, Debug)]
pub struct SliceOutcome {
    /// Simulated time of the slice.
    pub time: f64,
    /// Number of evacuees queued for reprocessing.
    pub queued: usize,
    /// `true` for the closing slice, after which no routing happens.
    pub is_final: bool,
}

/// The dynamic engine: an ordered set of critical times and the multiplier bookkeeping.
#[derive(Clone, Debug)]
pub struct DynamicScenario {
    mode: DynamicMode,
    method: SolverMethod,
    changes: Vec<SingleDynamicChange>,
    time_frame: Vec<CriticalTime>,
    current: usize,
    /// Multipliers applied at the previous slice, kept so they can be undone.
    backup: HashMap<EdgeKey, (f64, f64)>,
    /// Set when a change row encloses no edge; the row was dropped but the solve goes on.
    pub bad_snapping: bool,
}

impl DynamicScenario {
    /// Validates the dynamic-changes table and builds the critical-time frame.
    pub fn from_records(
        records: &[DynamicChangeRecord],
        network: &RoadNetwork,
        parameters: &Parameters,
    ) -> Result<Self> {
        let mut mode = parameters.dynamic_mode;
        let mut bad_snapping = false;
        let mut changes = Vec::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            if mode == DynamicMode::Disabled {
                break;
            }
            let end_time = record.end_time.unwrap_or(f64::INFINITY);
            if record.start_time < 0.0 || !record.start_time.is_finite() {
                bail!("Dynamic change {i} has an invalid start time: {}", record.start_time);
            }
            if end_time <= record.start_time {
                bail!(
                    "Dynamic change {i} ends at {end_time} but starts at {}",
                    record.start_time
                );
            }
            if !(record.cost_multiplier > 0.0) || !(record.capacity_multiplier > 0.0) {
                bail!("Dynamic change {i} has non-positive multipliers");
            }
            if record.edges.is_empty() {
                warn!("Dynamic change {i} encloses no edge; it is ignored");
                bad_snapping = true;
                continue;
            }
            let cost_multiplier = record.cost_multiplier.clamp(MIN_COST_RATIO, MAX_COST_RATIO);
            let capacity_multiplier = record
                .capacity_multiplier
                .clamp(MIN_CAPACITY_RATIO, MAX_CAPACITY_RATIO);
            if cost_multiplier != record.cost_multiplier
                || capacity_multiplier != record.capacity_multiplier
            {
                warn!("Dynamic change {i}: multipliers clamped to the supported range");
            }
            let mut edges = Vec::new();
            for &edge in &record.edges {
                if edge as usize >= network.edge_count() {
                    bail!("Dynamic change {i} references unknown edge {edge}");
                }
                for direction in [TravelDirection::Along, TravelDirection::Against] {
                    let key = EdgeKey::new(edge_index(edge as usize), direction);
                    if record.directions.allows(direction) && network.allows(key) {
                        edges.push(key);
                    }
                }
            }
            changes.push(SingleDynamicChange {
                directions: record.directions,
                start_time: record.start_time,
                end_time,
                cost_multiplier,
                capacity_multiplier,
                edges,
            });
        }

        // Build the critical-time frame for the mode.
        let mut time_frame = Vec::new();
        match mode {
            DynamicMode::Disabled => {
                time_frame.push(CriticalTime {
                    time: 0.0,
                    active: Vec::new(),
                });
            }
            DynamicMode::Simple => {
                // All changes on at time zero, whatever their time window says.
                time_frame.push(CriticalTime {
                    time: 0.0,
                    active: (0..changes.len()).collect(),
                });
            }
            DynamicMode::Smart | DynamicMode::Full => {
                let mut times = vec![0.0];
                for change in &changes {
                    times.push(change.start_time);
                    if change.end_time.is_finite() {
                        times.push(change.end_time);
                    }
                }
                times.sort_by(f64::total_cmp);
                times.dedup();
                for time in times {
                    let active = changes
                        .iter()
                        .enumerate()
                        .filter(|(_, c)| c.start_time <= time && c.end_time > time)
                        .map(|(i, _)| i)
                        .collect();
                    time_frame.push(CriticalTime { time, active });
                }
            }
        }
        time_frame.push(CriticalTime {
            time: f64::INFINITY,
            active: Vec::new(),
        });
        // With only the two mandatory slices, the smart modes degrade to the simple one.
        if matches!(mode, DynamicMode::Smart | DynamicMode::Full) && time_frame.len() == 2 {
            mode = DynamicMode::Simple;
            time_frame[0].active = (0..changes.len()).collect();
        }
        debug!(
            "Dynamic scenario: {} changes over {} critical times ({mode:?})",
            changes.len(),
            time_frame.len()
        );
        Ok(DynamicScenario {
            mode,
            method: parameters.solver_method,
            changes,
            time_frame,
            current: 0,
            backup: HashMap::new(),
            bad_snapping,
        })
    }

    /// Rewinds the engine to the first critical time and returns the number of slices.
    pub fn reset(&mut self) -> usize {
        self.current = 0;
        self.backup.clear();
        self.time_frame.len()
    }

    /// Returns the effective dynamic mode, after a possible downgrade.
    pub const fn mode(&self) -> DynamicMode {
        self.mode
    }

    /// Processes the next critical time: reshapes the edges, moves the evacuees along their
    /// paths, and merges the frozen halves at the closing slice.
    pub fn process_next_slice(
        &mut self,
        network: &RoadNetwork,
        cache: &mut EdgeCache,
        evacuees: &mut EvacueeList,
        zones: &mut SafeZoneTable,
        order_counter: &mut u32,
    ) -> Result<SliceOutcome> {
        if self.current >= self.time_frame.len() {
            bail!("The dynamic time frame is exhausted");
        }
        let slice = self.time_frame[self.current].clone();
        self.current += 1;
        let time = slice.time;

        if time.is_infinite() {
            // Closing slice: nothing to reshape, only frozen halves to merge back.
            if !matches!(self.mode, DynamicMode::Disabled | DynamicMode::Simple) {
                merge_paths(evacuees)?;
            }
            self.backup.clear();
            return Ok(SliceOutcome {
                time,
                queued: 0,
                is_final: true,
            });
        }
        if self.mode == DynamicMode::Disabled {
            return Ok(SliceOutcome {
                time,
                queued: 0,
                is_final: false,
            });
        }

        // Undo the previous multipliers, then compose the active ones multiplicatively.
        let mut pending: HashMap<EdgeKey, (f64, f64)> =
            self.backup.keys().map(|key| (*key, (1.0, 1.0))).collect();
        for &index in &slice.active {
            let change = &self.changes[index];
            for &key in &change.edges {
                let entry = pending.entry(key).or_insert((1.0, 1.0));
                entry.0 *= change.cost_multiplier;
                entry.1 *= change.capacity_multiplier;
            }
        }

        // Edges whose composed ratios differ from what is currently applied.
        let mut affected: HashSet<EdgeKey> = pending
            .iter()
            .filter(|(key, ratios)| cache.edge(**key).ratios() != **ratios)
            .map(|(key, _)| *key)
            .collect();

        // Move evacuees along their paths to absorb the simulated time.
        let mut queued = 0;
        if time > 0.0 {
            let affected_paths: HashSet<PathKey> = affected
                .iter()
                .flat_map(|key| cache.unique_crossing_paths(*key))
                .collect();
            let move_keys: Vec<PathKey> = match self.mode {
                DynamicMode::Full => evacuees
                    .iter()
                    .flat_map(|e| e.paths.iter().map(|p| p.key()))
                    .collect(),
                _ => affected_paths.iter().copied().collect(),
            };
            queued = move_on_path(
                move_keys,
                &affected_paths,
                time,
                network,
                cache,
                evacuees,
                zones,
                self.method,
                order_counter,
                &mut affected,
            );
        }

        // Apply the new ratios and refresh the costs of everything that moved.
        for (key, (cost_ratio, capacity_ratio)) in &pending {
            if cache.edge(*key).ratios() != (*cost_ratio, *capacity_ratio) {
                cache.apply_ratios(*key, *cost_ratio, *capacity_ratio);
            }
        }
        cache.how_dirty_exhaustive(affected.iter().copied(), self.method, 1.0);

        // Keep in the backup map only the edges still carrying a multiplier.
        self.backup = pending
            .into_iter()
            .filter(|(_, (cost, capacity))| *cost != 1.0 || *capacity != 1.0)
            .collect();

        // A reshaped network can free previously trapped evacuees.
        let reset = evacuees.reset_unreachable(time);
        if reset > 0 {
            info!("Time slice {time}: {reset} previously unreachable evacuees retried");
        }
        Ok(SliceOutcome {
            time,
            queued: queued + reset,
            is_final: false,
        })
    }
}

/// Moves every listed path forward to the given simulated time, splitting it where the walked
/// cost reaches the slice time.
///
/// Paths crossing a reshaped edge lose their downstream half and their evacuee is requeued; the
/// others are split into a frozen half and a live tail that keeps its reservations. Returns the
/// number of evacuees queued for reprocessing.
#[allow(clippy::too_many_arguments)]
fn move_on_path(
    mut keys: Vec<PathKey>,
    affected_paths: &HashSet<PathKey>,
    time: f64,
    network: &RoadNetwork,
    cache: &mut EdgeCache,
    evacuees: &mut EvacueeList,
    zones: &mut SafeZoneTable,
    method: SolverMethod,
    order_counter: &mut u32,
    touched: &mut HashSet<EdgeKey>,
) -> usize {
    // Latest paths first, so a path split in an earlier slice is handled before the halves it
    // was cut from.
    keys.sort_by(|a, b| b.order.cmp(&a.order));
    keys.dedup();
    let mut requeued = 0;
    let mut removals: Vec<(EdgeKey, PathKey)> = Vec::new();

    for key in keys {
        let evacuee = evacuees.get_mut(key.evacuee);
        if evacuee.status == EvacueeStatus::Unreachable {
            continue;
        }
        let Some(position) = evacuee.paths.iter().position(|p| p.order == key.order) else {
            continue;
        };
        if evacuee.paths[position].segments.is_empty()
            || evacuee.paths[position].status != PathStatus::ActiveComplete
            || evacuee.paths[position].path_start_cost >= time
        {
            continue;
        }

        // Walk the segments until the accumulated cost reaches the slice time.
        let (final_cost, start_cost, nb_segments) = {
            let path = &evacuee.paths[position];
            (
                path.final_evacuation_cost,
                path.path_start_cost,
                path.segments.len(),
            )
        };
        let (mut cumulated, mut cut_index);
        if final_cost > time {
            cumulated = start_cost;
            cut_index = 0;
            while cumulated < time && cut_index < nb_segments {
                cumulated +=
                    evacuee.paths[position].segments[cut_index].current_cost(cache, method);
                cut_index += 1;
            }
            cut_index = cut_index.saturating_sub(1);
        } else {
            cumulated = final_cost;
            cut_index = nb_segments - 1;
        }

        if cumulated <= time {
            // The head of the group has reached safety; the path freezes whole.
            evacuee.paths[position].status = PathStatus::FrozenComplete;
            evacuee.status = EvacueeStatus::Processed;
            continue;
        }

        // Split the cut segment so that the walked part costs exactly the slice time.
        let cut = evacuee.paths[position].segments[cut_index];
        let edge_cost = cache.current_cost(cut.edge, method.realized());
        let overshoot_portion = if edge_cost > 0.0 && edge_cost.is_finite() {
            (cumulated - time) / edge_cost
        } else {
            0.0
        };
        let split_ratio = (cut.to_ratio - overshoot_portion).clamp(cut.from_ratio, cut.to_ratio);
        evacuee.dynamic_move(cut.edge, 1.0 - split_ratio, network.head(cut.edge), time);

        let tail: Vec<PathSegment> = evacuee.paths[position].segments[cut_index + 1..].to_vec();
        {
            let path = &mut evacuee.paths[position];
            path.segments.truncate(cut_index + 1);
            path.segments[cut_index].to_ratio = split_ratio;
            path.status = PathStatus::FrozenSplitted;
        }

        if affected_paths.contains(&key) {
            // The downstream half crosses a reshaped edge: discard it and requeue the evacuee.
            for segment in tail.iter().rev() {
                removals.push((segment.edge, key));
            }
            // The cut edge is released too: the next path starts here and the evacuee must not
            // overlap itself.
            removals.push((cut.edge, key));
            let (final_cost, routed_pop, safe_zone) = {
                let path = &evacuee.paths[position];
                (path.final_evacuation_cost, path.routed_pop, path.safe_zone)
            };
            evacuee.status = EvacueeStatus::Unprocessed;
            evacuee.predicted_cost = final_cost;
            evacuee.final_cost = final_cost;
            if let Some(zone) = zones.get_mut(safe_zone) {
                zone.reserve(-routed_pop);
            }
            requeued += 1;
        } else {
            // Split into a frozen half and a live tail with a fresh order.
            *order_counter += 1;
            let template = &evacuee.paths[position];
            let mut live = EvcPath {
                evacuee: template.evacuee,
                order: *order_counter,
                safe_zone: template.safe_zone,
                routed_pop: template.routed_pop,
                path_start_cost: time,
                reserve_evacuation_cost: template.reserve_evacuation_cost,
                final_evacuation_cost: template.final_evacuation_cost,
                original_cost: template.original_cost,
                status: PathStatus::ActiveComplete,
                segments: Vec::with_capacity(tail.len() + 1),
            };
            live.segments
                .push(PathSegment::new(cut.edge, split_ratio, cut.to_ratio));
            live.segments.extend(tail.iter().copied());
            let live_key = live.key();
            for segment in tail.iter() {
                cache.swap_reservation(segment.edge, key, live_key);
            }
            cache.swap_reservation(cut.edge, key, live_key);
            evacuee.paths.push_front(live);
            evacuee.status = EvacueeStatus::Processed;
        }
    }

    // All the deferred reservation removals, once every path has been walked.
    for (edge, key) in removals {
        cache.remove_reservation(edge, key, true);
        touched.insert(edge);
    }
    requeued
}

/// Merges every frozen half-path back onto its evacuee's live path, at the closing slice.
fn merge_paths(evacuees: &mut EvacueeList) -> Result<()> {
    for evacuee in evacuees.iter_mut() {
        if evacuee.status == EvacueeStatus::Unreachable {
            evacuee.paths.clear();
            continue;
        }
        if evacuee.paths.is_empty() {
            continue;
        }
        let mut frozen = Vec::new();
        let mut main: Option<EvcPath> = None;
        for path in evacuee.paths.drain(..) {
            if path.status == PathStatus::FrozenSplitted {
                frozen.push(path);
            } else if main.is_some() {
                bail!("Evacuee `{}` has several live paths at merge time", evacuee.name);
            } else {
                main = Some(path);
            }
        }
        if frozen.is_empty() {
            if let Some(main) = main {
                evacuee.paths.push_back(main);
            }
            continue;
        }
        let Some(mut main) = main else {
            // The evacuee could evacuate at first but a later change trapped it mid-way.
            warn!(
                "Evacuee `{}` froze mid-way with no live path left; dropping its paths",
                evacuee.name
            );
            continue;
        };
        // Newest frozen half first: each splice extends the main path backward in time.
        for half in frozen {
            let last = *half
                .segments
                .last()
                .expect("Frozen half-path without segments");
            let first = main
                .segments
                .first_mut()
                .expect("Live path without segments");
            if first.edge != last.edge {
                bail!(
                    "Evacuee `{}`: half-paths do not share their split edge",
                    evacuee.name
                );
            }
            if (first.from_ratio - last.to_ratio).abs() > MERGE_RATIO_TOLERANCE {
                bail!(
                    "Evacuee `{}`: half-paths split at different ratios ({} vs {})",
                    evacuee.name,
                    first.from_ratio,
                    last.to_ratio
                );
            }
            first.from_ratio = last.from_ratio;
            let keep = half.segments.len() - 1;
            main.segments.splice(0..0, half.segments.into_iter().take(keep));
        }
        main.path_start_cost = 0.0;
        evacuee.paths.push_back(main);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::RoadEdgeRecord;

    fn network() -> RoadNetwork {
        RoadNetwork::from_records(
            3,
            &[
                RoadEdgeRecord {
                    from: 0,
                    to: 1,
                    cost: 10.0,
                    capacity: 10.0,
                    directions: Default::default(),
                },
                RoadEdgeRecord {
                    from: 1,
                    to: 2,
                    cost: 10.0,
                    capacity: 10.0,
                    directions: Default::default(),
                },
            ],
        )
        .unwrap()
    }

    fn record(start: f64, end: Option<f64>, cost: f64) -> DynamicChangeRecord {
        DynamicChangeRecord {
            directions: EdgeDirections::Both,
            start_time: start,
            end_time: end,
            cost_multiplier: cost,
            capacity_multiplier: 1.0,
            edges: vec![0],
        }
    }

    #[test]
    fn smart_mode_slices_at_every_start_and_end() {
        let network = network();
        let parameters = Parameters {
            dynamic_mode: DynamicMode::Smart,
            ..Default::default()
        };
        let scenario = DynamicScenario::from_records(
            &[record(5.0, Some(20.0), 2.0), record(10.0, None, 3.0)],
            &network,
            &parameters,
        )
        .unwrap();
        let times: Vec<f64> = scenario.time_frame.iter().map(|t| t.time).collect();
        assert_eq!(times, vec![0.0, 5.0, 10.0, 20.0, f64::INFINITY]);
        // At t=10 both changes are active; at t=20 only the endless one remains.
        assert_eq!(scenario.time_frame[2].active, vec![0, 1]);
        assert_eq!(scenario.time_frame[3].active, vec![1]);
    }

    #[test]
    fn smart_mode_degrades_to_simple_with_two_slices() {
        let network = network();
        let parameters = Parameters {
            dynamic_mode: DynamicMode::Smart,
            ..Default::default()
        };
        let scenario =
            DynamicScenario::from_records(&[record(0.0, None, 2.0)], &network, &parameters)
                .unwrap();
        assert_eq!(scenario.mode(), DynamicMode::Simple);
        assert_eq!(scenario.time_frame.len(), 2);
    }

    #[test]
    fn multipliers_are_clamped() {
        let network = network();
        let parameters = Parameters {
            dynamic_mode: DynamicMode::Simple,
            ..Default::default()
        };
        let scenario =
            DynamicScenario::from_records(&[record(0.0, None, 1e9)], &network, &parameters)
                .unwrap();
        assert_eq!(scenario.changes[0].cost_multiplier, MAX_COST_RATIO);
    }

    #[test]
    fn invalid_rows_are_rejected_and_empty_rows_flagged() {
        let network = network();
        let parameters = Parameters {
            dynamic_mode: DynamicMode::Simple,
            ..Default::default()
        };
        assert!(DynamicScenario::from_records(
            &[record(10.0, Some(5.0), 2.0)],
            &network,
            &parameters
        )
        .is_err());
        let mut empty = record(0.0, None, 2.0);
        empty.edges.clear();
        let scenario =
            DynamicScenario::from_records(&[empty], &network, &parameters).unwrap();
        assert!(scenario.bad_snapping);
        assert!(scenario.changes.is_empty());
    }

    #[test]
    fn slices_apply_and_undo_multipliers() {
        let network = network();
        let parameters = Parameters {
            dynamic_mode: DynamicMode::Smart,
            ..Default::default()
        };
        let mut scenario = DynamicScenario::from_records(
            &[record(0.0, Some(5.0), 100.0)],
            &network,
            &parameters,
        )
        .unwrap();
        let mut cache = EdgeCache::new(&network, &parameters);
        let mut evacuees = EvacueeList::default();
        let mut zones = SafeZoneTable::default();
        let mut order = 0;
        scenario.reset();
        let slice = scenario
            .process_next_slice(&network, &mut cache, &mut evacuees, &mut zones, &mut order)
            .unwrap();
        assert_eq!(slice.time, 0.0);
        assert_eq!(cache.edge(crate::network::along(0)).original_cost, 1000.0);
        let slice = scenario
            .process_next_slice(&network, &mut cache, &mut evacuees, &mut zones, &mut order)
            .unwrap();
        assert_eq!(slice.time, 5.0);
        assert_eq!(cache.edge(crate::network::along(0)).original_cost, 10.0);
        let slice = scenario
            .process_next_slice(&network, &mut cache, &mut evacuees, &mut zones, &mut order)
            .unwrap();
        assert!(slice.is_final);
    }
}
