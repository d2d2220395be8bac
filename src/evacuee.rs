// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Evacuees, their anchors on the network, and the safe zones they evacuate to.
use anyhow::{bail, Result};
use enum_as_inner::EnumAsInner;
use hashbrown::HashMap;
use log::warn;
use petgraph::graph::{edge_index, node_index, NodeIndex};
use schemars::JsonSchema;
use serde_derive::{Deserialize, Serialize};

use crate::network::edge::EdgeCache;
use crate::network::{EdgeKey, RoadNetwork, TravelDirection};
use crate::parameters::{Parameters, SolverMethod};
use crate::path::{EvcPath, PathKey};

/// Index of an evacuee in the evacuee list.
pub type EvacueeId = usize;

/// Routing status of an evacuee.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumAsInner)]
pub enum EvacueeStatus {
    /// Waiting to be routed.
    Unprocessed,
    /// Being looked for by the current CARMA pass.
    CarmaLooking,
    /// Routed to a safe zone.
    Processed,
    /// No safe zone is reachable from the evacuee.
    Unreachable,
}

/// A point anchoring an evacuee (or a safe-zone entrance) on the network.
#[derive(Clone, Copy, Debug)]
pub struct Anchor {
    /// Junction the anchor leads to.
    pub vertex: NodeIndex,
    /// Edge the anchor sits on, traversed towards `vertex`.
    pub behind_edge: Option<EdgeKey>,
    /// Share of the behind edge still to traverse to reach `vertex`.
    pub portion: f64,
}

/// One row of the evacuee table of a scenario.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[schemars(title = "Evacuee Record")]
pub struct EvacueeRecord {
    /// Display name of the evacuee.
    pub name: String,
    /// Number of people in the group.
    pub population: f64,
    /// One or two locations of the group on the network.
    pub anchors: Vec<AnchorRecord>,
}

/// Location of an evacuee along an edge.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema)]
pub struct AnchorRecord {
    /// Index of the edge the evacuee sits on.
    pub edge: u32,
    /// Direction the evacuee would traverse the edge in.
    pub direction: TravelDirection,
    /// Position along the travel direction, between 0 and 1.
    #[serde(default)]
    pub position: f64,
}

/// A group of people at a known location, to be routed to any safe zone.
#[derive(Clone, Debug)]
pub struct Evacuee {
    /// Index of the evacuee in the evacuee list.
    pub id: EvacueeId,
    /// Identifier of the input record the evacuee was built from.
    pub object_id: u32,
    /// Display name.
    pub name: String,
    /// Number of people in the group.
    pub population: f64,
    /// Current locations of the group on the network.
    pub anchors: Vec<Anchor>,
    /// Evacuation cost estimated by CARMA.
    pub predicted_cost: f64,
    /// Evacuation cost realized once every path was finalized.
    pub final_cost: f64,
    /// Cost already spent before the group starts moving (non-zero after a dynamic move).
    pub starting_cost: f64,
    /// Routing status.
    pub status: EvacueeStatus,
    /// Last edge that discovered this evacuee in CARMA, seeded into the next pass.
    pub discovery_leaf: Option<EdgeKey>,
    /// Routed paths; the front path is the live one, the others are frozen halves.
    pub paths: std::collections::VecDeque<EvcPath>,
}

impl Evacuee {
    /// Creates a new Evacuee.
    pub fn new(
        id: EvacueeId,
        object_id: u32,
        name: String,
        population: f64,
        anchors: Vec<Anchor>,
    ) -> Self {
        Evacuee {
            id,
            object_id,
            name,
            population,
            anchors,
            predicted_cost: f64::INFINITY,
            final_cost: f64::INFINITY,
            starting_cost: 0.0,
            status: EvacueeStatus::Unprocessed,
            discovery_leaf: None,
            paths: std::collections::VecDeque::new(),
        }
    }

    /// Returns the live path of the evacuee, if any.
    pub fn front_path(&self) -> Option<&EvcPath> {
        self.paths.front()
    }

    /// Relocates the evacuee onto an edge after simulated time has elapsed.
    ///
    /// The single new anchor points to the head of the edge, with the given share of the edge
    /// still to traverse; the elapsed time becomes the starting cost of the next path.
    pub fn dynamic_move(
        &mut self,
        edge: EdgeKey,
        remaining_portion: f64,
        head: NodeIndex,
        time: f64,
    ) {
        self.anchors = vec![Anchor {
            vertex: head,
            behind_edge: Some(edge),
            portion: remaining_portion,
        }];
        self.discovery_leaf = Some(edge);
        self.starting_cost = time;
    }
}

/// Owner of every evacuee of a solve.
#[derive(Clone, Debug, Default)]
pub struct EvacueeList {
    evacuees: Vec<Evacuee>,
}

impl EvacueeList {
    /// Builds the evacuee list from the records of a scenario.
    pub fn from_records(records: &[EvacueeRecord], network: &RoadNetwork) -> Result<Self> {
        let mut evacuees = Vec::with_capacity(records.len());
        for (object_id, record) in records.iter().enumerate() {
            if record.population <= 0.0 {
                bail!(
                    "Evacuee `{}` has a non-positive population: {}",
                    record.name,
                    record.population
                );
            }
            if record.anchors.is_empty() || record.anchors.len() > 2 {
                bail!(
                    "Evacuee `{}` must be anchored to one or two edges, got {}",
                    record.name,
                    record.anchors.len()
                );
            }
            let mut anchors = Vec::with_capacity(record.anchors.len());
            for anchor in &record.anchors {
                if anchor.edge as usize >= network.edge_count() {
                    bail!(
                        "Evacuee `{}` is anchored to unknown edge {}",
                        record.name,
                        anchor.edge
                    );
                }
                let key = EdgeKey::new(edge_index(anchor.edge as usize), anchor.direction);
                if !network.allows(key) {
                    bail!(
                        "Evacuee `{}` is anchored to edge {} in a direction it cannot be traversed in",
                        record.name,
                        anchor.edge
                    );
                }
                if !(0.0..=1.0).contains(&anchor.position) {
                    bail!(
                        "Evacuee `{}` has an anchor position outside [0, 1]: {}",
                        record.name,
                        anchor.position
                    );
                }
                anchors.push(Anchor {
                    vertex: network.head(key),
                    behind_edge: Some(key),
                    portion: 1.0 - anchor.position,
                });
            }
            evacuees.push(Evacuee::new(
                evacuees.len(),
                object_id as u32,
                record.name.clone(),
                record.population,
                anchors,
            ));
        }
        Ok(EvacueeList { evacuees })
    }

    /// Applies the grouping options: merging close clusters and splitting separable groups.
    ///
    /// Must be called once, before the first solve iteration.
    pub fn finalize_groupings(&mut self, parameters: &Parameters, network: &RoadNetwork) {
        if parameters.evacuee_grouping.merge {
            self.merge_clusters(parameters.evacuee_merge_distance, network);
        }
        if parameters.effective_separation() {
            self.separate_groups();
        }
        for (id, evacuee) in self.evacuees.iter_mut().enumerate() {
            evacuee.id = id;
        }
    }

    /// Merges single-anchor evacuees sitting within the merge distance on the same edge.
    fn merge_clusters(&mut self, merge_distance: f64, network: &RoadNetwork) {
        let mut by_edge: HashMap<EdgeKey, Vec<EvacueeId>> = HashMap::new();
        for evacuee in &self.evacuees {
            if evacuee.anchors.len() != 1 {
                continue;
            }
            if let Some(edge) = evacuee.anchors[0].behind_edge {
                by_edge.entry(edge).or_default().push(evacuee.id);
            }
        }
        let mut to_erase = Vec::new();
        for (edge, mut ids) in by_edge {
            let edge_cost = network.edge(edge.index).cost;
            let ok_portion = if edge_cost > 0.0 {
                merge_distance / edge_cost
            } else {
                0.0
            };
            ids.sort_by(|a, b| {
                self.evacuees[*a].anchors[0]
                    .portion
                    .total_cmp(&self.evacuees[*b].anchors[0].portion)
            });
            let mut left: Option<EvacueeId> = None;
            for id in ids {
                match left {
                    Some(l)
                        if (self.evacuees[id].anchors[0].portion
                            - self.evacuees[l].anchors[0].portion)
                            .abs()
                            <= ok_portion =>
                    {
                        let population = self.evacuees[id].population;
                        self.evacuees[l].population += population;
                        to_erase.push(id);
                    }
                    _ => left = Some(id),
                }
            }
        }
        if !to_erase.is_empty() {
            warn!("Merged {} evacuees into their neighbors", to_erase.len());
            to_erase.sort_unstable();
            for id in to_erase.into_iter().rev() {
                self.evacuees.remove(id);
            }
        }
    }

    /// Splits every evacuee into unit-population groups that can be routed independently.
    fn separate_groups(&mut self) {
        let mut separated = Vec::with_capacity(self.evacuees.len());
        for evacuee in self.evacuees.drain(..) {
            if evacuee.population <= 1.0 {
                separated.push(evacuee);
                continue;
            }
            let chunks = evacuee.population.ceil() as usize;
            let mut remaining = evacuee.population;
            for chunk in 0..chunks {
                let population = remaining.min(1.0);
                remaining -= population;
                let mut part = evacuee.clone();
                part.name = format!("{}#{}", evacuee.name, chunk);
                part.population = population;
                separated.push(part);
            }
        }
        self.evacuees = separated;
    }

    /// Returns the evacuee with the given id.
    pub fn get(&self, id: EvacueeId) -> &Evacuee {
        &self.evacuees[id]
    }

    /// Returns the evacuee with the given id, mutably.
    pub fn get_mut(&mut self, id: EvacueeId) -> &mut Evacuee {
        &mut self.evacuees[id]
    }

    /// Returns the number of evacuees.
    pub fn len(&self) -> usize {
        self.evacuees.len()
    }

    /// Returns `true` if the list holds no evacuee.
    pub fn is_empty(&self) -> bool {
        self.evacuees.is_empty()
    }

    /// Returns an iterator over the evacuees.
    pub fn iter(&self) -> impl Iterator<Item = &Evacuee> + '_ {
        self.evacuees.iter()
    }

    /// Returns an iterator over the evacuees, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Evacuee> + '_ {
        self.evacuees.iter_mut()
    }

    /// Finds a path by its key.
    pub fn find_path(&self, key: PathKey) -> Option<&EvcPath> {
        self.evacuees
            .get(key.evacuee)?
            .paths
            .iter()
            .find(|p| p.order == key.order)
    }

    /// Resets every unreachable evacuee to unprocessed, after the network was reshaped.
    ///
    /// A dynamic change can re-open a part of the network, so evacuees stuck in a previous slice
    /// get another chance, starting from the current simulated time.
    pub fn reset_unreachable(&mut self, starting_cost: f64) -> usize {
        let mut count = 0;
        for evacuee in self.evacuees.iter_mut() {
            if evacuee.status.is_unreachable() {
                evacuee.status = EvacueeStatus::Unprocessed;
                evacuee.predicted_cost = f64::INFINITY;
                evacuee.starting_cost = starting_cost;
                count += 1;
            }
        }
        count
    }
}

/// One row of the safe-zone table of a scenario.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[schemars(title = "Safe Zone Record")]
pub struct SafeZoneRecord {
    /// Junction the safe zone sits on.
    pub junction: u32,
    /// Edge the zone entrance sits on, leaving the junction.
    #[serde(default)]
    pub behind_edge: Option<u32>,
    /// Position of the entrance along the behind edge, between 0 and 1.
    #[serde(default)]
    pub position_along: f64,
    /// Capacity of the zone; 0 means unlimited when the density cost is zero.
    #[serde(default)]
    pub capacity: f64,
    /// Display name of the zone.
    pub name: String,
}

/// A destination with optional capacity and an optional entrance along a specific edge.
#[derive(Clone, Debug)]
pub struct SafeZone {
    /// Junction the zone sits on.
    pub vertex: NodeIndex,
    /// Edge the zone entrance sits on, traversed away from the junction.
    pub behind_edge: Option<EdgeKey>,
    /// Position of the entrance along the behind edge.
    pub position_along: f64,
    /// Capacity of the zone, in population units.
    pub capacity: f64,
    /// Population already reserved into the zone.
    pub reserved_pop: f64,
    /// Display name of the zone.
    pub name: String,
}

impl SafeZone {
    /// Adds (or, with a negative argument, releases) reserved population.
    pub fn reserve(&mut self, population: f64) {
        self.reserved_pop += population;
        debug_assert!(self.reserved_pop >= -1e-9, "Negative safe-zone reservation");
        self.reserved_pop = self.reserved_pop.max(0.0);
    }

    /// Returns the cost of evacuating `population` more people into the zone.
    ///
    /// The cost is the overflow penalty plus the entry cost along the behind edge. A zone with
    /// zero capacity under a positive density cost is impassable.
    pub fn cost(
        &self,
        population: f64,
        method: SolverMethod,
        cost_per_density: f64,
        cache: &EdgeCache,
    ) -> f64 {
        if self.capacity == 0.0 && cost_per_density > 0.0 {
            return f64::INFINITY;
        }
        let mut cost = 0.0;
        let total = population + self.reserved_pop;
        if self.capacity > 0.0 && total > self.capacity {
            cost += cost_per_density * (total / self.capacity - 1.0);
        }
        if let Some(edge) = self.behind_edge {
            cost += cache.cost_with(edge, population, method) * self.position_along;
        }
        cost
    }

    /// Returns `true` if the zone cannot be entered when arriving on the leading edge.
    ///
    /// A zone is restricted when it has zero capacity under a positive density cost, or when its
    /// behind edge is not among the turns permitted from the leading edge.
    pub fn is_restricted(
        &self,
        network: &RoadNetwork,
        leading: Option<EdgeKey>,
        cost_per_density: f64,
    ) -> bool {
        if self.capacity == 0.0 && cost_per_density > 0.0 {
            return true;
        }
        match self.behind_edge {
            None => false,
            Some(behind) => !network.edges_out_of(self.vertex, leading).any(|k| k == behind),
        }
    }
}

/// Owner of the safe zones, keyed by their junction.
#[derive(Clone, Debug, Default)]
pub struct SafeZoneTable {
    zones: HashMap<NodeIndex, SafeZone>,
}

impl SafeZoneTable {
    /// Builds the safe-zone table from the records of a scenario.
    ///
    /// A second zone on the same junction is dropped with a warning, the way duplicate input
    /// rows are tolerated elsewhere.
    pub fn from_records(records: &[SafeZoneRecord], network: &RoadNetwork) -> Result<Self> {
        let mut zones = HashMap::with_capacity(records.len());
        for record in records {
            if record.junction as usize >= network.junction_count() {
                bail!(
                    "Safe zone `{}` sits on unknown junction {}",
                    record.name,
                    record.junction
                );
            }
            if !(0.0..=1.0).contains(&record.position_along) {
                bail!(
                    "Safe zone `{}` has a position outside [0, 1]: {}",
                    record.name,
                    record.position_along
                );
            }
            if record.capacity < 0.0 {
                bail!(
                    "Safe zone `{}` has a negative capacity: {}",
                    record.name,
                    record.capacity
                );
            }
            let junction = node_index(record.junction as usize);
            let behind_edge = match record.behind_edge {
                None => None,
                Some(edge) => {
                    if edge as usize >= network.edge_count() {
                        bail!("Safe zone `{}` references unknown edge {}", record.name, edge);
                    }
                    // The entrance edge leaves the zone junction; pick the direction that does.
                    let index = edge_index(edge as usize);
                    let key = [TravelDirection::Along, TravelDirection::Against]
                        .into_iter()
                        .map(|direction| EdgeKey::new(index, direction))
                        .find(|key| network.allows(*key) && network.tail(*key) == junction);
                    match key {
                        Some(key) => Some(key),
                        None => bail!(
                            "Safe zone `{}`: edge {} does not leave junction {}",
                            record.name,
                            edge,
                            record.junction
                        ),
                    }
                }
            };
            let zone = SafeZone {
                vertex: junction,
                behind_edge,
                position_along: record.position_along,
                capacity: record.capacity,
                reserved_pop: 0.0,
                name: record.name.clone(),
            };
            if zones.insert(junction, zone).is_some() {
                warn!(
                    "Duplicate safe zone on junction {}; keeping the last one",
                    record.junction
                );
            }
        }
        Ok(SafeZoneTable { zones })
    }

    /// Returns the safe zone on a junction, if any.
    pub fn get(&self, junction: NodeIndex) -> Option<&SafeZone> {
        self.zones.get(&junction)
    }

    /// Returns the safe zone on a junction, mutably.
    pub fn get_mut(&mut self, junction: NodeIndex) -> Option<&mut SafeZone> {
        self.zones.get_mut(&junction)
    }

    /// Returns the number of safe zones.
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Returns `true` if there is no safe zone.
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Returns an iterator over the safe zones.
    pub fn iter(&self) -> impl Iterator<Item = &SafeZone> + '_ {
        self.zones.values()
    }
}
