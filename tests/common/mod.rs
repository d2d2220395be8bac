use casper::dynamic::{DynamicChangeRecord, DynamicScenario};
use casper::evacuee::{AnchorRecord, EvacueeList, EvacueeRecord, SafeZoneRecord, SafeZoneTable};
use casper::network::{RoadEdgeRecord, RoadNetwork, TravelDirection};
use casper::parameters::Parameters;
use casper::report::SolveOutput;
use casper::EvcSolver;

/// Builds an edge record with default (two-way) directions.
pub fn edge(from: u32, to: u32, cost: f64, capacity: f64) -> RoadEdgeRecord {
    RoadEdgeRecord {
        from,
        to,
        cost,
        capacity,
        directions: Default::default(),
    }
}

/// Builds an evacuee sitting at `position` along edge `edge`, in the digitized direction.
pub fn evacuee(name: &str, population: f64, edge: u32, position: f64) -> EvacueeRecord {
    EvacueeRecord {
        name: name.to_owned(),
        population,
        anchors: vec![AnchorRecord {
            edge,
            direction: TravelDirection::Along,
            position,
        }],
    }
}

/// Builds a safe zone directly on a junction, without capacity.
pub fn zone(name: &str, junction: u32) -> SafeZoneRecord {
    SafeZoneRecord {
        junction,
        behind_edge: None,
        position_along: 0.0,
        capacity: 0.0,
        name: name.to_owned(),
    }
}

/// Assembles the scenario pieces and runs a full solve.
pub fn solve(
    nb_junctions: usize,
    edges: &[RoadEdgeRecord],
    evacuee_records: &[EvacueeRecord],
    zone_records: &[SafeZoneRecord],
    dynamic_changes: &[DynamicChangeRecord],
    parameters: Parameters,
) -> (SolveOutput, EvacueeList) {
    let network = RoadNetwork::from_records(nb_junctions, edges).unwrap();
    let mut evacuees = EvacueeList::from_records(evacuee_records, &network).unwrap();
    let mut zones = SafeZoneTable::from_records(zone_records, &network).unwrap();
    let mut dynamic =
        DynamicScenario::from_records(dynamic_changes, &network, &parameters).unwrap();
    let solver = EvcSolver::new(parameters);
    let output = solver
        .solve(&network, &mut evacuees, &mut zones, &mut dynamic, None)
        .unwrap();
    (output, evacuees)
}
