mod common;

use casper::evacuee::EvacueeStatus;
use casper::parameters::Parameters;
use common::{edge, evacuee, solve, zone};

#[test]
fn evacuee_with_no_route_to_a_zone_is_unreachable() {
    // The safe zone sits on junction 2, which no edge leads to.
    let (output, evacuees) = solve(
        3,
        &[edge(0, 1, 10.0, 100.0)],
        &[evacuee("stuck", 5.0, 0, 0.0)],
        &[zone("island", 2)],
        &[],
        Parameters::default(),
    );
    assert!(output.routes.is_empty());
    assert_eq!(output.report.nb_processed, 0);
    assert_eq!(output.report.nb_unreachable, 1);
    let stuck = evacuees.get(0);
    assert_eq!(stuck.status, EvacueeStatus::Unreachable);
    assert!(stuck.paths.is_empty());
}

#[test]
fn reachable_and_unreachable_evacuees_coexist() {
    // Junctions 0-1 are connected to the zone on 2; junctions 3-4 are a separate island.
    let (output, evacuees) = solve(
        5,
        &[
            edge(0, 1, 10.0, 100.0),
            edge(1, 2, 10.0, 100.0),
            edge(3, 4, 10.0, 100.0),
        ],
        &[
            evacuee("lucky", 1.0, 0, 0.0),
            evacuee("stranded", 1.0, 2, 0.0),
        ],
        &[zone("shelter", 2)],
        &[],
        Parameters::default(),
    );
    assert_eq!(output.routes.len(), 1);
    assert_eq!(output.routes[0].evacuee_name, "lucky");
    assert_eq!(evacuees.get(1).status, EvacueeStatus::Unreachable);
    assert_eq!(output.report.nb_unreachable, 1);
}
