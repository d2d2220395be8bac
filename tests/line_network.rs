mod common;

use casper::parameters::Parameters;
use casper::Cancelled;
use common::{edge, evacuee, solve, zone};

/// 5 junctions in a line, all edges cost 10 and capacity 100, safe zone at the end.
fn line_edges() -> Vec<casper::network::RoadEdgeRecord> {
    vec![
        edge(0, 1, 10.0, 100.0),
        edge(1, 2, 10.0, 100.0),
        edge(2, 3, 10.0, 100.0),
        edge(3, 4, 10.0, 100.0),
    ]
}

#[test]
fn single_evacuee_on_an_uncongested_line() {
    let (output, evacuees) = solve(
        5,
        &line_edges(),
        &[evacuee("alone", 1.0, 0, 0.0)],
        &[zone("end", 4)],
        &[],
        Parameters::default(),
    );

    assert_eq!(output.routes.len(), 1);
    let route = &output.routes[0];
    assert_eq!(route.evacuee_name, "alone");
    assert_eq!(route.safe_zone_name, "end");
    assert_eq!(route.routed_population, 1.0);
    assert!((route.evacuation_time - 40.0).abs() < 1e-9);
    assert!((route.original_time - 40.0).abs() < 1e-9);
    // The route walks the four edges in order, whole.
    assert_eq!(route.edges.len(), 4);
    for (i, slice) in route.edges.iter().enumerate() {
        assert_eq!(slice.edge, i as u32);
        assert_eq!(slice.from_ratio, 0.0);
        assert_eq!(slice.to_ratio, 1.0);
    }

    assert_eq!(output.report.nb_processed, 1);
    assert_eq!(output.report.nb_unreachable, 0);
    let path = evacuees.get(0).front_path().unwrap();
    assert!((path.final_evacuation_cost - 40.0).abs() < 1e-9);
}

#[test]
fn initial_delay_is_charged_per_person() {
    let parameters = Parameters {
        init_delay_cost_per_pop: 3.0,
        ..Default::default()
    };
    let (output, _) = solve(
        5,
        &line_edges(),
        &[evacuee("alone", 2.0, 0, 0.0)],
        &[zone("end", 4)],
        &[],
        parameters,
    );
    let route = &output.routes[0];
    // 40 of travel plus 3 per person for 2 people.
    assert!((route.evacuation_time - 46.0).abs() < 1e-9);
    assert!((route.original_time - 46.0).abs() < 1e-9);
}

#[test]
fn cancellation_aborts_the_solve() {
    let network =
        casper::network::RoadNetwork::from_records(5, &line_edges()).unwrap();
    let mut evacuees = casper::evacuee::EvacueeList::from_records(
        &[evacuee("alone", 1.0, 0, 0.0)],
        &network,
    )
    .unwrap();
    let mut zones =
        casper::evacuee::SafeZoneTable::from_records(&[zone("end", 4)], &network).unwrap();
    let parameters = Parameters::default();
    let mut dynamic =
        casper::dynamic::DynamicScenario::from_records(&[], &network, &parameters).unwrap();
    let solver = casper::EvcSolver::new(parameters);
    let cancel = || false;
    let err = solver
        .solve(&network, &mut evacuees, &mut zones, &mut dynamic, Some(&cancel))
        .unwrap_err();
    let cancelled = err.downcast_ref::<Cancelled>().unwrap();
    assert_eq!(cancelled.processed, 0);
}

#[test]
fn path_orders_increase_with_creation_time() {
    let (_, evacuees) = solve(
        5,
        &line_edges(),
        &[
            evacuee("a", 1.0, 0, 0.0),
            evacuee("b", 1.0, 0, 0.5),
            evacuee("c", 1.0, 1, 0.0),
        ],
        &[zone("end", 4)],
        &[],
        Parameters::default(),
    );
    let mut orders: Vec<u32> = evacuees
        .iter()
        .map(|e| e.front_path().unwrap().order)
        .collect();
    orders.sort_unstable();
    orders.dedup();
    assert_eq!(orders.len(), 3);
}
