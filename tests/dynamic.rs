mod common;

use casper::dynamic::DynamicChangeRecord;
use casper::network::{EdgeDirections, TravelDirection};
use casper::parameters::{DynamicMode, Parameters};
use common::{edge, evacuee, solve, zone};

fn change(start: f64, cost_multiplier: f64, edges: Vec<u32>) -> DynamicChangeRecord {
    DynamicChangeRecord {
        directions: EdgeDirections::Both,
        start_time: start,
        end_time: None,
        cost_multiplier,
        capacity_multiplier: 1.0,
        edges,
    }
}

#[test]
fn simple_mode_makes_paths_avoid_the_degraded_edge() {
    // Direct route 1 -> 3 over edge 1, or a detour through junction 2.
    let edges = vec![
        edge(0, 1, 10.0, 100.0),
        edge(1, 3, 10.0, 100.0),
        edge(1, 2, 15.0, 100.0),
        edge(2, 3, 15.0, 100.0),
    ];
    let parameters = Parameters {
        dynamic_mode: DynamicMode::Simple,
        ..Default::default()
    };
    let (output, _) = solve(
        4,
        &edges,
        &[evacuee("group", 1.0, 0, 0.0)],
        &[zone("refuge", 3)],
        &[change(0.0, 1000.0, vec![1])],
        parameters,
    );
    assert_eq!(output.routes.len(), 1);
    let route = &output.routes[0];
    assert!(route.edges.iter().all(|e| e.edge != 1));
    assert!((route.evacuation_time - 40.0).abs() < 1e-9);
}

#[test]
fn smart_mode_splits_the_path_and_reroutes_the_tail() {
    // Initial route: edges 0, 1, 2 (cost 30). At t=15 the group is halfway through edge 1 when
    // edge 2 degrades; the tail reroutes through junction 4.
    let edges = vec![
        edge(0, 1, 10.0, 100.0),
        edge(1, 2, 10.0, 100.0),
        edge(2, 3, 10.0, 100.0),
        edge(2, 4, 15.0, 100.0),
        edge(4, 3, 15.0, 100.0),
    ];
    let parameters = Parameters {
        dynamic_mode: DynamicMode::Smart,
        ..Default::default()
    };
    let (output, evacuees) = solve(
        5,
        &edges,
        &[evacuee("group", 1.0, 0, 0.0)],
        &[zone("refuge", 3)],
        &[change(15.0, 100.0, vec![2])],
        parameters,
    );

    assert_eq!(output.routes.len(), 1);
    let route = &output.routes[0];
    // The merged route walks the frozen half (edges 0 and 1) then the rerouted tail.
    let walked: Vec<u32> = route.edges.iter().map(|e| e.edge).collect();
    assert_eq!(walked, vec![0, 1, 3, 4]);
    for slice in &route.edges {
        assert_eq!(slice.direction, TravelDirection::Along);
        assert_eq!(slice.from_ratio, 0.0);
        assert_eq!(slice.to_ratio, 1.0);
    }
    // 15 walked before the split, then half of edge 1 (5) and the detour (30).
    assert!((route.evacuation_time - 50.0).abs() < 1e-9);

    let evacuee = evacuees.get(0);
    assert_eq!(evacuee.paths.len(), 1);
    let path = evacuee.front_path().unwrap();
    assert_eq!(path.path_start_cost, 0.0);
    // Consecutive merged segments are seamless.
    for pair in path.segments.windows(2) {
        assert!(pair[0].to_ratio == 1.0 && pair[1].from_ratio == 0.0);
    }
}

#[test]
fn full_mode_split_and_merge_is_idempotent_for_untouched_paths() {
    // Two disjoint corridors into the zone on junction 2. Only the first one degrades, but the
    // full mode moves both groups along their paths at t=15.
    let edges = vec![
        edge(0, 1, 10.0, 100.0),
        edge(1, 2, 10.0, 100.0),
        edge(3, 4, 10.0, 100.0),
        edge(4, 2, 10.0, 100.0),
    ];
    let parameters = Parameters {
        dynamic_mode: DynamicMode::Full,
        ..Default::default()
    };
    let (output, evacuees) = solve(
        5,
        &edges,
        &[
            evacuee("affected", 1.0, 0, 0.0),
            evacuee("bystander", 1.0, 2, 0.0),
        ],
        &[zone("refuge", 2)],
        &[change(15.0, 100.0, vec![1])],
        parameters,
    );
    assert_eq!(output.routes.len(), 2);

    // The bystander path was split at t=15 and merged back into its original segments.
    let bystander = evacuees.get(1);
    let path = bystander.front_path().unwrap();
    let walked: Vec<u32> = path.segments.iter().map(|s| s.edge.index.index() as u32).collect();
    assert_eq!(walked, vec![2, 3]);
    for segment in &path.segments {
        assert_eq!(segment.from_ratio, 0.0);
        assert_eq!(segment.to_ratio, 1.0);
    }
    let bystander_route = output
        .routes
        .iter()
        .find(|r| r.evacuee_name == "bystander")
        .unwrap();
    assert!((bystander_route.evacuation_time - 20.0).abs() < 1e-9);

    // The affected group was already on the degraded edge and had to finish crossing it.
    let affected_route = output
        .routes
        .iter()
        .find(|r| r.evacuee_name == "affected")
        .unwrap();
    let walked: Vec<u32> = affected_route.edges.iter().map(|e| e.edge).collect();
    assert_eq!(walked, vec![0, 1]);
    // 15 before the split, then the remaining half of edge 1 at hundredfold cost.
    assert!((affected_route.evacuation_time - 515.0).abs() < 1e-9);
}
