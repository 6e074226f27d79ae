//! Slot allocation, slot assignment and scheduling policies.


use std::collections::BTreeMap;

use quarry_core::error::{Error, ErrorKind};
use quarry_core::node::ComputeNodeDesc;
use quarry_exec::{
    assign_slots, Allocation, MasterCoordinator, NodeHint, SchedulingPolicy, SimplePolicy,
    SlotAllocator, SlotRequest, WishListPolicy,
};

use plan_fixtures::{cluster, tracker_plan, DB_NODE, DIAMOND, LINEAR_CHAIN, SINGLE_SCAN};

fn coordinator(nodes: &[(&str, usize)]) -> MasterCoordinator {
    let c = MasterCoordinator::new();
    for (url, slots) in nodes {
        c.register_compute_node(ComputeNodeDesc::new(*url, *slots))
            .unwrap();
    }
    c
}

fn free(c: &MasterCoordinator, url: &str) -> usize {
    c.free_slots(url).unwrap().unwrap()
}

fn allocation(slots: &[(&str, usize)]) -> Allocation {
    Allocation {
        slots: slots.iter().map(|(u, n)| (u.to_string(), *n)).collect(),
    }
}

#[test]
fn any_demand_goes_to_the_most_free_node_first() {
    let c = coordinator(&[("a:1", 4), ("b:1", 2)]);
    let got = c.allocate(&SlotRequest::any(4)).unwrap();
    assert_eq!(got.total(), 4);
    assert_eq!(got.slots, BTreeMap::from([("a:1".to_string(), 3), ("b:1".to_string(), 1)]));
    assert_eq!(free(&c, "a:1") + free(&c, "b:1"), 2);
}

#[test]
fn named_demand_is_clipped_and_falls_back_to_any() {
    let c = coordinator(&[("a:1", 3), ("b:1", 1)]);
    let mut request = SlotRequest::default();
    request.add(NodeHint::Named("b:1".into()), 2);
    let got = c.allocate(&request).unwrap();
    assert_eq!(got.slots.get("b:1"), Some(&1));
    assert_eq!(got.slots.get("a:1"), Some(&1));
}

#[test]
fn refused_request_changes_nothing() {
    let c = coordinator(&[("a:1", 1), ("b:1", 1)]);
    let err = c.allocate(&SlotRequest::any(3)).unwrap_err();
    assert!(matches!(
        err,
        Error::NoFreeSlot {
            requested: 3,
            available: 2
        }
    ));
    assert_eq!(free(&c, "a:1"), 1);
    assert_eq!(free(&c, "b:1"), 1);
}

#[test]
fn slots_are_conserved_across_allocate_and_release() {
    let c = coordinator(&[("a:1", 3), ("b:1", 2)]);
    let first = c.allocate(&SlotRequest::any(2)).unwrap();
    let second = c.allocate(&SlotRequest::any(3)).unwrap();
    assert_eq!(free(&c, "a:1") + free(&c, "b:1"), 0);

    c.release(&first).unwrap();
    c.release(&second).unwrap();
    assert_eq!(free(&c, "a:1"), 3);
    assert_eq!(free(&c, "b:1"), 2);

    // Releasing twice never pushes a node above what it advertised.
    c.release(&second).unwrap();
    assert_eq!(free(&c, "a:1"), 3);
    assert_eq!(free(&c, "b:1"), 2);
}

#[test]
fn assignment_places_leaves_before_consumers() {
    let mut plan = tracker_plan(LINEAR_CHAIN);
    let mut counter = 0;
    let created = assign_slots(
        &mut plan,
        &allocation(&[("n1:1", 1), ("n2:1", 1)]),
        &SimplePolicy::new(1),
        &mut counter,
    )
    .unwrap();

    assert_eq!(created.len(), 2);
    assert_eq!(counter, 2);
    let leaf = &plan.leaves()[0];
    let root = &plan.roots()[0];
    assert_eq!(created[0].unit, *leaf);
    assert_eq!(created[1].unit, *root);
    assert_eq!(created[0].node, "n1:1");
    assert_eq!(created[1].node, "n2:1");
    assert_eq!(created[0].deployment.identifier(), &leaf.identifier().append(1));
    assert_eq!(created[1].deployment.identifier(), &root.identifier().append(2));
}

#[test]
fn assigned_units_are_skipped_on_a_second_pass() {
    let mut plan = tracker_plan(DIAMOND);
    let alloc = allocation(&[("n1:1", 2)]);
    let mut counter = 0;
    assign_slots(&mut plan, &alloc, &SimplePolicy::new(1), &mut counter).unwrap();
    let again = assign_slots(&mut plan, &alloc, &SimplePolicy::new(1), &mut counter).unwrap();
    assert!(again.is_empty());
    assert_eq!(counter, 2);
}

#[test]
fn assignment_runs_out_of_slots() {
    let mut plan = tracker_plan(LINEAR_CHAIN);
    let mut counter = 0;
    let err = assign_slots(
        &mut plan,
        &allocation(&[("n1:1", 1)]),
        &SimplePolicy::new(1),
        &mut counter,
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoFreeSlot);
}

#[test]
fn wishlist_prefers_the_store_node() {
    let plan = tracker_plan(SINGLE_SCAN);
    let nodes = vec![ComputeNodeDesc::new("a:1", 4), ComputeNodeDesc::new(DB_NODE, 1)];

    let request = WishListPolicy::new(1).slot_request(&plan, &nodes);
    assert_eq!(request.demands.get(&NodeHint::Named(DB_NODE.into())), Some(&1));
    assert_eq!(SimplePolicy::new(1).slot_request(&plan, &nodes), SlotRequest::any(1));

    let alloc = allocation(&[("a:1", 1), (DB_NODE, 1)]);
    let mut wished = plan.clone();
    let mut counter = 0;
    let placed = assign_slots(&mut wished, &alloc, &WishListPolicy::new(1), &mut counter).unwrap();
    assert_eq!(placed[0].node, DB_NODE);

    let mut simple = plan;
    let placed = assign_slots(&mut simple, &alloc, &SimplePolicy::new(1), &mut counter).unwrap();
    assert_eq!(placed[0].node, "a:1");
}

#[test]
fn tracker_rejects_plan_that_does_not_fit() {
    let tc = cluster(&[("n1:1", 1)]);
    let tracker = tc.tracker("simple");
    let err = tracker.execute_plan(tracker_plan(LINEAR_CHAIN)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoFreeSlot);
    assert_eq!(tc.free_slots("n1:1"), 1);
    assert!(tc.cluster.statements("n1:1").is_empty());
    assert!(tracker.running_plans().unwrap().is_empty());
}

#[test]
fn multi_slot_units_fit_where_whole_units_do() {
    let tc = cluster(&[("a:1", 3), ("b:1", 2)]);
    let tracker = tc.tracker_with_unit_slots("simple", 2);
    let manifest = tracker.execute_plan(tracker_plan(LINEAR_CHAIN)).unwrap();

    assert_eq!(manifest.units, 2);
    assert_eq!(manifest.nodes, vec!["a:1".to_string(), "b:1".to_string()]);
    assert_eq!(tc.free_slots("a:1"), 1);
    assert_eq!(tc.free_slots("b:1"), 0);

    tracker.clean_plan(&manifest.plan).unwrap();
    assert_eq!(tc.free_slots("a:1"), 3);
    assert_eq!(tc.free_slots("b:1"), 2);
}

#[test]
fn wishlist_falls_back_when_the_store_node_is_full() {
    let tc = cluster(&[(DB_NODE, 1), ("n2:1", 3)]);
    let tracker = tc.tracker("wishlist");

    let first = tracker.execute_plan(tracker_plan(SINGLE_SCAN)).unwrap();
    assert_eq!(first.nodes, vec![DB_NODE.to_string()]);
    assert_eq!(tc.free_slots(DB_NODE), 0);

    let second = tracker.execute_plan(tracker_plan(LINEAR_CHAIN)).unwrap();
    assert_eq!(second.nodes, vec!["n2:1".to_string()]);
    assert!(tracker
        .deployments(&second.plan)
        .unwrap()
        .iter()
        .all(|d| d.node == "n2:1"));
    assert_eq!(tc.free_slots("n2:1"), 1);
}
