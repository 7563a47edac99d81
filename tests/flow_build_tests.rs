//! Flow construction tests
//!
//! Build-time properties: implicit edge inference, explicit edges,
//! validation failures, determinism of the canonical topological order.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;
use weir::{EdgeOrigin, Flow, FlowBuilder, Input, TaskDef, WeirError};

// ============================================================================
// TEST HELPERS
// ============================================================================

fn noop(id: &str) -> TaskDef {
    TaskDef::new(id, |_inputs| async { Ok(json!(null)) })
}

fn topo_position(flow: &Flow, id: &str) -> usize {
    flow.topological_order()
        .iter()
        .position(|x| x.as_ref() == id)
        .unwrap_or_else(|| panic!("{id} missing from topological order"))
}

// ============================================================================
// EDGE INFERENCE
// ============================================================================

#[test]
fn input_binding_infers_edge_without_declaration() {
    let mut b = FlowBuilder::new("inference");
    let fetch = b.add_task(noop("fetch")).unwrap();
    b.add_task(noop("transform").input(Input::output(&fetch)))
        .unwrap();

    let flow = b.build().unwrap();
    assert_eq!(flow.edges().len(), 1);
    assert_eq!(flow.edges()[0].source.as_ref(), "fetch");
    assert_eq!(flow.edges()[0].target.as_ref(), "transform");
    assert_eq!(flow.edges()[0].origin, EdgeOrigin::Implicit);
}

#[test]
fn explicit_and_implicit_edges_coexist() {
    let mut b = FlowBuilder::new("mixed");
    let config = b.add_task(noop("config")).unwrap();
    let prepare = b
        .add_task(noop("prepare").input(Input::output(&config)))
        .unwrap();
    let submit = b.add_task(noop("submit")).unwrap();
    b.edge_between(&prepare, &submit);

    let flow = b.build().unwrap();
    assert_eq!(flow.edges().len(), 2);

    let implicit = flow
        .edges()
        .iter()
        .find(|e| e.origin == EdgeOrigin::Implicit)
        .unwrap();
    assert_eq!(implicit.target.as_ref(), "prepare");

    let explicit = flow
        .edges()
        .iter()
        .find(|e| e.origin == EdgeOrigin::Explicit)
        .unwrap();
    assert_eq!(explicit.source.as_ref(), "prepare");
    assert_eq!(explicit.target.as_ref(), "submit");
}

#[test]
fn multiple_bindings_to_same_producer_yield_one_edge() {
    let mut b = FlowBuilder::new("multi-bind");
    let src = b.add_task(noop("src")).unwrap();
    b.add_task(
        noop("sink")
            .input(Input::output(&src))
            .input(Input::literal("x"))
            .input(Input::output(&src)),
    )
    .unwrap();

    let flow = b.build().unwrap();
    assert_eq!(flow.edges().len(), 1);
}

// ============================================================================
// VALIDATION FAILURES
// ============================================================================

#[test]
fn cycle_via_explicit_edges_fails() {
    let mut b = FlowBuilder::new("cycle");
    b.add_task(noop("a")).unwrap();
    b.add_task(noop("b")).unwrap();
    b.add_task(noop("c")).unwrap();
    b.edge("a", "b");
    b.edge("b", "c");
    b.edge("c", "a");

    let err = b.build().unwrap_err();
    assert!(matches!(err, WeirError::CycleDetected { .. }));
    // The error carries the cycle path
    assert!(err.to_string().contains("→"));
}

#[test]
fn cycle_via_mixed_edges_fails() {
    let mut b = FlowBuilder::new("mixed-cycle");
    let a = b.add_task(noop("a")).unwrap();
    b.add_task(noop("b").input(Input::output(&a))).unwrap();
    b.edge("b", "a");

    assert!(matches!(
        b.build().unwrap_err(),
        WeirError::CycleDetected { .. }
    ));
}

#[test]
fn self_dependency_fails() {
    let mut b = FlowBuilder::new("self");
    b.add_task(noop("a").input(Input::output_of("a"))).unwrap();
    assert!(matches!(
        b.build().unwrap_err(),
        WeirError::CycleDetected { .. }
    ));
}

#[test]
fn unknown_edge_target_fails() {
    let mut b = FlowBuilder::new("unknown");
    b.add_task(noop("a")).unwrap();
    b.edge("a", "nope");

    match b.build().unwrap_err() {
        WeirError::UnknownTask { id, .. } => assert_eq!(id, "nope"),
        other => panic!("expected UnknownTask, got {other}"),
    }
}

#[test]
fn unknown_input_reference_fails() {
    let mut b = FlowBuilder::new("unknown-input");
    b.add_task(noop("consumer").input(Input::output_of("phantom")))
        .unwrap();

    match b.build().unwrap_err() {
        WeirError::UnknownTask { id, referenced_by } => {
            assert_eq!(id, "phantom");
            assert!(referenced_by.contains("consumer"));
        }
        other => panic!("expected UnknownTask, got {other}"),
    }
}

// ============================================================================
// DETERMINISM
// ============================================================================

#[test]
fn topological_order_breaks_ties_by_declaration_order() {
    let mut b = FlowBuilder::new("ties");
    // Three roots declared out of alphabetical order
    b.add_task(noop("zeta")).unwrap();
    b.add_task(noop("alpha")).unwrap();
    b.add_task(noop("mid")).unwrap();

    let flow = b.build().unwrap();
    assert_eq!(
        flow.topological_order()
            .iter()
            .map(|s| s.as_ref())
            .collect::<Vec<_>>(),
        vec!["zeta", "alpha", "mid"]
    );
}

#[test]
fn rebuilding_identical_declarations_is_idempotent() {
    let build = || {
        let mut b = FlowBuilder::new("repeat");
        let a = b.add_task(noop("a")).unwrap();
        let l = b.add_task(noop("left").input(Input::output(&a))).unwrap();
        let r = b.add_task(noop("right").input(Input::output(&a))).unwrap();
        let join = b
            .add_task(noop("join").input(Input::output(&l)).input(Input::output(&r)))
            .unwrap();
        b.edge_between(&r, &join);
        b.build().unwrap()
    };

    let first = build();
    let second = build();

    let edge_pairs = |f: &Flow| {
        f.edges()
            .iter()
            .map(|e| (e.source.to_string(), e.target.to_string(), e.origin))
            .collect::<Vec<_>>()
    };
    assert_eq!(edge_pairs(&first), edge_pairs(&second));
    assert_eq!(first.topological_order(), second.topological_order());
}

// ============================================================================
// PROPERTY: random forward-edge DAGs always build consistently
// ============================================================================

proptest! {
    #[test]
    fn forward_edge_dags_build_with_consistent_order(
        n in 2usize..10,
        raw_edges in prop::collection::vec((0usize..10, 0usize..10), 0..25),
    ) {
        let mut b = FlowBuilder::new("prop");
        for i in 0..n {
            b.add_task(noop(&format!("t{i}"))).unwrap();
        }

        // Keep only forward pairs (i < j): acyclic by construction
        for (i, j) in raw_edges {
            let (i, j) = (i % n, j % n);
            if i < j {
                b.edge(&format!("t{i}"), &format!("t{j}"));
            }
        }

        let flow = b.build().unwrap();

        // Every edge is consistent with the canonical order
        for edge in flow.edges() {
            prop_assert!(
                topo_position(&flow, &edge.source) < topo_position(&flow, &edge.target)
            );
        }

        // Order covers every task exactly once
        prop_assert_eq!(flow.topological_order().len(), n);
    }

    #[test]
    fn two_cycle_always_rejected(n in 2usize..8) {
        let mut b = FlowBuilder::new("prop-cycle");
        for i in 0..n {
            b.add_task(noop(&format!("t{i}"))).unwrap();
        }
        // Chain plus a back edge closing a cycle
        for i in 0..n - 1 {
            b.edge(&format!("t{i}"), &format!("t{}", i + 1));
        }
        b.edge(&format!("t{}", n - 1), "t0");

        let is_cycle = matches!(b.build().unwrap_err(), WeirError::CycleDetected { .. });
        prop_assert!(is_cycle);
    }
}
