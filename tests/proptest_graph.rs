//! Property-Based Testing for Weft
//!
//! Uses proptest on random graphs and value combinations:
//! - Random DAGs always terminate and respect dependency order
//! - A single failure skips exactly its downstream nodes
//! - combine_all keeps input order whatever the settlement order

mod common;

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;

use common::{node, NODE};
use weft::{
    DeferredValue, Engine, MockProvisioner, NodeStatus, ProvisionError, ResourceSpec, Stack,
    ValueState,
};

// =============================================================================
// Random DAGs
// =============================================================================

prop_compose! {
    /// `deps[i]` lists predecessors of node `i`, all with a lower index
    fn arb_dag()(size in 1usize..10)(
        masks in prop::collection::vec(any::<u16>(), size)
    ) -> Vec<Vec<usize>> {
        masks
            .iter()
            .enumerate()
            .map(|(i, mask)| (0..i).filter(|j| mask & (1 << j) != 0).collect())
            .collect()
    }
}

fn name(i: usize) -> String {
    format!("n{i}")
}

/// Declare node `i` with one data input per predecessor.
fn declare(deps: &[Vec<usize>]) -> Stack {
    let mut stack = Stack::new("random");
    let mut handles = Vec::new();
    for (i, preds) in deps.iter().enumerate() {
        let mut spec = ResourceSpec::new(NODE, name(i));
        for &j in preds {
            let handle: &weft::ResourceHandle = &handles[j];
            spec = spec.input(format!("from{j}"), handle.output("id"));
        }
        handles.push(stack.resource(spec).unwrap());
    }
    stack
}

/// Every node that reaches `target` through the edges.
fn downstream(deps: &[Vec<usize>], target: usize) -> Vec<usize> {
    let mut reached = vec![false; deps.len()];
    reached[target] = true;
    for i in target + 1..deps.len() {
        reached[i] = deps[i].iter().any(|&j| reached[j]);
    }
    (target + 1..deps.len()).filter(|&i| reached[i]).collect()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Property: every node runs once, after all of its predecessors finished
    #[test]
    fn test_random_dag_respects_order(deps in arb_dag()) {
        let mock = MockProvisioner::shared();
        let plan = declare(&deps).build().unwrap();
        let report = runtime().block_on(Engine::new(mock.clone()).run(plan));

        prop_assert!(report.is_success());
        prop_assert_eq!(mock.total_calls(), deps.len());
        for (i, preds) in deps.iter().enumerate() {
            let call = mock.invocation(&node(&name(i))).unwrap();
            for &j in preds {
                let pred = mock.invocation(&node(&name(j))).unwrap();
                prop_assert!(pred.finished < call.started);
                let expected = json!(format!("n{j}-id"));
                prop_assert_eq!(call.request.inputs.get(&format!("from{j}")), Some(&expected));
            }
        }
    }

    /// Property: one failure skips exactly the nodes downstream of it
    #[test]
    fn test_random_failure_skips_downstream_only(deps in arb_dag(), pick in any::<prop::sample::Index>()) {
        let failing = pick.index(deps.len());
        let mock = Arc::new(
            MockProvisioner::new().with_failure(name(failing), ProvisionError::internal("injected")),
        );
        let plan = declare(&deps).build().unwrap();
        let report = runtime().block_on(Engine::new(mock.clone()).run(plan));

        let skipped = downstream(&deps, failing);
        for i in 0..deps.len() {
            let id = node(&name(i));
            let expected = if i == failing {
                NodeStatus::Failed
            } else if skipped.contains(&i) {
                NodeStatus::Skipped
            } else {
                NodeStatus::Succeeded
            };
            prop_assert_eq!(report.status(&id), Some(expected));
            if skipped.contains(&i) {
                prop_assert_eq!(mock.call_count(&id), 0);
            }
        }
        prop_assert_eq!(report.failures.len(), skipped.len() + 1);
    }
}

// =============================================================================
// combine_all
// =============================================================================

proptest! {
    /// Property: results follow input order, not settlement order
    #[test]
    fn test_combine_all_keeps_input_order(values in prop::collection::vec(any::<i64>(), 0..16)) {
        let (deferred, resolvers): (Vec<_>, Vec<_>) =
            values.iter().map(|_| DeferredValue::<i64>::deferred()).unzip();
        let combined = DeferredValue::combine_all(deferred);

        for (resolver, value) in resolvers.into_iter().zip(values.iter()).rev() {
            resolver.resolve(*value);
        }
        prop_assert_eq!(combined.peek(), ValueState::Resolved(values));
    }
}
