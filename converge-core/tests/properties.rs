//! Property tests: idempotence, minimality, ordering and protection.

mod support;

use std::collections::BTreeMap;

use converge_core::{DesiredState, OperationKind, Reconciler};
use proptest::prelude::*;
use support::{MemoryAccessor, Subnet, SubnetSpec, default_subnet, spec, subnet};

const NAMES: [&str; 3] = ["web", "db", "cache"];

fn cidr(n: u8) -> String {
    format!("10.0.{n}.0/24")
}

/// Up to eight subnets with unique CIDRs, each with one of a few names.
fn subnet_map() -> impl Strategy<Value = BTreeMap<u8, usize>> {
    prop::collection::btree_map(0u8..8, 0usize..NAMES.len(), 0..8)
}

fn desired_from(map: &BTreeMap<u8, usize>) -> Vec<SubnetSpec> {
    map.iter().map(|(n, name)| spec(&cidr(*n), NAMES[*name])).collect()
}

fn observed_from(map: &BTreeMap<u8, usize>, with_default: bool) -> Vec<Subnet> {
    let mut objects: Vec<Subnet> = map
        .iter()
        .map(|(n, name)| subnet(&cidr(*n), NAMES[*name]))
        .collect();
    if with_default {
        objects.push(default_subnet("172.31.0.0/20"));
    }
    objects
}

proptest! {
    #[test]
    fn second_pass_is_a_no_op(
        want in subnet_map(),
        have in subnet_map(),
        with_default in any::<bool>(),
    ) {
        let desired = DesiredState::new(desired_from(&want)).unwrap();
        let mut remote = MemoryAccessor::with(observed_from(&have, with_default));
        let reconciler = Reconciler::default();

        let first = reconciler.converge(&desired, &mut remote, &());
        prop_assert!(first.is_ok());

        remote.calls.clear();
        let second = reconciler.converge(&desired, &mut remote, &());
        prop_assert!(second.is_ok());
        prop_assert!(!second.changed());
        prop_assert!(second.operations().is_empty());
        prop_assert!(remote.calls.is_empty());
    }

    #[test]
    fn updates_only_touch_differing_keys(want in subnet_map(), have in subnet_map()) {
        let desired = DesiredState::new(desired_from(&want)).unwrap();
        let mut remote = MemoryAccessor::with(observed_from(&have, false));

        let result = Reconciler::default().converge(&desired, &mut remote, &());
        prop_assert!(result.is_ok());

        for (op, key) in &remote.calls {
            if *op == OperationKind::Update {
                let n = want.keys().find(|n| &cidr(**n) == key).copied().unwrap();
                prop_assert_ne!(want.get(&n), have.get(&n));
            }
        }
    }

    #[test]
    fn no_delete_precedes_create_or_update(want in subnet_map(), have in subnet_map()) {
        let desired = DesiredState::new(desired_from(&want)).unwrap();
        let mut remote = MemoryAccessor::with(observed_from(&have, false));

        Reconciler::default().converge(&desired, &mut remote, &());

        let ops = remote.mutations();
        if let Some(first_delete) = ops.iter().position(|op| *op == OperationKind::Delete) {
            prop_assert!(ops[first_delete..].iter().all(|op| *op == OperationKind::Delete));
        }
    }

    #[test]
    fn protected_subnet_survives_any_desired_state(want in subnet_map(), have in subnet_map()) {
        let desired = DesiredState::new(desired_from(&want)).unwrap();
        let mut remote = MemoryAccessor::with(observed_from(&have, true));

        let result = Reconciler::default().converge(&desired, &mut remote, &());
        prop_assert!(result.is_ok());
        prop_assert!(remote.objects.iter().any(|o| o.default));
        prop_assert!(remote.calls.iter().all(|(_, key)| key != "172.31.0.0/20"));
    }
}
