//! Property-based tests for the matcher and the walk driver.

use proptest::prelude::*;
use serde_json::{json, Map, Value};
use sheen_core::{matches, Bindings, Engine, EngineConfig, MachineState, Spec};

// ============================================================================
// Arbitrary Generators
// ============================================================================

/// Scalars that are never pattern variables.
fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1000i64..1000).prop_map(Value::from),
        "[a-z]{0,6}".prop_map(Value::String),
    ]
}

/// Ground JSON values (no variables anywhere).
fn arb_value() -> impl Strategy<Value = Value> {
    arb_scalar().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

fn arb_array() -> impl Strategy<Value = Value> {
    prop::collection::vec(arb_value(), 0..4).prop_map(Value::Array)
}

fn arb_object() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-z]{1,4}", arb_value(), 0..4)
        .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>()))
}

fn self_loop(max_steps: usize) -> (Engine, Spec) {
    let spec = Spec::from_json(
        "loop",
        &json!({"nodes": {
            "start": {
                "action": {"interpreter": "ecmascript", "source": "bindings.n = (bindings.n || 0) + 1;"},
                "branching": {"branches": [{"target": "start"}]}
            }
        }}),
    )
    .unwrap();
    let engine = Engine::new(EngineConfig {
        max_steps,
        debug: false,
    });
    (engine, spec)
}

proptest! {
    #[test]
    fn ground_pattern_matches_itself(value in arb_value()) {
        let found = matches(&value, &value, &Bindings::new());
        prop_assert_eq!(found, vec![Bindings::new()]);
    }

    #[test]
    fn array_never_matches_object(pattern in arb_array(), subject in arb_object()) {
        prop_assert!(matches(&pattern, &subject, &Bindings::new()).is_empty());
        prop_assert!(matches(&subject, &pattern, &Bindings::new()).is_empty());
    }

    #[test]
    fn container_never_matches_scalar(pattern in prop_oneof![arb_array(), arb_object()], subject in arb_scalar()) {
        prop_assert!(matches(&pattern, &subject, &Bindings::new()).is_empty());
    }

    #[test]
    fn repeated_variable_requires_equality(a in arb_value(), b in arb_value()) {
        let pattern = json!(["?x", {"again": "?x"}]);
        let subject = json!([a.clone(), {"again": b.clone()}]);
        let found = matches(&pattern, &subject, &Bindings::new());
        if a == b {
            prop_assert_eq!(found.len(), 1);
            prop_assert_eq!(found[0].get("?x"), Some(&a));
        } else {
            prop_assert!(found.is_empty());
        }
    }

    #[test]
    fn object_subset_matches(subject in arb_object(), extra in arb_value()) {
        let mut wider = subject.clone();
        if let Value::Object(map) = &mut wider {
            map.insert("zzzzz".to_string(), extra);
        }
        prop_assert_eq!(matches(&subject, &wider, &Bindings::new()).len(), 1);
    }

    #[test]
    fn at_most_one_binding_set(pattern in arb_value(), subject in arb_value(), x in arb_value()) {
        let pattern = json!({"p": pattern, "v": "?v"});
        let subject = json!({"p": subject, "v": x});
        prop_assert!(matches(&pattern, &subject, &Bindings::new()).len() <= 1);
    }

    #[test]
    fn walk_never_exceeds_bound(max_steps in 0usize..40) {
        let (engine, spec) = self_loop(max_steps);
        let walked = engine.walk(&spec, None, None).unwrap();
        prop_assert_eq!(walked.steps, max_steps);
        prop_assert!(walked.is_limited());
    }

    #[test]
    fn walk_is_deterministic(n in -50i64..50, message in arb_value()) {
        let spec = Spec::from_json(
            "det",
            &json!({"nodes": {
                "start": {
                    "action": {"interpreter": "ecmascript", "source": "bindings.n = bindings.n * 2;"},
                    "branching": {"type": "message", "branches": [
                        {"pattern": "?m", "test": "n > 0", "target": "positive"},
                        {"pattern": "?m", "target": "other"}
                    ]}
                },
                "positive": {},
                "other": {}
            }}),
        )
        .unwrap();
        let engine = Engine::default();
        let state = MachineState::new("start", Bindings::from_value(json!({"n": n})).unwrap());

        let first = engine.walk(&spec, Some(state.clone()), Some(&message)).unwrap();
        let second = engine.walk(&spec, Some(state), Some(&message)).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert!(first.consumed);
        prop_assert_eq!(first.to.node == "positive", n > 0);
    }
}
