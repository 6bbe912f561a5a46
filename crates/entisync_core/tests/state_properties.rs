//! Property tests for the state model.

use entisync_core::state::Changes;
use entisync_core::{Context, ObjectState, Op, Value};
use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum Action {
    Set(usize, i64),
    Increment(usize, i64),
    Unset(usize),
    Push,
}

const KEYS: [&str; 3] = ["a", "b", "c"];

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0..KEYS.len(), -100i64..100).prop_map(|(k, v)| Action::Set(k, v)),
        (0..KEYS.len(), -100i64..100).prop_map(|(k, v)| Action::Increment(k, v)),
        (0..KEYS.len()).prop_map(Action::Unset),
        Just(Action::Push),
    ]
}

fn server_data() -> impl Strategy<Value = BTreeMap<String, i64>> {
    prop::collection::btree_map(
        prop::sample::select(KEYS.to_vec()).prop_map(str::to_string),
        -100i64..100,
        0..3,
    )
}

proptest! {
    /// The estimate equals applying every edit one at a time, however the
    /// edits are spread over generations.
    #[test]
    fn estimate_matches_sequential_model(
        initial in server_data(),
        actions in prop::collection::vec(action(), 0..24),
    ) {
        let ctx = Context::new();
        let obj = ctx.object_with_id("Item", "i1");
        let changes: Changes = initial
            .iter()
            .map(|(k, v)| (k.clone(), Some(Value::Integer(*v))))
            .collect();
        obj.store().commit_server_changes(&obj.identity(), changes);

        let mut model: BTreeMap<String, i64> = initial.clone();
        let mut generations = 1;
        for action in &actions {
            match action {
                Action::Set(k, v) => {
                    obj.set(KEYS[*k], *v).unwrap();
                    model.insert(KEYS[*k].to_string(), *v);
                }
                Action::Increment(k, v) => {
                    obj.increment(KEYS[*k], *v).unwrap();
                    *model.entry(KEYS[*k].to_string()).or_insert(0) += v;
                }
                Action::Unset(k) => {
                    obj.unset(KEYS[*k]).unwrap();
                    model.remove(KEYS[*k]);
                }
                Action::Push => {
                    obj.push_pending_state();
                    generations += 1;
                }
            }
        }

        let pending = obj.store().get_pending_ops(&obj.identity());
        prop_assert_eq!(pending.len(), generations);

        let expected: BTreeMap<String, Value> = model
            .into_iter()
            .map(|(k, v)| (k, Value::Integer(v)))
            .collect();
        prop_assert_eq!(obj.attributes(), expected);
    }

    /// Committed values are observed as-is for keys without pending ops.
    #[test]
    fn commit_then_estimate_round_trips(
        committed in server_data(),
        pending_key in prop::option::of(0..KEYS.len()),
    ) {
        let mut state = ObjectState::new();
        if let Some(k) = pending_key {
            state.set_pending_op(KEYS[k], Some(Op::set("pending")));
        }
        let changes: Changes = committed
            .iter()
            .map(|(k, v)| (k.clone(), Some(Value::Integer(*v))))
            .collect();
        state.commit_server_changes(changes);

        let estimated = state.estimate_attributes(None);
        for (key, value) in &committed {
            if pending_key.map(|k| KEYS[k]) == Some(key.as_str()) {
                continue;
            }
            prop_assert_eq!(estimated.get(key), Some(&Value::Integer(*value)));
        }
    }

    /// Restoring an empty in-flight generation leaves the newer edits alone.
    #[test]
    fn merge_first_with_empty_generation_is_noop(
        actions in prop::collection::vec(action(), 0..12),
    ) {
        let ctx = Context::new();
        let obj = ctx.object_with_id("Item", "i1");
        obj.push_pending_state();
        for action in &actions {
            match action {
                Action::Set(k, v) => obj.set(KEYS[*k], *v).unwrap(),
                Action::Increment(k, v) => obj.increment(KEYS[*k], *v).unwrap(),
                Action::Unset(k) => obj.unset(KEYS[*k]).unwrap(),
                Action::Push => {}
            }
        }
        let before = obj.store().get_pending_ops(&obj.identity())[1].clone();

        obj.handle_save_error();
        let after = obj.store().get_pending_ops(&obj.identity());
        prop_assert_eq!(after, vec![before]);
    }
}

#[test]
fn increment_example() {
    let ctx = Context::new();
    let obj = ctx.object_with_id("Item", "i1");
    let mut changes = Changes::new();
    changes.insert("x".into(), Some(Value::Integer(1)));
    obj.store().commit_server_changes(&obj.identity(), changes);

    obj.increment("x", 2).unwrap();
    obj.increment("x", 3).unwrap();

    let pending = obj.store().get_pending_ops(&obj.identity());
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["x"], Op::Increment(Value::Integer(5)));
    assert_eq!(obj.get("x"), Some(Value::Integer(6)));
}

#[test]
fn add_merge_order() {
    let merged = Op::add(vec!["a".into()])
        .merge_with(Some(&Op::add(vec!["b".into()])))
        .unwrap();
    let applied = merged.apply_to(Some(&Value::Array(Vec::new())), None).unwrap();
    assert_eq!(applied, Some(Value::from(vec!["b", "a"])));
}
