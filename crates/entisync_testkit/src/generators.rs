//! Property-based test generators using proptest.
//!
//! Edits are typed per key so that every generated sequence is one the
//! server accepts: numeric operations only touch [`COUNT_KEY`], array
//! operations only touch [`TAGS_KEY`], and [`LABEL_KEY`] holds strings.

use entisync_core::{Op, TrackedObject, Value};
use proptest::prelude::*;

/// Key edited with numeric operations.
pub const COUNT_KEY: &str = "count";
/// Key edited with array operations.
pub const TAGS_KEY: &str = "tags";
/// Key edited with string values.
pub const LABEL_KEY: &str = "label";

/// One edit of a tracked object.
#[derive(Debug, Clone)]
pub struct Edit {
    /// Attribute key.
    pub key: &'static str,
    /// Operation applied to it.
    pub op: Op,
}

/// Strategy for attribute keys that are not reserved.
pub fn attribute_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-zA-Z0-9]{0,11}")
        .expect("Invalid regex")
        .prop_filter("Reserved keys are not attributes", |key| {
            !matches!(key.as_str(), "objectId" | "createdAt" | "updatedAt")
        })
}

/// Strategy for plain attribute values.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| Value::Integer(i64::from(n))),
        "[a-z]{0,8}".prop_map(Value::String),
    ]
}

fn tag_items_strategy() -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec("[a-c]".prop_map(Value::String), 0..3)
}

/// Strategy for operations on a numeric attribute.
pub fn count_op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (-100i64..100).prop_map(|n| Op::Set(Value::Integer(n))),
        (-10i64..10).prop_map(|n| Op::Increment(Value::Integer(n))),
        Just(Op::Unset),
    ]
}

/// Strategy for operations on an array attribute.
pub fn tags_op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        tag_items_strategy().prop_map(|items| Op::Set(Value::Array(items))),
        tag_items_strategy().prop_map(Op::Add),
        tag_items_strategy().prop_map(Op::AddUnique),
        tag_items_strategy().prop_map(Op::Remove),
        Just(Op::Unset),
    ]
}

/// Strategy for operations on a string attribute.
pub fn label_op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        "[a-z]{1,6}".prop_map(|label| Op::Set(Value::String(label))),
        Just(Op::Unset),
    ]
}

/// Strategy for one typed edit.
pub fn edit_strategy() -> impl Strategy<Value = Edit> {
    prop_oneof![
        count_op_strategy().prop_map(|op| Edit { key: COUNT_KEY, op }),
        tags_op_strategy().prop_map(|op| Edit { key: TAGS_KEY, op }),
        label_op_strategy().prop_map(|op| Edit { key: LABEL_KEY, op }),
    ]
}

/// Strategy for a sequence of up to `max` edits.
pub fn edits_strategy(max: usize) -> impl Strategy<Value = Vec<Edit>> {
    prop::collection::vec(edit_strategy(), 0..=max)
}

/// Applies `edits` to `obj` in order and returns how many were accepted.
///
/// Edits whose merge with the pending operation is rejected are skipped.
pub fn apply_edits(obj: &TrackedObject, edits: &[Edit]) -> usize {
    edits
        .iter()
        .filter(|edit| obj.set_op(edit.key, edit.op.clone()).is_ok())
        .count()
}
