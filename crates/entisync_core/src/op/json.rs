//! `__op` wire form of operations.

use super::{Op, RelationOp};
use crate::codec::{self, JsonMap, JsonValue, PointerMode};
use crate::context::Context;
use crate::error::{SyncError, SyncResult};
use serde_json::json;

impl Op {
    /// Encodes the operation as a save payload.
    ///
    /// `Set` encodes its value directly; every other operation encodes as an
    /// `{"__op": …}` object.
    pub fn to_json(&self) -> SyncResult<JsonValue> {
        let encode_all = |items: &[crate::Value]| -> SyncResult<Vec<JsonValue>> {
            items
                .iter()
                .map(|item| codec::encode(item, PointerMode::Strict))
                .collect()
        };

        Ok(match self {
            Op::Set(value) => codec::encode(value, PointerMode::Strict)?,
            Op::Unset => json!({"__op": "Delete"}),
            Op::Increment(amount) => json!({
                "__op": "Increment",
                "amount": codec::encode(amount, PointerMode::Strict)?,
            }),
            Op::Add(items) => json!({"__op": "Add", "objects": encode_all(items)?}),
            Op::AddUnique(items) => json!({"__op": "AddUnique", "objects": encode_all(items)?}),
            Op::Remove(items) => json!({"__op": "Remove", "objects": encode_all(items)?}),
            Op::Relation(op) => op.to_json(),
        })
    }

    /// Decodes a save payload.
    ///
    /// Anything that is not an `{"__op": …}` object decodes as `Set`.
    pub fn from_json(ctx: &Context, json: &JsonValue) -> SyncResult<Op> {
        let Some(map) = json.as_object() else {
            return Ok(Op::Set(codec::decode(ctx, json)));
        };
        let Some(name) = map.get("__op").and_then(JsonValue::as_str) else {
            return Ok(Op::Set(codec::decode(ctx, json)));
        };

        let objects = |map: &JsonMap| -> SyncResult<Vec<crate::Value>> {
            match map.get("objects") {
                Some(JsonValue::Array(items)) => {
                    Ok(items.iter().map(|item| codec::decode(ctx, item)).collect())
                }
                _ => Err(SyncError::incorrect_type(format!(
                    "{name} op requires an objects array"
                ))),
            }
        };

        match name {
            "Delete" => Ok(Op::Unset),
            "Increment" => match map.get("amount") {
                Some(amount) => Op::increment(codec::decode(ctx, amount)),
                None => Err(SyncError::incorrect_type("Increment op requires an amount")),
            },
            "Add" => Ok(Op::Add(objects(map)?)),
            "AddUnique" => Ok(Op::AddUnique(objects(map)?)),
            "Remove" => Ok(Op::Remove(objects(map)?)),
            "AddRelation" | "RemoveRelation" => {
                let (target_class, ids) = relation_pointers(map)?;
                Ok(Op::Relation(if name == "AddRelation" {
                    RelationOp::from_ids(target_class, ids, Vec::new())
                } else {
                    RelationOp::from_ids(target_class, Vec::new(), ids)
                }))
            }
            "Batch" => {
                let Some(JsonValue::Array(ops)) = map.get("ops") else {
                    return Err(SyncError::incorrect_type("Batch op requires an ops array"));
                };
                let mut merged: Option<Op> = None;
                for op in ops {
                    let op = Op::from_json(ctx, op)?;
                    merged = Some(op.merge_with(merged.as_ref())?);
                }
                merged.ok_or_else(|| SyncError::incorrect_type("Batch op must not be empty"))
            }
            other => Err(SyncError::incorrect_type(format!("unknown op {other}"))),
        }
    }
}

impl RelationOp {
    fn to_json(&self) -> JsonValue {
        let pointers = |ids: &[String]| -> Vec<JsonValue> {
            ids.iter()
                .map(|id| {
                    json!({
                        "__type": "Pointer",
                        "className": self.target_class,
                        "objectId": id,
                    })
                })
                .collect()
        };

        let adds = (!self.adds.is_empty())
            .then(|| json!({"__op": "AddRelation", "objects": pointers(&self.adds)}));
        let removes = (!self.removes.is_empty())
            .then(|| json!({"__op": "RemoveRelation", "objects": pointers(&self.removes)}));

        match (adds, removes) {
            (Some(adds), Some(removes)) => json!({"__op": "Batch", "ops": [adds, removes]}),
            (Some(op), None) | (None, Some(op)) => op,
            (None, None) => json!({"__op": "AddRelation", "objects": []}),
        }
    }
}

fn relation_pointers(map: &JsonMap) -> SyncResult<(Option<String>, Vec<String>)> {
    let Some(JsonValue::Array(items)) = map.get("objects") else {
        return Err(SyncError::incorrect_type("relation op requires an objects array"));
    };

    let mut target_class: Option<String> = None;
    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        let class_name = item.get("className").and_then(JsonValue::as_str);
        let id = item.get("objectId").and_then(JsonValue::as_str);
        let (Some(class_name), Some(id)) = (class_name, id) else {
            return Err(SyncError::incorrect_type(
                "relation op objects must be saved pointers",
            ));
        };
        match &target_class {
            Some(existing) if existing != class_name => {
                return Err(SyncError::InvalidClassName(
                    "tried to create a relation with 2 different object types".into(),
                ))
            }
            Some(_) => {}
            None => target_class = Some(class_name.to_string()),
        }
        ids.push(id.to_string());
    }
    Ok((target_class, ids))
}
