//! Offline evaluation of query constraints.
//!
//! Objects are matched in their JSON snapshot form, as produced by
//! `TrackedObject::to_json` in offline pointer mode. Dates may appear either
//! as ISO strings (`createdAt`, `updatedAt`) or as `Date` tagged objects and
//! compare as their ISO text. Pointers compare by class and id, where the id
//! is the server id or the local id of an unsaved object.

use crate::error::{StoreError, StoreResult};
use entisync_core::codec::{JsonMap, JsonValue};
use regex::RegexBuilder;
use std::cmp::Ordering;

const FIELD_OPERATORS: &[&str] = &[
    "$ne",
    "$lt",
    "$lte",
    "$gt",
    "$gte",
    "$in",
    "$nin",
    "$all",
    "$exists",
    "$regex",
    "$options",
    "$containedBy",
];

const LOGICAL_OPERATORS: &[&str] = &["$or", "$and", "$nor"];

/// Checks a `where` document for unsupported operators and malformed
/// operands without evaluating it.
pub(crate) fn validate_where(where_clause: &JsonMap) -> StoreResult<()> {
    for (key, constraint) in where_clause {
        if key.starts_with('$') {
            for clause in logical_clauses(key, constraint)? {
                validate_where(clause)?;
            }
            continue;
        }
        let Some(conditions) = operator_map(constraint) else {
            continue;
        };
        for (operator, operand) in conditions {
            if !FIELD_OPERATORS.contains(&operator.as_str()) {
                return Err(StoreError::invalid_query(format!(
                    "unsupported operator {operator} on key {key}"
                )));
            }
            match operator.as_str() {
                "$in" | "$nin" | "$all" | "$containedBy" if !operand.is_array() => {
                    return Err(StoreError::invalid_query(format!(
                        "{operator} on key {key} needs an array"
                    )))
                }
                "$exists" if !operand.is_boolean() => {
                    return Err(StoreError::invalid_query(format!(
                        "$exists on key {key} needs a boolean"
                    )))
                }
                "$regex" => {
                    build_regex(operand, conditions.get("$options"))?;
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn logical_clauses<'a>(operator: &str, constraint: &'a JsonValue) -> StoreResult<Vec<&'a JsonMap>> {
    if !LOGICAL_OPERATORS.contains(&operator) {
        return Err(StoreError::invalid_query(format!(
            "unsupported operator {operator}"
        )));
    }
    let items = constraint.as_array().ok_or_else(|| {
        StoreError::invalid_query(format!("{operator} needs an array of queries"))
    })?;
    items
        .iter()
        .map(|item| {
            item.as_object().ok_or_else(|| {
                StoreError::invalid_query(format!("{operator} needs an array of queries"))
            })
        })
        .collect()
}

/// Returns the operator map of a constraint, or `None` when the constraint
/// is a literal to compare against.
fn operator_map(constraint: &JsonValue) -> Option<&JsonMap> {
    constraint
        .as_object()
        .filter(|map| !map.is_empty() && map.keys().any(|k| k.starts_with('$')))
}

/// Returns true if `object` satisfies every constraint of `where_clause`.
pub(crate) fn matches_where(object: &JsonMap, where_clause: &JsonMap) -> StoreResult<bool> {
    for (key, constraint) in where_clause {
        let matched = if key.starts_with('$') {
            let clauses = logical_clauses(key, constraint)?;
            match key.as_str() {
                "$or" => any_clause(object, &clauses)?,
                "$and" => all_clauses(object, &clauses)?,
                _ => !any_clause(object, &clauses)?,
            }
        } else {
            matches_constraint(lookup(object, key), constraint)?
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_clause(object: &JsonMap, clauses: &[&JsonMap]) -> StoreResult<bool> {
    for clause in clauses {
        if matches_where(object, clause)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn all_clauses(object: &JsonMap, clauses: &[&JsonMap]) -> StoreResult<bool> {
    for clause in clauses {
        if !matches_where(object, clause)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Follows a dotted key through nested maps.
fn lookup<'a>(object: &'a JsonMap, key: &str) -> Option<&'a JsonValue> {
    let key = match key {
        "_created_at" => "createdAt",
        "_updated_at" => "updatedAt",
        other => other,
    };
    let mut parts = key.split('.');
    let mut current = object.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn matches_constraint(field: Option<&JsonValue>, constraint: &JsonValue) -> StoreResult<bool> {
    let Some(conditions) = operator_map(constraint) else {
        return Ok(matches_equality(field, constraint));
    };
    for (operator, operand) in conditions {
        let matched = match operator.as_str() {
            "$ne" => !matches_equality(field, operand),
            "$lt" => compare_field(field, operand, |o| o == Ordering::Less),
            "$lte" => compare_field(field, operand, |o| o != Ordering::Greater),
            "$gt" => compare_field(field, operand, |o| o == Ordering::Greater),
            "$gte" => compare_field(field, operand, |o| o != Ordering::Less),
            "$in" => matches_in(field, array_operand(operator, operand)?),
            "$nin" => !matches_in(field, array_operand(operator, operand)?),
            "$all" => {
                let wanted = array_operand(operator, operand)?;
                match field.and_then(JsonValue::as_array) {
                    Some(items) => wanted
                        .iter()
                        .all(|w| items.iter().any(|item| values_equal(item, w))),
                    None => false,
                }
            }
            "$containedBy" => {
                let allowed = array_operand(operator, operand)?;
                match field.and_then(JsonValue::as_array) {
                    Some(items) => items
                        .iter()
                        .all(|item| allowed.iter().any(|a| values_equal(item, a))),
                    None => false,
                }
            }
            "$exists" => {
                let wanted = operand.as_bool().ok_or_else(|| {
                    StoreError::invalid_query("$exists needs a boolean")
                })?;
                field.is_some() == wanted
            }
            "$regex" => {
                let regex = build_regex(operand, conditions.get("$options"))?;
                field
                    .and_then(JsonValue::as_str)
                    .is_some_and(|text| regex.is_match(text))
            }
            "$options" => true,
            other => {
                return Err(StoreError::invalid_query(format!(
                    "unsupported operator {other}"
                )))
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn array_operand<'a>(operator: &str, operand: &'a JsonValue) -> StoreResult<&'a [JsonValue]> {
    operand
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| StoreError::invalid_query(format!("{operator} needs an array")))
}

fn build_regex(pattern: &JsonValue, options: Option<&JsonValue>) -> StoreResult<regex::Regex> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| StoreError::invalid_query("$regex needs a string"))?;
    let options = match options {
        None => "",
        Some(JsonValue::String(options)) => options.as_str(),
        Some(_) => return Err(StoreError::invalid_query("$options needs a string")),
    };

    let mut builder = RegexBuilder::new(pattern);
    for flag in options.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                return Err(StoreError::invalid_query(format!(
                    "unsupported regex option {other}"
                )))
            }
        };
    }
    builder
        .build()
        .map_err(|err| StoreError::invalid_query(format!("bad regex {pattern}: {err}")))
}

/// Scalar equality, with arrays matching when they contain the value.
fn matches_equality(field: Option<&JsonValue>, expected: &JsonValue) -> bool {
    match field {
        None => expected.is_null(),
        Some(JsonValue::Array(items)) if !expected.is_array() => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
    }
}

fn matches_in(field: Option<&JsonValue>, candidates: &[JsonValue]) -> bool {
    match field {
        Some(JsonValue::Array(items)) => items
            .iter()
            .any(|item| candidates.iter().any(|c| values_equal(item, c))),
        Some(value) => candidates.iter().any(|c| values_equal(value, c)),
        None => candidates.iter().any(JsonValue::is_null),
    }
}

fn compare_field(
    field: Option<&JsonValue>,
    operand: &JsonValue,
    accept: impl Fn(Ordering) -> bool,
) -> bool {
    field
        .and_then(|value| compare_values(value, operand))
        .is_some_and(accept)
}

fn tagged<'a>(value: &'a JsonValue, tag: &str) -> Option<&'a JsonMap> {
    value
        .as_object()
        .filter(|map| map.get("__type").and_then(JsonValue::as_str) == Some(tag))
}

fn date_text(value: &JsonValue) -> Option<&str> {
    match value {
        JsonValue::String(text) => Some(text),
        other => tagged(other, "Date")?.get("iso")?.as_str(),
    }
}

fn pointer_key(value: &JsonValue) -> Option<(&str, &str)> {
    let map = tagged(value, "Pointer").or_else(|| tagged(value, "Object"))?;
    let class_name = map.get("className")?.as_str()?;
    let id = map
        .get("objectId")
        .or_else(|| map.get("_localId"))?
        .as_str()?;
    Some((class_name, id))
}

/// Structural equality that treats dates by their ISO text, pointers by
/// identity and numbers by value.
fn values_equal(a: &JsonValue, b: &JsonValue) -> bool {
    if let (Some(left), Some(right)) = (pointer_key(a), pointer_key(b)) {
        return left == right;
    }
    if tagged(a, "Date").is_some() || tagged(b, "Date").is_some() {
        return date_text(a).is_some() && date_text(a) == date_text(b);
    }
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64() == y.as_f64(),
        (JsonValue::Array(x), JsonValue::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (JsonValue::Object(x), JsonValue::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, l)| y.get(k).is_some_and(|r| values_equal(l, r)))
        }
        _ => a == b,
    }
}

/// Orders numbers by value and strings and dates by text. Other
/// combinations are incomparable.
fn compare_values(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        _ => Some(date_text(a)?.cmp(date_text(b)?)),
    }
}

fn sort_rank(value: Option<&JsonValue>) -> u8 {
    match value {
        None | Some(JsonValue::Null) => 0,
        Some(JsonValue::Bool(_)) => 1,
        Some(JsonValue::Number(_)) => 2,
        Some(value) if date_text(value).is_some() => 3,
        Some(_) => 4,
    }
}

fn sort_compare(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    match (a, b) {
        (Some(JsonValue::Bool(x)), Some(JsonValue::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => compare_values(x, y)
            .unwrap_or_else(|| sort_rank(Some(x)).cmp(&sort_rank(Some(y)))),
        _ => sort_rank(a).cmp(&sort_rank(b)),
    }
}

/// Sorts by each key in turn; a `-` prefix sorts descending. Missing values
/// sort first. The sort is stable.
pub(crate) fn sort_objects(objects: &mut [JsonMap], order: &[String]) {
    if order.is_empty() {
        return;
    }
    objects.sort_by(|a, b| {
        for key in order {
            let (field, descending) = match key.strip_prefix('-') {
                Some(field) => (field, true),
                None => (key.as_str(), false),
            };
            let ordering = sort_compare(lookup(a, field), lookup(b, field));
            let ordering = if descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Keeps the selected keys plus the identity and timestamp keys.
pub(crate) fn select_keys(object: JsonMap, keys: &[String]) -> JsonMap {
    const ALWAYS: &[&str] = &[
        "objectId",
        "_localId",
        "__type",
        "className",
        "createdAt",
        "updatedAt",
    ];
    object
        .into_iter()
        .filter(|(key, _)| {
            ALWAYS.contains(&key.as_str())
                || keys
                    .iter()
                    .any(|selected| selected.split('.').next() == Some(key.as_str()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: JsonValue) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    fn check(obj: &JsonValue, where_clause: JsonValue) -> bool {
        matches_where(&object(obj.clone()), &object(where_clause)).unwrap()
    }

    #[test]
    fn equality_matches_scalars_arrays_and_pointers() {
        let obj = json!({
            "name": "ada",
            "tags": ["a", "b"],
            "owner": {"__type": "Pointer", "className": "User", "objectId": "u1"},
            "level": 3,
        });
        assert!(check(&obj, json!({"name": "ada"})));
        assert!(check(&obj, json!({"tags": "b"})));
        assert!(check(&obj, json!({"level": 3.0})));
        assert!(!check(&obj, json!({"tags": "c"})));
        assert!(check(
            &obj,
            json!({"owner": {"__type": "Pointer", "className": "User", "objectId": "u1"}})
        ));
        assert!(!check(
            &obj,
            json!({"owner": {"__type": "Pointer", "className": "User", "objectId": "u2"}})
        ));
        assert!(check(&obj, json!({"missing": null})));
    }

    #[test]
    fn comparisons_cover_numbers_strings_and_dates() {
        let obj = json!({
            "points": 10,
            "name": "m",
            "createdAt": "2024-02-01T00:00:00.000Z",
        });
        assert!(check(&obj, json!({"points": {"$gt": 5, "$lte": 10}})));
        assert!(!check(&obj, json!({"points": {"$lt": 10}})));
        assert!(check(&obj, json!({"name": {"$gte": "a", "$lt": "z"}})));
        assert!(!check(&obj, json!({"name": {"$gt": 1}})));
        assert!(check(
            &obj,
            json!({"createdAt": {"$gt": {"__type": "Date", "iso": "2024-01-01T00:00:00.000Z"}}})
        ));
    }

    #[test]
    fn set_operators() {
        let obj = json!({"color": "red", "tags": ["a", "b"]});
        assert!(check(&obj, json!({"color": {"$in": ["red", "blue"]}})));
        assert!(check(&obj, json!({"color": {"$nin": ["green"]}})));
        assert!(check(&obj, json!({"tags": {"$in": ["b", "z"]}})));
        assert!(check(&obj, json!({"tags": {"$all": ["a", "b"]}})));
        assert!(!check(&obj, json!({"tags": {"$all": ["a", "c"]}})));
        assert!(check(&obj, json!({"tags": {"$containedBy": ["a", "b", "c"]}})));
        assert!(!check(&obj, json!({"tags": {"$containedBy": ["a"]}})));
        assert!(check(&obj, json!({"color": {"$ne": "blue"}})));
    }

    #[test]
    fn exists_and_regex() {
        let obj = json!({"name": "Grace Hopper", "address": {"city": "Arlington"}});
        assert!(check(&obj, json!({"name": {"$exists": true}})));
        assert!(check(&obj, json!({"age": {"$exists": false}})));
        assert!(check(&obj, json!({"name": {"$regex": "^grace", "$options": "i"}})));
        assert!(!check(&obj, json!({"name": {"$regex": "^grace"}})));
        assert!(check(&obj, json!({"address.city": "Arlington"})));
    }

    #[test]
    fn logical_operators() {
        let obj = json!({"a": 1, "b": 2});
        assert!(check(&obj, json!({"$or": [{"a": 5}, {"b": 2}]})));
        assert!(!check(&obj, json!({"$and": [{"a": 1}, {"b": 3}]})));
        assert!(check(&obj, json!({"$nor": [{"a": 5}, {"b": 5}]})));
        assert!(!check(&obj, json!({"$nor": [{"a": 1}]})));
    }

    #[test]
    fn unknown_operators_are_rejected() {
        let obj = object(json!({"a": 1}));
        let err = matches_where(&obj, &object(json!({"a": {"$near": [0, 0]}}))).unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));
        assert!(validate_where(&object(json!({"$where": "true"}))).is_err());
        assert!(validate_where(&object(json!({"a": {"$in": 3}}))).is_err());
        assert!(validate_where(&object(json!({"a": {"$regex": "x", "$options": "q"}}))).is_err());
        assert!(validate_where(&object(json!({"$or": [{"b": {"$select": {}}}]}))).is_err());
    }

    #[test]
    fn sorts_by_several_keys() {
        let mut objects = vec![
            object(json!({"id": 1, "team": "b", "points": 3})),
            object(json!({"id": 2, "team": "a", "points": 1})),
            object(json!({"id": 3, "team": "a", "points": 7})),
            object(json!({"id": 4, "points": 0})),
        ];
        sort_objects(&mut objects, &["team".into(), "-points".into()]);
        let ids: Vec<_> = objects.iter().map(|o| o["id"].clone()).collect();
        assert_eq!(ids, vec![json!(4), json!(3), json!(2), json!(1)]);
    }

    #[test]
    fn select_keeps_identity_keys() {
        let obj = object(json!({"objectId": "s1", "a": 1, "b": {"c": 2}, "d": 3}));
        let selected = select_keys(obj, &["b.c".to_string()]);
        assert_eq!(
            JsonValue::Object(selected),
            json!({"objectId": "s1", "b": {"c": 2}})
        );
    }
}
