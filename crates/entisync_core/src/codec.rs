//! JSON wire form of attribute values.
//!
//! Plain values map onto JSON directly. Pointers, files, relations and dates
//! use `__type`-tagged objects:
//!
//! ```text
//! {"__type": "Pointer",  "className": "Score", "objectId": "xWMyZ4YEGZ"}
//! {"__type": "File",     "name": "photo.png", "url": "https://…"}
//! {"__type": "Relation", "className": "User"}
//! {"__type": "Date",     "iso": "2024-01-01T00:00:00.000Z"}
//! ```

use crate::context::Context;
use crate::error::{SyncError, SyncResult};
use crate::object::TrackedObject;
use crate::state::Attributes;
use crate::value::{FileRef, RelationRef, Value};
use serde_json::{json, Number};
use std::collections::BTreeMap;

pub use serde_json::Value as JsonValue;

/// A JSON object.
pub type JsonMap = serde_json::Map<String, JsonValue>;

/// How pointers to objects without a server id are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerMode {
    /// Unsaved pointers and unsaved files are errors.
    Strict,
    /// Unsaved pointers are written with their `_localId`; unsaved files
    /// are written without a URL. Used by the local datastore.
    Offline,
}

/// Encodes a value to its JSON wire form.
pub fn encode(value: &Value, mode: PointerMode) -> SyncResult<JsonValue> {
    Ok(match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Integer(i) => JsonValue::Number(Number::from(*i)),
        Value::Float(f) => Number::from_f64(*f)
            .map(JsonValue::Number)
            .ok_or_else(|| SyncError::incorrect_type(format!("cannot encode number {f}")))?,
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Date(iso) => json!({"__type": "Date", "iso": iso}),
        Value::Array(items) => JsonValue::Array(
            items
                .iter()
                .map(|item| encode(item, mode))
                .collect::<SyncResult<_>>()?,
        ),
        Value::Map(map) => {
            let mut out = JsonMap::new();
            for (key, item) in map {
                out.insert(key.clone(), encode(item, mode)?);
            }
            JsonValue::Object(out)
        }
        Value::Object(obj) => encode_pointer(obj, mode)?,
        Value::File(file) => match (file.url(), mode) {
            (Some(url), _) => json!({"__type": "File", "name": file.name(), "url": url}),
            (None, PointerMode::Offline) => json!({"__type": "File", "name": file.name()}),
            (None, PointerMode::Strict) => {
                return Err(SyncError::incorrect_type(
                    "tried to encode an unsaved file",
                ))
            }
        },
        Value::Relation(relation) => {
            json!({"__type": "Relation", "className": relation.target_class})
        }
    })
}

/// Encodes every attribute of a map.
pub fn encode_attributes(attributes: &Attributes, mode: PointerMode) -> SyncResult<JsonMap> {
    let mut out = JsonMap::new();
    for (key, value) in attributes {
        out.insert(key.clone(), encode(value, mode)?);
    }
    Ok(out)
}

fn encode_pointer(obj: &TrackedObject, mode: PointerMode) -> SyncResult<JsonValue> {
    match (obj.id(), mode) {
        (Some(id), _) => Ok(json!({
            "__type": "Pointer",
            "className": obj.class_name(),
            "objectId": id,
        })),
        (None, PointerMode::Offline) => Ok(json!({
            "__type": "Pointer",
            "className": obj.class_name(),
            "_localId": obj.identity().id(),
        })),
        (None, PointerMode::Strict) => Err(SyncError::PointerToUnsavedObject),
    }
}

/// Decodes a JSON wire value.
///
/// Pointers and full objects are resolved through `ctx`, so under
/// single-instance mode they share state with every other handle of the same
/// identity. Unknown `__type` tags decode as plain maps.
pub fn decode(ctx: &Context, json: &JsonValue) -> Value {
    match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Float(n.as_f64().unwrap_or_default()),
        },
        JsonValue::String(s) => Value::String(s.clone()),
        JsonValue::Array(items) => Value::Array(items.iter().map(|i| decode(ctx, i)).collect()),
        JsonValue::Object(map) => decode_object(ctx, map),
    }
}

fn decode_object(ctx: &Context, map: &JsonMap) -> Value {
    let text = |key: &str| map.get(key).and_then(JsonValue::as_str);
    match text("__type") {
        Some("Pointer") => match (text("className"), text("objectId"), text("_localId")) {
            (Some(class_name), Some(id), _) => Value::Object(ctx.object_with_id(class_name, id)),
            (Some(class_name), None, Some(local_id)) => {
                Value::Object(ctx.object_with_local_id(class_name, local_id))
            }
            _ => decode_map(ctx, map),
        },
        Some("Object") => match text("className") {
            Some(class_name) => match ctx.object_from_json(class_name, map, false) {
                Ok(obj) => Value::Object(obj),
                Err(_) => decode_map(ctx, map),
            },
            None => decode_map(ctx, map),
        },
        Some("Date") => match text("iso") {
            Some(iso) => Value::Date(iso.to_string()),
            None => decode_map(ctx, map),
        },
        Some("File") => match (text("name"), text("url")) {
            (Some(name), Some(url)) => Value::File(FileRef::from_url(name, url)),
            (Some(name), None) => Value::File(FileRef::new(name, Vec::new(), None)),
            _ => decode_map(ctx, map),
        },
        Some("Relation") => Value::Relation(RelationRef {
            target_class: text("className").map(str::to_string),
            ..RelationRef::default()
        }),
        _ => decode_map(ctx, map),
    }
}

fn decode_map(ctx: &Context, map: &JsonMap) -> Value {
    Value::Map(
        map.iter()
            .map(|(key, item)| (key.clone(), decode(ctx, item)))
            .collect::<BTreeMap<_, _>>(),
    )
}

/// Returns true if `json` is a `{"__op": "Delete"}` marker.
pub fn is_delete_marker(json: &JsonValue) -> bool {
    json.get("__op").and_then(JsonValue::as_str) == Some("Delete")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_plain_values() {
        let mut map = BTreeMap::new();
        map.insert("level".to_string(), Value::Integer(3));
        map.insert("ratio".to_string(), Value::Float(0.5));
        let value = Value::Array(vec![Value::Map(map), Value::Null, Value::from("x")]);

        let json = encode(&value, PointerMode::Strict).unwrap();
        assert_eq!(json, json!([{"level": 3, "ratio": 0.5}, null, "x"]));
    }

    #[test]
    fn nan_is_rejected() {
        let err = encode(&Value::Float(f64::NAN), PointerMode::Strict).unwrap_err();
        assert!(matches!(err, SyncError::IncorrectType(_)));
    }

    #[test]
    fn unsaved_pointer_depends_on_mode() {
        let ctx = Context::new();
        let obj = ctx.object("Item");
        let value = Value::Object(obj.clone());

        assert!(matches!(
            encode(&value, PointerMode::Strict),
            Err(SyncError::PointerToUnsavedObject)
        ));
        let offline = encode(&value, PointerMode::Offline).unwrap();
        assert_eq!(offline["_localId"], json!(obj.identity().id()));
    }

    #[test]
    fn unsaved_file_depends_on_mode() {
        let file = Value::File(FileRef::new("a.txt", b"hi".to_vec(), None));
        assert!(encode(&file, PointerMode::Strict).is_err());
        assert_eq!(
            encode(&file, PointerMode::Offline).unwrap(),
            json!({"__type": "File", "name": "a.txt"})
        );
    }

    #[test]
    fn decodes_tagged_values() {
        let ctx = Context::new();
        let json = json!({
            "owner": {"__type": "Pointer", "className": "User", "objectId": "u1"},
            "when": {"__type": "Date", "iso": "2024-05-01T10:00:00.000Z"},
            "avatar": {"__type": "File", "name": "a.png", "url": "https://f/a.png"},
            "likes": {"__type": "Relation", "className": "User"},
            "count": 4,
            "ratio": 1.5,
        });

        let Value::Map(map) = decode(&ctx, &json) else {
            panic!("expected map");
        };
        let owner = map["owner"].as_object().unwrap();
        assert_eq!(owner.class_name(), "User");
        assert_eq!(owner.id().as_deref(), Some("u1"));
        assert_eq!(map["when"], Value::Date("2024-05-01T10:00:00.000Z".into()));
        assert_eq!(map["avatar"].as_file().unwrap().url().as_deref(), Some("https://f/a.png"));
        assert_eq!(
            map["likes"].as_relation().unwrap().target_class.as_deref(),
            Some("User")
        );
        assert_eq!(map["count"], Value::Integer(4));
        assert_eq!(map["ratio"], Value::Float(1.5));
    }

    #[test]
    fn decodes_full_objects() {
        let ctx = Context::new();
        let json = json!({
            "__type": "Object",
            "className": "Score",
            "objectId": "s1",
            "points": 10,
        });
        let obj = decode(&ctx, &json).as_object().cloned().unwrap();
        assert_eq!(obj.get("points"), Some(Value::Integer(10)));
        assert!(obj.existed());
        assert!(!obj.dirty());
    }

    #[test]
    fn delete_marker() {
        assert!(is_delete_marker(&json!({"__op": "Delete"})));
        assert!(!is_delete_marker(&json!({"__op": "Increment", "amount": 1})));
        assert!(!is_delete_marker(&json!(5)));
    }
}
