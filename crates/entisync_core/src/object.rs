//! Tracked objects.

use crate::codec::{self, JsonMap, JsonValue, PointerMode};
use crate::context::Context;
use crate::error::{SyncError, SyncResult};
use crate::op::Op;
use crate::state::{self, Attributes, Changes, StateMode, StateStore};
use crate::types::{generate_local_id, InstanceId, Method, ObjectIdentity};
use crate::value::{AttrOwner, RelationParent, RelationRef, Value};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Attributes maintained by the server.
const READ_ONLY: [&str; 2] = ["createdAt", "updatedAt"];

#[derive(Debug, Clone, Default)]
struct ObjectIds {
    object_id: Option<String>,
    local_id: Option<String>,
}

struct ObjectInner {
    class_name: String,
    instance: InstanceId,
    ids: RwLock<ObjectIds>,
    store: StateStore,
}

impl Drop for ObjectInner {
    fn drop(&mut self) {
        let ids = std::mem::take(self.ids.get_mut());
        let identity = ObjectIdentity {
            class_name: std::mem::take(&mut self.class_name),
            object_id: ids.object_id,
            local_id: ids.local_id,
            instance: self.instance,
        };
        self.store.controller().release(&identity);
    }
}

/// The method, path and body of one save request.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveParams {
    /// POST to create, PUT to update.
    pub method: Method,
    /// Path relative to the server root, e.g. `classes/Score/abc`.
    pub path: String,
    /// Save payload.
    pub body: JsonMap,
}

/// A handle to a schema-less object.
///
/// Clones are handles to the same instance. Attribute reads and writes go
/// through the object's state record, so under single-instance mode every
/// handle of one `class:id` observes the same attributes.
#[derive(Clone)]
pub struct TrackedObject {
    inner: Arc<ObjectInner>,
}

impl TrackedObject {
    pub(crate) fn new(
        class_name: impl Into<String>,
        object_id: Option<String>,
        local_id: Option<String>,
        store: StateStore,
    ) -> Self {
        let local_id = match (&object_id, local_id) {
            (None, None) => Some(generate_local_id()),
            (_, local_id) => local_id,
        };
        Self {
            inner: Arc::new(ObjectInner {
                class_name: class_name.into(),
                instance: InstanceId::next(),
                ids: RwLock::new(ObjectIds {
                    object_id,
                    local_id,
                }),
                store,
            }),
        }
    }

    /// Returns the class name.
    pub fn class_name(&self) -> &str {
        &self.inner.class_name
    }

    /// Returns the server id, once assigned.
    pub fn id(&self) -> Option<String> {
        self.inner.ids.read().object_id.clone()
    }

    /// Returns the local id standing in before the server id is known.
    pub fn local_id(&self) -> Option<String> {
        self.inner.ids.read().local_id.clone()
    }

    /// Returns the in-memory instance id.
    pub fn instance(&self) -> InstanceId {
        self.inner.instance
    }

    /// Returns the identity the state controller keys this object by.
    pub fn identity(&self) -> ObjectIdentity {
        let ids = self.inner.ids.read();
        ObjectIdentity {
            class_name: self.inner.class_name.clone(),
            object_id: ids.object_id.clone(),
            local_id: ids.local_id.clone(),
            instance: self.inner.instance,
        }
    }

    /// Returns the `class:id` key, using the local id before a server id is
    /// assigned.
    pub fn key(&self) -> String {
        self.identity().key()
    }

    /// Returns the state store the object's record lives in.
    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    /// Returns true for handles of the same instance, or objects of the same
    /// class with the same server id.
    pub fn same_as(&self, other: &TrackedObject) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        if self.class_name() != other.class_name() {
            return false;
        }
        match (self.id(), other.id()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Returns true until the server has assigned an id.
    pub fn is_new(&self) -> bool {
        self.id().is_none()
    }

    /// Returns true if the object was known to exist on the server before
    /// its last save.
    pub fn existed(&self) -> bool {
        self.store()
            .get_state(&self.identity())
            .is_some_and(|cell| cell.lock().existed)
    }

    /// Sets the `existed` flag.
    pub fn set_existed(&self, existed: bool) {
        self.store().with_state(&self.identity(), |s| s.existed = existed);
    }

    /// Returns true once any server data is known.
    pub fn is_data_available(&self) -> bool {
        !self.store().get_server_data(&self.identity()).is_empty()
    }

    /// Returns the estimated attributes.
    pub fn attributes(&self) -> Attributes {
        self.store().estimate_attributes(&self.identity())
    }

    /// Returns the estimated value of `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.attributes().remove(key)
    }

    /// Returns true if `key` holds a non-null value.
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some_and(|value| !value.is_null())
    }

    /// Returns the creation timestamp, once saved.
    pub fn created_at(&self) -> Option<String> {
        self.get("createdAt").and_then(|v| v.as_str().map(str::to_string))
    }

    /// Returns the last update timestamp, once saved.
    pub fn updated_at(&self) -> Option<String> {
        self.get("updatedAt").and_then(|v| v.as_str().map(str::to_string))
    }

    /// Sets `key` to `value`.
    ///
    /// Setting `objectId` to a string assigns the id instead; `createdAt` and
    /// `updatedAt` are ignored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKeyName` for keys outside `[A-Za-z][0-9A-Za-z_.]*`,
    /// `IncorrectType` if `ACL` is not a map.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> SyncResult<()> {
        let mut values = BTreeMap::new();
        values.insert(key.to_string(), value.into());
        self.set_all(values)
    }

    /// Sets several keys at once. Nothing is written if any key fails
    /// validation.
    pub fn set_all(&self, values: BTreeMap<String, Value>) -> SyncResult<()> {
        let mut ops = BTreeMap::new();
        for (key, value) in values {
            if key == "objectId" {
                if let Value::String(id) = &value {
                    self.set_id(id.clone());
                    continue;
                }
            }
            let value = match value {
                Value::Relation(relation) => Value::Relation(RelationRef {
                    target_class: relation.target_class,
                    ..RelationRef::default()
                }),
                value => value,
            };
            ops.insert(key, Op::Set(value));
        }
        self.apply_ops(ops)
    }

    /// Merges `op` into the latest pending generation of `key`.
    pub fn set_op(&self, key: &str, op: Op) -> SyncResult<()> {
        let mut ops = BTreeMap::new();
        ops.insert(key.to_string(), op);
        self.apply_ops(ops)
    }

    fn apply_ops(&self, mut ops: BTreeMap<String, Op>) -> SyncResult<()> {
        ops.retain(|key, _| !READ_ONLY.contains(&key.as_str()));
        for key in ops.keys() {
            validate_key(key)?;
        }
        if ops.is_empty() {
            return Ok(());
        }

        let identity = self.identity();
        let parent = state::relation_parent(&identity);
        self.store().with_state(&identity, |state| {
            let current = state.estimate_attributes(parent.as_ref());
            for (key, op) in &ops {
                let owner = parent.as_ref().filter(|_| op.is_relation()).map(|p| AttrOwner {
                    parent: p.clone(),
                    key: key.clone(),
                });
                let next = op.apply_to(current.get(key), owner.as_ref())?;
                if key == "ACL" && next.as_ref().is_some_and(|v| !matches!(v, Value::Map(_))) {
                    return Err(SyncError::incorrect_type("ACL must be a map"));
                }
            }

            let mut merged = Vec::with_capacity(ops.len());
            for (key, op) in &ops {
                merged.push((key, op.merge_with(state.latest().get(key))?));
            }
            for (key, op) in merged {
                state.set_pending_op(key, Some(op));
            }
            Ok(())
        })
    }

    /// Deletes `key`.
    pub fn unset(&self, key: &str) -> SyncResult<()> {
        self.set_op(key, Op::Unset)
    }

    /// Atomically adds `amount` to the number at `key`.
    pub fn increment(&self, key: &str, amount: impl Into<Value>) -> SyncResult<()> {
        self.set_op(key, Op::increment(amount)?)
    }

    /// Atomically subtracts `amount` from the number at `key`.
    pub fn decrement(&self, key: &str, amount: impl Into<Value>) -> SyncResult<()> {
        let negated = match amount.into() {
            Value::Integer(i) => i
                .checked_neg()
                .map(Value::Integer)
                .unwrap_or(Value::Float(-(i as f64))),
            Value::Float(f) => Value::Float(-f),
            other => {
                return Err(SyncError::incorrect_type(format!(
                    "cannot decrement by a {}",
                    other.type_name()
                )))
            }
        };
        self.set_op(key, Op::Increment(negated))
    }

    /// Appends `item` to the array at `key`.
    pub fn add(&self, key: &str, item: impl Into<Value>) -> SyncResult<()> {
        self.add_all(key, vec![item.into()])
    }

    /// Appends `items` to the array at `key`.
    pub fn add_all(&self, key: &str, items: Vec<Value>) -> SyncResult<()> {
        self.set_op(key, Op::Add(items))
    }

    /// Appends `item` to the array at `key` unless already present.
    pub fn add_unique(&self, key: &str, item: impl Into<Value>) -> SyncResult<()> {
        self.add_all_unique(key, vec![item.into()])
    }

    /// Appends each of `items` to the array at `key` unless already present.
    pub fn add_all_unique(&self, key: &str, items: Vec<Value>) -> SyncResult<()> {
        self.set_op(key, Op::AddUnique(items))
    }

    /// Removes every instance of `item` from the array at `key`.
    pub fn remove(&self, key: &str, item: impl Into<Value>) -> SyncResult<()> {
        self.remove_all(key, vec![item.into()])
    }

    /// Removes every instance of each of `items` from the array at `key`.
    pub fn remove_all(&self, key: &str, items: Vec<Value>) -> SyncResult<()> {
        self.set_op(key, Op::Remove(items))
    }

    /// Returns the relation stored at `key`, bound to this object.
    pub fn relation(&self, key: &str) -> SyncResult<RelationRef> {
        let identity = self.identity();
        let owner = AttrOwner {
            parent: RelationParent {
                class_name: identity.class_name.clone(),
                object_id: identity.id().to_string(),
            },
            key: key.to_string(),
        };
        match self.get(key) {
            Some(Value::Relation(mut relation)) => {
                relation.ensure_owner(&owner);
                Ok(relation)
            }
            Some(other) => Err(SyncError::incorrect_type(format!(
                "called relation() on non-relation field {key} ({})",
                other.type_name()
            ))),
            None => Ok(RelationRef::for_owner(&owner)),
        }
    }

    /// Adds saved objects to the relation at `key`.
    pub fn relation_add(&self, key: &str, objects: &[TrackedObject]) -> SyncResult<()> {
        self.set_op(key, Op::relation(objects, &[])?)
    }

    /// Removes saved objects from the relation at `key`.
    pub fn relation_remove(&self, key: &str, objects: &[TrackedObject]) -> SyncResult<()> {
        self.set_op(key, Op::relation(&[], objects)?)
    }

    /// Returns the newest pending op on `key`.
    pub fn op(&self, key: &str) -> Option<Op> {
        self.store()
            .get_pending_ops(&self.identity())
            .into_iter()
            .rev()
            .find_map(|mut generation| generation.remove(key))
    }

    /// Returns true if the object has unsaved changes.
    ///
    /// Objects without a server id are always dirty. Otherwise any pending op
    /// in any generation, or any compound attribute edited in place, makes the
    /// object dirty.
    pub fn dirty(&self) -> bool {
        if self.is_new() {
            return true;
        }
        let identity = self.identity();
        let parent = state::relation_parent(&identity);
        self.store().get_state(&identity).is_some_and(|cell| {
            let state = cell.lock();
            state.pending_ops.iter().any(|generation| !generation.is_empty())
                || !state
                    .dirty_objects(&state.estimate_attributes(parent.as_ref()))
                    .is_empty()
        })
    }

    /// Returns true if `key` has unsaved changes.
    pub fn dirty_key(&self, key: &str) -> bool {
        if self.is_new() {
            return true;
        }
        self.dirty_keys().iter().any(|k| k == key)
    }

    /// Returns every key with unsaved changes.
    pub fn dirty_keys(&self) -> Vec<String> {
        let identity = self.identity();
        let parent = state::relation_parent(&identity);
        let Some(cell) = self.store().get_state(&identity) else {
            return Vec::new();
        };
        let state = cell.lock();
        let mut keys: Vec<String> = state
            .pending_ops
            .iter()
            .flat_map(|generation| generation.keys().cloned())
            .chain(
                state
                    .dirty_objects(&state.estimate_attributes(parent.as_ref()))
                    .into_keys(),
            )
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Discards unsaved edits of `keys` (all keys when empty) in the latest
    /// generation.
    pub fn revert(&self, keys: &[&str]) {
        let keys: Vec<String> = keys.iter().map(|k| (*k).to_string()).collect();
        self.clear_pending_ops((!keys.is_empty()).then_some(keys.as_slice()));
    }

    /// Unsets every attribute except the server timestamps.
    pub fn clear(&self) -> SyncResult<()> {
        let ops = self
            .attributes()
            .into_keys()
            .filter(|key| !READ_ONLY.contains(&key.as_str()))
            .map(|key| (key, Op::Unset))
            .collect();
        self.apply_ops(ops)
    }

    /// Returns the `Pointer` wire form.
    ///
    /// # Errors
    ///
    /// Returns `PointerToUnsavedObject` if the object has no server id.
    pub fn to_pointer(&self) -> SyncResult<JsonValue> {
        codec::encode(&Value::Object(self.clone()), PointerMode::Strict)
    }

    /// Returns the `Pointer` wire form, using the local id when unsaved.
    pub fn to_offline_pointer(&self) -> SyncResult<JsonValue> {
        codec::encode(&Value::Object(self.clone()), PointerMode::Offline)
    }

    /// Encodes the estimated attributes plus `objectId` (or `_localId` in
    /// offline mode).
    pub fn to_json(&self, mode: PointerMode) -> SyncResult<JsonMap> {
        let mut json = JsonMap::new();
        for (key, value) in self.attributes() {
            let encoded = match (key.as_str(), &value) {
                ("createdAt" | "updatedAt", Value::Date(iso)) => JsonValue::String(iso.clone()),
                _ => codec::encode(&value, mode)?,
            };
            json.insert(key, encoded);
        }
        let ids = self.inner.ids.read().clone();
        match (ids.object_id, ids.local_id, mode) {
            (Some(id), _, _) => {
                json.insert("objectId".into(), JsonValue::String(id));
            }
            (None, Some(local_id), PointerMode::Offline) => {
                json.insert("_localId".into(), JsonValue::String(local_id));
            }
            _ => {}
        }
        Ok(json)
    }

    /// Like [`TrackedObject::to_json`], tagged with `__type` and `className`
    /// so it decodes back into an object.
    pub fn to_full_json(&self, mode: PointerMode) -> SyncResult<JsonMap> {
        let mut json = self.to_json(mode)?;
        json.insert("__type".into(), JsonValue::String("Object".into()));
        json.insert(
            "className".into(),
            JsonValue::String(self.class_name().to_string()),
        );
        Ok(json)
    }

    /// Returns a new instance of the same identity.
    ///
    /// Under unique-instance mode the state is deep-copied; under
    /// single-instance mode both instances share the record.
    pub fn new_instance(&self) -> TrackedObject {
        let ids = self.inner.ids.read().clone();
        let clone = TrackedObject::new(
            self.class_name(),
            ids.object_id,
            ids.local_id,
            self.store().clone(),
        );
        if self.store().mode() == StateMode::UniqueInstance {
            self.store()
                .duplicate_state(&self.identity(), &clone.identity());
        }
        clone
    }

    /// Assigns the object id, moving a single-instance record to the new key.
    pub fn set_id(&self, id: impl Into<String>) {
        let id = id.into();
        if self.id().as_deref() == Some(id.as_str()) {
            return;
        }
        self.rekey(id);
    }

    /// Adopts the server-assigned id of an object that only had a local id.
    pub fn migrate_id(&self, server_id: &str) {
        if self.id().is_some() {
            return;
        }
        self.rekey(server_id.to_string());
    }

    fn rekey(&self, id: String) {
        let old = self.identity();
        let record = match self.store().mode() {
            StateMode::SingleInstance => self.store().remove_state(&old),
            StateMode::UniqueInstance => None,
        };
        {
            let mut ids = self.inner.ids.write();
            ids.object_id = Some(id.clone());
            ids.local_id = None;
        }
        if let Some(record) = record {
            self.store().controller().adopt_state(&self.identity(), record);
        }
        debug!(
            class = %old.class_name,
            from = old.id(),
            to = %id,
            "migrated object id"
        );
    }

    /// Enqueues `task` on this object's task queue.
    pub fn enqueue_task<F, Fut, T>(&self, task: F) -> impl Future<Output = T> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.store().enqueue_task(&self.identity(), task)
    }

    /// Snapshots the current edits as an in-flight generation.
    pub fn push_pending_state(&self) {
        self.store().push_pending_state(&self.identity());
    }

    /// Builds the save payload.
    ///
    /// Compound attributes edited in place become `Set` payloads, unless a
    /// dotted pending op targets the same root key. Generation-0 ops override.
    pub fn save_json(&self) -> SyncResult<JsonMap> {
        let identity = self.identity();
        let parent = state::relation_parent(&identity);
        let (pending, dirty_objects) = self.store().with_state(&identity, |state| {
            let estimated = state.estimate_attributes(parent.as_ref());
            (state.pending_ops.clone(), state.dirty_objects(&estimated))
        });

        let mut json = JsonMap::new();
        for (key, value) in dirty_objects {
            let dotted = pending.iter().any(|generation| {
                generation
                    .keys()
                    .any(|field| field.split_once('.').is_some_and(|(root, _)| root == key))
            });
            if !dotted {
                json.insert(key, Op::Set(value).to_json()?);
            }
        }
        if let Some(first) = pending.first() {
            for (key, op) in first {
                json.insert(key.clone(), op.to_json()?);
            }
        }
        Ok(json)
    }

    /// Builds the save request.
    ///
    /// # Errors
    ///
    /// With custom object ids, returns `MissingObjectId` if no id was set.
    pub fn save_params(&self, allow_custom_object_id: bool) -> SyncResult<SaveParams> {
        let mut body = self.save_json()?;
        let class_path = format!("classes/{}", self.class_name());

        let (method, path) = match (self.id(), allow_custom_object_id) {
            (None, true) => {
                return Err(SyncError::MissingObjectId(
                    "objectId must not be empty or null".into(),
                ))
            }
            (Some(id), true) if self.created_at().is_none() => {
                body.insert("objectId".into(), JsonValue::String(id));
                (Method::Post, class_path)
            }
            (Some(id), _) => (Method::Put, format!("{class_path}/{id}")),
            (None, false) => (Method::Post, class_path),
        };
        Ok(SaveParams { method, path, body })
    }

    /// Processes a successful save response.
    ///
    /// Pops the sent generation, commits the server's view of every attribute
    /// it touched, and migrates the id if the server assigned one. `created`
    /// is true when the request created the object.
    pub fn handle_save_response(&self, ctx: &Context, response: &JsonMap, created: bool) {
        let identity = self.identity();
        let server_id = response.get("objectId").and_then(JsonValue::as_str);
        let parent = match (&identity.object_id, server_id) {
            (Some(id), _) => Some(id.clone()),
            (None, Some(id)) => Some(id.to_string()),
            (None, None) => None,
        }
        .map(|object_id| RelationParent {
            class_name: identity.class_name.clone(),
            object_id,
        });

        let (sent, server_data) = self.store().with_state(&identity, |state| {
            (state.pop_pending_state(), state.server_data.clone())
        });
        let current = self.attributes();

        let mut changes = Changes::new();
        for (key, op) in &sent {
            if op.is_relation() {
                let owner = parent.as_ref().map(|p| AttrOwner {
                    parent: p.clone(),
                    key: key.clone(),
                });
                match op.apply_to(None, owner.as_ref()) {
                    Ok(value) => {
                        changes.insert(key.clone(), value);
                    }
                    Err(err) => warn!(%key, error = %err, "relation op could not be committed"),
                }
            } else if !response.contains_key(key) {
                match op.apply_to(state::nested_get(&server_data, key), None) {
                    Ok(value) => {
                        changes.insert(key.clone(), value);
                    }
                    Err(err) => warn!(%key, error = %err, "saved op could not be committed"),
                }
            }
        }

        for (key, json) in response {
            match (key.as_str(), json) {
                ("objectId", _) => {}
                ("createdAt" | "updatedAt", JsonValue::String(iso)) => {
                    changes.insert(key.clone(), Some(Value::Date(iso.clone())));
                }
                _ if codec::is_delete_marker(json) => {
                    changes.insert(key.clone(), None);
                }
                _ => {
                    let value = match (codec::decode(ctx, json), current.get(key)) {
                        (Value::Map(update), Some(Value::Map(existing))) => {
                            let mut merged = existing.clone();
                            merged.extend(update);
                            Value::Map(merged)
                        }
                        (value, _) => value,
                    };
                    changes.insert(key.clone(), Some(value));
                }
            }
        }

        if !changes.contains_key("updatedAt") {
            if let Some(Some(created_at)) = changes.get("createdAt").cloned() {
                changes.insert("updatedAt".into(), Some(created_at));
            }
        }

        if let Some(id) = server_id {
            self.migrate_id(id);
        }
        self.store().with_state(&self.identity(), |state| {
            if !created {
                state.existed = true;
            }
            state.commit_server_changes(changes);
        });
    }

    /// Restores the edits of a failed save.
    pub fn handle_save_error(&self) {
        self.store().merge_first_pending_state(&self.identity());
    }

    /// Drops pending ops of `keys` (all keys when `None`) from the latest
    /// generation.
    pub fn clear_pending_ops(&self, keys: Option<&[String]>) {
        self.store().with_state(&self.identity(), |state| {
            let Some(latest) = state.pending_ops.last_mut() else {
                return;
            };
            match keys {
                Some(keys) => keys.iter().for_each(|key| {
                    latest.remove(key);
                }),
                None => latest.clear(),
            }
        });
    }

    /// Drops server data of `keys` (all keys when `None`).
    pub fn clear_server_data(&self, keys: Option<&[String]>) {
        let identity = self.identity();
        let keys: Vec<String> = match keys {
            Some(keys) => keys.to_vec(),
            None => self.store().get_server_data(&identity).into_keys().collect(),
        };
        self.store()
            .set_server_data(&identity, keys.into_iter().map(|k| (k, None)).collect());
    }

    /// Commits fetched server data.
    ///
    /// Timestamps become dates, `updatedAt` defaults to `createdAt`, and
    /// relations are bound to this object.
    pub fn finish_fetch(&self, ctx: &Context, data: &JsonMap) {
        if let Some(id) = data.get("objectId").and_then(JsonValue::as_str) {
            self.migrate_id(id);
        }
        let identity = self.identity();
        let parent = state::relation_parent(&identity);

        let mut decoded = Changes::new();
        for (key, json) in data {
            if matches!(key.as_str(), "objectId" | "__type" | "className" | "_localId") {
                continue;
            }
            let value = match (key.as_str(), codec::decode(ctx, json)) {
                ("createdAt" | "updatedAt", Value::String(iso)) => Value::Date(iso),
                (_, Value::Relation(mut relation)) => {
                    if let Some(parent) = &parent {
                        relation.ensure_owner(&AttrOwner {
                            parent: parent.clone(),
                            key: key.clone(),
                        });
                    }
                    Value::Relation(relation)
                }
                (_, value) => value,
            };
            decoded.insert(key.clone(), Some(value));
        }
        if !decoded.contains_key("updatedAt") {
            if let Some(Some(created_at)) = decoded.get("createdAt").cloned() {
                decoded.insert("updatedAt".into(), Some(created_at));
            }
        }
        self.store().commit_server_changes(&identity, decoded);
    }
}

impl fmt::Debug for TrackedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = self.inner.ids.read();
        f.debug_struct("TrackedObject")
            .field("class_name", &self.inner.class_name)
            .field("object_id", &ids.object_id)
            .field("local_id", &ids.local_id)
            .field("instance", &self.inner.instance)
            .finish()
    }
}

/// Checks that `key` matches `[A-Za-z][0-9A-Za-z_.]*`.
fn validate_key(key: &str) -> SyncResult<()> {
    let mut chars = key.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(SyncError::InvalidKeyName(format!("invalid field name: {key}")))
    }
}
