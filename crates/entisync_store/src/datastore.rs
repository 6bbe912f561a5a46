//! Local datastore.
//!
//! Pinned objects are stored as full offline JSON in a [`Storage`]:
//!
//! ```text
//! entisync_lds_obj_<class>_<id> -> {"__type": "Object", "className": ..., ...}
//! entisync_lds_pin_<name>       -> ["entisync_lds_obj_<class>_<id>", ...]
//! ```
//!
//! `<id>` is the server id, or the local id of an object not yet saved. Pinning
//! an object also pins every object reachable from it through pointers. An
//! object entry lives as long as at least one pin lists it.

use crate::error::{StoreError, StoreResult};
use crate::query::Query;
use crate::storage::Storage;
use entisync_core::codec::{JsonMap, JsonValue, PointerMode};
use entisync_core::{Context, TrackedObject, Value};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Prefix of object entry keys.
pub const OBJECT_PREFIX: &str = "entisync_lds_obj_";
/// Prefix of pin keys.
pub const PIN_PREFIX: &str = "entisync_lds_pin_";
/// Name of the default pin.
pub const DEFAULT_PIN: &str = "_default";

/// Offline object storage with named pins.
pub struct LocalDatastore {
    ctx: Context,
    storage: Arc<dyn Storage>,
    write_lock: Mutex<()>,
}

impl LocalDatastore {
    /// Creates a datastore over `storage`, decoding objects through `ctx`.
    pub fn new(ctx: Context, storage: Arc<dyn Storage>) -> Self {
        Self {
            ctx,
            storage,
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the storage collaborator.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Returns the storage key of `obj`.
    pub fn object_key(obj: &TrackedObject) -> String {
        Self::key_for(obj.class_name(), obj.identity().id())
    }

    fn key_for(class_name: &str, id: &str) -> String {
        format!("{OBJECT_PREFIX}{class_name}_{id}")
    }

    /// Returns the storage key of the pin `name`.
    pub fn pin_key(name: &str) -> String {
        format!("{PIN_PREFIX}{name}")
    }

    /// Pins `objects` and everything they point to under the default pin.
    ///
    /// # Errors
    ///
    /// Returns an error if the objects cannot be encoded or stored.
    pub fn pin(&self, objects: &[TrackedObject]) -> StoreResult<()> {
        self.pin_with_name(DEFAULT_PIN, objects)
    }

    /// Pins `objects` and everything they point to under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the objects cannot be encoded or stored.
    pub fn pin_with_name(&self, name: &str, objects: &[TrackedObject]) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let reachable = reachable_objects(objects);

        let mut keys = self.read_pin(name)?;
        for obj in &reachable {
            let key = Self::object_key(obj);
            self.write_object(&key, obj)?;
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        self.write_pin(name, &keys)?;
        debug!(pin = name, objects = reachable.len(), "pinned objects");
        Ok(())
    }

    /// Removes `objects` and everything they point to from the default pin.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage fails.
    pub fn unpin(&self, objects: &[TrackedObject]) -> StoreResult<()> {
        self.unpin_with_name(DEFAULT_PIN, objects)
    }

    /// Removes `objects` and everything they point to from the pin `name`.
    /// Entries no pin lists any more are deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage fails.
    pub fn unpin_with_name(&self, name: &str, objects: &[TrackedObject]) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let removed: HashSet<String> = reachable_objects(objects)
            .iter()
            .map(Self::object_key)
            .collect();

        let mut keys = self.read_pin(name)?;
        keys.retain(|key| !removed.contains(key));
        self.write_pin(name, &keys)?;
        self.collect_garbage(&removed)?;
        debug!(pin = name, objects = removed.len(), "unpinned objects");
        Ok(())
    }

    /// Removes the default pin.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage fails.
    pub fn unpin_all(&self) -> StoreResult<()> {
        self.unpin_all_with_name(DEFAULT_PIN)
    }

    /// Removes the pin `name`. Entries no other pin lists are deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage fails.
    pub fn unpin_all_with_name(&self, name: &str) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let keys: HashSet<String> = self.read_pin(name)?.into_iter().collect();
        self.storage.remove_item(&Self::pin_key(name))?;
        self.collect_garbage(&keys)?;
        debug!(pin = name, "removed pin");
        Ok(())
    }

    /// Returns the object keys listed by the pin `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin entry is corrupted.
    pub fn pinned_keys(&self, name: &str) -> StoreResult<Vec<String>> {
        self.read_pin(name)
    }

    /// Returns true if `obj` has an entry in the datastore.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage fails.
    pub fn is_pinned(&self, obj: &TrackedObject) -> StoreResult<bool> {
        Ok(self.storage.get_item(&Self::object_key(obj))?.is_some())
    }

    /// Replaces the server data of `obj` with its stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `obj` is not in the datastore.
    pub fn fetch_local(&self, obj: &TrackedObject) -> StoreResult<TrackedObject> {
        let key = Self::object_key(obj);
        let json = self
            .read_object(&key)?
            .ok_or_else(|| StoreError::NotFound(obj.key()))?;
        obj.clear_server_data(None);
        obj.finish_fetch(&self.ctx, &json);
        trace!(key = %key, "fetched object from local datastore");
        Ok(obj.clone())
    }

    /// Evaluates `query` against the stored objects of its class.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` for unsupported operators, or an error if a
    /// stored entry cannot be read.
    pub fn find_local(&self, query: &Query) -> StoreResult<Vec<TrackedObject>> {
        query.validate()?;
        let class_prefix = format!("{OBJECT_PREFIX}{}_", query.class_name());
        let keys: BTreeSet<String> = match query.pin_name() {
            Some(name) => self.read_pin(name)?.into_iter().collect(),
            None => self.storage.keys()?.into_iter().collect(),
        };

        let mut candidates = Vec::new();
        for key in keys
            .iter()
            .filter(|key| key.starts_with(&class_prefix))
        {
            let Some(json) = self.read_object(key)? else {
                continue;
            };
            if json.get("className").and_then(JsonValue::as_str) == Some(query.class_name()) {
                candidates.push(json);
            }
        }

        let results = query.evaluate(candidates)?;
        debug!(
            class = query.class_name(),
            results = results.len(),
            "evaluated local query"
        );
        results
            .iter()
            .map(|json| {
                self.ctx
                    .object_from_json(query.class_name(), json, false)
                    .map_err(StoreError::from)
            })
            .collect()
    }

    /// Rewrites the stored snapshot of `obj` if it is pinned.
    ///
    /// # Errors
    ///
    /// Returns an error if the object cannot be encoded or stored.
    pub fn update_object_if_pinned(&self, obj: &TrackedObject) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let key = Self::object_key(obj);
        if self.storage.get_item(&key)?.is_none() {
            return Ok(());
        }
        self.write_object(&key, obj)?;
        trace!(key = %key, "updated pinned object");
        Ok(())
    }

    /// Moves the entry of an object that was stored under `local_id` to its
    /// server id, updating pins and pointers held by other entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage fails.
    pub fn update_local_id(&self, local_id: &str, obj: &TrackedObject) -> StoreResult<()> {
        let Some(object_id) = obj.id() else {
            return Ok(());
        };
        let _guard = self.write_lock.lock();
        let class_name = obj.class_name();
        let old_key = Self::key_for(class_name, local_id);
        if self.storage.get_item(&old_key)?.is_none() {
            return Ok(());
        }
        let new_key = Self::key_for(class_name, &object_id);

        self.storage.remove_item(&old_key)?;
        self.write_object(&new_key, obj)?;

        for name in self.pin_names()? {
            let mut keys = self.read_pin(&name)?;
            if !keys.contains(&old_key) {
                continue;
            }
            keys.retain(|key| key != &old_key && key != &new_key);
            keys.push(new_key.clone());
            self.write_pin(&name, &keys)?;
        }

        for key in self.object_keys()? {
            let Some(json) = self.read_object(&key)? else {
                continue;
            };
            let mut value = JsonValue::Object(json);
            if replace_local_pointer(&mut value, class_name, local_id, &object_id) {
                self.storage.set_item(&key, &serde_json::to_string(&value)?)?;
            }
        }
        debug!(from = %old_key, to = %new_key, "moved local datastore entry");
        Ok(())
    }

    /// Removes `obj` from the datastore and from every pin.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage fails.
    pub fn destroy_object_if_pinned(&self, obj: &TrackedObject) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let key = Self::object_key(obj);
        if self.storage.get_item(&key)?.is_none() {
            return Ok(());
        }
        self.storage.remove_item(&key)?;
        for name in self.pin_names()? {
            let mut keys = self.read_pin(&name)?;
            let before = keys.len();
            keys.retain(|k| k != &key);
            if keys.len() != before {
                self.write_pin(&name, &keys)?;
            }
        }
        debug!(key = %key, "destroyed pinned object");
        Ok(())
    }

    /// Removes every datastore entry, leaving foreign keys alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage fails.
    pub fn clear(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        for key in self.storage.keys()? {
            if key.starts_with(OBJECT_PREFIX) || key.starts_with(PIN_PREFIX) {
                self.storage.remove_item(&key)?;
            }
        }
        Ok(())
    }

    fn read_pin(&self, name: &str) -> StoreResult<Vec<String>> {
        let key = Self::pin_key(name);
        match self.storage.get_item(&key)? {
            Some(raw) => serde_json::from_str(&raw).map_err(|err| StoreError::Corrupted {
                key,
                reason: err.to_string(),
            }),
            None => Ok(Vec::new()),
        }
    }

    fn write_pin(&self, name: &str, keys: &[String]) -> StoreResult<()> {
        let key = Self::pin_key(name);
        if keys.is_empty() {
            self.storage.remove_item(&key)
        } else {
            self.storage.set_item(&key, &serde_json::to_string(keys)?)
        }
    }

    fn pin_names(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .storage
            .keys()?
            .into_iter()
            .filter_map(|key| key.strip_prefix(PIN_PREFIX).map(str::to_string))
            .collect())
    }

    fn object_keys(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .storage
            .keys()?
            .into_iter()
            .filter(|key| key.starts_with(OBJECT_PREFIX))
            .collect())
    }

    fn read_object(&self, key: &str) -> StoreResult<Option<JsonMap>> {
        let Some(raw) = self.storage.get_item(key)? else {
            return Ok(None);
        };
        match serde_json::from_str::<JsonValue>(&raw) {
            Ok(JsonValue::Object(map)) => Ok(Some(map)),
            Ok(_) => Err(StoreError::Corrupted {
                key: key.to_string(),
                reason: "entry is not an object".into(),
            }),
            Err(err) => Err(StoreError::Corrupted {
                key: key.to_string(),
                reason: err.to_string(),
            }),
        }
    }

    fn write_object(&self, key: &str, obj: &TrackedObject) -> StoreResult<()> {
        let json = obj.to_full_json(PointerMode::Offline)?;
        self.storage
            .set_item(key, &serde_json::to_string(&JsonValue::Object(json))?)
    }

    /// Deletes the entries among `candidates` that no pin lists.
    fn collect_garbage(&self, candidates: &HashSet<String>) -> StoreResult<()> {
        let mut referenced = HashSet::new();
        for name in self.pin_names()? {
            referenced.extend(self.read_pin(&name)?);
        }
        for key in candidates.iter().filter(|key| !referenced.contains(*key)) {
            self.storage.remove_item(key)?;
            trace!(key = %key, "collected unpinned entry");
        }
        Ok(())
    }
}

impl fmt::Debug for LocalDatastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalDatastore")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

/// Returns `roots` and every object reachable from them through pointers,
/// each identity once.
fn reachable_objects(roots: &[TrackedObject]) -> Vec<TrackedObject> {
    fn visit(value: &Value, seen: &mut HashSet<String>, out: &mut Vec<TrackedObject>) {
        match value {
            Value::Object(obj) => {
                if seen.insert(obj.key()) {
                    out.push(obj.clone());
                    for child in obj.attributes().values() {
                        visit(child, seen, out);
                    }
                }
            }
            Value::Array(items) => items.iter().for_each(|item| visit(item, seen, out)),
            Value::Map(map) => map.values().for_each(|item| visit(item, seen, out)),
            _ => {}
        }
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for root in roots {
        visit(&Value::from(root), &mut seen, &mut out);
    }
    out
}

/// Rewrites offline pointers to `class_name:local_id` so they carry
/// `object_id`. Returns true if anything changed.
fn replace_local_pointer(
    value: &mut JsonValue,
    class_name: &str,
    local_id: &str,
    object_id: &str,
) -> bool {
    match value {
        JsonValue::Object(map) => {
            let is_target = map.get("__type").and_then(JsonValue::as_str) == Some("Pointer")
                && map.get("className").and_then(JsonValue::as_str) == Some(class_name)
                && map.get("_localId").and_then(JsonValue::as_str) == Some(local_id);
            if is_target {
                map.remove("_localId");
                map.insert("objectId".into(), JsonValue::String(object_id.to_string()));
                return true;
            }
            let mut changed = false;
            for item in map.values_mut() {
                changed |= replace_local_pointer(item, class_name, local_id, object_id);
            }
            changed
        }
        JsonValue::Array(items) => {
            let mut changed = false;
            for item in items {
                changed |= replace_local_pointer(item, class_name, local_id, object_id);
            }
            changed
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;

    fn datastore() -> (Context, Arc<MemoryStorage>, LocalDatastore) {
        let ctx = Context::new();
        let storage = Arc::new(MemoryStorage::new());
        let lds = LocalDatastore::new(ctx.clone(), storage.clone());
        (ctx, storage, lds)
    }

    #[test]
    fn pinning_stores_reachable_objects() {
        let (ctx, storage, lds) = datastore();
        let player = ctx.object_with_id("Player", "p1");
        player.set("name", "ada").unwrap();
        let score = ctx.object_with_id("Score", "s1");
        score.set("player", player.clone()).unwrap();

        lds.pin(&[score.clone()]).unwrap();

        assert_eq!(
            lds.pinned_keys(DEFAULT_PIN).unwrap(),
            vec![
                "entisync_lds_obj_Score_s1".to_string(),
                "entisync_lds_obj_Player_p1".to_string()
            ]
        );
        assert!(storage.get_item("entisync_lds_obj_Player_p1").unwrap().is_some());
        assert!(lds.is_pinned(&player).unwrap());
    }

    #[test]
    fn entries_live_while_any_pin_lists_them() {
        let (ctx, storage, lds) = datastore();
        let score = ctx.object_with_id("Score", "s1");
        lds.pin_with_name("a", &[score.clone()]).unwrap();
        lds.pin_with_name("b", &[score.clone()]).unwrap();

        lds.unpin_with_name("a", &[score.clone()]).unwrap();
        assert!(lds.is_pinned(&score).unwrap());
        assert!(storage.get_item(&LocalDatastore::pin_key("a")).unwrap().is_none());

        lds.unpin_all_with_name("b").unwrap();
        assert!(!lds.is_pinned(&score).unwrap());
        assert!(storage.is_empty());
    }

    #[test]
    fn fetch_local_restores_stored_data() {
        let (ctx, _storage, lds) = datastore();
        let score = ctx.object_with_id("Score", "s1");
        score.set("points", 4).unwrap();
        lds.pin(&[score.clone()]).unwrap();

        let other = ctx.object_with_id("Score", "s1");
        assert_eq!(other.get("points"), None);
        lds.fetch_local(&other).unwrap();
        assert_eq!(other.get("points"), Some(Value::Integer(4)));

        let missing = ctx.object_with_id("Score", "s2");
        assert!(matches!(lds.fetch_local(&missing), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn local_ids_move_to_server_ids() {
        let (ctx, storage, lds) = datastore();
        let player = ctx.object("Player");
        let local_id = player.local_id().unwrap();
        let score = ctx.object_with_id("Score", "s1");
        score.set("player", player.clone()).unwrap();
        lds.pin(&[score.clone()]).unwrap();

        player.set_id("p1");
        lds.update_local_id(&local_id, &player).unwrap();

        let keys = lds.pinned_keys(DEFAULT_PIN).unwrap();
        assert!(keys.contains(&"entisync_lds_obj_Player_p1".to_string()));
        assert!(!keys.iter().any(|k| k.contains(&local_id)));

        let raw = storage.get_item("entisync_lds_obj_Score_s1").unwrap().unwrap();
        assert!(raw.contains("\"objectId\":\"p1\""));
        assert!(!raw.contains(&local_id));
    }

    #[test]
    fn destroy_removes_entry_and_pin_reference() {
        let (ctx, _storage, lds) = datastore();
        let a = ctx.object_with_id("Score", "a");
        let b = ctx.object_with_id("Score", "b");
        lds.pin(&[a.clone(), b.clone()]).unwrap();

        lds.destroy_object_if_pinned(&a).unwrap();
        assert!(!lds.is_pinned(&a).unwrap());
        assert_eq!(
            lds.pinned_keys(DEFAULT_PIN).unwrap(),
            vec!["entisync_lds_obj_Score_b".to_string()]
        );
    }

    #[test]
    fn updates_only_touch_pinned_objects() {
        let (ctx, storage, lds) = datastore();
        let pinned = ctx.object_with_id("Score", "a");
        let loose = ctx.object_with_id("Score", "b");
        lds.pin(&[pinned.clone()]).unwrap();

        pinned.set("points", 9).unwrap();
        loose.set("points", 9).unwrap();
        lds.update_object_if_pinned(&pinned).unwrap();
        lds.update_object_if_pinned(&loose).unwrap();

        let raw = storage.get_item("entisync_lds_obj_Score_a").unwrap().unwrap();
        assert!(raw.contains("\"points\":9"));
        assert!(storage.get_item("entisync_lds_obj_Score_b").unwrap().is_none());
    }

    #[test]
    fn objects_of_class_pin_stay_apart_from_pins() {
        let (ctx, _storage, lds) = datastore();
        let marker = ctx.object_with_id("pin", "X");
        marker.set("label", "flag").unwrap();
        let score = ctx.object_with_id("Score", "s1");

        lds.pin(&[marker.clone()]).unwrap();
        lds.pin_with_name("X", &[score.clone()]).unwrap();

        assert_eq!(
            lds.pinned_keys("X").unwrap(),
            vec![LocalDatastore::object_key(&score)]
        );
        assert!(lds.is_pinned(&marker).unwrap());

        let found = lds.find_local(&Query::new("pin")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("label"), Some(Value::from("flag")));
    }

    #[test]
    fn corrupted_entries_are_reported() {
        let (ctx, storage, lds) = datastore();
        storage.set_item("entisync_lds_obj_Score_s1", "not json").unwrap();
        let obj = ctx.object_with_id("Score", "s1");
        assert!(matches!(
            lds.fetch_local(&obj),
            Err(StoreError::Corrupted { .. })
        ));
    }
}
