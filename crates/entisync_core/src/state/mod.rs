//! Object state records.
//!
//! Each tracked identity has one [`ObjectState`]: the last server snapshot,
//! a stack of pending-ops generations, the object cache used to detect deep
//! edits of compound values, and the `existed` flag. Records live behind a
//! [`StateController`], which decides how objects map onto records.
//!
//! The observed value of an attribute is always
//! `fold(server_data[attr], pending_ops[0][attr], pending_ops[1][attr], …)`.

mod controller;
mod single;
mod store;
mod unique;

pub use controller::{StateController, StateMode};
pub use single::SingleInstanceController;
pub use store::StateStore;
pub(crate) use store::relation_parent;
pub use unique::UniqueInstanceController;

use crate::codec::{self, PointerMode};
use crate::op::Op;
use crate::task_queue::TaskQueue;
use crate::value::{AttrOwner, RelationParent, Value};
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Attribute values by key.
pub type Attributes = BTreeMap<String, Value>;

/// One pending-ops generation: operations by attribute key.
pub type OpMap = BTreeMap<String, Op>;

/// Attribute changes; `None` deletes the key.
pub type Changes = BTreeMap<String, Option<Value>>;

/// The mutable state of one tracked identity.
#[derive(Debug, Clone)]
pub struct ObjectState {
    /// Last authoritative server snapshot.
    pub server_data: Attributes,
    /// Pending-ops generations, oldest first. Never empty.
    pub pending_ops: Vec<OpMap>,
    /// Serialized form of every committed compound attribute.
    pub object_cache: BTreeMap<String, String>,
    /// Whether the object is known to exist on the server.
    pub existed: bool,
}

impl Default for ObjectState {
    fn default() -> Self {
        Self {
            server_data: Attributes::new(),
            pending_ops: vec![OpMap::new()],
            object_cache: BTreeMap::new(),
            existed: false,
        }
    }
}

impl ObjectState {
    /// Creates an empty record with one empty generation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets or, for `None` values, deletes each top-level key of the server
    /// snapshot.
    pub fn set_server_data(&mut self, attributes: Changes) {
        for (key, value) in attributes {
            match value {
                Some(value) => {
                    self.server_data.insert(key, value);
                }
                None => {
                    self.server_data.remove(&key);
                }
            }
        }
    }

    /// Writes `op` into the latest generation; `None` deletes the key.
    pub fn set_pending_op(&mut self, key: &str, op: Option<Op>) {
        let latest = self.latest_mut();
        match op {
            Some(op) => {
                latest.insert(key.to_string(), op);
            }
            None => {
                latest.remove(key);
            }
        }
    }

    /// Returns the latest generation.
    pub fn latest(&self) -> &OpMap {
        static EMPTY: OpMap = OpMap::new();
        self.pending_ops.last().unwrap_or(&EMPTY)
    }

    fn latest_mut(&mut self) -> &mut OpMap {
        if self.pending_ops.is_empty() {
            self.pending_ops.push(OpMap::new());
        }
        let last = self.pending_ops.len() - 1;
        &mut self.pending_ops[last]
    }

    /// Appends a new empty generation. Called when a save begins.
    pub fn push_pending_state(&mut self) {
        self.pending_ops.push(OpMap::new());
        debug!(generations = self.pending_ops.len(), "pushed pending state");
    }

    /// Removes and returns the oldest generation.
    ///
    /// The stack is reinitialized with one empty generation when it empties.
    pub fn pop_pending_state(&mut self) -> OpMap {
        let first = if self.pending_ops.is_empty() {
            OpMap::new()
        } else {
            self.pending_ops.remove(0)
        };
        if self.pending_ops.is_empty() {
            self.pending_ops.push(OpMap::new());
        }
        debug!(
            popped = first.len(),
            generations = self.pending_ops.len(),
            "popped pending state"
        );
        first
    }

    /// Folds generation 0 back into generation 1 and drops generation 0.
    ///
    /// Used when a save fails: the edits it carried survive as if the save
    /// never started. Each generation-1 op merges onto the generation-0 op of
    /// the same key; if that merge is impossible the newer op is kept.
    pub fn merge_first_pending_state(&mut self) {
        let first = self.pop_pending_state();
        let next = &mut self.pending_ops[0];
        for (key, op) in first {
            match next.remove(&key) {
                Some(newer) => match newer.merge_with(Some(&op)) {
                    Ok(merged) => {
                        next.insert(key, merged);
                    }
                    Err(err) => {
                        warn!(%key, error = %err, "dropping restored op that no longer merges");
                        next.insert(key, newer);
                    }
                },
                None => {
                    next.insert(key, op);
                }
            }
        }
        debug!(generations = self.pending_ops.len(), "merged first pending state");
    }

    /// Estimates one attribute by folding the server value through every
    /// generation's op on exactly that key.
    ///
    /// Relation ops are only applied when `parent` is known.
    pub fn estimate_attribute(&self, key: &str, parent: Option<&RelationParent>) -> Option<Value> {
        let mut value = self.server_data.get(key).cloned();
        for generation in &self.pending_ops {
            let Some(op) = generation.get(key) else {
                continue;
            };
            if let Some(next) = apply_estimated(op, key, value.as_ref(), parent) {
                value = next;
            }
        }
        value
    }

    /// Estimates every attribute.
    ///
    /// Dotted keys are applied as nested sets into maps.
    pub fn estimate_attributes(&self, parent: Option<&RelationParent>) -> Attributes {
        let mut data = self.server_data.clone();
        for generation in &self.pending_ops {
            for (key, op) in generation {
                if key.contains('.') && !op.is_relation() {
                    let current = nested_get(&data, key);
                    if let Some(next) = apply_estimated(op, key, current, parent) {
                        nested_set(&mut data, key, next);
                    }
                    continue;
                }
                if let Some(next) = apply_estimated(op, key, data.get(key), parent) {
                    match next {
                        Some(value) => {
                            data.insert(key.clone(), value);
                        }
                        None => {
                            data.remove(key);
                        }
                    }
                }
            }
        }
        data
    }

    /// Merges `changes` into the server snapshot.
    ///
    /// Keys are applied with dot-notation nested sets. Compound values are
    /// snapshotted into the object cache.
    pub fn commit_server_changes(&mut self, changes: Changes) {
        for (key, value) in changes {
            match value.as_ref().and_then(cache_entry) {
                Some(serialized) => {
                    self.object_cache.insert(key.clone(), serialized);
                }
                None => {
                    self.object_cache.remove(&key);
                }
            }
            nested_set(&mut self.server_data, &key, value);
        }
    }

    /// Returns the compound attributes of `estimated` whose serialized form
    /// differs from the object cache.
    pub fn dirty_objects(&self, estimated: &Attributes) -> Attributes {
        estimated
            .iter()
            .filter(|(_, value)| value.is_compound())
            .filter(|(key, value)| {
                cache_entry(value).as_deref() != self.object_cache.get(key.as_str()).map(String::as_str)
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Returns true if any generation has an op on `key`.
    pub fn has_pending_op(&self, key: &str) -> bool {
        self.pending_ops.iter().any(|generation| generation.contains_key(key))
    }
}

/// Applies one op during estimation.
///
/// Returns `None` when the op is skipped, `Some(next)` otherwise.
fn apply_estimated(
    op: &Op,
    key: &str,
    value: Option<&Value>,
    parent: Option<&RelationParent>,
) -> Option<Option<Value>> {
    let owner = match (op.is_relation(), parent) {
        (true, None) => return None,
        (true, Some(parent)) => Some(AttrOwner {
            parent: parent.clone(),
            key: key.to_string(),
        }),
        (false, _) => None,
    };
    match op.apply_to(value, owner.as_ref()) {
        Ok(next) => Some(next),
        Err(err) => {
            warn!(key, op = op.kind(), error = %err, "skipping op that no longer applies");
            None
        }
    }
}

fn cache_entry(value: &Value) -> Option<String> {
    if !value.is_compound() {
        return None;
    }
    let json = codec::encode(value, PointerMode::Offline).ok()?;
    serde_json::to_string(&json).ok()
}

pub(crate) fn nested_get<'a>(data: &'a Attributes, path: &str) -> Option<&'a Value> {
    let mut fields = path.split('.');
    let mut current = data.get(fields.next()?)?;
    for field in fields {
        current = current.as_map()?.get(field)?;
    }
    Some(current)
}

/// Sets `path` inside `data`, creating intermediate maps. `None` deletes the
/// final key.
pub(crate) fn nested_set(data: &mut Attributes, path: &str, value: Option<Value>) {
    let fields: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = fields.split_last() else {
        return;
    };

    let mut cursor = data;
    for field in parents {
        let entry = cursor
            .entry((*field).to_string())
            .or_insert_with(|| Value::Map(BTreeMap::new()));
        if !matches!(entry, Value::Map(_)) {
            *entry = Value::Map(BTreeMap::new());
        }
        let Value::Map(map) = entry else {
            return;
        };
        cursor = map;
    }

    match value {
        Some(value) => {
            cursor.insert((*last).to_string(), value);
        }
        None => {
            cursor.remove(*last);
        }
    }
}

/// A shared state record and its task queue.
#[derive(Debug, Default)]
pub struct StateCell {
    state: Mutex<ObjectState>,
    tasks: TaskQueue,
}

impl StateCell {
    /// Wraps a record.
    pub fn new(state: ObjectState) -> Self {
        Self {
            state: Mutex::new(state),
            tasks: TaskQueue::new(),
        }
    }

    /// Locks the record. Never hold the guard across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, ObjectState> {
        self.state.lock()
    }

    /// Returns a copy of the record.
    pub fn snapshot(&self) -> ObjectState {
        self.state.lock().clone()
    }

    /// Returns the record's task queue.
    pub fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }
}

/// Shared handle to a state record.
pub type StateRef = Arc<StateCell>;
