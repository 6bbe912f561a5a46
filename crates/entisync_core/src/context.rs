//! Object construction context.

use crate::codec::{self, JsonMap, JsonValue};
use crate::error::{SyncError, SyncResult};
use crate::object::TrackedObject;
use crate::state::{
    SingleInstanceController, StateController, StateMode, StateStore, UniqueInstanceController,
};
use crate::value::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

struct ContextInner {
    single: Arc<SingleInstanceController>,
    unique: Arc<UniqueInstanceController>,
    single_instance: AtomicBool,
}

/// Registry scope for tracked objects.
///
/// A context owns one single-instance registry and one unique-instance
/// registry. Independent contexts never share state, so separate server
/// requests or tests can each use their own.
///
/// The single-instance toggle only affects objects constructed after it
/// changes. It is off by default.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Creates a context in unique-instance mode.
    pub fn new() -> Self {
        Self::with_single_instance(false)
    }

    /// Creates a context with the given sharing mode.
    pub fn with_single_instance(enabled: bool) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                single: Arc::new(SingleInstanceController::new()),
                unique: Arc::new(UniqueInstanceController::new()),
                single_instance: AtomicBool::new(enabled),
            }),
        }
    }

    /// Shares state between handles of one identity for objects constructed
    /// from now on.
    pub fn enable_single_instance(&self) {
        self.inner.single_instance.store(true, Ordering::SeqCst);
        debug!("single-instance mode enabled");
    }

    /// Gives objects constructed from now on their own state.
    pub fn disable_single_instance(&self) {
        self.inner.single_instance.store(false, Ordering::SeqCst);
        debug!("single-instance mode disabled");
    }

    /// Returns true in single-instance mode.
    pub fn is_single_instance(&self) -> bool {
        self.inner.single_instance.load(Ordering::SeqCst)
    }

    /// Returns the state store new objects are attached to.
    pub fn store(&self) -> StateStore {
        let controller: Arc<dyn StateController> = if self.is_single_instance() {
            self.inner.single.clone()
        } else {
            self.inner.unique.clone()
        };
        StateStore::new(controller)
    }

    /// Returns the store of the given mode.
    pub fn store_for(&self, mode: StateMode) -> StateStore {
        let controller: Arc<dyn StateController> = match mode {
            StateMode::SingleInstance => self.inner.single.clone(),
            StateMode::UniqueInstance => self.inner.unique.clone(),
        };
        StateStore::new(controller)
    }

    /// Creates a new, unsaved object.
    pub fn object(&self, class_name: &str) -> TrackedObject {
        TrackedObject::new(class_name, None, None, self.store())
    }

    /// Returns a handle to the saved object `class_name:id`.
    pub fn object_with_id(&self, class_name: &str, id: &str) -> TrackedObject {
        TrackedObject::new(class_name, Some(id.to_string()), None, self.store())
    }

    /// Returns a handle to the unsaved object known by `local_id`.
    pub fn object_with_local_id(&self, class_name: &str, local_id: &str) -> TrackedObject {
        TrackedObject::new(class_name, None, Some(local_id.to_string()), self.store())
    }

    /// Builds an object from its server JSON.
    ///
    /// The fields are committed as server data and the object is marked as
    /// existing when the JSON carries an `objectId`. With `override_data`, any
    /// server data already known for the identity is cleared first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClassName` if `class_name` is empty.
    pub fn object_from_json(
        &self,
        class_name: &str,
        json: &JsonMap,
        override_data: bool,
    ) -> SyncResult<TrackedObject> {
        if class_name.is_empty() {
            return Err(SyncError::InvalidClassName(
                "cannot create an object without a class name".into(),
            ));
        }

        let object_id = json.get("objectId").and_then(JsonValue::as_str);
        let local_id = json.get("_localId").and_then(JsonValue::as_str);
        let obj = match (object_id, local_id) {
            (Some(id), _) => self.object_with_id(class_name, id),
            (None, Some(local_id)) => self.object_with_local_id(class_name, local_id),
            (None, None) => self.object(class_name),
        };

        if override_data {
            obj.clear_server_data(None);
        }
        obj.finish_fetch(self, json);
        if object_id.is_some() {
            obj.set_existed(true);
        }
        Ok(obj)
    }

    /// Decodes a JSON wire value, resolving pointers through this context.
    pub fn decode(&self, json: &JsonValue) -> Value {
        codec::decode(self, json)
    }

    /// Removes every state record of both registries.
    pub fn clear_all_state(&self) {
        self.inner.single.clear_all_state();
        self.inner.unique.clear_all_state();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("single_instance", &self.is_single_instance())
            .field("single_records", &self.inner.single.len())
            .field("unique_records", &self.inner.unique.len())
            .finish()
    }
}
