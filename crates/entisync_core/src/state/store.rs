//! Record operations on top of a controller.

use super::{
    Attributes, Changes, ObjectState, OpMap, StateController, StateMode, StateRef,
};
use crate::op::Op;
use crate::types::ObjectIdentity;
use crate::value::{RelationParent, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// The object state store.
///
/// Wraps a [`StateController`] and exposes every record operation with the
/// same contract under both strategies. Readers fall back to empty defaults
/// when a record does not exist; writers create it.
#[derive(Debug, Clone)]
pub struct StateStore {
    controller: Arc<dyn StateController>,
}

impl StateStore {
    /// Creates a store over `controller`.
    pub fn new(controller: Arc<dyn StateController>) -> Self {
        Self { controller }
    }

    /// Returns the sharing strategy.
    pub fn mode(&self) -> StateMode {
        self.controller.mode()
    }

    /// Returns the underlying controller.
    pub fn controller(&self) -> &Arc<dyn StateController> {
        &self.controller
    }

    /// Returns the record of `identity`, if any.
    pub fn get_state(&self, identity: &ObjectIdentity) -> Option<StateRef> {
        self.controller.get_state(identity)
    }

    /// Returns the record of `identity`, creating it if needed.
    pub fn initialize_state(
        &self,
        identity: &ObjectIdentity,
        initial: Option<ObjectState>,
    ) -> StateRef {
        self.controller.initialize_state(identity, initial)
    }

    /// Removes the record of `identity`.
    pub fn remove_state(&self, identity: &ObjectIdentity) -> Option<StateRef> {
        self.controller.remove_state(identity)
    }

    /// Runs `f` on the locked record of `identity`, creating it if needed.
    pub fn with_state<R>(&self, identity: &ObjectIdentity, f: impl FnOnce(&mut ObjectState) -> R) -> R {
        let cell = self.initialize_state(identity, None);
        let mut state = cell.lock();
        f(&mut state)
    }

    fn read<R>(&self, identity: &ObjectIdentity, f: impl FnOnce(&ObjectState) -> R) -> Option<R> {
        let cell = self.get_state(identity)?;
        let state = cell.lock();
        Some(f(&state))
    }

    /// Returns a copy of the server snapshot.
    pub fn get_server_data(&self, identity: &ObjectIdentity) -> Attributes {
        self.read(identity, |s| s.server_data.clone()).unwrap_or_default()
    }

    /// Sets or, for `None` values, deletes server snapshot keys.
    pub fn set_server_data(&self, identity: &ObjectIdentity, attributes: Changes) {
        self.with_state(identity, |s| s.set_server_data(attributes));
    }

    /// Returns a copy of the pending-ops generations.
    pub fn get_pending_ops(&self, identity: &ObjectIdentity) -> Vec<OpMap> {
        self.read(identity, |s| s.pending_ops.clone())
            .unwrap_or_else(|| vec![OpMap::new()])
    }

    /// Writes `op` into the latest generation; `None` deletes the key.
    pub fn set_pending_op(&self, identity: &ObjectIdentity, key: &str, op: Option<Op>) {
        self.with_state(identity, |s| s.set_pending_op(key, op));
    }

    /// Appends an empty generation.
    pub fn push_pending_state(&self, identity: &ObjectIdentity) {
        self.with_state(identity, ObjectState::push_pending_state);
    }

    /// Removes and returns the oldest generation.
    pub fn pop_pending_state(&self, identity: &ObjectIdentity) -> OpMap {
        self.with_state(identity, ObjectState::pop_pending_state)
    }

    /// Folds generation 0 into generation 1.
    pub fn merge_first_pending_state(&self, identity: &ObjectIdentity) {
        self.with_state(identity, ObjectState::merge_first_pending_state);
    }

    /// Returns a copy of the object cache.
    pub fn get_object_cache(&self, identity: &ObjectIdentity) -> BTreeMap<String, String> {
        self.read(identity, |s| s.object_cache.clone())
            .unwrap_or_default()
    }

    /// Estimates one attribute.
    pub fn estimate_attribute(&self, identity: &ObjectIdentity, key: &str) -> Option<Value> {
        let parent = relation_parent(identity);
        self.read(identity, |s| s.estimate_attribute(key, parent.as_ref()))
            .flatten()
    }

    /// Estimates every attribute.
    pub fn estimate_attributes(&self, identity: &ObjectIdentity) -> Attributes {
        let parent = relation_parent(identity);
        self.read(identity, |s| s.estimate_attributes(parent.as_ref()))
            .unwrap_or_default()
    }

    /// Commits server changes into the snapshot and object cache.
    pub fn commit_server_changes(&self, identity: &ObjectIdentity, changes: Changes) {
        self.with_state(identity, |s| s.commit_server_changes(changes));
    }

    /// Enqueues `task` on the record's task queue.
    ///
    /// The queue position is taken immediately.
    pub fn enqueue_task<F, Fut, T>(
        &self,
        identity: &ObjectIdentity,
        task: F,
    ) -> impl Future<Output = T> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let cell = self.initialize_state(identity, None);
        cell.tasks().enqueue(task)
    }

    /// Deep-copies server data, pending ops, object cache and the `existed`
    /// flag from one record to another.
    pub fn duplicate_state(&self, source: &ObjectIdentity, dest: &ObjectIdentity) {
        let copied = self.initialize_state(source, None).snapshot();
        let target = self.initialize_state(dest, None);
        let mut state = target.lock();
        state.server_data = copied.server_data;
        state.pending_ops = copied.pending_ops;
        state.object_cache = copied.object_cache;
        state.existed = copied.existed;
    }

    /// Removes every record of the controller.
    pub fn clear_all_state(&self) {
        self.controller.clear_all_state();
    }
}

/// The parent relation ops bind to, known once the object has a server id.
pub(crate) fn relation_parent(identity: &ObjectIdentity) -> Option<RelationParent> {
    identity.object_id.as_ref().map(|id| RelationParent {
        class_name: identity.class_name.clone(),
        object_id: id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{SingleInstanceController, UniqueInstanceController};
    use crate::types::InstanceId;

    fn identity() -> ObjectIdentity {
        ObjectIdentity {
            class_name: "Score".into(),
            object_id: Some("s1".into()),
            local_id: None,
            instance: InstanceId::next(),
        }
    }

    fn stores() -> Vec<StateStore> {
        vec![
            StateStore::new(Arc::new(SingleInstanceController::new())),
            StateStore::new(Arc::new(UniqueInstanceController::new())),
        ]
    }

    #[test]
    fn readers_default_without_record() {
        for store in stores() {
            let id = identity();
            assert!(store.get_server_data(&id).is_empty());
            assert_eq!(store.get_pending_ops(&id), vec![OpMap::new()]);
            assert!(store.get_object_cache(&id).is_empty());
            assert_eq!(store.estimate_attribute(&id, "x"), None);
            assert!(store.get_state(&id).is_none());
        }
    }

    #[test]
    fn same_contract_under_both_strategies() {
        for store in stores() {
            let id = identity();
            let mut changes = Changes::new();
            changes.insert("x".into(), Some(Value::Integer(1)));
            store.commit_server_changes(&id, changes);

            store.set_pending_op(&id, "x", Some(Op::increment(2).unwrap()));
            store.push_pending_state(&id);
            store.set_pending_op(&id, "y", Some(Op::set("b")));
            assert_eq!(store.get_pending_ops(&id).len(), 2);

            let estimated = store.estimate_attributes(&id);
            assert_eq!(estimated["x"], Value::Integer(3));
            assert_eq!(estimated["y"], Value::from("b"));

            let popped = store.pop_pending_state(&id);
            assert!(popped.contains_key("x"));
            assert_eq!(store.estimate_attribute(&id, "x"), Some(Value::Integer(1)));

            store.clear_all_state();
            assert!(store.get_state(&id).is_none());
        }
    }

    #[test]
    fn duplicate_copies_everything() {
        let store = StateStore::new(Arc::new(UniqueInstanceController::new()));
        let source = identity();
        let dest = identity();

        store.with_state(&source, |s| {
            s.existed = true;
            s.set_pending_op("a", Some(Op::set(1)));
            s.push_pending_state();
            s.set_pending_op("b", Some(Op::set(2)));
        });
        store.duplicate_state(&source, &dest);

        let copy = store.get_state(&dest).unwrap().snapshot();
        assert!(copy.existed);
        assert_eq!(copy.pending_ops.len(), 2);

        store.set_pending_op(&dest, "c", Some(Op::set(3)));
        assert!(!store.get_pending_ops(&source)[1].contains_key("c"));
    }

    #[tokio::test]
    async fn enqueue_task_runs_on_record_queue() {
        let store = StateStore::new(Arc::new(UniqueInstanceController::new()));
        let id = identity();
        let out = store.enqueue_task(&id, || async { 42 }).await;
        assert_eq!(out, 42);
    }
}
