//! Unique-instance state controller.

use super::{ObjectState, StateCell, StateController, StateMode, StateRef};
use crate::types::{InstanceId, ObjectIdentity};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Gives every in-memory instance its own record.
///
/// Two instances with the same server id stay independent. A record lives
/// until its instance is dropped.
#[derive(Debug, Default)]
pub struct UniqueInstanceController {
    states: Mutex<HashMap<InstanceId, StateRef>>,
}

impl UniqueInstanceController {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateController for UniqueInstanceController {
    fn mode(&self) -> StateMode {
        StateMode::UniqueInstance
    }

    fn get_state(&self, identity: &ObjectIdentity) -> Option<StateRef> {
        self.states.lock().get(&identity.instance).cloned()
    }

    fn initialize_state(
        &self,
        identity: &ObjectIdentity,
        initial: Option<ObjectState>,
    ) -> StateRef {
        let mut states = self.states.lock();
        Arc::clone(
            states
                .entry(identity.instance)
                .or_insert_with(|| Arc::new(StateCell::new(initial.unwrap_or_default()))),
        )
    }

    fn adopt_state(&self, identity: &ObjectIdentity, state: StateRef) {
        let replaced = self.states.lock().insert(identity.instance, state);
        drop(replaced);
    }

    fn remove_state(&self, identity: &ObjectIdentity) -> Option<StateRef> {
        self.states.lock().remove(&identity.instance)
    }

    fn release(&self, identity: &ObjectIdentity) {
        let released = self.remove_state(identity);
        if released.is_some() {
            trace!(instance = identity.instance.as_u64(), "released state record");
        }
    }

    fn clear_all_state(&self) {
        let drained = std::mem::take(&mut *self.states.lock());
        drop(drained);
    }

    fn len(&self) -> usize {
        self.states.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::Op;

    fn identity(id: &str) -> ObjectIdentity {
        ObjectIdentity {
            class_name: "Score".into(),
            object_id: Some(id.into()),
            local_id: None,
            instance: InstanceId::next(),
        }
    }

    #[test]
    fn instances_are_independent() {
        let controller = UniqueInstanceController::new();
        let a = identity("s1");
        let b = identity("s1");

        controller
            .initialize_state(&a, None)
            .lock()
            .set_pending_op("points", Some(Op::set(3)));
        assert!(controller.get_state(&b).is_none());
        assert!(controller.initialize_state(&b, None).lock().latest().is_empty());
        assert_eq!(controller.len(), 2);
    }

    #[test]
    fn release_drops_the_record() {
        let controller = UniqueInstanceController::new();
        let id = identity("s1");
        controller.initialize_state(&id, None);
        controller.release(&id);
        assert!(controller.get_state(&id).is_none());
        assert!(controller.is_empty());
    }
}
