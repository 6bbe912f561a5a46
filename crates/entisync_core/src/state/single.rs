//! Single-instance state controller.

use super::{ObjectState, StateCell, StateController, StateMode, StateRef};
use crate::types::ObjectIdentity;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Shares one record between every handle of a `class:id` identity.
///
/// Before a server id is assigned the local id stands in, so the record is
/// re-keyed through [`StateController::adopt_state`] when the id arrives.
#[derive(Debug, Default)]
pub struct SingleInstanceController {
    states: Mutex<HashMap<String, StateRef>>,
}

impl SingleInstanceController {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateController for SingleInstanceController {
    fn mode(&self) -> StateMode {
        StateMode::SingleInstance
    }

    fn get_state(&self, identity: &ObjectIdentity) -> Option<StateRef> {
        self.states.lock().get(&identity.key()).cloned()
    }

    fn initialize_state(
        &self,
        identity: &ObjectIdentity,
        initial: Option<ObjectState>,
    ) -> StateRef {
        let mut states = self.states.lock();
        Arc::clone(
            states
                .entry(identity.key())
                .or_insert_with(|| Arc::new(StateCell::new(initial.unwrap_or_default()))),
        )
    }

    fn adopt_state(&self, identity: &ObjectIdentity, state: StateRef) {
        let key = identity.key();
        debug!(%key, "adopting state record");
        let replaced = self.states.lock().insert(key, state);
        drop(replaced);
    }

    fn remove_state(&self, identity: &ObjectIdentity) -> Option<StateRef> {
        self.states.lock().remove(&identity.key())
    }

    fn release(&self, _identity: &ObjectIdentity) {
        // Records outlive handles; they go away through `remove_state` or
        // `clear_all_state`.
    }

    fn clear_all_state(&self) {
        let drained = std::mem::take(&mut *self.states.lock());
        debug!(records = drained.len(), "cleared single-instance state");
        drop(drained);
    }

    fn len(&self) -> usize {
        self.states.lock().len()
    }
}
