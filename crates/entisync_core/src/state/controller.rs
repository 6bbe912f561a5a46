//! State controller trait.

use super::{ObjectState, StateRef};
use crate::types::ObjectIdentity;
use std::fmt;

/// How tracked objects map onto state records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateMode {
    /// All handles of one `class:id` share a record.
    SingleInstance,
    /// Every in-memory instance owns its record.
    UniqueInstance,
}

/// Registry of state records.
///
/// Implementations differ only in how an [`ObjectIdentity`] is keyed; the
/// record operations built on top (see [`super::StateStore`]) share one
/// contract.
///
/// Implementations must not drop removed records while holding their own
/// lock: a record can hold the last handle of another object, whose drop
/// calls back into the controller.
pub trait StateController: Send + Sync + fmt::Debug {
    /// Returns the sharing strategy.
    fn mode(&self) -> StateMode;

    /// Returns the record of `identity`, if one exists.
    fn get_state(&self, identity: &ObjectIdentity) -> Option<StateRef>;

    /// Returns the record of `identity`, creating it from `initial` (or empty)
    /// if none exists. An existing record is returned unchanged.
    fn initialize_state(&self, identity: &ObjectIdentity, initial: Option<ObjectState>)
        -> StateRef;

    /// Stores an existing record under `identity`, replacing any other.
    ///
    /// Used when an object's id migrates: the in-flight record, including its
    /// task queue, moves to the new key.
    fn adopt_state(&self, identity: &ObjectIdentity, state: StateRef);

    /// Removes and returns the record of `identity`.
    fn remove_state(&self, identity: &ObjectIdentity) -> Option<StateRef>;

    /// Called when the last handle of an object instance is dropped.
    fn release(&self, identity: &ObjectIdentity);

    /// Removes every record.
    fn clear_all_state(&self);

    /// Returns the number of records.
    fn len(&self) -> usize;

    /// Returns true if there are no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
