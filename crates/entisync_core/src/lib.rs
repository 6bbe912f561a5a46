//! # EntiSync Core
//!
//! Object state model for EntiSync.
//!
//! This crate provides:
//! - `Value` attribute values and their JSON wire form
//! - The operation algebra (`Op`) with apply and merge rules
//! - Per-object state records behind two interchangeable controllers
//!   (single-instance and unique-instance)
//! - A FIFO `TaskQueue` that serializes saves and fetches per object
//! - `TrackedObject`, the application-facing handle
//! - Unsaved-children traversal for building save graphs
//!
//! This crate performs no I/O. The save pipeline lives in `entisync_engine`.
//!
//! ## Key Invariants
//!
//! - Every state record has at least one pending-ops generation
//! - The observed value of an attribute is the server value folded through
//!   every pending generation in order
//! - Operations are immutable; merging always produces a new operation
//! - Tasks on one object's queue run strictly in enqueue order

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
mod context;
mod error;
mod object;
pub mod op;
pub mod state;
mod task_queue;
mod types;
mod unsaved;
mod value;

pub use context::Context;
pub use error::{codes, ObjectError, SyncError, SyncResult};
pub use object::{SaveParams, TrackedObject};
pub use op::{Op, RelationOp};
pub use state::{
    Attributes, ObjectState, OpMap, SingleInstanceController, StateController, StateMode,
    StateRef, StateStore, UniqueInstanceController,
};
pub use task_queue::TaskQueue;
pub use types::{generate_local_id, InstanceId, Method, ObjectIdentity};
pub use unsaved::{can_be_serialized, unsaved_children, Unsaved};
pub use value::{AttrOwner, FileRef, RelationParent, RelationRef, Value};
