//! # EntiSync Engine
//!
//! Save, fetch and destroy orchestration for EntiSync.
//!
//! This crate provides:
//! - The [`Transport`] abstraction and a scripted [`MockTransport`]
//! - [`ClientConfig`] and the per-call option types
//! - [`Client`], which saves object graphs in batches, fetches and destroys
//!   objects, uploads files and keeps the local datastore in step
//!
//! ## Ordering
//!
//! Every save and fetch of an object runs its state-mutating part on the
//! object's task queue, so two saves of one object never interleave their
//! generation push and response commit. Requests themselves may overlap on
//! the wire. Across objects only batch order is guaranteed.
//!
//! Saves must run inside a Tokio runtime. Their queued parts are spawned so
//! that a dropped save future still commits or restores what it sent.
//!
//! ## Failure handling
//!
//! A failed save restores the edits it sent, so `dirty_keys()` keeps
//! reporting them. Connection failures are flagged by
//! `SyncError::is_connection_failure` for callers that retry later.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod destroy;
mod fetch;
mod save;
mod transport;

pub use client::Client;
pub use config::{ClientConfig, DestroyOptions, FetchOptions, SaveOptions};
pub use transport::{MockTransport, RecordedRequest, RequestOptions, RequestTask, Transport};
