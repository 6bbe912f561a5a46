//! # EntiSync Store
//!
//! Local storage, pinning and offline queries for EntiSync.
//!
//! This crate provides:
//! - The [`Storage`] collaborator trait and an in-memory implementation
//! - A [`Query`] builder over the server's constraint language
//! - An offline evaluator for those queries
//! - The [`LocalDatastore`], which pins objects and answers queries offline
//!
//! ## Example
//!
//! ```rust
//! use entisync_core::Context;
//! use entisync_store::{LocalDatastore, MemoryStorage, Query};
//! use std::sync::Arc;
//!
//! let ctx = Context::new();
//! let lds = LocalDatastore::new(ctx.clone(), Arc::new(MemoryStorage::new()));
//!
//! let score = ctx.object_with_id("Score", "s1");
//! score.set("points", 12).unwrap();
//! lds.pin(&[score]).unwrap();
//!
//! let found = lds.find_local(&Query::new("Score").greater_than("points", 10)).unwrap();
//! assert_eq!(found.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod datastore;
mod error;
mod matcher;
mod memory;
mod query;
mod storage;

pub use datastore::{LocalDatastore, DEFAULT_PIN, OBJECT_PREFIX, PIN_PREFIX};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStorage;
pub use query::Query;
pub use storage::Storage;
