//! # EntiSync Testkit
//!
//! Test utilities for EntiSync.
//!
//! This crate provides:
//! - [`MemoryServer`], an in-process server implementing the engine's
//!   `Transport`
//! - Fixtures that wire a client, a server and a local datastore together
//! - Property-based generators for attribute edits using proptest
//!
//! ## Usage
//!
//! ```rust,no_run
//! use entisync_engine::SaveOptions;
//! use entisync_testkit::prelude::*;
//!
//! # async fn demo() {
//! let env = TestClient::new();
//! let score = score(&env, "ada", 10);
//! env.save(&score, &SaveOptions::default()).await.unwrap();
//! assert_eq!(env.server.object_count("Score"), 1);
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::server::*;
}

pub use fixtures::*;
pub use generators::*;
pub use server::*;
