//! Test fixtures.
//!
//! Provides a client wired to a [`MemoryServer`] and a memory-backed local
//! datastore, plus builders for the objects most tests use.

use crate::server::MemoryServer;
use entisync_core::TrackedObject;
use entisync_engine::{Client, ClientConfig};
use entisync_store::MemoryStorage;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// A client talking to its own in-memory server.
#[derive(Debug, Clone)]
pub struct TestClient {
    /// The client under test.
    pub client: Client,
    /// The server behind it.
    pub server: Arc<MemoryServer>,
    /// The local datastore's storage.
    pub storage: Arc<MemoryStorage>,
}

impl TestClient {
    /// Creates a client with the default configuration and a local
    /// datastore.
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// Creates a client with `config` and a local datastore.
    pub fn with_config(config: ClientConfig) -> Self {
        let server = Arc::new(MemoryServer::with_server_path(config.server_path.clone()));
        Self::connected_to(server, config)
    }

    /// Creates another client of the same server, with its own context and
    /// local datastore.
    pub fn second_device(&self) -> Self {
        Self::connected_to(self.server.clone(), self.client.config().clone())
    }

    fn connected_to(server: Arc<MemoryServer>, config: ClientConfig) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let client = Client::new(config, server.clone()).with_local_datastore(storage.clone());
        Self {
            client,
            server,
            storage,
        }
    }
}

impl Default for TestClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

/// Creates an unsaved `Score` with a player name and points.
pub fn score(client: &Client, player: &str, points: i64) -> TrackedObject {
    let obj = client.object("Score");
    // Setting plain values on a fresh object cannot fail.
    let _ = obj.set("player", player);
    let _ = obj.set("points", points);
    obj
}

/// Installs a test-friendly tracing subscriber.
///
/// Honors `RUST_LOG`. Safe to call from every test; only the first call
/// installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
