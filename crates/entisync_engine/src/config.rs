//! Client and per-call configuration.

use crate::transport::RequestTask;
use std::time::Duration;

/// Configuration for a [`crate::Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Path prefix of sub-requests inside a batch.
    pub server_path: String,
    /// Objects per batch request. `0` means unbounded.
    pub batch_size: usize,
    /// Whether handles of one identity share state.
    pub single_instance: bool,
    /// Whether the caller assigns object ids before the first save.
    pub allow_custom_object_id: bool,
    /// Request timeout.
    pub timeout: Duration,
}

impl ClientConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            server_path: "/1/".into(),
            batch_size: 20,
            single_instance: false,
            allow_custom_object_id: false,
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the batch sub-request path prefix.
    pub fn with_server_path(mut self, path: impl Into<String>) -> Self {
        self.server_path = path.into();
        self
    }

    /// Sets the default batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Enables or disables single-instance state sharing.
    pub fn with_single_instance(mut self, enabled: bool) -> Self {
        self.single_instance = enabled;
        self
    }

    /// Allows or forbids caller-assigned object ids.
    pub fn with_allow_custom_object_id(mut self, allowed: bool) -> Self {
        self.allow_custom_object_id = allowed;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Options of a save.
#[derive(Debug, Clone)]
pub struct SaveOptions {
    /// Objects per batch request, overriding the client default.
    pub batch_size: Option<usize>,
    /// Save every object in one atomic batch.
    pub transaction: bool,
    /// Save unsaved children before the object itself.
    pub cascade_save: bool,
    /// Abort handle for the requests of this save.
    pub task: Option<RequestTask>,
}

impl SaveOptions {
    /// Creates the default options.
    pub fn new() -> Self {
        Self {
            batch_size: None,
            transaction: false,
            cascade_save: true,
            task: None,
        }
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Saves in one atomic batch.
    pub fn with_transaction(mut self, transaction: bool) -> Self {
        self.transaction = transaction;
        self
    }

    /// Enables or disables saving unsaved children first.
    pub fn with_cascade_save(mut self, cascade: bool) -> Self {
        self.cascade_save = cascade;
        self
    }

    /// Attaches an abort handle.
    pub fn with_task(mut self, task: RequestTask) -> Self {
        self.task = Some(task);
        self
    }
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Options of a fetch.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Fetch only these keys.
    pub keys: Option<Vec<String>>,
    /// Pointer keys whose targets the server should embed.
    pub include: Vec<String>,
    /// For `fetch_all`: refetch objects whose data is already available and
    /// fail if any object is missing on the server.
    pub force: bool,
    /// Abort handle for the request.
    pub task: Option<RequestTask>,
}

impl FetchOptions {
    /// Creates the default options.
    pub fn new() -> Self {
        Self {
            keys: None,
            include: Vec::new(),
            force: true,
            task: None,
        }
    }

    /// Fetches only `keys`.
    pub fn with_keys(mut self, keys: &[&str]) -> Self {
        self.keys = Some(keys.iter().map(|k| k.to_string()).collect());
        self
    }

    /// Embeds the targets of the pointer keys `keys`.
    pub fn with_include(mut self, keys: &[&str]) -> Self {
        self.include.extend(keys.iter().map(|k| k.to_string()));
        self
    }

    /// Sets the force flag.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Attaches an abort handle.
    pub fn with_task(mut self, task: RequestTask) -> Self {
        self.task = Some(task);
        self
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Options of a destroy.
#[derive(Debug, Clone, Default)]
pub struct DestroyOptions {
    /// Objects per batch request, overriding the client default.
    pub batch_size: Option<usize>,
    /// Destroy every object in one atomic batch.
    pub transaction: bool,
    /// Abort handle for the requests.
    pub task: Option<RequestTask>,
}

impl DestroyOptions {
    /// Creates the default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Destroys in one atomic batch.
    pub fn with_transaction(mut self, transaction: bool) -> Self {
        self.transaction = transaction;
        self
    }

    /// Attaches an abort handle.
    pub fn with_task(mut self, task: RequestTask) -> Self {
        self.task = Some(task);
        self
    }
}

/// Resolves the effective batch size. `None` means unbounded.
pub(crate) fn effective_batch_size(
    requested: Option<usize>,
    default: usize,
    transaction: bool,
) -> Option<usize> {
    if transaction {
        return None;
    }
    match requested.unwrap_or(default) {
        0 => None,
        n => Some(n),
    }
}
