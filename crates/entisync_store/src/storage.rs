//! Storage collaborator trait.

use crate::error::StoreResult;

/// A string key-value store backing the local datastore.
///
/// Storage implementations are **opaque string stores**. They never interpret
/// the values they hold; the datastore owns the key layout and the JSON
/// inside each entry.
///
/// # Invariants
///
/// - `get_item` returns exactly the value last written by `set_item`
/// - `remove_item` of a missing key is not an error
/// - Implementations must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::MemoryStorage`] - For tests and ephemeral datastores
pub trait Storage: Send + Sync {
    /// Reads the value stored at `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get_item(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes `value` at `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn set_item(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Removes the value stored at `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn remove_item(&self, key: &str) -> StoreResult<()>;

    /// Lists every stored key.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn keys(&self) -> StoreResult<Vec<String>>;

    /// Removes every stored entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn clear(&self) -> StoreResult<()>;
}
