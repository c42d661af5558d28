//! Key-value store trait definition.

use async_trait::async_trait;

use courier_common::Result;

/// Byte-oriented key-value storage.
///
/// Implementations must be safe to share across tasks and must handle
/// their own locking.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the store name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Read the value stored under `key`.
    ///
    /// # Returns
    /// `None` when nothing is stored under the key.
    ///
    /// # Errors
    /// - Store unreadable
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Postconditions
    /// - A subsequent `get(key)` returns exactly `value`
    ///
    /// # Errors
    /// - Store unwritable
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove the value stored under `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}
