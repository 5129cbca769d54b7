//! Key-value store trait definition.

use crate::error::StorageResult;

/// A persistent key-value store for the lead cache.
///
/// Keys are ordered lexicographically; scans and key listings are returned in
/// key order so that paging by `offset`/`limit` is stable between calls as long
/// as the store is not modified in between.
///
/// # Invariants
///
/// - `get` returns exactly the value most recently passed to `set` for a key
/// - `scan(prefix, offset, limit)` never returns more than `limit` entries
/// - `flush` makes all previous writes durable (no-op for memory stores)
/// - Stores must be `Send + Sync` so a job can hand them across threads
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn set(&mut self, key: &str, value: String) -> StorageResult<()>;

    /// Removes `key`. Returns true if a value was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn delete(&mut self, key: &str) -> StorageResult<bool>;

    /// Returns up to `limit` entries whose key starts with `prefix`, skipping
    /// the first `offset` matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn scan(
        &self,
        prefix: &str,
        offset: usize,
        limit: usize,
    ) -> StorageResult<Vec<(String, String)>>;

    /// Counts the entries whose key starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn count(&self, prefix: &str) -> StorageResult<usize>;

    /// Removes every entry whose key starts with `prefix`.
    ///
    /// Returns the number of removed entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn delete_prefix(&mut self, prefix: &str) -> StorageResult<usize>;

    /// Flushes all pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;
}
