//! In-memory key-value store for testing.

use crate::backend::KeyValueStore;
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory key-value store.
///
/// This store keeps all entries in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Dry runs that must not touch the persisted cache
///
/// # Example
///
/// ```rust
/// use leadsync_storage::{KeyValueStore, InMemoryStore};
///
/// let mut store = InMemoryStore::new();
/// store.set("a", "1".into()).unwrap();
/// store.set("b", "2".into()).unwrap();
/// assert_eq!(store.scan("", 1, 10).unwrap(), vec![("b".to_string(), "2".to_string())]);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with pre-existing entries.
    #[must_use]
    pub fn with_entries(entries: BTreeMap<String, String>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Returns a copy of all entries.
    #[must_use]
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.entries.read().clone()
    }
}

pub(crate) fn scan_map(
    map: &BTreeMap<String, String>,
    prefix: &str,
    offset: usize,
    limit: usize,
) -> Vec<(String, String)> {
    map.range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .skip(offset)
        .take(limit)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

pub(crate) fn remove_prefix(map: &mut BTreeMap<String, String>, prefix: &str) -> usize {
    let doomed: Vec<String> = map
        .range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, _)| k.clone())
        .collect();
    for key in &doomed {
        map.remove(key);
    }
    doomed.len()
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> StorageResult<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> StorageResult<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn scan(
        &self,
        prefix: &str,
        offset: usize,
        limit: usize,
    ) -> StorageResult<Vec<(String, String)>> {
        Ok(scan_map(&self.entries.read(), prefix, offset, limit))
    }

    fn count(&self, prefix: &str) -> StorageResult<usize> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .count())
    }

    fn delete_prefix(&mut self, prefix: &str) -> StorageResult<usize> {
        Ok(remove_prefix(&mut self.entries.write(), prefix))
    }

    fn flush(&mut self) -> StorageResult<()> {
        // Nothing is buffered
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> InMemoryStore {
        let mut store = InMemoryStore::new();
        for (k, v) in [("lead/1", "a"), ("lead/2", "b"), ("lead/3", "c"), ("meta/x", "m")] {
            store.set(k, v.to_string()).unwrap();
        }
        store
    }

    #[test]
    fn memory_new_is_empty() {
        let store = InMemoryStore::new();
        assert_eq!(store.count("").unwrap(), 0);
        assert!(store.entries().is_empty());
    }

    #[test]
    fn memory_set_overwrites() {
        let mut store = InMemoryStore::new();
        store.set("k", "1".into()).unwrap();
        store.set("k", "2".into()).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("2"));
        assert_eq!(store.count("").unwrap(), 1);
    }

    #[test]
    fn memory_scan_respects_prefix_and_paging() {
        let store = seeded();
        let page = store.scan("lead/", 0, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].0, "lead/1");

        let page = store.scan("lead/", 2, 2).unwrap();
        assert_eq!(page, vec![("lead/3".to_string(), "c".to_string())]);

        assert!(store.scan("lead/", 3, 2).unwrap().is_empty());
    }

    #[test]
    fn memory_count_by_prefix() {
        let store = seeded();
        assert_eq!(store.count("lead/").unwrap(), 3);
        assert_eq!(store.count("meta/").unwrap(), 1);
        assert_eq!(store.count("none/").unwrap(), 0);
    }

    #[test]
    fn memory_delete() {
        let mut store = seeded();
        assert!(store.delete("lead/2").unwrap());
        assert!(!store.delete("lead/2").unwrap());
        assert_eq!(store.get("lead/2").unwrap(), None);
    }

    #[test]
    fn memory_delete_prefix_leaves_other_keys() {
        let mut store = seeded();
        assert_eq!(store.delete_prefix("lead/").unwrap(), 3);
        assert_eq!(store.count("").unwrap(), 1);
        assert!(store.get("meta/x").unwrap().is_some());
    }

    #[test]
    fn memory_flush_succeeds() {
        let mut store = seeded();
        assert!(store.flush().is_ok());
    }
}
