//! File-based key-value store for persistent storage.

use crate::backend::KeyValueStore;
use crate::error::{StorageError, StorageResult};
use crate::memory::{remove_prefix, scan_map};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// A file-based key-value store.
///
/// The whole store is held in memory and persisted as one JSON object. Writes
/// mark the store dirty; [`KeyValueStore::flush`] writes the document to a
/// temporary file in the same directory and renames it over the target, so a
/// crash leaves either the old or the new document, never a partial one.
///
/// # Example
///
/// ```no_run
/// use leadsync_storage::{KeyValueStore, FileStore};
/// use std::path::Path;
///
/// let mut store = FileStore::open(Path::new("lead-cache.json")).unwrap();
/// store.set("meta/last_refresh", "2024-01-01 00:00:00".into()).unwrap();
/// store.flush().unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
    dirty: bool,
}

impl FileStore {
    /// Opens the store at `path`, creating an empty one if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or is not a
    /// JSON object of string values.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw).map_err(|e| {
                    StorageError::Corrupted(format!("{}: {}", path.display(), e))
                })?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
            dirty: false,
        })
    }

    /// Opens the store, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot be read.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if there are writes that have not been flushed.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> StorageResult<()> {
        self.entries.write().insert(key.to_string(), value);
        self.dirty = true;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> StorageResult<bool> {
        let removed = self.entries.write().remove(key).is_some();
        self.dirty |= removed;
        Ok(removed)
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
        let removed = remove_prefix(&mut self.entries.write(), prefix);
        self.dirty |= removed > 0;
        Ok(removed)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if !self.dirty {
            return Ok(());
        }

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer(&mut tmp, &*self.entries.read())?;
        tmp.as_file_mut().flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StorageError::Io(e.error))?;

        self.dirty = false;
        Ok(())
    }
}
