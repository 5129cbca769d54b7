//! # leadsync storage
//!
//! Key-value storage backends for the leadsync lead cache.
//!
//! Backends are **opaque string stores**. They keep `key -> value` pairs in
//! key order and offer paged scans by prefix. The lead cache owns the value
//! format (JSON) and the key layout; backends never interpret either.
//!
//! ## Available Backends
//!
//! - [`InMemoryStore`] - For testing and dry runs
//! - [`FileStore`] - A single JSON document on disk, replaced atomically on flush
//!
//! ## Example
//!
//! ```rust
//! use leadsync_storage::{InMemoryStore, KeyValueStore};
//!
//! let mut store = InMemoryStore::new();
//! store.set("lead/17", "{}".to_string()).unwrap();
//! assert_eq!(store.get("lead/17").unwrap().as_deref(), Some("{}"));
//! assert_eq!(store.count("lead/").unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::KeyValueStore;
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
