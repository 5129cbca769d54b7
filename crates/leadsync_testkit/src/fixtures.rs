//! Test fixtures and job helpers.
//!
//! Provides builders for contacts and leads and a harness wiring a sync job
//! to an in-memory remote store whose clock drives the job.

use leadsync_engine::{LeadCache, LeadSyncJob, MemoryRemoteStore, SyncConfig, SyncMode};
use leadsync_protocol::{LeadRecord, LeadStatus, RemoteId, SourceContact};
use leadsync_storage::{FileStore, InMemoryStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// An active source contact.
pub fn contact(foreign_key: &str, email: &str) -> SourceContact {
    SourceContact::new(foreign_key, email)
}

/// A lead as the remote store would hold it: active, `contact` status.
pub fn remote_lead(id: u64, foreign_key: &str, email: &str) -> LeadRecord {
    LeadRecord {
        id: Some(RemoteId::from(id)),
        foreign_key: Some(foreign_key.to_string()),
        email: Some(email.to_string()),
        active: Some(true),
        status: Some(LeadStatus::Contact),
        ..LeadRecord::default()
    }
}

/// A lead without remote id, for seeding a [`MemoryRemoteStore`].
pub fn new_lead(foreign_key: &str, email: &str) -> LeadRecord {
    LeadRecord {
        id: None,
        ..remote_lead(0, foreign_key, email)
    }
}

/// A configuration suited to tests: no pauses between calls or checks.
pub fn test_config() -> SyncConfig {
    SyncConfig::default()
        .with_dispatch_delay(Duration::ZERO)
        .with_post_check(1, Duration::ZERO)
}

/// A cache over an in-memory store holding `leads`.
pub fn cache_with(leads: Vec<LeadRecord>) -> LeadCache<InMemoryStore> {
    let mut cache = LeadCache::open(InMemoryStore::new(), 100).expect("Failed to open cache");
    for lead in leads {
        cache.put(lead).expect("Failed to cache lead");
    }
    cache
}

/// A sync job against an in-memory remote store.
pub struct TestHarness {
    /// The remote store, shared with the job.
    pub remote: Arc<MemoryRemoteStore>,
    /// The job. Its clock reads the remote store's clock.
    pub job: LeadSyncJob<MemoryRemoteStore, InMemoryStore>,
}

impl TestHarness {
    /// Creates a harness with an empty remote and cache.
    pub fn new(config: SyncConfig) -> Self {
        Self::with_store(Arc::new(MemoryRemoteStore::new()), InMemoryStore::new(), config)
    }

    /// Creates a harness over an existing remote and cache store.
    pub fn with_store(
        remote: Arc<MemoryRemoteStore>,
        store: InMemoryStore,
        config: SyncConfig,
    ) -> Self {
        let clock = Arc::clone(&remote);
        let job = LeadSyncJob::new(Arc::clone(&remote), store, config)
            .expect("Failed to create job")
            .with_clock(move || clock.now());
        Self { remote, job }
    }

    /// Creates a harness whose remote holds `leads` (ids are assigned) and
    /// whose cache has been refreshed from it.
    pub fn with_remote_leads(leads: Vec<LeadRecord>, config: SyncConfig) -> Self {
        let mut harness = Self::new(config);
        for lead in leads {
            harness.remote.seed(lead);
        }
        harness.remote.advance(Duration::from_secs(1));
        harness.job.refresh(SyncMode::Full).expect("Failed to refresh cache");
        harness
    }

    /// Moves the shared clock forward.
    pub fn advance(&self, by: Duration) {
        self.remote.advance(by);
    }
}

/// Runs `f` with a file store in a temporary directory.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(FileStore, &Path) -> R,
{
    let dir = TempDir::new().expect("Failed to create temp directory");
    let path = dir.path().join("cache.json");
    let store = FileStore::open(&path).expect("Failed to open file store");
    f(store, &path)
}
