//! # leadsync engine
//!
//! One-way sync of source contacts into Sharpspring leads.
//!
//! This crate provides:
//! - A local lead cache with incremental refresh and lookup by source
//!   identifier or email
//! - A reconciliation pass that classifies every contact and settles clashes
//!   between contacts aimed at the same lead or email
//! - Batched dispatch with per-record outcome handling
//! - A post-dispatch check for writes the remote store accepted but dropped
//! - A JSON-RPC remote store over an abstract HTTP client, and an in-memory
//!   remote store for tests and dry runs
//!
//! ## Flow
//!
//! ```text
//! contacts ─▶ Reconciler (reads LeadCache) ─▶ OperationBatch* ─▶ Dispatcher ─▶ RemoteStore
//!                                                                    │
//!                                                                    └─▶ BatchState ─▶ SyncSummary
//! ```
//!
//! ## Key Invariants
//!
//! - A create never carries a remote id; an update always carries one
//! - No two proceeding records target the same remote lead or email
//! - Updates are sent before creates
//! - Failed writes are accounted for, never retried automatically

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod dispatch;
mod error;
mod http;
mod job;
mod reconcile;
mod state;
mod transport;

pub use cache::{field_changes, Diff, LeadCache};
pub use config::{SyncConfig, MAX_BATCH_SIZE};
pub use dispatch::{build_batches, Dispatcher};
pub use error::{EngineError, EngineResult};
pub use http::{Credentials, HttpClient, RpcRemoteStore, DEFAULT_ENDPOINT};
pub use job::LeadSyncJob;
pub use reconcile::{ReconcilePlan, Reconciler, RecordState, Registry, SyncMode};
pub use state::{BatchState, RecordError, SentRecord, SyncCounts, SyncSummary};
pub use transport::{fetch_changed, CallCounts, MemoryRemoteStore, RemoteStore, TimestampField};
