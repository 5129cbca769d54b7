//! The host-facing sync job.

use crate::cache::LeadCache;
use crate::config::SyncConfig;
use crate::dispatch::{build_batches, Dispatcher};
use crate::error::EngineResult;
use crate::reconcile::{ReconcilePlan, Reconciler, SyncMode};
use crate::state::{BatchState, SyncSummary};
use crate::transport::RemoteStore;
use chrono::NaiveDateTime;
use leadsync_protocol::{OperationBatch, SourceContact};
use leadsync_storage::KeyValueStore;
use std::sync::Arc;
use tracing::{error, info, warn};

type Clock = Box<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Syncs source contacts into remote leads.
///
/// The host drives the job in three steps so it can queue batches and persist
/// the [`BatchState`] in between:
///
/// 1. [`start`](LeadSyncJob::start) refreshes the cache, reconciles and
///    returns the batches to send.
/// 2. [`process_one`](LeadSyncJob::process_one) sends one batch.
/// 3. [`finish`](LeadSyncJob::finish) checks that sent leads really changed
///    and returns the summary.
///
/// [`run`](LeadSyncJob::run) does all three in one go.
pub struct LeadSyncJob<R: RemoteStore, S: KeyValueStore> {
    remote: Arc<R>,
    cache: LeadCache<S>,
    config: SyncConfig,
    clock: Clock,
}

impl<R: RemoteStore, S: KeyValueStore> LeadSyncJob<R, S> {
    /// Creates a job over a remote store and a cache backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the cache cannot
    /// be opened.
    pub fn new(remote: Arc<R>, store: S, config: SyncConfig) -> EngineResult<Self> {
        config.validate()?;
        let cache = LeadCache::open(store, config.page_size)?;
        Ok(Self {
            remote,
            cache,
            config,
            clock: Box::new(|| chrono::Utc::now().naive_utc()),
        })
    }

    /// Replaces the clock (UTC wall time by default).
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDateTime + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the cache.
    pub fn cache(&self) -> &LeadCache<S> {
        &self.cache
    }

    /// Returns the cache mutably.
    pub fn cache_mut(&mut self) -> &mut LeadCache<S> {
        &mut self.cache
    }

    /// Returns the remote store.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// Refreshes the cache: fully in full mode, from the last refresh time
    /// otherwise. A remote failure is logged and the stale cache is used.
    ///
    /// # Errors
    ///
    /// Returns local (cache) failures.
    pub fn refresh(&mut self, mode: SyncMode) -> EngineResult<()> {
        let now = (self.clock)();
        let remote: &dyn RemoteStore = self.remote.as_ref();
        let result = match mode {
            SyncMode::Full => self.cache.refresh_full(remote, now),
            SyncMode::Incremental => {
                self.cache
                    .refresh_incremental(remote, now, self.config.refresh_overlap)
            }
        };
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_remote() => {
                warn!(error = %e, "cache refresh failed, reconciling against stale cache");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Reconciles `contacts` against the cache without refreshing it.
    ///
    /// # Errors
    ///
    /// Returns cache failures and invariant violations.
    pub fn plan(
        &mut self,
        contacts: &[SourceContact],
        mode: SyncMode,
    ) -> EngineResult<ReconcilePlan> {
        let remote: &dyn RemoteStore = self.remote.as_ref();
        Reconciler::new(&self.config, &mut self.cache)
            .with_remote_fallback(remote)
            .plan(contacts, mode)
    }

    /// Starts a run: refreshes the cache, reconciles `contacts` and returns
    /// the batches to send, updates first.
    ///
    /// # Errors
    ///
    /// Returns cache failures and invariant violations; the pass is aborted
    /// and nothing is sent.
    pub fn start(
        &mut self,
        contacts: &[SourceContact],
        mode: SyncMode,
        state: &mut BatchState,
    ) -> EngineResult<Vec<OperationBatch>> {
        state.begin(mode, (self.clock)());
        self.refresh(mode)?;

        let plan = self.plan(contacts, mode)?;
        state.record_plan(&plan);
        let batches = build_batches(plan.operations()?, self.config.batch_size);
        state.batches_total = batches.len();
        self.cache.flush()?;

        info!(
            run_id = ?state.run_id,
            contacts = contacts.len(),
            batches = batches.len(),
            operations = batches.iter().map(OperationBatch::len).sum::<usize>(),
            "lead sync started"
        );
        Ok(batches)
    }

    /// Sends one batch.
    ///
    /// # Errors
    ///
    /// Returns cache failures and invariant violations. Remote failures are
    /// recorded in `state` instead.
    pub fn process_one(
        &mut self,
        batch: &OperationBatch,
        state: &mut BatchState,
    ) -> EngineResult<()> {
        if state.dispatch_started_at.is_none() {
            state.dispatch_started_at = Some((self.clock)());
        }
        let remote: &dyn RemoteStore = self.remote.as_ref();
        Dispatcher::new(remote, &mut self.cache, &self.config).dispatch(batch, state)?;
        state.batches_done += 1;

        if !self.config.dispatch_delay.is_zero() {
            std::thread::sleep(self.config.dispatch_delay);
        }
        self.cache.flush()
    }

    /// Finishes a run: confirms sent leads and returns the summary.
    ///
    /// # Errors
    ///
    /// Returns cache failures.
    pub fn finish(&mut self, state: &mut BatchState) -> EngineResult<SyncSummary> {
        if state.batches_done < state.batches_total {
            warn!(
                done = state.batches_done,
                total = state.batches_total,
                "finishing with unprocessed batches"
            );
        }
        let remote: &dyn RemoteStore = self.remote.as_ref();
        let clock = &self.clock;
        Dispatcher::new(remote, &mut self.cache, &self.config).post_check(state, &|| clock())?;
        self.cache.flush()?;

        let summary = state.summary();
        if summary.is_clean() {
            info!(run_id = ?summary.run_id, "{}", summary);
        } else {
            error!(run_id = ?summary.run_id, "{}", summary);
        }
        Ok(summary)
    }

    /// Runs `start`, every batch and `finish`.
    ///
    /// # Errors
    ///
    /// See the individual steps.
    pub fn run(&mut self, contacts: &[SourceContact], mode: SyncMode) -> EngineResult<SyncSummary> {
        let mut state = BatchState::new();
        let batches = self.start(contacts, mode, &mut state)?;
        for batch in &batches {
            self.process_one(batch, &mut state)?;
        }
        self.finish(&mut state)
    }
}
