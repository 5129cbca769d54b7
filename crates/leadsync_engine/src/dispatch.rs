//! Sending planned operations and interpreting what came back.

use crate::cache::{field_changes, LeadCache};
use crate::config::SyncConfig;
use crate::error::{EngineError, EngineResult};
use crate::state::BatchState;
use crate::transport::{fetch_changed, RemoteStore};
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use leadsync_protocol::{
    BatchKind, FieldKey, LeadOperation, LeadRecord, ObjectError, OperationBatch, RecordOutcome,
    RemoteId,
};
use leadsync_storage::KeyValueStore;
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

/// Splits operations into batches of at most `batch_size`, all updates first.
///
/// Updates go first because they may free emails that creates then take.
pub fn build_batches(operations: Vec<LeadOperation>, batch_size: usize) -> Vec<OperationBatch> {
    let batch_size = batch_size.max(1);
    let (updates, creates): (Vec<_>, Vec<_>) = operations
        .into_iter()
        .filter(|op| op.code.batch_kind().is_some())
        .partition(|op| op.code.batch_kind() == Some(BatchKind::Update));

    let mut batches = Vec::new();
    for (kind, ops) in [(BatchKind::Update, updates), (BatchKind::Create, creates)] {
        let mut ops = ops.into_iter().peekable();
        while ops.peek().is_some() {
            let chunk: Vec<_> = ops.by_ref().take(batch_size).collect();
            batches.push(OperationBatch {
                kind,
                operations: chunk,
            });
        }
    }
    batches
}

/// Sends batches and accounts for the outcome of every record.
pub struct Dispatcher<'a, S: KeyValueStore> {
    remote: &'a dyn RemoteStore,
    cache: &'a mut LeadCache<S>,
    config: &'a SyncConfig,
}

/// How a failed record turned out after looking at the live lead.
enum Recheck {
    /// The lead already is what we wanted.
    AlreadyApplied(Option<LeadRecord>),
    /// A real failure.
    Failed(String),
}

impl<'a, S: KeyValueStore> Dispatcher<'a, S> {
    /// Creates a dispatcher.
    pub fn new(
        remote: &'a dyn RemoteStore,
        cache: &'a mut LeadCache<S>,
        config: &'a SyncConfig,
    ) -> Self {
        Self { remote, cache, config }
    }

    /// Sends one batch in one remote call.
    ///
    /// A failed call fails every record of the batch; it is not retried.
    ///
    /// # Errors
    ///
    /// Only cache failures and invariant violations are returned; remote
    /// failures are recorded in `state`.
    pub fn dispatch(&mut self, batch: &OperationBatch, state: &mut BatchState) -> EngineResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        for op in &batch.operations {
            check_operation(batch.kind, op)?;
        }

        let payloads: Vec<LeadRecord> =
            batch.operations.iter().map(|op| op.payload.clone()).collect();
        let result = match batch.kind {
            BatchKind::Create => self.remote.create_records(&payloads),
            BatchKind::Update => self.remote.update_records(&payloads),
        };

        let outcomes = match result {
            Ok(outcomes) if outcomes.len() == batch.len() => outcomes,
            Ok(outcomes) => {
                let message = format!(
                    "remote returned {} results for {} records",
                    outcomes.len(),
                    batch.len()
                );
                self.fail_batch(batch, &message, state);
                return Ok(());
            }
            Err(e) => {
                self.fail_batch(batch, &e.to_string(), state);
                return Ok(());
            }
        };

        let mut sent = 0;
        for (op, outcome) in batch.operations.iter().zip(outcomes) {
            if self.apply_outcome(op, outcome, state)? {
                sent += 1;
            }
        }
        debug!(kind = %batch.kind, records = batch.len(), sent, "batch dispatched");
        Ok(())
    }

    fn fail_batch(&self, batch: &OperationBatch, message: &str, state: &mut BatchState) {
        error!(kind = %batch.kind, records = batch.len(), error = message, "batch call failed");
        for op in &batch.operations {
            state.record_error(op.describe(), message);
        }
    }

    /// Returns true if the record counts as sent.
    fn apply_outcome(
        &mut self,
        op: &LeadOperation,
        outcome: RecordOutcome,
        state: &mut BatchState,
    ) -> EngineResult<bool> {
        match outcome {
            Ok(reported_id) => {
                let remote_id = match (op.remote_id(), reported_id) {
                    (Some(id), _) => id.clone(),
                    (None, Some(id)) => id,
                    (None, None) => {
                        error!(record = %op.describe(), "create reported success without an id");
                        state.record_error(op.describe(), "create reported success without an id");
                        return Ok(false);
                    }
                };
                let mut written = op.payload.clone();
                written.id = Some(remote_id.clone());
                self.cache.upsert(&written)?;
                state.record_sent(remote_id, op.code, op.foreign_key.clone());
                Ok(true)
            }
            Err(object_error) => {
                match self.recheck(op, &object_error) {
                    Recheck::AlreadyApplied(live) => {
                        warn!(
                            record = %op.describe(),
                            error = %object_error,
                            "remote already up to date, cache was stale"
                        );
                        if let Some(live) = live {
                            self.cache.put(live)?;
                        }
                        state.record_unchanged();
                    }
                    Recheck::Failed(message) => {
                        error!(record = %op.describe(), error = %message, "write failed");
                        state.record_error(op.describe(), message);
                    }
                }
                Ok(false)
            }
        }
    }

    /// Looks at the live lead to tell a stale cache from a real failure.
    fn recheck(&self, op: &LeadOperation, object_error: &ObjectError) -> Recheck {
        if !object_error.warrants_recheck() {
            return Recheck::Failed(object_error.to_string());
        }
        let live = match op.remote_id() {
            Some(id) => self.remote.get_record_by_id(id),
            None => match op.payload.email.as_deref() {
                Some(email) => self
                    .remote
                    .get_records_by_field(&FieldKey::Email, email)
                    .map(|found| found.into_iter().next()),
                None => Ok(None),
            },
        };
        match live {
            Ok(Some(live)) => {
                if field_changes(&live, &op.payload).is_empty() {
                    Recheck::AlreadyApplied(Some(live))
                } else if op.remote_id().is_none() {
                    Recheck::Failed(format!("{}; email held by {}", object_error, live.describe()))
                } else {
                    Recheck::Failed(format!("{}; live lead is {}", object_error, live.describe()))
                }
            }
            Ok(None) if op.code.is_deactivation() => Recheck::AlreadyApplied(None),
            Ok(None) => Recheck::Failed(format!("{}; lead not found", object_error)),
            Err(e) => Recheck::Failed(format!("{}; re-check failed: {}", object_error, e)),
        }
    }

    /// Confirms that every sent lead shows up as changed since dispatch
    /// started. Leads that do not are flagged; nothing is re-sent.
    ///
    /// # Errors
    ///
    /// Only cache failures are returned.
    pub fn post_check(
        &mut self,
        state: &mut BatchState,
        now: &dyn Fn() -> NaiveDateTime,
    ) -> EngineResult<()> {
        let Some(started) = state.dispatch_started_at else {
            return Ok(());
        };
        let mut missing: BTreeSet<RemoteId> =
            state.sent.iter().map(|s| s.remote_id.clone()).collect();
        if missing.is_empty() {
            return Ok(());
        }
        let overlap = ChronoDuration::from_std(self.config.refresh_overlap)
            .unwrap_or_else(|_| ChronoDuration::zero());
        let from = started - overlap;
        let attempts = self.config.post_check_attempts.max(1);

        for attempt in 1..=attempts {
            if attempt > 1 {
                std::thread::sleep(self.config.post_check_delay);
            }
            let changed = match fetch_changed(self.remote, from, now(), self.config.page_size) {
                Ok(changed) => changed,
                Err(e) => {
                    error!(error = %e, attempt, "post-dispatch check failed");
                    if attempt == attempts {
                        state.record_error("post-dispatch check", e.to_string());
                        return Ok(());
                    }
                    continue;
                }
            };
            for lead in changed {
                if let Some(id) = lead.id.as_ref() {
                    if missing.remove(id) {
                        self.cache.put(lead)?;
                    }
                }
            }
            if missing.is_empty() {
                break;
            }
            debug!(attempt, missing = missing.len(), "sent leads not yet visible");
        }

        for id in missing {
            let record = state
                .sent
                .iter()
                .find(|s| s.remote_id == id)
                .map(|s| format!("{} #{}", s.code, s.remote_id))
                .unwrap_or_else(|| format!("#{}", id));
            error!(
                record = %record,
                "remote accepted the write but the lead did not change, investigate manually"
            );
            self.restore_live(&id)?;
            state.record_flagged(id);
        }
        info!(
            confirmed = state.sent.len().saturating_sub(state.flagged.len()),
            "post-dispatch check done"
        );
        Ok(())
    }

    /// Replaces the cached entry for a flagged lead with what the remote
    /// store actually holds, so later passes still see the difference.
    fn restore_live(&mut self, id: &RemoteId) -> EngineResult<()> {
        match self.remote.get_record_by_id(id) {
            Ok(Some(live)) => self.cache.put(live),
            Ok(None) => {
                self.cache.remove(id)?;
                Ok(())
            }
            Err(e) => {
                warn!(remote_id = %id, error = %e, "cannot re-read flagged lead, evicting");
                self.cache.remove(id)?;
                Ok(())
            }
        }
    }
}

fn check_operation(kind: BatchKind, op: &LeadOperation) -> EngineResult<()> {
    if op.code.batch_kind() != Some(kind) {
        return Err(EngineError::invariant(format!("{} in {} batch", op.describe(), kind)));
    }
    match kind {
        BatchKind::Create if op.payload.id.is_some() => Err(EngineError::invariant(format!(
            "create {} carries a remote id",
            op.describe()
        ))),
        BatchKind::Update if !op.remote_id().is_some_and(|id| !id.as_str().trim().is_empty()) => {
            Err(EngineError::invariant(format!("update {} has no remote id", op.describe())))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryRemoteStore;
    use leadsync_protocol::ActionCode;
    use leadsync_storage::InMemoryStore;
    use std::time::Duration;

    fn create(fk: &str, email: &str) -> LeadOperation {
        LeadOperation {
            code: ActionCode::Create,
            foreign_key: Some(fk.into()),
            payload: LeadRecord {
                foreign_key: Some(fk.into()),
                email: Some(email.into()),
                active: Some(true),
                ..LeadRecord::default()
            },
        }
    }

    fn update(code: ActionCode, id: &RemoteId, email: &str) -> LeadOperation {
        LeadOperation {
            code,
            foreign_key: None,
            payload: LeadRecord {
                id: Some(id.clone()),
                email: Some(email.into()),
                ..LeadRecord::default()
            },
        }
    }

    fn setup() -> (MemoryRemoteStore, LeadCache<InMemoryStore>, SyncConfig) {
        let config = SyncConfig::default().with_post_check(2, Duration::ZERO);
        let cache = LeadCache::open(InMemoryStore::new(), 100).unwrap();
        (MemoryRemoteStore::new(), cache, config)
    }

    #[test]
    fn updates_come_first_and_batches_are_bounded() {
        let id = RemoteId::from(1);
        let ops = vec![
            create("1", "a@x.com"),
            update(ActionCode::UpdateOther, &id, "b@x.com"),
            create("2", "c@x.com"),
            create("3", "d@x.com"),
            update(ActionCode::NoopEqual, &id, "e@x.com"),
        ];
        let batches = build_batches(ops, 2);

        let shape: Vec<_> = batches.iter().map(|b| (b.kind, b.len())).collect();
        assert_eq!(
            shape,
            vec![(BatchKind::Update, 1), (BatchKind::Create, 2), (BatchKind::Create, 1)]
        );
    }

    #[test]
    fn successful_create_is_cached_and_sent() {
        let (remote, mut cache, config) = setup();
        let mut state = BatchState::new();
        let batch = OperationBatch {
            kind: BatchKind::Create,
            operations: vec![create("1", "a@x.com")],
        };

        Dispatcher::new(&remote, &mut cache, &config).dispatch(&batch, &mut state).unwrap();

        assert_eq!(state.counts.sent, 1);
        let id = state.sent[0].remote_id.clone();
        assert!(cache.get(&id).unwrap().is_some());
        assert!(cache.lookup_by_foreign_key("1").unwrap().is_some());
    }

    #[test]
    fn transport_failure_fails_whole_batch() {
        let (remote, mut cache, config) = setup();
        remote.fail_next_calls(1);
        let mut state = BatchState::new();
        let batch = OperationBatch {
            kind: BatchKind::Create,
            operations: vec![create("1", "a@x.com"), create("2", "b@x.com")],
        };

        Dispatcher::new(&remote, &mut cache, &config).dispatch(&batch, &mut state).unwrap();

        assert_eq!(state.counts.errored, 2);
        assert_eq!(state.counts.sent, 0);
        assert!(remote.leads().is_empty());
    }

    #[test]
    fn stale_update_is_benign() {
        let (remote, mut cache, config) = setup();
        let id = remote.seed(LeadRecord {
            email: Some("a@x.com".into()),
            ..LeadRecord::default()
        });
        let mut state = BatchState::new();
        let batch = OperationBatch {
            kind: BatchKind::Update,
            operations: vec![update(ActionCode::UpdateEmail, &id, "a@x.com")],
        };

        Dispatcher::new(&remote, &mut cache, &config).dispatch(&batch, &mut state).unwrap();

        assert_eq!(state.counts.errored, 0);
        assert_eq!(state.counts.equal, 1);
        assert!(cache.get(&id).unwrap().is_some());
    }

    #[test]
    fn deactivating_missing_lead_is_benign() {
        let (remote, mut cache, config) = setup();
        let mut state = BatchState::new();
        let op = LeadOperation {
            code: ActionCode::Deactivate,
            foreign_key: Some("9".into()),
            payload: crate::reconcile::deactivation(RemoteId::from(9)),
        };
        let batch = OperationBatch {
            kind: BatchKind::Update,
            operations: vec![op],
        };

        Dispatcher::new(&remote, &mut cache, &config).dispatch(&batch, &mut state).unwrap();

        assert_eq!(state.counts.errored, 0);
        assert_eq!(state.counts.equal, 1);
    }

    #[test]
    fn duplicate_create_of_other_contact_is_error() {
        let (remote, mut cache, config) = setup();
        remote.seed(LeadRecord {
            foreign_key: Some("other".into()),
            email: Some("a@x.com".into()),
            active: Some(true),
            ..LeadRecord::default()
        });
        let mut state = BatchState::new();
        let batch = OperationBatch {
            kind: BatchKind::Create,
            operations: vec![create("1", "a@x.com")],
        };

        Dispatcher::new(&remote, &mut cache, &config).dispatch(&batch, &mut state).unwrap();

        assert_eq!(state.counts.errored, 1);
        assert!(state.errors[0].message.contains("email held by"));
    }

    #[test]
    fn invariant_violation_aborts() {
        let (remote, mut cache, config) = setup();
        let mut state = BatchState::new();
        let mut bad = create("1", "a@x.com");
        bad.payload.id = Some(RemoteId::from(4));
        let batch = OperationBatch {
            kind: BatchKind::Create,
            operations: vec![bad],
        };

        let err = Dispatcher::new(&remote, &mut cache, &config)
            .dispatch(&batch, &mut state)
            .unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
        assert_eq!(remote.call_counts().creates, 0);
    }

    #[test]
    fn post_check_flags_discarded_update() {
        let (remote, mut cache, config) = setup();
        let a = remote.seed(LeadRecord {
            email: Some("a@x.com".into()),
            ..LeadRecord::default()
        });
        remote.seed(LeadRecord {
            email: Some("b@x.com".into()),
            ..LeadRecord::default()
        });
        remote.set_discard_email_conflicts(true);
        remote.advance(Duration::from_secs(3600));

        let mut state = BatchState::new();
        state.dispatch_started_at = Some(remote.now());
        let batch = OperationBatch {
            kind: BatchKind::Update,
            operations: vec![update(ActionCode::UpdateEmail, &a, "b@x.com")],
        };
        let mut dispatcher = Dispatcher::new(&remote, &mut cache, &config);
        dispatcher.dispatch(&batch, &mut state).unwrap();
        assert_eq!(state.counts.sent, 1);

        dispatcher.post_check(&mut state, &|| remote.now()).unwrap();
        assert_eq!(state.flagged, vec![a.clone()]);
        assert_eq!(state.counts.flagged, 1);
        assert_eq!(remote.call_counts().updates, 1);

        let cached = cache.get(&a).unwrap().unwrap();
        assert_eq!(cached.email.as_deref(), Some("a@x.com"));
        assert!(cache.lookup_by_email("b@x.com").unwrap().is_none());
    }

    #[test]
    fn repeated_post_check_flags_once() {
        let (remote, mut cache, config) = setup();
        let a = remote.seed(LeadRecord {
            email: Some("a@x.com".into()),
            ..LeadRecord::default()
        });
        remote.seed(LeadRecord {
            email: Some("b@x.com".into()),
            ..LeadRecord::default()
        });
        remote.set_discard_email_conflicts(true);
        remote.advance(Duration::from_secs(3600));

        let mut state = BatchState::new();
        state.dispatch_started_at = Some(remote.now());
        let batch = OperationBatch {
            kind: BatchKind::Update,
            operations: vec![update(ActionCode::UpdateEmail, &a, "b@x.com")],
        };
        let mut dispatcher = Dispatcher::new(&remote, &mut cache, &config);
        dispatcher.dispatch(&batch, &mut state).unwrap();
        dispatcher.post_check(&mut state, &|| remote.now()).unwrap();
        dispatcher.post_check(&mut state, &|| remote.now()).unwrap();

        assert_eq!(state.flagged, vec![a]);
        assert_eq!(state.counts.flagged, 1);
    }

    #[test]
    fn post_check_confirms_real_writes() {
        let (remote, mut cache, config) = setup();
        let mut state = BatchState::new();
        state.dispatch_started_at = Some(remote.now());
        let batch = OperationBatch {
            kind: BatchKind::Create,
            operations: vec![create("1", "a@x.com")],
        };
        let mut dispatcher = Dispatcher::new(&remote, &mut cache, &config);
        dispatcher.dispatch(&batch, &mut state).unwrap();
        dispatcher.post_check(&mut state, &|| remote.now()).unwrap();

        assert!(state.flagged.is_empty());
        assert!(state.summary().is_clean());
    }
}
