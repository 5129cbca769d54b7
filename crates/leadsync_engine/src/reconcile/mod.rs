//! One reconciliation pass: classify every source contact against the cache
//! and settle clashes between them.

mod registry;
mod removal;

pub use registry::{RecordState, Registry};

use crate::cache::{Diff, LeadCache};
use crate::config::SyncConfig;
use crate::error::{EngineError, EngineResult};
use crate::transport::RemoteStore;
use leadsync_protocol::{
    normalize_email, ActionCode, BatchKind, Candidate, FieldKey, LeadOperation, LeadRecord,
    SourceContact,
};
use leadsync_storage::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Whether the input is the complete source population.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// A slice of recently changed contacts.
    #[default]
    Incremental,
    /// Every contact. Enables removal detection and a full cache refresh.
    Full,
}

/// The outcome of a reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    records: Vec<RecordState>,
}

impl ReconcilePlan {
    /// All records in input order, followed by synthetic removals.
    pub fn records(&self) -> &[RecordState] {
        &self.records
    }

    /// Number of records with `code`.
    pub fn count(&self, code: ActionCode) -> usize {
        self.records.iter().filter(|r| r.code == code).count()
    }

    /// Record counts per code.
    pub fn counts(&self) -> BTreeMap<ActionCode, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.code).or_insert(0) += 1;
        }
        counts
    }

    /// Checks that every record that sends something is well formed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Invariant`] for a sending record without
    /// payload, a create carrying a remote id or an update without one.
    pub fn validate(&self) -> EngineResult<()> {
        for record in &self.records {
            let Some(kind) = record.code.batch_kind() else {
                continue;
            };
            let payload = record.payload.as_ref().ok_or_else(|| {
                EngineError::invariant(format!("{} {} has no payload", record.code, record.label))
            })?;
            let has_id = payload.id.as_ref().is_some_and(|id| !id.as_str().trim().is_empty());
            match kind {
                BatchKind::Create if payload.id.is_some() => {
                    return Err(EngineError::invariant(format!(
                        "create {} carries a remote id",
                        record.label
                    )));
                }
                BatchKind::Update if !has_id => {
                    return Err(EngineError::invariant(format!(
                        "{} {} has no remote id",
                        record.code, record.label
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// The operations to send, in record order.
    ///
    /// # Errors
    ///
    /// See [`ReconcilePlan::validate`].
    pub fn operations(&self) -> EngineResult<Vec<LeadOperation>> {
        self.validate()?;
        Ok(self
            .records
            .iter()
            .filter(|r| r.code.batch_kind().is_some())
            .filter_map(|r| {
                r.payload.clone().map(|payload| LeadOperation {
                    code: r.code,
                    foreign_key: r.foreign_key.clone(),
                    payload,
                })
            })
            .collect())
    }
}

/// Classifies source contacts against a lead cache.
pub struct Reconciler<'a, S: KeyValueStore> {
    config: &'a SyncConfig,
    cache: &'a mut LeadCache<S>,
    fallback: Option<&'a dyn RemoteStore>,
}

impl<'a, S: KeyValueStore> Reconciler<'a, S> {
    /// Creates a reconciler.
    pub fn new(config: &'a SyncConfig, cache: &'a mut LeadCache<S>) -> Self {
        Self {
            config,
            cache,
            fallback: None,
        }
    }

    /// Lets unmatched candidates be looked up live by email. Only takes
    /// effect when the configuration says the cache is incomplete.
    pub fn with_remote_fallback(mut self, remote: &'a dyn RemoteStore) -> Self {
        if !self.config.cache_complete {
            self.fallback = Some(remote);
        }
        self
    }

    /// Runs one pass over `contacts`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache fails or the resulting plan violates an
    /// internal invariant.
    pub fn plan(
        &mut self,
        contacts: &[SourceContact],
        mode: SyncMode,
    ) -> EngineResult<ReconcilePlan> {
        let mut registry = Registry::new();
        let mut seen_foreign_keys = HashSet::new();

        for contact in contacts {
            let foreign_key = contact.foreign_key.as_deref().map(str::trim);
            if let Some(fk) = foreign_key.filter(|k| !k.is_empty()) {
                seen_foreign_keys.insert(fk.to_string());
            }
            let record = self.classify(contact)?;
            registry.admit(record);
        }

        if mode == SyncMode::Full {
            let removed = removal::detect(
                &*self.cache,
                &mut registry,
                &seen_foreign_keys,
                self.config.page_size,
            )?;
            if removed > 0 {
                info!(removed, "leads no longer present in source");
            }
        }

        let plan = ReconcilePlan {
            records: registry.into_records(),
        };
        plan.validate()?;
        debug!(records = plan.records.len(), "reconciliation pass complete");
        Ok(plan)
    }

    /// Classifies one contact, before clash resolution.
    fn classify(&mut self, contact: &SourceContact) -> EngineResult<RecordState> {
        let candidate = match Candidate::from_source(contact) {
            Ok(candidate) => candidate,
            Err(e) => return self.classify_invalid(contact, &e.to_string()),
        };

        let diff = self.cache.compare(candidate.lead(), self.fallback)?;
        let mut code = classify_diff(&candidate, &diff);
        let label = candidate.lead().describe();

        if let Some(defect) = candidate.email_defect() {
            warn!(record = %label, error = %defect, "invalid contact, skipping");
            code = ActionCode::SkipInvalid;
        }

        let mut record = RecordState::new(code, label);
        record.foreign_key = Some(candidate.foreign_key().to_string());
        record.linked_id = diff.remote_id().cloned();

        let cached_email = diff.cached().and_then(LeadRecord::normalized_email);
        record.target_email = if code.is_deactivation() {
            cached_email.clone()
        } else {
            candidate.lead().normalized_email()
        };
        if code == ActionCode::UpdateEmail {
            record.origin_email = cached_email;
        }
        record.payload = payload_for(code, &candidate, &diff);
        Ok(record)
    }

    /// A contact that could not become a candidate still links by email so
    /// that it blocks lower-priority records aimed at the same lead.
    fn classify_invalid(
        &mut self,
        contact: &SourceContact,
        reason: &str,
    ) -> EngineResult<RecordState> {
        let partial = LeadRecord {
            email: contact.email.clone(),
            ..LeadRecord::default()
        };
        let label = partial.describe();
        warn!(record = %label, error = reason, "invalid contact, skipping");

        let diff = if partial.normalized_email().is_some() {
            self.cache.compare(&partial, self.fallback)?
        } else {
            Diff::unlinked()
        };
        let mut record = RecordState::new(ActionCode::SkipInvalid, label);
        record.linked_id = diff.remote_id().cloned();
        record.target_email = contact.email.as_deref().and_then(normalize_email);
        Ok(record)
    }
}

/// Chooses a code from the link and the differences.
///
/// A candidate that does not define its foreign key never reports a foreign
/// key difference, so such a change is left to `update-other` or equality.
fn classify_diff(candidate: &Candidate, diff: &Diff) -> ActionCode {
    let Some(cached) = diff.cached() else {
        return if candidate.is_active() {
            ActionCode::Create
        } else {
            ActionCode::Inactive
        };
    };
    if !candidate.is_active() {
        return if cached.is_active() {
            ActionCode::Deactivate
        } else {
            ActionCode::Inactive
        };
    }
    if diff.is_equal() {
        ActionCode::NoopEqual
    } else if diff.contains(&FieldKey::Email) {
        ActionCode::UpdateEmail
    } else if diff.contains(&FieldKey::ForeignKey) {
        ActionCode::UpdateSourceId
    } else {
        ActionCode::UpdateOther
    }
}

/// Builds what to send for `code`.
fn payload_for(code: ActionCode, candidate: &Candidate, diff: &Diff) -> Option<LeadRecord> {
    let remote_id = diff.remote_id().cloned();
    match code {
        ActionCode::Create => {
            let mut lead = candidate.lead().clone();
            lead.id = None;
            Some(lead)
        }
        ActionCode::Deactivate => remote_id.map(deactivation),
        ActionCode::UpdateSourceId | ActionCode::UpdateEmail | ActionCode::UpdateOther => {
            let mut lead = candidate.lead().clone();
            lead.id = Some(remote_id?);
            if diff.cached().and_then(|c| c.status.as_ref()).is_some_and(|s| s.is_sticky()) {
                lead.status = None;
            }
            Some(lead)
        }
        _ => None,
    }
}

/// The payload that deactivates lead `id`.
pub(crate) fn deactivation(id: leadsync_protocol::RemoteId) -> LeadRecord {
    LeadRecord {
        id: Some(id),
        active: Some(false),
        ..LeadRecord::default()
    }
}
