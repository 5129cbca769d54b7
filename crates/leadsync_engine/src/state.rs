//! Job accounting carried between queue steps.

use crate::reconcile::{ReconcilePlan, SyncMode};
use chrono::NaiveDateTime;
use leadsync_protocol::{ActionCode, RemoteId, REMOTE_TIMESTAMP_FORMAT};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Record counts per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    /// Creates and updates the remote store accepted.
    pub sent: u64,
    /// Deactivations of leads gone from the source that were accepted.
    pub removed: u64,
    /// Invalid contacts.
    pub skipped: u64,
    /// Records whose write failed.
    pub errored: u64,
    /// Records already in the wanted state (including writes that turned
    /// out to be unnecessary).
    pub equal: u64,
    /// Inactive contacts with nothing to deactivate.
    pub inactive: u64,
    /// Records that lost a clash.
    pub duplicate_ignored: u64,
    /// Sent records the post-dispatch check could not confirm.
    pub flagged: u64,
}

/// A write the remote store accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentRecord {
    /// Remote lead written.
    pub remote_id: RemoteId,
    /// Why it was written.
    pub code: ActionCode,
    /// Source identifier, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
}

/// A write that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    /// The operation that failed.
    pub record: String,
    /// Why.
    pub message: String,
}

/// Opaque accumulator the host persists between `start`, each
/// `process_one` and `finish`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchState {
    /// Identifies the run in logs.
    pub run_id: Option<Uuid>,
    /// Whether the run covers the whole source population.
    pub mode: SyncMode,
    /// When the run started.
    pub started_at: Option<NaiveDateTime>,
    /// When the first batch was sent.
    pub dispatch_started_at: Option<NaiveDateTime>,
    /// Number of batches handed to the host.
    pub batches_total: usize,
    /// Number of batches processed so far.
    pub batches_done: usize,
    /// Outcome counts.
    pub counts: SyncCounts,
    /// Accepted writes, for the post-dispatch check.
    pub sent: Vec<SentRecord>,
    /// Failed writes.
    pub errors: Vec<RecordError>,
    /// Leads the post-dispatch check could not confirm.
    pub flagged: Vec<RemoteId>,
}

impl BatchState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears everything and starts a new run.
    pub fn begin(&mut self, mode: SyncMode, now: NaiveDateTime) {
        *self = Self {
            run_id: Some(Uuid::new_v4()),
            mode,
            started_at: Some(now),
            ..Self::default()
        };
    }

    /// Adds the counts that are known once the pass is planned.
    pub fn record_plan(&mut self, plan: &ReconcilePlan) {
        for record in plan.records() {
            match record.code {
                ActionCode::Inactive => self.counts.inactive += 1,
                ActionCode::SkipDuplicateInactive | ActionCode::SkipDuplicateClash => {
                    self.counts.duplicate_ignored += 1
                }
                ActionCode::SkipInvalid => self.counts.skipped += 1,
                ActionCode::NoopEqual => self.counts.equal += 1,
                _ => {}
            }
        }
    }

    /// Records an accepted write.
    pub fn record_sent(
        &mut self,
        remote_id: RemoteId,
        code: ActionCode,
        foreign_key: Option<String>,
    ) {
        if code == ActionCode::DeactivateRemoved {
            self.counts.removed += 1;
        } else {
            self.counts.sent += 1;
        }
        self.sent.push(SentRecord {
            remote_id,
            code,
            foreign_key,
        });
    }

    /// Records a write that was not needed after all.
    pub fn record_unchanged(&mut self) {
        self.counts.equal += 1;
    }

    /// Records a failed write.
    pub fn record_error(&mut self, record: impl Into<String>, message: impl Into<String>) {
        self.counts.errored += 1;
        self.errors.push(RecordError {
            record: record.into(),
            message: message.into(),
        });
    }

    /// Records a sent lead the remote store does not show as changed.
    pub fn record_flagged(&mut self, remote_id: RemoteId) {
        if self.flagged.contains(&remote_id) {
            return;
        }
        self.counts.flagged += 1;
        self.flagged.push(remote_id);
    }

    /// Builds the summary.
    pub fn summary(&self) -> SyncSummary {
        SyncSummary {
            run_id: self.run_id,
            mode: self.mode,
            started_at: self.started_at,
            counts: self.counts,
            errors: self.errors.clone(),
            flagged: self.flagged.clone(),
        }
    }
}

/// What a run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Run identifier.
    pub run_id: Option<Uuid>,
    /// Run mode.
    pub mode: SyncMode,
    /// Run start.
    pub started_at: Option<NaiveDateTime>,
    /// Outcome counts.
    pub counts: SyncCounts,
    /// Failed writes.
    pub errors: Vec<RecordError>,
    /// Unconfirmed leads.
    pub flagged: Vec<RemoteId>,
}

impl SyncSummary {
    /// Returns true if nothing failed or needs investigation.
    pub fn is_clean(&self) -> bool {
        self.counts.errored == 0 && self.counts.flagged == 0
    }
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counts;
        let mode = match self.mode {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
        };
        write!(f, "Lead sync ({}", mode)?;
        if let Some(at) = self.started_at {
            write!(f, ", started {}", at.format(REMOTE_TIMESTAMP_FORMAT))?;
        }
        write!(
            f,
            "): {} sent, {} removed, {} skipped, {} errored, {} equal, {} inactive, \
             {} duplicates ignored",
            c.sent, c.removed, c.skipped, c.errored, c.equal, c.inactive, c.duplicate_ignored
        )?;
        if c.flagged > 0 {
            write!(f, ", {} flagged for investigation", c.flagged)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_resets_state() {
        let mut state = BatchState::new();
        state.record_error("x", "boom");
        state.begin(SyncMode::Full, NaiveDateTime::default());

        assert_eq!(state.counts, SyncCounts::default());
        assert!(state.errors.is_empty());
        assert!(state.run_id.is_some());
        assert_eq!(state.mode, SyncMode::Full);
    }

    #[test]
    fn removals_count_separately() {
        let mut state = BatchState::new();
        state.record_sent(RemoteId::from(1), ActionCode::Create, Some("1".into()));
        state.record_sent(RemoteId::from(2), ActionCode::DeactivateRemoved, None);

        assert_eq!(state.counts.sent, 1);
        assert_eq!(state.counts.removed, 1);
        assert_eq!(state.sent.len(), 2);
    }

    #[test]
    fn state_survives_json() {
        let mut state = BatchState::new();
        state.begin(SyncMode::Incremental, NaiveDateTime::default());
        state.record_sent(RemoteId::from(7), ActionCode::UpdateEmail, Some("7".into()));
        state.record_flagged(RemoteId::from(7));

        let json = serde_json::to_string(&state).unwrap();
        let back: BatchState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);

        let empty: BatchState = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, BatchState::default());
    }

    #[test]
    fn flagging_twice_counts_once() {
        let mut state = BatchState::new();
        state.record_sent(RemoteId::from(3), ActionCode::UpdateEmail, None);
        state.record_flagged(RemoteId::from(3));
        state.record_flagged(RemoteId::from(3));

        assert_eq!(state.flagged, vec![RemoteId::from(3)]);
        assert_eq!(state.counts.flagged, 1);
    }

    #[test]
    fn summary_line() {
        let mut state = BatchState::new();
        state.record_sent(RemoteId::from(1), ActionCode::Create, None);
        state.record_unchanged();
        let line = state.summary().to_string();
        assert_eq!(
            line,
            "Lead sync (incremental): 1 sent, 0 removed, 0 skipped, 0 errored, 1 equal, \
             0 inactive, 0 duplicates ignored"
        );

        state.record_flagged(RemoteId::from(1));
        assert!(state.summary().to_string().ends_with(", 1 flagged for investigation"));
        assert!(!state.summary().is_clean());
    }
}
