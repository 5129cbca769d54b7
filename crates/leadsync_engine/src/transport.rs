//! Remote store abstraction.

use crate::error::{EngineError, EngineResult};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use leadsync_protocol::{
    normalize_email, FieldKey, LeadRecord, ObjectError, RecordOutcome, RemoteId,
    REMOTE_TIMESTAMP_FORMAT,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Which lead timestamp a range read filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampField {
    /// Creation time.
    Create,
    /// Last modification time.
    Update,
}

impl TimestampField {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimestampField::Create => "create",
            TimestampField::Update => "update",
        }
    }
}

/// The remote lead store.
///
/// Batched writes return one outcome per input record, in input order. A
/// call-level failure (network, authentication, malformed response) is an
/// `Err` for the whole call: no per-record detail is available then.
pub trait RemoteStore: Send + Sync {
    /// Creates leads. Records must not carry a remote id.
    fn create_records(&self, records: &[LeadRecord]) -> EngineResult<Vec<RecordOutcome>>;

    /// Updates leads. Every record must carry a remote id.
    fn update_records(&self, records: &[LeadRecord]) -> EngineResult<Vec<RecordOutcome>>;

    /// Reads up to `limit` leads whose `field` timestamp lies in `[from, to]`,
    /// oldest first.
    fn get_records_changed_in_range(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
        field: TimestampField,
        limit: usize,
    ) -> EngineResult<Vec<LeadRecord>>;

    /// Reads one lead by remote id.
    fn get_record_by_id(&self, id: &RemoteId) -> EngineResult<Option<LeadRecord>>;

    /// Reads all leads whose `field` equals `value`.
    fn get_records_by_field(&self, field: &FieldKey, value: &str) -> EngineResult<Vec<LeadRecord>>;
}

impl<R: RemoteStore + ?Sized> RemoteStore for Arc<R> {
    fn create_records(&self, records: &[LeadRecord]) -> EngineResult<Vec<RecordOutcome>> {
        (**self).create_records(records)
    }

    fn update_records(&self, records: &[LeadRecord]) -> EngineResult<Vec<RecordOutcome>> {
        (**self).update_records(records)
    }

    fn get_records_changed_in_range(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
        field: TimestampField,
        limit: usize,
    ) -> EngineResult<Vec<LeadRecord>> {
        (**self).get_records_changed_in_range(from, to, field, limit)
    }

    fn get_record_by_id(&self, id: &RemoteId) -> EngineResult<Option<LeadRecord>> {
        (**self).get_record_by_id(id)
    }

    fn get_records_by_field(&self, field: &FieldKey, value: &str) -> EngineResult<Vec<LeadRecord>> {
        (**self).get_records_by_field(field, value)
    }
}

/// Reads every lead whose update time lies in `[from, to]`.
///
/// Pages by moving the window start to the newest timestamp of a full page.
/// Leads seen on several pages are returned once, in their latest form. If a
/// full page does not move the window forward the remaining leads cannot be
/// reached and the read stops with a warning.
///
/// # Errors
///
/// Returns the first remote error.
pub fn fetch_changed(
    remote: &dyn RemoteStore,
    from: NaiveDateTime,
    to: NaiveDateTime,
    page_size: usize,
) -> EngineResult<Vec<LeadRecord>> {
    let page_size = page_size.max(1);
    let mut seen: BTreeMap<RemoteId, LeadRecord> = BTreeMap::new();
    let mut anonymous = 0usize;
    let mut start = from;

    loop {
        let page =
            remote.get_records_changed_in_range(start, to, TimestampField::Update, page_size)?;
        let full = page.len() >= page_size;
        let newest = page.iter().filter_map(|l| l.updated_at).max();
        for lead in page {
            match lead.id.clone() {
                Some(id) => {
                    seen.insert(id, lead);
                }
                None => anonymous += 1,
            }
        }
        if !full {
            break;
        }
        match newest {
            Some(next) if next > start => start = next,
            _ => {
                warn!(
                    from = %start.format(REMOTE_TIMESTAMP_FORMAT),
                    page_size,
                    "changed-lead window cannot advance, results may be incomplete"
                );
                break;
            }
        }
    }

    if anonymous > 0 {
        warn!(count = anonymous, "remote returned leads without id");
    }
    Ok(seen.into_values().collect())
}

/// Counters of calls made against a [`MemoryRemoteStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `create_records` calls.
    pub creates: u64,
    /// `update_records` calls.
    pub updates: u64,
    /// Read calls of any kind.
    pub reads: u64,
}

#[derive(Debug)]
struct MemoryState {
    leads: BTreeMap<u64, StoredLead>,
    now: NaiveDateTime,
    fail_calls: u32,
    discard_email_conflicts: bool,
    counts: CallCounts,
}

#[derive(Debug, Clone)]
struct StoredLead {
    lead: LeadRecord,
    created_at: NaiveDateTime,
}

/// An in-process remote store for tests and dry runs.
///
/// Behaves like the real store where it matters to the engine: emails are
/// unique (case-insensitively), writes stamp the current clock, updates that
/// change nothing report "no rows affected", and updates of unknown ids
/// report "no rows affected" as well.
///
/// Two failure modes can be switched on: transport failures for the next
/// calls, and the remote's "false success" bug where an update moving a
/// lead onto another lead's email reports success but changes nothing.
#[derive(Debug)]
pub struct MemoryRemoteStore {
    state: Mutex<MemoryState>,
    next_id: AtomicU64,
}

impl MemoryRemoteStore {
    /// Creates an empty store whose clock reads 2024-01-01 00:00:00.
    pub fn new() -> Self {
        let epoch = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or_default();
        Self {
            state: Mutex::new(MemoryState {
                leads: BTreeMap::new(),
                now: epoch,
                fail_calls: 0,
                discard_email_conflicts: false,
                counts: CallCounts::default(),
            }),
            next_id: AtomicU64::new(1000),
        }
    }

    /// Returns the store clock.
    pub fn now(&self) -> NaiveDateTime {
        self.state.lock().now
    }

    /// Sets the store clock.
    pub fn set_now(&self, now: NaiveDateTime) {
        self.state.lock().now = now;
    }

    /// Moves the store clock forward.
    pub fn advance(&self, by: std::time::Duration) {
        let mut state = self.state.lock();
        state.now += ChronoDuration::from_std(by).unwrap_or_else(|_| ChronoDuration::zero());
    }

    /// Makes the next `calls` calls fail with a transport error.
    pub fn fail_next_calls(&self, calls: u32) {
        self.state.lock().fail_calls = calls;
    }

    /// Enables the "false success" behaviour for email collisions on update.
    pub fn set_discard_email_conflicts(&self, discard: bool) {
        self.state.lock().discard_email_conflicts = discard;
    }

    /// Inserts a lead directly, stamped with the current clock. Assigns an id
    /// if the lead has none and returns it.
    pub fn seed(&self, mut lead: LeadRecord) -> RemoteId {
        let mut state = self.state.lock();
        let id = match lead.id.as_ref().and_then(|id| id.as_str().parse::<u64>().ok()) {
            Some(n) => {
                self.next_id.fetch_max(n + 1, Ordering::SeqCst);
                n
            }
            None => self.next_id.fetch_add(1, Ordering::SeqCst),
        };
        lead.id = Some(RemoteId::from(id));
        lead.active.get_or_insert(true);
        lead.updated_at = Some(state.now);
        let created_at = state.now;
        state.leads.insert(id, StoredLead { lead, created_at });
        RemoteId::from(id)
    }

    /// Returns a lead as currently stored.
    pub fn lead(&self, id: &RemoteId) -> Option<LeadRecord> {
        let key = id.as_str().parse::<u64>().ok()?;
        self.state.lock().leads.get(&key).map(|s| s.lead.clone())
    }

    /// Returns every stored lead.
    pub fn leads(&self) -> Vec<LeadRecord> {
        self.state.lock().leads.values().map(|s| s.lead.clone()).collect()
    }

    /// Returns the call counters.
    pub fn call_counts(&self) -> CallCounts {
        self.state.lock().counts
    }

    fn check_transport(state: &mut MemoryState) -> EngineResult<()> {
        if state.fail_calls > 0 {
            state.fail_calls -= 1;
            return Err(EngineError::transport_retryable("simulated connection failure"));
        }
        Ok(())
    }

    fn email_owner(state: &MemoryState, email: &str, except: Option<u64>) -> Option<u64> {
        let wanted = normalize_email(email)?;
        state
            .leads
            .iter()
            .find(|(id, s)| {
                Some(**id) != except && s.lead.normalized_email().as_deref() == Some(&wanted)
            })
            .map(|(id, _)| *id)
    }

    fn apply(target: &mut LeadRecord, patch: &LeadRecord) -> bool {
        let before = target.clone();
        if let Some(fk) = &patch.foreign_key {
            target.foreign_key = Some(fk.clone());
        }
        if let Some(email) = &patch.email {
            target.email = Some(email.clone());
        }
        if let Some(active) = patch.active {
            target.active = Some(active);
        }
        if let Some(status) = &patch.status {
            target.status = Some(status.clone());
        }
        for (k, v) in &patch.fields {
            target.fields.insert(k.clone(), v.clone());
        }
        *target != before
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MemoryRemoteStore {
    fn create_records(&self, records: &[LeadRecord]) -> EngineResult<Vec<RecordOutcome>> {
        let mut state = self.state.lock();
        state.counts.creates += 1;
        Self::check_transport(&mut state)?;

        let now = state.now;
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            if record.id.is_some() {
                outcomes.push(Err(ObjectError::new(205, "Invalid parameters: id not allowed")));
                continue;
            }
            let taken = record
                .email
                .as_deref()
                .and_then(|e| Self::email_owner(&state, e, None));
            if record.normalized_email().is_none() {
                outcomes.push(Err(ObjectError::new(
                    205,
                    "Invalid parameters: emailAddress required",
                )));
                continue;
            }
            if taken.is_some() {
                outcomes.push(Err(ObjectError::duplicate_entry()));
                continue;
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let mut lead = record.clone();
            lead.id = Some(RemoteId::from(id));
            lead.active.get_or_insert(true);
            lead.updated_at = Some(now);
            state.leads.insert(id, StoredLead { lead, created_at: now });
            outcomes.push(Ok(Some(RemoteId::from(id))));
        }
        Ok(outcomes)
    }

    fn update_records(&self, records: &[LeadRecord]) -> EngineResult<Vec<RecordOutcome>> {
        let mut state = self.state.lock();
        state.counts.updates += 1;
        Self::check_transport(&mut state)?;

        let now = state.now;
        let discard = state.discard_email_conflicts;
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            let Some(id) = record.id.as_ref().and_then(|id| id.as_str().parse::<u64>().ok()) else {
                outcomes.push(Err(ObjectError::no_rows_affected()));
                continue;
            };
            if !state.leads.contains_key(&id) {
                outcomes.push(Err(ObjectError::no_rows_affected()));
                continue;
            }
            let collides = record
                .email
                .as_deref()
                .and_then(|e| Self::email_owner(&state, e, Some(id)))
                .is_some();
            if collides {
                if discard {
                    outcomes.push(Ok(None));
                } else {
                    outcomes.push(Err(ObjectError::duplicate_entry()));
                }
                continue;
            }
            let changed = match state.leads.get_mut(&id) {
                Some(stored) => {
                    let changed = Self::apply(&mut stored.lead, record);
                    if changed {
                        stored.lead.updated_at = Some(now);
                    }
                    changed
                }
                None => false,
            };
            if changed {
                outcomes.push(Ok(None));
            } else {
                outcomes.push(Err(ObjectError::no_rows_affected()));
            }
        }
        Ok(outcomes)
    }

    fn get_records_changed_in_range(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
        field: TimestampField,
        limit: usize,
    ) -> EngineResult<Vec<LeadRecord>> {
        let mut state = self.state.lock();
        state.counts.reads += 1;
        Self::check_transport(&mut state)?;

        let mut hits: Vec<(NaiveDateTime, u64, LeadRecord)> = state
            .leads
            .iter()
            .filter_map(|(id, stored)| {
                let stamp = match field {
                    TimestampField::Create => Some(stored.created_at),
                    TimestampField::Update => stored.lead.updated_at,
                }?;
                (stamp >= from && stamp <= to).then(|| (stamp, *id, stored.lead.clone()))
            })
            .collect();
        hits.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        Ok(hits.into_iter().take(limit).map(|(_, _, lead)| lead).collect())
    }

    fn get_record_by_id(&self, id: &RemoteId) -> EngineResult<Option<LeadRecord>> {
        let mut state = self.state.lock();
        state.counts.reads += 1;
        Self::check_transport(&mut state)?;

        Ok(id
            .as_str()
            .parse::<u64>()
            .ok()
            .and_then(|key| state.leads.get(&key))
            .map(|s| s.lead.clone()))
    }

    fn get_records_by_field(&self, field: &FieldKey, value: &str) -> EngineResult<Vec<LeadRecord>> {
        let mut state = self.state.lock();
        state.counts.reads += 1;
        Self::check_transport(&mut state)?;

        let matches = |lead: &LeadRecord| match field {
            FieldKey::Email => {
                let wanted = normalize_email(value);
                wanted.is_some() && lead.normalized_email() == wanted
            }
            other => lead.value_of(other).as_deref() == Some(value),
        };
        Ok(state
            .leads
            .values()
            .filter(|s| matches(&s.lead))
            .map(|s| s.lead.clone())
            .collect())
    }
}
