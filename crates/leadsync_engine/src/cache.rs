//! Local snapshot of remote leads.
//!
//! Entries live in a [`KeyValueStore`] under `lead/<remote id>` as JSON; the
//! foreign key and email indexes are rebuilt in memory when the cache is
//! opened. The snapshot is advisory: it is only as current as the last
//! refresh minus the configured overlap.

use crate::error::{EngineError, EngineResult};
use crate::transport::{fetch_changed, RemoteStore};
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use leadsync_protocol::{normalize_email, FieldKey, LeadRecord, RemoteId, REMOTE_TIMESTAMP_FORMAT};
use leadsync_storage::KeyValueStore;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info, warn};

const LEAD_PREFIX: &str = "lead/";
const LAST_REFRESH_KEY: &str = "meta/last_refresh";

/// Differences between a wanted lead and the cached lead it links to.
///
/// Maps every differing attribute to its cached value (`None` when the cache
/// does not define it). An unlinked diff has no cached lead at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    linked: Option<LeadRecord>,
    changes: BTreeMap<FieldKey, Option<String>>,
}

impl Diff {
    /// A diff for a candidate that matched no lead.
    pub fn unlinked() -> Self {
        Self::default()
    }

    /// Compares `wanted` against the lead it is linked to.
    pub fn linked(cached: LeadRecord, wanted: &LeadRecord) -> Self {
        let changes = field_changes(&cached, wanted);
        Self {
            linked: Some(cached),
            changes,
        }
    }

    /// The cached lead, if any.
    pub fn cached(&self) -> Option<&LeadRecord> {
        self.linked.as_ref()
    }

    /// Remote id of the cached lead, if any.
    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.linked.as_ref().and_then(|l| l.id.as_ref())
    }

    /// Returns true if the candidate is linked to a cached lead.
    pub fn is_linked(&self) -> bool {
        self.linked.is_some()
    }

    /// Returns true if linked and nothing differs.
    pub fn is_equal(&self) -> bool {
        self.is_linked() && self.changes.is_empty()
    }

    /// Number of entries counting the remote id: 0 when unlinked, 1 when
    /// equal.
    pub fn len(&self) -> usize {
        if self.is_linked() {
            1 + self.changes.len()
        } else {
            0
        }
    }

    /// Returns true when unlinked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `key` differs.
    pub fn contains(&self, key: &FieldKey) -> bool {
        self.changes.contains_key(key)
    }

    /// The differing attributes with their cached values.
    pub fn changes(&self) -> &BTreeMap<FieldKey, Option<String>> {
        &self.changes
    }
}

/// Computes the attributes `wanted` defines that differ in `cached`.
///
/// Emails compare case-insensitively, a cached lead without an active flag
/// counts as active, and a missing cached field equals the empty string.
/// A sticky cached status is never reported as different.
pub fn field_changes(
    cached: &LeadRecord,
    wanted: &LeadRecord,
) -> BTreeMap<FieldKey, Option<String>> {
    let mut changes = BTreeMap::new();
    for key in wanted.defined_keys() {
        let cached_value = cached.value_of(&key);
        let plain_differs = || {
            cached_value.as_deref().unwrap_or("") != wanted.value_of(&key).unwrap_or_default()
        };
        let differs = match &key {
            FieldKey::Email => cached.normalized_email() != wanted.normalized_email(),
            FieldKey::Active => cached.is_active() != wanted.is_active(),
            FieldKey::Status => {
                if cached.status.as_ref().is_some_and(|s| s.is_sticky()) {
                    false
                } else {
                    plain_differs()
                }
            }
            FieldKey::ForeignKey => {
                cached.foreign_key().unwrap_or("") != wanted.foreign_key().unwrap_or("")
            }
            _ => plain_differs(),
        };
        if differs {
            changes.insert(key, cached_value);
        }
    }
    changes
}

/// Read-through/write-through lead snapshot.
pub struct LeadCache<S: KeyValueStore> {
    store: S,
    by_foreign_key: HashMap<String, Vec<RemoteId>>,
    by_email: HashMap<String, Vec<RemoteId>>,
    page_size: usize,
}

impl<S: KeyValueStore> LeadCache<S> {
    /// Opens a cache over `store`, indexing every entry it holds.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or holds corrupt entries.
    pub fn open(store: S, page_size: usize) -> EngineResult<Self> {
        let mut cache = Self {
            store,
            by_foreign_key: HashMap::new(),
            by_email: HashMap::new(),
            page_size: page_size.max(1),
        };
        let mut offset = 0;
        loop {
            let page = cache.page(offset, cache.page_size)?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            for lead in &page {
                cache.index(lead);
            }
        }
        debug!(entries = offset, "opened lead cache");
        Ok(cache)
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Consumes the cache, returning the underlying store.
    pub fn into_store(self) -> S {
        self.store
    }

    fn key(id: &RemoteId) -> String {
        format!("{}{}", LEAD_PREFIX, id)
    }

    fn index(&mut self, lead: &LeadRecord) {
        let Some(id) = lead.id.clone() else {
            return;
        };
        if let Some(fk) = lead.foreign_key() {
            self.by_foreign_key.entry(fk.to_string()).or_default().push(id.clone());
        }
        if let Some(email) = lead.normalized_email() {
            self.by_email.entry(email).or_default().push(id);
        }
    }

    fn unindex(&mut self, lead: &LeadRecord) {
        let Some(id) = lead.id.as_ref() else {
            return;
        };
        if let Some(fk) = lead.foreign_key() {
            remove_from(&mut self.by_foreign_key, fk, id);
        }
        if let Some(email) = lead.normalized_email() {
            remove_from(&mut self.by_email, &email, id);
        }
    }

    /// Number of cached leads.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn len(&self) -> EngineResult<usize> {
        Ok(self.store.count(LEAD_PREFIX)?)
    }

    /// Returns true if no leads are cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn is_empty(&self) -> EngineResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Reads one lead by remote id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the entry is corrupt.
    pub fn get(&self, id: &RemoteId) -> EngineResult<Option<LeadRecord>> {
        match self.store.get(&Self::key(id))? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Reads up to `limit` leads starting at `offset`, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or an entry is corrupt.
    pub fn page(&self, offset: usize, limit: usize) -> EngineResult<Vec<LeadRecord>> {
        self.store
            .scan(LEAD_PREFIX, offset, limit)?
            .into_iter()
            .map(|(_, json)| serde_json::from_str(&json).map_err(EngineError::from))
            .collect()
    }

    fn resolve(&self, ids: &[RemoteId]) -> EngineResult<Vec<LeadRecord>> {
        let mut leads = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(lead) = self.get(id)? {
                leads.push(lead);
            }
        }
        Ok(leads)
    }

    /// Finds the lead holding source identifier `foreign_key`.
    ///
    /// Foreign keys are not unique remotely; when several leads share one the
    /// active lead is preferred and the anomaly is logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn lookup_by_foreign_key(&self, foreign_key: &str) -> EngineResult<Option<LeadRecord>> {
        let Some(ids) = self.by_foreign_key.get(foreign_key.trim()) else {
            return Ok(None);
        };
        let mut leads = self.resolve(ids)?;
        if leads.len() > 1 {
            warn!(
                foreign_key,
                leads = %leads.iter().map(LeadRecord::describe).collect::<Vec<_>>().join(", "),
                "several cached leads share one source identifier"
            );
        }
        let active = leads.iter().position(LeadRecord::is_active).unwrap_or(0);
        Ok(if leads.is_empty() { None } else { Some(leads.swap_remove(active)) })
    }

    /// Finds the lead holding `email` (case-insensitive).
    ///
    /// Returns the first match if the cache momentarily holds several.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn lookup_by_email(&self, email: &str) -> EngineResult<Option<LeadRecord>> {
        let Some(ids) = normalize_email(email).and_then(|e| self.by_email.get(&e)) else {
            return Ok(None);
        };
        let leads = self.resolve(ids)?;
        if leads.len() > 1 {
            warn!(
                email,
                leads = %leads.iter().map(LeadRecord::describe).collect::<Vec<_>>().join(", "),
                "several cached leads share one email"
            );
        }
        Ok(leads.into_iter().next())
    }

    /// Links `wanted` to a cached lead and computes the differences.
    ///
    /// Tries the foreign key, then the email. When `fallback` is given and
    /// neither matches, the remote store is asked by email; a lead found that
    /// way is added to the cache. A fallback failure is logged and treated
    /// as "no match".
    ///
    /// # Errors
    ///
    /// Returns an error if the cache store fails.
    pub fn compare(
        &mut self,
        wanted: &LeadRecord,
        fallback: Option<&dyn RemoteStore>,
    ) -> EngineResult<Diff> {
        if let Some(fk) = wanted.foreign_key() {
            if let Some(cached) = self.lookup_by_foreign_key(fk)? {
                return Ok(Diff::linked(cached, wanted));
            }
        }
        let Some(email) = wanted.normalized_email() else {
            return Ok(Diff::unlinked());
        };
        if let Some(cached) = self.lookup_by_email(&email)? {
            return Ok(Diff::linked(cached, wanted));
        }
        let Some(remote) = fallback else {
            return Ok(Diff::unlinked());
        };
        match remote.get_records_by_field(&FieldKey::Email, &email) {
            Ok(found) => match found.into_iter().find(|l| l.id.is_some()) {
                Some(live) => {
                    debug!(email = %email, remote_id = ?live.id, "linked through remote lookup");
                    self.put(live.clone())?;
                    Ok(Diff::linked(live, wanted))
                }
                None => Ok(Diff::unlinked()),
            },
            Err(e) => {
                warn!(email = %email, error = %e, "remote email lookup failed, treating as new");
                Ok(Diff::unlinked())
            }
        }
    }

    /// Stores `lead`, replacing any entry with the same remote id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Invariant`] if the lead has no remote id, or a
    /// storage error.
    pub fn put(&mut self, lead: LeadRecord) -> EngineResult<()> {
        let id = lead
            .id
            .clone()
            .ok_or_else(|| {
                EngineError::invariant(format!(
                    "cannot cache {} without remote id",
                    lead.describe()
                ))
            })?;
        if let Some(old) = self.get(&id)? {
            self.unindex(&old);
        }
        self.store.set(&Self::key(&id), serde_json::to_string(&lead)?)?;
        self.index(&lead);
        Ok(())
    }

    /// Merges the attributes `lead` defines into the cached entry (or stores
    /// it as new).
    ///
    /// # Errors
    ///
    /// Same as [`LeadCache::put`].
    pub fn upsert(&mut self, lead: &LeadRecord) -> EngineResult<()> {
        let Some(id) = lead.id.as_ref() else {
            return Err(EngineError::invariant(format!(
                "cannot cache {} without remote id",
                lead.describe()
            )));
        };
        let merged = match self.get(id)? {
            Some(mut existing) => {
                merge_into(&mut existing, lead);
                existing
            }
            None => lead.clone(),
        };
        self.put(merged)
    }

    /// Drops the entry for `id`. Returns true if there was one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn remove(&mut self, id: &RemoteId) -> EngineResult<bool> {
        let Some(old) = self.get(id)? else {
            return Ok(false);
        };
        self.unindex(&old);
        Ok(self.store.delete(&Self::key(id))?)
    }

    /// Removes every lead and the refresh timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn clear(&mut self) -> EngineResult<()> {
        let removed = self.store.delete_prefix(LEAD_PREFIX)?;
        self.store.delete(LAST_REFRESH_KEY)?;
        self.by_foreign_key.clear();
        self.by_email.clear();
        debug!(removed, "cleared lead cache");
        Ok(())
    }

    /// Time of the last successful refresh.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the value is corrupt.
    pub fn last_refresh(&self) -> EngineResult<Option<NaiveDateTime>> {
        match self.store.get(LAST_REFRESH_KEY)? {
            Some(raw) => NaiveDateTime::parse_from_str(&raw, REMOTE_TIMESTAMP_FORMAT)
                .map(Some)
                .map_err(|e| {
                    EngineError::Config(format!("bad stored refresh time {:?}: {}", raw, e))
                }),
            None => Ok(None),
        }
    }

    fn set_last_refresh(&mut self, at: NaiveDateTime) -> EngineResult<()> {
        self.store
            .set(LAST_REFRESH_KEY, at.format(REMOTE_TIMESTAMP_FORMAT).to_string())?;
        Ok(())
    }

    /// Fetches every lead changed in `[since, now]` and stores it. With
    /// `since = None` the whole remote population is fetched and the cache is
    /// rebuilt from scratch.
    ///
    /// Nothing is written unless every page was fetched.
    ///
    /// # Errors
    ///
    /// Returns the remote error if any fetch fails, or a storage error.
    pub fn refresh(
        &mut self,
        remote: &dyn RemoteStore,
        since: Option<NaiveDateTime>,
        now: NaiveDateTime,
    ) -> EngineResult<usize> {
        let from = since.unwrap_or_default();
        let leads = fetch_changed(remote, from, now, self.page_size)?;
        if since.is_none() {
            self.clear()?;
        }
        let fetched = leads.len();
        for lead in leads {
            if lead.id.is_some() {
                self.put(lead)?;
            }
        }
        self.set_last_refresh(now)?;
        self.store.flush()?;
        info!(
            fetched,
            full = since.is_none(),
            since = %from.format(REMOTE_TIMESTAMP_FORMAT),
            "refreshed lead cache"
        );
        Ok(fetched)
    }

    /// Full refresh.
    ///
    /// # Errors
    ///
    /// See [`LeadCache::refresh`].
    pub fn refresh_full(
        &mut self,
        remote: &dyn RemoteStore,
        now: NaiveDateTime,
    ) -> EngineResult<usize> {
        self.refresh(remote, None, now)
    }

    /// Refreshes from the last refresh time minus `overlap`, or fully if the
    /// cache was never refreshed.
    ///
    /// # Errors
    ///
    /// See [`LeadCache::refresh`].
    pub fn refresh_incremental(
        &mut self,
        remote: &dyn RemoteStore,
        now: NaiveDateTime,
        overlap: Duration,
    ) -> EngineResult<usize> {
        let overlap = ChronoDuration::from_std(overlap).unwrap_or_else(|_| ChronoDuration::zero());
        let since = self.last_refresh()?.map(|at| at - overlap);
        self.refresh(remote, since, now)
    }

    /// Persists pending writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be flushed.
    pub fn flush(&mut self) -> EngineResult<()> {
        Ok(self.store.flush()?)
    }
}

fn remove_from(index: &mut HashMap<String, Vec<RemoteId>>, key: &str, id: &RemoteId) {
    if let Some(ids) = index.get_mut(key) {
        ids.retain(|i| i != id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

fn merge_into(target: &mut LeadRecord, patch: &LeadRecord) {
    if patch.foreign_key.is_some() {
        target.foreign_key = patch.foreign_key.clone();
    }
    if patch.email.is_some() {
        target.email = patch.email.clone();
    }
    if patch.active.is_some() {
        target.active = patch.active;
    }
    if patch.status.is_some() {
        target.status = patch.status.clone();
    }
    if patch.updated_at.is_some() {
        target.updated_at = patch.updated_at;
    }
    for (k, v) in &patch.fields {
        target.fields.insert(k.clone(), v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryRemoteStore;
    use leadsync_protocol::LeadStatus;
    use leadsync_storage::InMemoryStore;

    fn lead(id: u64, fk: &str, email: &str) -> LeadRecord {
        LeadRecord {
            id: Some(RemoteId::from(id)),
            foreign_key: Some(fk.into()),
            email: Some(email.into()),
            active: Some(true),
            ..LeadRecord::default()
        }
    }

    fn unsaved(fk: &str, email: &str) -> LeadRecord {
        LeadRecord {
            id: None,
            ..lead(0, fk, email)
        }
    }

    fn cache_with(leads: Vec<LeadRecord>) -> LeadCache<InMemoryStore> {
        let mut cache = LeadCache::open(InMemoryStore::new(), 2).unwrap();
        for l in leads {
            cache.put(l).unwrap();
        }
        cache
    }

    #[test]
    fn lookups_use_both_indexes() {
        let cache = cache_with(vec![lead(1, "10", "a@x.com"), lead(2, "20", "B@x.com")]);

        assert_eq!(cache.lookup_by_foreign_key("10").unwrap().unwrap().id, Some(RemoteId::from(1)));
        assert_eq!(cache.lookup_by_email("b@X.com").unwrap().unwrap().id, Some(RemoteId::from(2)));
        assert!(cache.lookup_by_foreign_key("30").unwrap().is_none());
        assert_eq!(cache.len().unwrap(), 2);
    }

    #[test]
    fn reopen_rebuilds_indexes() {
        let cache = cache_with(vec![
            lead(1, "10", "a@x.com"),
            lead(2, "20", "b@x.com"),
            lead(3, "30", "c@x.com"),
        ]);
        let reopened = LeadCache::open(cache.into_store(), 2).unwrap();
        assert!(reopened.lookup_by_foreign_key("30").unwrap().is_some());
        assert!(reopened.lookup_by_email("a@x.com").unwrap().is_some());
    }

    #[test]
    fn duplicate_foreign_key_prefers_active() {
        let mut inactive = lead(1, "10", "a@x.com");
        inactive.active = Some(false);
        let cache = cache_with(vec![inactive, lead(2, "10", "b@x.com")]);
        let found = cache.lookup_by_foreign_key("10").unwrap().unwrap();
        assert_eq!(found.id, Some(RemoteId::from(2)));
    }

    #[test]
    fn put_moves_index_entries() {
        let mut cache = cache_with(vec![lead(1, "10", "a@x.com")]);
        cache.put(lead(1, "10", "new@x.com")).unwrap();
        assert!(cache.lookup_by_email("a@x.com").unwrap().is_none());
        assert!(cache.lookup_by_email("new@x.com").unwrap().is_some());
    }

    #[test]
    fn remove_drops_entry_and_index() {
        let mut cache = cache_with(vec![lead(1, "10", "a@x.com")]);
        assert!(cache.remove(&RemoteId::from(1)).unwrap());
        assert!(!cache.remove(&RemoteId::from(1)).unwrap());
        assert!(cache.get(&RemoteId::from(1)).unwrap().is_none());
        assert!(cache.lookup_by_foreign_key("10").unwrap().is_none());
        assert!(cache.lookup_by_email("a@x.com").unwrap().is_none());
    }

    #[test]
    fn upsert_merges_fields() {
        let mut cached = lead(1, "10", "a@x.com");
        cached.fields.insert("city".into(), "Gent".into());
        let mut cache = cache_with(vec![cached]);

        let mut patch = LeadRecord::with_id(RemoteId::from(1));
        patch.active = Some(false);
        cache.upsert(&patch).unwrap();

        let merged = cache.get(&RemoteId::from(1)).unwrap().unwrap();
        assert_eq!(merged.active, Some(false));
        assert_eq!(merged.fields["city"], "Gent");
        assert_eq!(merged.email.as_deref(), Some("a@x.com"));
    }

    #[test]
    fn put_without_id_is_invariant_error() {
        let mut cache = cache_with(vec![]);
        let err = cache.put(LeadRecord::default()).unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
    }

    #[test]
    fn compare_self_is_equal() {
        let cached = lead(1, "10", "a@x.com");
        let mut cache = cache_with(vec![cached.clone()]);
        let mut wanted = cached.clone();
        wanted.id = None;

        let diff = cache.compare(&wanted, None).unwrap();
        assert!(diff.is_equal());
        assert_eq!(diff.len(), 1);
    }

    #[test]
    fn compare_reports_cached_values() {
        let mut cache = cache_with(vec![lead(1, "10", "a@x.com")]);
        let mut wanted = unsaved("10", "A@X.com");
        wanted.fields.insert("firstName".into(), "Ann".into());

        let diff = cache.compare(&wanted, None).unwrap();
        assert!(!diff.contains(&FieldKey::Email));
        assert_eq!(diff.changes().get(&FieldKey::Field("firstName".into())), Some(&None));
        assert_eq!(diff.len(), 2);
    }

    #[test]
    fn compare_links_by_email_when_foreign_key_unknown() {
        let mut cache = cache_with(vec![lead(1, "10", "a@x.com")]);
        let wanted = LeadRecord {
            foreign_key: Some("99".into()),
            email: Some("a@x.com".into()),
            ..LeadRecord::default()
        };
        let diff = cache.compare(&wanted, None).unwrap();
        assert_eq!(diff.remote_id(), Some(&RemoteId::from(1)));
        assert_eq!(diff.changes().get(&FieldKey::ForeignKey), Some(&Some("10".to_string())));
    }

    #[test]
    fn sticky_status_is_not_a_difference() {
        let mut cached = lead(1, "10", "a@x.com");
        cached.status = Some(LeadStatus::ContactWithOpportunity);
        let mut cache = cache_with(vec![cached]);
        let wanted = LeadRecord {
            foreign_key: Some("10".into()),
            email: Some("a@x.com".into()),
            status: Some(LeadStatus::Contact),
            ..LeadRecord::default()
        };
        assert!(cache.compare(&wanted, None).unwrap().is_equal());
    }

    #[test]
    fn remote_fallback_links_and_caches() {
        let remote = MemoryRemoteStore::new();
        let mut inactive = unsaved("10", "a@x.com");
        inactive.active = Some(false);
        let id = remote.seed(inactive);

        let mut cache = cache_with(vec![]);
        let wanted = LeadRecord {
            foreign_key: Some("11".into()),
            email: Some("a@x.com".into()),
            ..LeadRecord::default()
        };
        assert!(!cache.compare(&wanted, None).unwrap().is_linked());

        let diff = cache.compare(&wanted, Some(&remote)).unwrap();
        assert_eq!(diff.remote_id(), Some(&id));
        assert!(cache.get(&id).unwrap().is_some());
    }

    #[test]
    fn remote_fallback_failure_means_unlinked() {
        let remote = MemoryRemoteStore::new();
        remote.fail_next_calls(1);
        let mut cache = cache_with(vec![]);
        let wanted = LeadRecord {
            email: Some("a@x.com".into()),
            ..LeadRecord::default()
        };
        assert!(!cache.compare(&wanted, Some(&remote)).unwrap().is_linked());
    }

    #[test]
    fn refresh_pages_and_records_time() {
        let remote = MemoryRemoteStore::new();
        for i in 0..5 {
            remote.seed(unsaved(&i.to_string(), &format!("{}@x.com", i)));
            remote.advance(Duration::from_secs(1));
        }
        let now = remote.now();
        let mut cache = cache_with(vec![]);

        assert_eq!(cache.refresh_full(&remote, now).unwrap(), 5);
        assert_eq!(cache.len().unwrap(), 5);
        assert_eq!(cache.last_refresh().unwrap(), Some(now));
    }

    #[test]
    fn incremental_refresh_applies_overlap() {
        let remote = MemoryRemoteStore::new();
        let mut cache = cache_with(vec![]);
        cache.refresh_full(&remote, remote.now()).unwrap();

        remote.advance(Duration::from_secs(30));
        remote.seed(unsaved("1", "late@x.com"));
        remote.advance(Duration::from_secs(30));

        // Last refresh was 60s ago; the lead changed 30s ago.
        let fetched = cache
            .refresh_incremental(&remote, remote.now(), Duration::from_secs(600))
            .unwrap();
        assert_eq!(fetched, 1);
        assert!(cache.lookup_by_email("late@x.com").unwrap().is_some());
    }

    #[test]
    fn failed_refresh_keeps_stale_cache() {
        let remote = MemoryRemoteStore::new();
        let mut cache = cache_with(vec![lead(1, "10", "a@x.com")]);
        remote.fail_next_calls(1);
        assert!(cache.refresh_full(&remote, remote.now()).is_err());
        assert_eq!(cache.len().unwrap(), 1);
    }

}
