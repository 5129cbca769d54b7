//! Per-pass record registry and batch conflict resolution.

use leadsync_protocol::{ActionCode, LeadRecord, RemoteId};
use std::collections::HashMap;
use tracing::{debug, warn};

/// What one input record (or synthetic removal) will do in this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordState {
    /// Current classification. May be lowered by later records.
    pub code: ActionCode,
    /// Source identifier, if the contact had a usable one.
    pub foreign_key: Option<String>,
    /// Remote lead this record acts on.
    pub linked_id: Option<RemoteId>,
    /// Normalized email the lead will hold after this record is applied.
    pub target_email: Option<String>,
    /// Normalized email the lead holds before an email change.
    pub origin_email: Option<String>,
    /// What to send, for codes that send anything.
    pub payload: Option<LeadRecord>,
    /// The other half of a source-id/email pair on one lead.
    pub pair_partner: Option<usize>,
    /// Short label for log lines.
    pub label: String,
}

impl RecordState {
    /// Creates a state with no link, email or payload.
    pub fn new(code: ActionCode, label: impl Into<String>) -> Self {
        Self {
            code,
            foreign_key: None,
            linked_id: None,
            target_email: None,
            origin_email: None,
            payload: None,
            pair_partner: None,
            label: label.into(),
        }
    }

    fn is_pair_with(&self, other: &RecordState) -> bool {
        matches!(
            (self.code, other.code),
            (ActionCode::UpdateSourceId, ActionCode::UpdateEmail)
                | (ActionCode::UpdateEmail, ActionCode::UpdateSourceId)
        )
    }
}

/// Ordered record states plus the claims they hold.
///
/// Only records whose code holds claims appear in the two maps, so a record
/// that lost a clash no longer blocks anyone.
#[derive(Debug, Default)]
pub struct Registry {
    records: Vec<RecordState>,
    by_remote_id: HashMap<RemoteId, usize>,
    by_email: HashMap<String, usize>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records in admission order.
    pub fn records(&self) -> &[RecordState] {
        &self.records
    }

    /// Consumes the registry, returning the records.
    pub fn into_records(self) -> Vec<RecordState> {
        self.records
    }

    /// Returns true if a proceeding record holds `id`.
    pub fn claims_remote_id(&self, id: &RemoteId) -> bool {
        self.by_remote_id.contains_key(id)
    }

    /// Index of the record holding `email`, if any.
    pub fn email_holder(&self, email: &str) -> Option<usize> {
        self.by_email.get(email).copied()
    }

    /// Adds a classified record, resolving its clashes with earlier records,
    /// and returns its index.
    pub fn admit(&mut self, record: RecordState) -> usize {
        let idx = self.records.len();
        self.records.push(record);

        self.check_remote_id(idx);
        self.check_email(idx);
        self.check_rename_origin(idx);
        self.register(idx);
        idx
    }

    fn check_remote_id(&mut self, idx: usize) {
        if !self.records[idx].code.holds_claims() {
            return;
        }
        let Some(id) = self.records[idx].linked_id.clone() else {
            return;
        };
        let Some(&other) = self.by_remote_id.get(&id) else {
            return;
        };
        if other == idx {
            return;
        }

        if self.records[idx].is_pair_with(&self.records[other]) {
            let (source_side, email_side) =
                if self.records[idx].code == ActionCode::UpdateSourceId {
                    (idx, other)
                } else {
                    (other, idx)
                };
            self.split_pair(source_side, email_side, &id);
        } else {
            self.resolve_clash(other, idx, "remote id");
        }
    }

    /// Turns the source-id side of a pair into a create of a new lead; the
    /// email side keeps the existing lead.
    fn split_pair(&mut self, source_side: usize, email_side: usize, id: &RemoteId) {
        if self.by_remote_id.get(id) == Some(&source_side) {
            self.by_remote_id.remove(id);
        }
        let record = &mut self.records[source_side];
        record.code = ActionCode::Create;
        record.linked_id = None;
        record.origin_email = None;
        if let Some(payload) = record.payload.as_mut() {
            payload.id = None;
        }
        record.pair_partner = Some(email_side);
        self.records[email_side].pair_partner = Some(source_side);

        debug!(
            create = %self.records[source_side].label,
            update = %self.records[email_side].label,
            remote_id = %id,
            "source id change paired with email change, creating new lead"
        );
    }

    fn check_email(&mut self, idx: usize) {
        if !self.records[idx].code.holds_claims() {
            return;
        }
        let Some(email) = self.records[idx].target_email.clone() else {
            return;
        };
        if let Some(&other) = self.by_email.get(&email) {
            if other != idx {
                self.resolve_clash(other, idx, "email");
            }
        }
    }

    fn check_rename_origin(&mut self, idx: usize) {
        let record = &self.records[idx];
        if record.code != ActionCode::UpdateEmail {
            return;
        }
        let Some(origin) = record.origin_email.clone() else {
            return;
        };
        if record.target_email.as_deref() == Some(origin.as_str()) {
            return;
        }
        let partner = record.pair_partner;
        let Some(&holder) = self.by_email.get(&origin) else {
            return;
        };
        if holder == idx || Some(holder) == partner {
            return;
        }
        if self.records[holder].code > ActionCode::SkipInvalid {
            self.downgrade(holder, idx, "renamed email");
        }
    }

    fn register(&mut self, idx: usize) {
        let record = &self.records[idx];
        if !record.code.holds_claims() {
            return;
        }
        if let Some(id) = record.linked_id.clone() {
            self.by_remote_id.insert(id, idx);
        }
        if let Some(email) = record.target_email.clone() {
            self.by_email.insert(email, idx);
        }
    }

    /// The lower code loses; on a tie the later record loses.
    fn resolve_clash(&mut self, earlier: usize, later: usize, on: &str) {
        let (loser, winner) = if self.records[later].code > self.records[earlier].code {
            (earlier, later)
        } else {
            (later, earlier)
        };
        self.downgrade(loser, winner, on);
    }

    fn downgrade(&mut self, loser: usize, winner: usize, on: &str) {
        let previous = self.records[loser].code;
        if !previous.holds_claims() {
            return;
        }
        let code = if previous.is_deactivation() {
            ActionCode::SkipDuplicateInactive
        } else {
            ActionCode::SkipDuplicateClash
        };

        if code == ActionCode::SkipDuplicateInactive {
            debug!(
                record = %self.records[loser].label,
                kept = %self.records[winner].label,
                on,
                "deactivation superseded"
            );
        } else {
            warn!(
                record = %self.records[loser].label,
                was = %previous,
                kept = %self.records[winner].label,
                kept_as = %self.records[winner].code,
                on,
                "clash: skipping record"
            );
        }

        let record = &mut self.records[loser];
        record.code = code;
        record.payload = None;
        let linked = record.linked_id.clone();
        let email = record.target_email.clone();
        if let Some(id) = linked {
            if self.by_remote_id.get(&id) == Some(&loser) {
                self.by_remote_id.remove(&id);
            }
        }
        if let Some(email) = email {
            if self.by_email.get(&email) == Some(&loser) {
                self.by_email.remove(&email);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(code: ActionCode, label: &str, id: Option<u64>, email: Option<&str>) -> RecordState {
        let mut record = RecordState::new(code, label);
        record.linked_id = id.map(RemoteId::from);
        record.target_email = email.map(str::to_string);
        if code.batch_kind().is_some() {
            let mut payload = LeadRecord::default();
            payload.id = record.linked_id.clone().filter(|_| code != ActionCode::Create);
            payload.email = record.target_email.clone();
            record.payload = Some(payload);
        }
        record
    }

    fn codes(registry: &Registry) -> Vec<ActionCode> {
        registry.records().iter().map(|r| r.code).collect()
    }

    #[test]
    fn later_record_loses_tie() {
        let mut registry = Registry::new();
        registry.admit(state(ActionCode::Create, "a", None, Some("dup@x.com")));
        registry.admit(state(ActionCode::Create, "b", None, Some("dup@x.com")));

        assert_eq!(codes(&registry), vec![ActionCode::Create, ActionCode::SkipDuplicateClash]);
        assert_eq!(registry.email_holder("dup@x.com"), Some(0));
        assert!(registry.records()[1].payload.is_none());
    }

    #[test]
    fn higher_code_wins_regardless_of_order() {
        let mut registry = Registry::new();
        registry.admit(state(ActionCode::UpdateEmail, "a", Some(1), Some("a@x.com")));
        registry.admit(state(ActionCode::NoopEqual, "b", Some(1), Some("b@x.com")));

        assert_eq!(codes(&registry), vec![ActionCode::SkipDuplicateClash, ActionCode::NoopEqual]);
        assert!(registry.claims_remote_id(&RemoteId::from(1)));
        assert_eq!(registry.email_holder("a@x.com"), None);
    }

    #[test]
    fn deactivation_loses_silently() {
        let mut registry = Registry::new();
        registry.admit(state(ActionCode::Deactivate, "a", Some(1), Some("a@x.com")));
        registry.admit(state(ActionCode::UpdateOther, "b", Some(1), Some("a@x.com")));

        assert_eq!(
            codes(&registry),
            vec![ActionCode::SkipDuplicateInactive, ActionCode::UpdateOther]
        );
    }

    #[test]
    fn source_id_and_email_pair_splits() {
        for source_first in [true, false] {
            let mut registry = Registry::new();
            let source = state(ActionCode::UpdateSourceId, "src", Some(5), Some("old@x.com"));
            let mut rename = state(ActionCode::UpdateEmail, "ren", Some(5), Some("new@x.com"));
            rename.origin_email = Some("old@x.com".into());

            let (first, second) = if source_first { (source, rename) } else { (rename, source) };
            registry.admit(first);
            registry.admit(second);

            let mut got = codes(&registry);
            got.sort();
            assert_eq!(got, vec![ActionCode::Create, ActionCode::UpdateEmail]);

            let create = registry
                .records()
                .iter()
                .find(|r| r.code == ActionCode::Create)
                .unwrap();
            assert!(create.linked_id.is_none());
            assert!(create.payload.as_ref().unwrap().id.is_none());
            assert!(create.pair_partner.is_some());
            assert!(registry.claims_remote_id(&RemoteId::from(5)));
        }
    }

    #[test]
    fn rename_downgrades_earlier_holder_of_origin() {
        let mut registry = Registry::new();
        registry.admit(state(ActionCode::UpdateOther, "b", Some(2), Some("x@y.com")));
        let mut rename = state(ActionCode::UpdateEmail, "a", Some(1), Some("z@y.com"));
        rename.origin_email = Some("x@y.com".into());
        registry.admit(rename);

        assert_eq!(codes(&registry), vec![ActionCode::SkipDuplicateClash, ActionCode::UpdateEmail]);
    }

    #[test]
    fn rename_ignores_skip_invalid_holder() {
        let mut registry = Registry::new();
        registry.admit(state(ActionCode::SkipInvalid, "b", None, Some("x@y.com")));
        let mut rename = state(ActionCode::UpdateEmail, "a", Some(1), Some("z@y.com"));
        rename.origin_email = Some("x@y.com".into());
        registry.admit(rename);

        assert_eq!(codes(&registry), vec![ActionCode::SkipInvalid, ActionCode::UpdateEmail]);
    }

    #[test]
    fn inactive_records_hold_nothing() {
        let mut registry = Registry::new();
        registry.admit(state(ActionCode::Inactive, "a", Some(1), Some("a@x.com")));
        registry.admit(state(ActionCode::UpdateOther, "b", Some(1), Some("a@x.com")));

        assert_eq!(codes(&registry), vec![ActionCode::Inactive, ActionCode::UpdateOther]);
    }

    #[test]
    fn skip_invalid_holds_claims_against_clash_codes() {
        let mut registry = Registry::new();
        registry.admit(state(ActionCode::SkipInvalid, "a", Some(1), Some("a@x.com")));
        assert!(registry.claims_remote_id(&RemoteId::from(1)));

        registry.admit(state(ActionCode::Deactivate, "b", Some(1), None));
        assert_eq!(
            codes(&registry),
            vec![ActionCode::SkipDuplicateClash, ActionCode::Deactivate]
        );
    }
}
