//! Planned lead operations.

use crate::lead::{LeadRecord, RemoteId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of one source contact for one reconciliation pass.
///
/// The numeric code doubles as conflict priority: when two records target the
/// same lead or email, the one with the lower code gives way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionCode {
    /// Inactive in the source and not (or no longer) active remotely.
    Inactive,
    /// Deactivation that lost a clash against an active record.
    SkipDuplicateInactive,
    /// Lost a clash against another record.
    SkipDuplicateClash,
    /// The source contact is not valid.
    SkipInvalid,
    /// Lead whose contact disappeared from a complete source population.
    DeactivateRemoved,
    /// Lead whose contact became inactive.
    Deactivate,
    /// New lead.
    Create,
    /// Existing lead whose source identifier changes.
    UpdateSourceId,
    /// Existing lead whose email changes.
    UpdateEmail,
    /// Existing lead with other changes.
    UpdateOther,
    /// Existing lead already equal to the contact.
    NoopEqual,
}

impl ActionCode {
    /// Returns the numeric code (also the conflict priority).
    pub fn code(self) -> u8 {
        match self {
            ActionCode::Inactive => 0,
            ActionCode::SkipDuplicateInactive => 1,
            ActionCode::SkipDuplicateClash => 2,
            ActionCode::SkipInvalid => 3,
            ActionCode::DeactivateRemoved => 4,
            ActionCode::Deactivate => 5,
            ActionCode::Create => 6,
            ActionCode::UpdateSourceId => 7,
            ActionCode::UpdateEmail => 8,
            ActionCode::UpdateOther => 9,
            ActionCode::NoopEqual => 10,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => ActionCode::Inactive,
            1 => ActionCode::SkipDuplicateInactive,
            2 => ActionCode::SkipDuplicateClash,
            3 => ActionCode::SkipInvalid,
            4 => ActionCode::DeactivateRemoved,
            5 => ActionCode::Deactivate,
            6 => ActionCode::Create,
            7 => ActionCode::UpdateSourceId,
            8 => ActionCode::UpdateEmail,
            9 => ActionCode::UpdateOther,
            10 => ActionCode::NoopEqual,
            _ => return None,
        })
    }

    /// Returns true if records with this code hold their lead and email
    /// against later records.
    pub fn holds_claims(self) -> bool {
        self.code() > ActionCode::SkipDuplicateClash.code()
    }

    /// Returns the kind of remote call needed, or `None` if nothing is sent.
    pub fn batch_kind(self) -> Option<BatchKind> {
        match self {
            ActionCode::Create => Some(BatchKind::Create),
            ActionCode::DeactivateRemoved
            | ActionCode::Deactivate
            | ActionCode::UpdateSourceId
            | ActionCode::UpdateEmail
            | ActionCode::UpdateOther => Some(BatchKind::Update),
            _ => None,
        }
    }

    /// Returns true for both deactivation codes.
    pub fn is_deactivation(self) -> bool {
        matches!(self, ActionCode::Deactivate | ActionCode::DeactivateRemoved)
    }

    /// Returns the kebab-case name.
    pub fn label(self) -> &'static str {
        match self {
            ActionCode::Inactive => "inactive",
            ActionCode::SkipDuplicateInactive => "skip-duplicate-inactive",
            ActionCode::SkipDuplicateClash => "skip-duplicate-clash",
            ActionCode::SkipInvalid => "skip-invalid",
            ActionCode::DeactivateRemoved => "deactivate-removed",
            ActionCode::Deactivate => "deactivate",
            ActionCode::Create => "create",
            ActionCode::UpdateSourceId => "update-source-id",
            ActionCode::UpdateEmail => "update-email",
            ActionCode::UpdateOther => "update-other",
            ActionCode::NoopEqual => "noop-equal",
        }
    }
}

impl fmt::Display for ActionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Kind of remote write call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    /// Batched update call.
    Update,
    /// Batched create call.
    Create,
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchKind::Update => f.write_str("update"),
            BatchKind::Create => f.write_str("create"),
        }
    }
}

/// One write to send to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadOperation {
    /// Why the write is needed.
    pub code: ActionCode,
    /// Source identifier of the contact (for accounting and logs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
    /// The record to send. Carries an id exactly when `code` is an update.
    pub payload: LeadRecord,
}

impl LeadOperation {
    /// Returns the target remote id for updates.
    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.payload.id.as_ref()
    }

    /// Returns a short label for log lines.
    pub fn describe(&self) -> String {
        format!("{} {}", self.code, self.payload.describe())
    }
}

/// A size-bounded group of operations sent in one remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationBatch {
    /// Which remote call to use.
    pub kind: BatchKind,
    /// The operations, in the order they are sent.
    pub operations: Vec<LeadOperation>,
}

impl OperationBatch {
    /// Returns the number of operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if the batch has no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for code in 0..=10 {
            let action = ActionCode::from_code(code).unwrap();
            assert_eq!(action.code(), code);
        }
        assert_eq!(ActionCode::from_code(11), None);
    }

    #[test]
    fn ordering_follows_codes() {
        assert!(ActionCode::Deactivate < ActionCode::Create);
        assert!(ActionCode::Create < ActionCode::UpdateSourceId);
        assert!(ActionCode::UpdateOther < ActionCode::NoopEqual);
    }

    #[test]
    fn claims_start_above_clash() {
        assert!(!ActionCode::SkipDuplicateInactive.holds_claims());
        assert!(!ActionCode::SkipDuplicateClash.holds_claims());
        assert!(ActionCode::SkipInvalid.holds_claims());
        assert!(ActionCode::NoopEqual.holds_claims());
    }

    #[test]
    fn batch_kinds() {
        assert_eq!(ActionCode::Create.batch_kind(), Some(BatchKind::Create));
        assert_eq!(ActionCode::DeactivateRemoved.batch_kind(), Some(BatchKind::Update));
        assert_eq!(ActionCode::UpdateEmail.batch_kind(), Some(BatchKind::Update));
        assert_eq!(ActionCode::NoopEqual.batch_kind(), None);
        assert_eq!(ActionCode::SkipInvalid.batch_kind(), None);
    }

    #[test]
    fn labels_are_kebab_case() {
        let json = serde_json::to_string(&ActionCode::UpdateSourceId).unwrap();
        assert_eq!(json, "\"update-source-id\"");
        assert_eq!(ActionCode::UpdateSourceId.label(), "update-source-id");
    }
}
