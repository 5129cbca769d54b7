//! Lead records as held by the remote store.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Timestamp format used by the remote store (`2024-03-01 17:45:00`).
pub const REMOTE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Identifier assigned to a lead by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    /// Creates a remote id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<u64> for RemoteId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Lifecycle status of a lead.
///
/// `ContactWithOpportunity` is set by the remote store once an opportunity is
/// attached and cannot be reverted through the API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LeadStatus {
    /// Not yet qualified.
    Unqualified,
    /// Open lead.
    Open,
    /// Qualified lead.
    Qualified,
    /// Contact.
    Contact,
    /// Contact with an attached opportunity.
    ContactWithOpportunity,
    /// Any status this crate does not know about.
    Other(String),
}

impl LeadStatus {
    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &str {
        match self {
            LeadStatus::Unqualified => "unqualified",
            LeadStatus::Open => "open",
            LeadStatus::Qualified => "qualified",
            LeadStatus::Contact => "contact",
            LeadStatus::ContactWithOpportunity => "contactWithOpp",
            LeadStatus::Other(s) => s,
        }
    }

    /// Returns true for `contact` and `contactWithOpportunity`.
    pub fn is_contact(&self) -> bool {
        matches!(self, LeadStatus::Contact | LeadStatus::ContactWithOpportunity)
    }

    /// Returns true if the status cannot be changed back through the API.
    pub fn is_sticky(&self) -> bool {
        matches!(self, LeadStatus::ContactWithOpportunity)
    }
}

impl From<&str> for LeadStatus {
    fn from(value: &str) -> Self {
        match value {
            "unqualified" => LeadStatus::Unqualified,
            "open" => LeadStatus::Open,
            "qualified" => LeadStatus::Qualified,
            "contact" => LeadStatus::Contact,
            "contactWithOpp" | "contactWithOpportunity" => LeadStatus::ContactWithOpportunity,
            other => LeadStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for LeadStatus {
    fn from(value: String) -> Self {
        LeadStatus::from(value.as_str())
    }
}

impl From<LeadStatus> for String {
    fn from(status: LeadStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of a comparable lead attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FieldKey {
    /// The remote id.
    Id,
    /// The source system identifier (custom field).
    ForeignKey,
    /// The email address.
    Email,
    /// The active flag.
    Active,
    /// The lead status.
    Status,
    /// Any other standard or custom field, by property name.
    Field(String),
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKey::Id => f.write_str("id"),
            FieldKey::ForeignKey => f.write_str("foreignKey"),
            FieldKey::Email => f.write_str("emailAddress"),
            FieldKey::Active => f.write_str("active"),
            FieldKey::Status => f.write_str("leadStatus"),
            FieldKey::Field(name) => f.write_str(name),
        }
    }
}

/// Normalizes an email address for comparison and indexing.
///
/// Returns `None` for blank input.
pub fn normalize_email(email: &str) -> Option<String> {
    let trimmed = email.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// One lead as known to the remote store (or as it should become).
///
/// Every attribute is optional: a lead built from a source contact only
/// defines the attributes the source provides, and attributes left undefined
/// are neither compared nor sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadRecord {
    /// Remote id, absent until the lead is created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RemoteId>,
    /// Source system identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Active flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    /// Lead status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<LeadStatus>,
    /// Other fields by property name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    /// Last modification time reported by the remote store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<NaiveDateTime>,
}

impl LeadRecord {
    /// Creates an empty record with the given remote id.
    pub fn with_id(id: RemoteId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    /// Returns the non-blank foreign key, if any.
    pub fn foreign_key(&self) -> Option<&str> {
        self.foreign_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    /// Returns the normalized email address, if any.
    pub fn normalized_email(&self) -> Option<String> {
        self.email.as_deref().and_then(normalize_email)
    }

    /// Returns true unless the lead is explicitly inactive.
    pub fn is_active(&self) -> bool {
        self.active.unwrap_or(true)
    }

    /// Returns the value of `key` rendered as a string, or `None` if the
    /// record does not define it.
    pub fn value_of(&self, key: &FieldKey) -> Option<String> {
        match key {
            FieldKey::Id => self.id.as_ref().map(|id| id.to_string()),
            FieldKey::ForeignKey => self.foreign_key.clone(),
            FieldKey::Email => self.email.clone(),
            FieldKey::Active => self.active.map(|a| if a { "1" } else { "0" }.to_string()),
            FieldKey::Status => self.status.as_ref().map(|s| s.as_str().to_string()),
            FieldKey::Field(name) => self.fields.get(name).cloned(),
        }
    }

    /// Lists the comparable attributes this record defines, excluding the id.
    pub fn defined_keys(&self) -> Vec<FieldKey> {
        let mut keys = Vec::new();
        if self.foreign_key.is_some() {
            keys.push(FieldKey::ForeignKey);
        }
        if self.email.is_some() {
            keys.push(FieldKey::Email);
        }
        if self.active.is_some() {
            keys.push(FieldKey::Active);
        }
        if self.status.is_some() {
            keys.push(FieldKey::Status);
        }
        keys.extend(self.fields.keys().cloned().map(FieldKey::Field));
        keys
    }

    /// Returns a short label for log lines: `#id`, `fk:…` and email.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(id) = &self.id {
            parts.push(format!("#{}", id));
        }
        if let Some(fk) = self.foreign_key() {
            parts.push(format!("fk:{}", fk));
        }
        if let Some(email) = &self.email {
            parts.push(format!("<{}>", email));
        }
        if parts.is_empty() {
            "(anonymous)".to_string()
        } else {
            parts.join(" ")
        }
    }
}
