//! Source contacts and the candidate leads built from them.

use crate::error::ValidationError;
use crate::lead::{LeadRecord, LeadStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_active() -> bool {
    true
}

/// A contact as delivered by the source system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceContact {
    /// The source system's own identifier.
    #[serde(default, alias = "id")]
    pub foreign_key: Option<String>,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Whether the contact should be active in the remote store.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Lead status to set, if the source manages it.
    #[serde(default)]
    pub status: Option<LeadStatus>,
    /// Other fields by property name.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl SourceContact {
    /// Creates an active contact.
    pub fn new(foreign_key: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            foreign_key: Some(foreign_key.into()),
            email: Some(email.into()),
            active: true,
            status: None,
            fields: BTreeMap::new(),
        }
    }

    /// Marks the contact inactive.
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Sets a field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets the status.
    pub fn with_status(mut self, status: LeadStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// A lead built from one source contact, not yet linked to a remote lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    foreign_key: String,
    lead: LeadRecord,
}

impl Candidate {
    /// Builds a candidate from a source contact.
    ///
    /// Blank emails are dropped rather than sent as empty strings. A missing
    /// email is not a construction failure; see [`Candidate::email_defect`].
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingForeignKey`] if the contact has no
    /// usable identifier.
    pub fn from_source(contact: &SourceContact) -> Result<Self, ValidationError> {
        let foreign_key = contact
            .foreign_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ValidationError::MissingForeignKey)?
            .to_string();

        let email = contact
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string);

        let lead = LeadRecord {
            id: None,
            foreign_key: Some(foreign_key.clone()),
            email,
            active: Some(contact.active),
            status: contact.status.clone(),
            fields: contact.fields.clone(),
            updated_at: None,
        };

        Ok(Self { foreign_key, lead })
    }

    /// The source identifier.
    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    /// The lead this candidate wants the remote store to hold.
    pub fn lead(&self) -> &LeadRecord {
        &self.lead
    }

    /// Consumes the candidate, returning its lead.
    pub fn into_lead(self) -> LeadRecord {
        self.lead
    }

    /// Returns true if the contact should be active.
    pub fn is_active(&self) -> bool {
        self.lead.is_active()
    }

    /// Reports an unusable email on an active candidate.
    ///
    /// Inactive candidates never need an email: they are only ever
    /// deactivated, which addresses the lead by id.
    pub fn email_defect(&self) -> Option<ValidationError> {
        if !self.is_active() {
            return None;
        }
        match self.lead.email.as_deref() {
            None => Some(ValidationError::MissingEmail {
                foreign_key: self.foreign_key.clone(),
            }),
            Some(email) if !looks_like_email(email) => Some(ValidationError::MalformedEmail {
                foreign_key: self.foreign_key.clone(),
                email: email.to_string(),
            }),
            Some(_) => None,
        }
    }
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_candidate() {
        let contact = SourceContact::new(" 17 ", "a@x.com").with_field("firstName", "Ann");
        let candidate = Candidate::from_source(&contact).unwrap();

        assert_eq!(candidate.foreign_key(), "17");
        assert_eq!(candidate.lead().foreign_key.as_deref(), Some("17"));
        assert_eq!(candidate.lead().active, Some(true));
        assert_eq!(candidate.lead().fields["firstName"], "Ann");
        assert!(candidate.lead().id.is_none());
        assert!(candidate.email_defect().is_none());
    }

    #[test]
    fn missing_foreign_key_fails() {
        let mut contact = SourceContact::new("", "a@x.com");
        assert_eq!(
            Candidate::from_source(&contact),
            Err(ValidationError::MissingForeignKey)
        );
        contact.foreign_key = None;
        assert!(Candidate::from_source(&contact).is_err());
    }

    #[test]
    fn missing_email_is_a_defect_only_when_active() {
        let mut contact = SourceContact::new("3", "  ");
        let candidate = Candidate::from_source(&contact).unwrap();
        assert!(candidate.lead().email.is_none());
        assert!(matches!(
            candidate.email_defect(),
            Some(ValidationError::MissingEmail { .. })
        ));

        contact.active = false;
        let candidate = Candidate::from_source(&contact).unwrap();
        assert!(candidate.email_defect().is_none());
    }

    #[test]
    fn malformed_email_is_a_defect() {
        let candidate = Candidate::from_source(&SourceContact::new("3", "not-an-email")).unwrap();
        assert!(matches!(
            candidate.email_defect(),
            Some(ValidationError::MalformedEmail { .. })
        ));
    }

    #[test]
    fn deserializes_with_defaults() {
        let contact: SourceContact =
            serde_json::from_str(r#"{"id": "8", "email": "b@x.com"}"#).unwrap();
        assert_eq!(contact.foreign_key.as_deref(), Some("8"));
        assert!(contact.active);
        assert!(contact.fields.is_empty());
    }
}
