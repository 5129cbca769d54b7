//! Property-based test generators using proptest.
//!
//! Values are drawn from small pools so that generated batches actually
//! collide on source identifiers and emails.

use leadsync_protocol::{LeadRecord, LeadStatus, RemoteId, SourceContact};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for an email from a pool of `pool` addresses, in random case.
pub fn email_strategy(pool: u32) -> impl Strategy<Value = String> {
    (0..pool.max(1), any::<bool>()).prop_map(|(i, upper)| {
        let email = format!("user{}@example.com", i);
        if upper {
            email.to_uppercase()
        } else {
            email
        }
    })
}

/// Strategy for a source identifier from a pool of `pool` values.
pub fn foreign_key_strategy(pool: u32) -> impl Strategy<Value = String> {
    (0..pool.max(1)).prop_map(|i| (100 + i).to_string())
}

/// Strategy for a lead status, mostly `contact`.
pub fn status_strategy() -> impl Strategy<Value = LeadStatus> {
    prop_oneof![
        6 => Just(LeadStatus::Contact),
        2 => Just(LeadStatus::ContactWithOpportunity),
        1 => Just(LeadStatus::Open),
    ]
}

/// Strategy for a first name, sometimes absent.
fn first_name_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of(prop::sample::select(vec!["Ann", "Bo", "Cy"]).prop_map(str::to_string))
}

/// Strategy for one source contact. Mostly active, occasionally without
/// email.
pub fn contact_strategy(key_pool: u32, email_pool: u32) -> impl Strategy<Value = SourceContact> {
    (
        foreign_key_strategy(key_pool),
        prop::option::weighted(0.95, email_strategy(email_pool)),
        prop::bool::weighted(0.85),
        first_name_strategy(),
    )
        .prop_map(|(fk, email, active, first_name)| {
            let mut contact = SourceContact::new(fk, "");
            contact.email = email;
            contact.active = active;
            if let Some(name) = first_name {
                contact.fields.insert("firstName".into(), name);
            }
            contact
        })
}

/// Strategy for a batch of contacts with distinct source identifiers.
pub fn contacts_strategy(
    max: usize,
    key_pool: u32,
    email_pool: u32,
) -> impl Strategy<Value = Vec<SourceContact>> {
    prop::collection::vec(contact_strategy(key_pool, email_pool), 0..=max).prop_map(|contacts| {
        let mut by_key = BTreeMap::new();
        for contact in contacts {
            if let Some(fk) = contact.foreign_key.clone() {
                by_key.entry(fk).or_insert(contact);
            }
        }
        by_key.into_values().collect()
    })
}

/// Strategy for the leads a remote store holds: distinct ids and emails,
/// possibly shared source identifiers, ids starting at 1.
pub fn remote_leads_strategy(
    max: usize,
    key_pool: u32,
    email_pool: u32,
) -> impl Strategy<Value = Vec<LeadRecord>> {
    prop::collection::btree_map(
        (0..email_pool.max(1)).prop_map(|i| format!("user{}@example.com", i)),
        (
            foreign_key_strategy(key_pool),
            prop::bool::weighted(0.8),
            status_strategy(),
            first_name_strategy(),
        ),
        0..=max,
    )
    .prop_map(|by_email| {
        by_email
            .into_iter()
            .enumerate()
            .map(|(i, (email, (fk, active, status, first_name)))| {
                let mut lead = LeadRecord {
                    id: Some(RemoteId::from(i as u64 + 1)),
                    foreign_key: Some(fk),
                    email: Some(email),
                    active: Some(active),
                    status: Some(status),
                    ..LeadRecord::default()
                };
                if let Some(name) = first_name {
                    lead.fields.insert("firstName".into(), name);
                }
                lead
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;
    use std::collections::HashSet;

    #[test]
    fn contacts_have_distinct_keys() {
        let mut runner = TestRunner::default();
        for _ in 0..50 {
            let contacts = contacts_strategy(20, 8, 8)
                .new_tree(&mut runner)
                .unwrap()
                .current();
            let keys: HashSet<_> = contacts.iter().map(|c| c.foreign_key.clone()).collect();
            assert_eq!(keys.len(), contacts.len());
        }
    }

    #[test]
    fn remote_leads_have_distinct_emails_and_ids() {
        let mut runner = TestRunner::default();
        for _ in 0..50 {
            let leads = remote_leads_strategy(20, 8, 30)
                .new_tree(&mut runner)
                .unwrap()
                .current();
            let emails: HashSet<_> = leads.iter().map(|l| l.email.clone()).collect();
            let ids: HashSet<_> = leads.iter().map(|l| l.id.clone()).collect();
            assert_eq!(emails.len(), leads.len());
            assert_eq!(ids.len(), leads.len());
        }
    }
}
