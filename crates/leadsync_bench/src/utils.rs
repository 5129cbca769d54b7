//! Benchmark utilities.

use leadsync_protocol::{LeadRecord, LeadStatus, RemoteId, SourceContact};
use rand::seq::SliceRandom;
use rand::Rng;

/// Generate `count` cached leads with source ids `0..count`.
pub fn generate_leads(count: usize) -> Vec<LeadRecord> {
    (0..count)
        .map(|i| LeadRecord {
            id: Some(RemoteId::from(i as u64 + 1)),
            foreign_key: Some(i.to_string()),
            email: Some(format!("lead{}@example.com", i)),
            active: Some(true),
            status: Some(LeadStatus::Contact),
            ..LeadRecord::default()
        })
        .collect()
}

/// Generate `count` contacts against leads `0..count`, in random order.
///
/// Roughly `change_ratio` of them differ from their lead: a new email, a
/// deactivation, a field change, or a contact not yet known remotely. Some
/// email changes collide with other contacts.
pub fn generate_contacts(count: usize, change_ratio: f64) -> Vec<SourceContact> {
    let mut rng = rand::thread_rng();
    let mut contacts: Vec<SourceContact> = (0..count)
        .map(|i| {
            let base = SourceContact::new(i.to_string(), format!("lead{}@example.com", i));
            if !rng.gen_bool(change_ratio.clamp(0.0, 1.0)) {
                return base;
            }
            match rng.gen_range(0..5) {
                0 => SourceContact::new(i.to_string(), format!("moved{}@example.com", i)),
                1 => base.inactive(),
                2 => base.with_field("city", "Gent"),
                3 => SourceContact::new(
                    (count + i).to_string(),
                    format!("new{}@example.com", i),
                ),
                _ => SourceContact::new(
                    i.to_string(),
                    format!("lead{}@example.com", rng.gen_range(0..count.max(1))),
                ),
            }
        })
        .collect();
    contacts.shuffle(&mut rng);
    contacts
}
