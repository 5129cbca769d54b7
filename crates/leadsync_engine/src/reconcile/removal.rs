//! Removal detection for full passes.

use super::deactivation;
use super::registry::{RecordState, Registry};
use crate::cache::LeadCache;
use crate::error::EngineResult;
use leadsync_protocol::ActionCode;
use leadsync_storage::KeyValueStore;
use std::collections::HashSet;
use tracing::debug;

/// Admits a `deactivate-removed` record for every cached lead that is an
/// active contact, carries a source identifier, and was neither named by
/// the input nor claimed by an input record. Returns how many were admitted.
pub(super) fn detect<S: KeyValueStore>(
    cache: &LeadCache<S>,
    registry: &mut Registry,
    seen_foreign_keys: &HashSet<String>,
    page_size: usize,
) -> EngineResult<usize> {
    let page_size = page_size.max(1);
    let mut offset = 0;
    let mut removed = 0;

    loop {
        let page = cache.page(offset, page_size)?;
        if page.is_empty() {
            break;
        }
        offset += page.len();

        for lead in page {
            let Some(id) = lead.id.clone() else {
                continue;
            };
            let Some(fk) = lead.foreign_key() else {
                continue;
            };
            if !lead.is_active()
                || !lead.status.as_ref().is_some_and(|s| s.is_contact())
                || seen_foreign_keys.contains(fk)
                || registry.claims_remote_id(&id)
            {
                continue;
            }

            debug!(remote_id = %id, foreign_key = fk, "lead removed from source");
            let mut record = RecordState::new(ActionCode::DeactivateRemoved, lead.describe());
            record.foreign_key = Some(fk.to_string());
            record.target_email = lead.normalized_email();
            record.payload = Some(deactivation(id.clone()));
            record.linked_id = Some(id);
            registry.admit(record);
            removed += 1;
        }
    }
    Ok(removed)
}
