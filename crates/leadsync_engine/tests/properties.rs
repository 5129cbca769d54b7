//! Property tests of the reconciliation pass over generated batches.

use leadsync_engine::{Reconciler, SyncMode};
use leadsync_protocol::{normalize_email, BatchKind, SourceContact};
use leadsync_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::HashSet;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn operations_are_well_formed(
        leads in remote_leads_strategy(12, 10, 16),
        contacts in contacts_strategy(16, 14, 16),
        full in any::<bool>(),
    ) {
        let mut cache = cache_with(leads);
        let config = test_config();
        let mode = if full { SyncMode::Full } else { SyncMode::Incremental };
        let plan = Reconciler::new(&config, &mut cache).plan(&contacts, mode).unwrap();

        for op in plan.operations().unwrap() {
            match op.code.batch_kind() {
                Some(BatchKind::Create) => {
                    prop_assert!(op.payload.id.is_none(), "{}", op.describe())
                }
                Some(BatchKind::Update) => {
                    prop_assert!(op.payload.id.is_some(), "{}", op.describe())
                }
                None => prop_assert!(false, "{} should not be sent", op.code),
            }
        }
    }

    #[test]
    fn no_two_proceeding_records_share_a_target(
        leads in remote_leads_strategy(12, 10, 16),
        contacts in contacts_strategy(16, 14, 16),
        full in any::<bool>(),
    ) {
        let mut cache = cache_with(leads);
        let config = test_config();
        let mode = if full { SyncMode::Full } else { SyncMode::Incremental };
        let plan = Reconciler::new(&config, &mut cache).plan(&contacts, mode).unwrap();

        let mut ids = HashSet::new();
        let mut emails = HashSet::new();
        for record in plan.records().iter().filter(|r| r.code.holds_claims()) {
            if let Some(id) = &record.linked_id {
                prop_assert!(ids.insert(id.clone()), "remote id {} claimed twice", id);
            }
            if let Some(email) = &record.target_email {
                prop_assert!(emails.insert(email.clone()), "email {} claimed twice", email);
            }
        }
    }

    #[test]
    fn clean_batch_converges_after_one_run(contacts in contacts_strategy(12, 20, 40)) {
        let mut seen = HashSet::new();
        let contacts: Vec<SourceContact> = contacts
            .into_iter()
            .filter(|c| match c.email.as_deref().and_then(normalize_email) {
                Some(email) => seen.insert(email),
                None => true,
            })
            .collect();
        let mut harness = TestHarness::new(test_config());

        let summary = harness.job.run(&contacts, SyncMode::Incremental).unwrap();
        prop_assert!(summary.is_clean(), "{}", summary);

        let again = harness.job.plan(&contacts, SyncMode::Incremental).unwrap();
        prop_assert!(again.operations().unwrap().is_empty());
    }
}
