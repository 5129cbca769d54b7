//! Plan command implementation.
//!
//! Reconciles a contacts file against a lead snapshot without touching the
//! remote store: the snapshot is loaded into an in-memory remote store and
//! the job runs its refresh and reconciliation steps against it.

use leadsync_engine::{build_batches, LeadSyncJob, MemoryRemoteStore, SyncConfig, SyncMode};
use leadsync_protocol::{LeadRecord, SourceContact};
use leadsync_storage::InMemoryStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Dry-run result.
#[derive(Debug, Serialize)]
pub struct PlanResult {
    /// Reconciliation mode.
    pub mode: SyncMode,
    /// Number of input contacts.
    pub contacts: usize,
    /// Number of leads in the snapshot.
    pub leads: usize,
    /// Record counts per action.
    pub counts: BTreeMap<String, usize>,
    /// Every record with its final classification.
    pub records: Vec<PlannedRecord>,
    /// Batches that would be sent, in order.
    pub batches: Vec<PlannedBatch>,
}

/// One classified record.
#[derive(Debug, Serialize)]
pub struct PlannedRecord {
    /// Numeric action code.
    pub code: u8,
    /// Action name.
    pub action: String,
    /// Record label.
    pub record: String,
    /// Linked remote lead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    /// Email the lead holds afterwards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_email: Option<String>,
}

/// One batch.
#[derive(Debug, Serialize)]
pub struct PlannedBatch {
    /// `create` or `update`.
    pub kind: String,
    /// Number of operations.
    pub operations: usize,
}

/// Runs the plan command.
pub fn run(
    contacts_path: &Path,
    leads_path: Option<&Path>,
    config_path: Option<&Path>,
    full: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let contacts: Vec<SourceContact> = read_json(contacts_path)?;
    let leads: Vec<LeadRecord> = match leads_path {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };
    let config = match config_path {
        Some(path) => SyncConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => SyncConfig::default(),
    };
    let mode = if full { SyncMode::Full } else { SyncMode::Incremental };
    info!(
        contacts = contacts.len(),
        leads = leads.len(),
        mode = ?mode,
        "planning against snapshot"
    );

    let result = build(&contacts, leads, config, mode)?;
    info!(
        records = result.records.len(),
        batches = result.batches.len(),
        "plan ready"
    );
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Plans `contacts` against `leads`.
pub fn build(
    contacts: &[SourceContact],
    leads: Vec<LeadRecord>,
    config: SyncConfig,
    mode: SyncMode,
) -> Result<PlanResult, Box<dyn std::error::Error>> {
    let remote = Arc::new(MemoryRemoteStore::new());
    let lead_count = leads.len();
    for lead in leads {
        remote.seed(lead);
    }
    let batch_size = config.batch_size;

    let mut job = LeadSyncJob::new(remote, InMemoryStore::new(), config)?;
    job.refresh(SyncMode::Full)?;
    let plan = job.plan(contacts, mode)?;
    let batches = build_batches(plan.operations()?, batch_size);

    Ok(PlanResult {
        mode,
        contacts: contacts.len(),
        leads: lead_count,
        counts: plan
            .counts()
            .into_iter()
            .map(|(code, n)| (code.to_string(), n))
            .collect(),
        records: plan
            .records()
            .iter()
            .map(|r| PlannedRecord {
                code: r.code.code(),
                action: r.code.to_string(),
                record: r.label.clone(),
                remote_id: r.linked_id.as_ref().map(ToString::to_string),
                target_email: r.target_email.clone(),
            })
            .collect(),
        batches: batches
            .iter()
            .map(|b| PlannedBatch {
                kind: b.kind.to_string(),
                operations: b.len(),
            })
            .collect(),
    })
}

fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    Ok(serde_json::from_str(&raw)
        .map_err(|e| format!("cannot parse {}: {}", path.display(), e))?)
}

fn print_text_output(result: &PlanResult) {
    println!("Lead Sync Plan");
    println!("==============");
    println!();
    println!("Mode:     {:?}", result.mode);
    println!("Contacts: {}", result.contacts);
    println!("Leads:    {}", result.leads);
    println!();
    println!("Records:");
    for record in &result.records {
        print!("  [{:>2}] {:<24} {}", record.code, record.action, record.record);
        if let Some(id) = &record.remote_id {
            print!(" -> #{}", id);
        }
        println!();
    }
    println!();
    println!("Counts:");
    for (action, n) in &result.counts {
        println!("  {:<24} {}", action, n);
    }
    println!();
    println!("Batches:");
    if result.batches.is_empty() {
        println!("  (nothing to send)");
    }
    for (i, batch) in result.batches.iter().enumerate() {
        println!("  {:>3}. {} x{}", i + 1, batch.kind, batch.operations);
    }
}
