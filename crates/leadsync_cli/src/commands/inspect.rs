//! Inspect command implementation.

use leadsync_engine::LeadCache;
use leadsync_storage::FileStore;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

/// Cache inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Cache file path.
    pub path: String,
    /// Cache file size in bytes.
    pub file_size: u64,
    /// Time of the last successful refresh.
    pub last_refresh: Option<String>,
    /// Number of cached leads.
    pub lead_count: usize,
    /// Number of active leads.
    pub active_count: usize,
    /// Number of leads without a source identifier.
    pub without_foreign_key: usize,
    /// Source identifiers shared by more than one lead.
    pub shared_foreign_keys: usize,
    /// Lead counts per status.
    pub statuses: BTreeMap<String, usize>,
    /// Source identifiers shared by more than one lead, with their lead ids
    /// (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicates: Option<BTreeMap<String, Vec<String>>>,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    show_duplicates: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    info!(path = %path.display(), "inspecting lead cache");
    let result = inspect(path, show_duplicates)?;
    info!(leads = result.lead_count, "inspection complete");
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }
    Ok(())
}

/// Collects statistics for the cache file at `path`.
pub fn inspect(
    path: &Path,
    show_duplicates: bool,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No lead cache found at {:?}", path).into());
    }
    let file_size = std::fs::metadata(path)?.len();
    let cache = LeadCache::open(FileStore::open(path)?, 500)?;

    let mut result = InspectResult {
        path: path.display().to_string(),
        file_size,
        last_refresh: cache.last_refresh()?.map(|at| at.to_string()),
        lead_count: 0,
        active_count: 0,
        without_foreign_key: 0,
        shared_foreign_keys: 0,
        statuses: BTreeMap::new(),
        duplicates: None,
    };

    let mut by_foreign_key: HashMap<String, Vec<String>> = HashMap::new();
    let mut offset = 0;
    loop {
        let page = cache.page(offset, 500)?;
        if page.is_empty() {
            break;
        }
        offset += page.len();

        for lead in page {
            result.lead_count += 1;
            if lead.is_active() {
                result.active_count += 1;
            }
            let status = lead
                .status
                .as_ref()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "(none)".to_string());
            *result.statuses.entry(status).or_insert(0) += 1;

            match lead.foreign_key() {
                Some(fk) => by_foreign_key
                    .entry(fk.to_string())
                    .or_default()
                    .push(lead.id.as_ref().map(ToString::to_string).unwrap_or_default()),
                None => result.without_foreign_key += 1,
            }
        }
    }

    let shared: BTreeMap<String, Vec<String>> = by_foreign_key
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .collect();
    result.shared_foreign_keys = shared.len();
    if show_duplicates {
        result.duplicates = Some(shared);
    }
    Ok(result)
}

fn print_text_output(result: &InspectResult) {
    println!("Lead Cache Inspection");
    println!("=====================");
    println!();
    println!("Path: {}", result.path);
    println!("Size: {} bytes", result.file_size);
    println!(
        "Last refresh: {}",
        result.last_refresh.as_deref().unwrap_or("never")
    );
    println!();
    println!("Leads:");
    println!("  Total:               {}", result.lead_count);
    println!("  Active:              {}", result.active_count);
    println!("  Without source id:   {}", result.without_foreign_key);
    println!("  Shared source ids:   {}", result.shared_foreign_keys);
    println!();
    println!("Statuses:");
    for (status, n) in &result.statuses {
        println!("  {:<28} {}", status, n);
    }

    if let Some(duplicates) = &result.duplicates {
        println!();
        println!("Duplicates:");
        for (fk, ids) in duplicates {
            println!("  {} -> #{}", fk, ids.join(", #"));
        }
    }
}
