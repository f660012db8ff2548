//! Inspect command implementation.

use super::{format_millis, open_store};
use serde::Serialize;
use std::path::Path;
use tidemark_store::ListFilter;

/// One record row in the inspection output.
#[derive(Debug, Serialize)]
pub struct RecordRow {
    /// Record key.
    pub key: String,
    /// Natural business key, if any.
    pub natural_key: Option<String>,
    /// Sync state name.
    pub sync_state: String,
    /// Remote identifier, if pushed.
    pub remote_id: Option<String>,
    /// Working version.
    pub remote_version: u64,
    /// Last reconciled version.
    pub synced_version: u64,
    /// Whether the row is a tombstone.
    pub deleted: bool,
    /// Number of payload fields.
    pub field_count: usize,
    /// Last local mutation time (Unix millis).
    pub last_modified_at: i64,
}

/// Inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Journal path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Records included.
    pub records: Vec<RecordRow>,
}

/// Runs the inspect command.
pub fn run(path: &Path, tombstones: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;

    let filter = ListFilter {
        states: None,
        include_deleted: tombstones,
    };
    let records = store
        .list(&filter)
        .into_iter()
        .map(|r| RecordRow {
            key: r.key.to_string(),
            natural_key: r.natural_key.clone(),
            sync_state: r.meta.sync_state.to_string(),
            remote_id: r.meta.remote_id.clone(),
            remote_version: r.meta.remote_version,
            synced_version: r.meta.synced_version,
            deleted: r.deleted,
            field_count: r.payload.len(),
            last_modified_at: r.meta.last_modified_at,
        })
        .collect();

    let result = InspectResult {
        path: path.display().to_string(),
        journal_bytes: store.journal_bytes()?,
        records,
    };

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("Journal: {} ({} bytes)", result.path, result.journal_bytes);
    println!("Records: {}", result.records.len());
    for row in &result.records {
        let tombstone = if row.deleted { " [tombstone]" } else { "" };
        println!(
            "  {}  {}  v{}/{}  remote={}  modified {}{}",
            row.key,
            row.sync_state,
            row.remote_version,
            row.synced_version,
            row.remote_id.as_deref().unwrap_or("-"),
            format_millis(row.last_modified_at),
            tombstone,
        );
        if let Some(natural) = &row.natural_key {
            println!("      natural key: {natural}");
        }
    }

    Ok(())
}
