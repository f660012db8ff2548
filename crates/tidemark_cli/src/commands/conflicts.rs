//! Conflict listing and resolution commands.

use super::{format_millis, now_millis, open_store};
use serde::Serialize;
use std::path::Path;
use tidemark_protocol::{RecordKey, ResolutionChoice};

/// One conflict row in the listing.
#[derive(Debug, Serialize)]
pub struct ConflictRow {
    /// Conflicted record key.
    pub record_key: String,
    /// Conflict type name.
    pub conflict_type: String,
    /// True if the remote side is a deletion.
    pub remote_deleted: bool,
    /// Remote version under review, if any.
    pub remote_version: Option<u64>,
    /// Detection time (Unix millis).
    pub detected_at: i64,
}

/// Lists open conflicts.
pub fn list(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;

    let rows: Vec<ConflictRow> = store
        .open_conflicts()
        .iter()
        .map(|c| ConflictRow {
            record_key: c.record_key.to_string(),
            conflict_type: c.conflict_type.to_string(),
            remote_deleted: c.remote_snapshot.is_none(),
            remote_version: c.remote_version,
            detected_at: c.detected_at,
        })
        .collect();

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No open conflicts.");
        return Ok(());
    }

    println!("Open conflicts: {}", rows.len());
    for row in &rows {
        let remote = if row.remote_deleted {
            "remote deleted".to_string()
        } else {
            format!("remote v{}", row.remote_version.unwrap_or(0))
        };
        println!(
            "  {}  {}  {}  detected {}",
            row.record_key,
            row.conflict_type,
            remote,
            format_millis(row.detected_at),
        );
    }

    Ok(())
}

/// Resolves one conflict by record key.
pub fn resolve(path: &Path, key: &str, keep_local: bool) -> Result<(), Box<dyn std::error::Error>> {
    let record_key =
        RecordKey::parse(key).ok_or_else(|| format!("not a valid record key: {key}"))?;

    let choice = if keep_local {
        ResolutionChoice::KeepLocal
    } else {
        ResolutionChoice::AcceptRemote
    };

    let store = open_store(path)?;
    let resolved = store.resolve_conflict(record_key, choice, now_millis())?;

    match resolved {
        Some(record) => println!(
            "Resolved {} as {}; record is now {}.",
            record_key,
            if keep_local { "keep-local" } else { "accept-remote" },
            record.meta.sync_state,
        ),
        None => println!("Resolved {record_key} as accept-remote; record removed."),
    }
    println!("Run the application (or wait for its next sync) to transmit the outcome.");

    Ok(())
}
