//! Status summary command implementation.

use super::open_store;
use serde::Serialize;
use std::path::Path;
use tidemark_protocol::SyncState;
use tidemark_store::ListFilter;

/// Sync health summary for a journal.
#[derive(Debug, Serialize)]
pub struct StatusResult {
    /// Journal path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Active records.
    pub record_count: usize,
    /// Tombstones awaiting remote deletion.
    pub tombstone_count: usize,
    /// Records per sync state.
    pub pending_records: usize,
    /// Records synced.
    pub synced_records: usize,
    /// Records failed.
    pub failed_records: usize,
    /// Records conflicted.
    pub conflict_records: usize,
    /// Operations awaiting transmission.
    pub pending_operations: usize,
    /// Terminally failed operations.
    pub failed_operations: usize,
    /// Open conflicts.
    pub open_conflicts: usize,
    /// Pull checkpoint.
    pub checkpoint: String,
}

/// Runs the status command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;

    let all = store.list(&ListFilter {
        states: None,
        include_deleted: true,
    });
    let count_state = |state: SyncState| {
        all.iter()
            .filter(|r| !r.deleted && r.meta.sync_state == state)
            .count()
    };

    let result = StatusResult {
        path: path.display().to_string(),
        journal_bytes: store.journal_bytes()?,
        record_count: all.iter().filter(|r| !r.deleted).count(),
        tombstone_count: all.iter().filter(|r| r.deleted).count(),
        pending_records: count_state(SyncState::Pending),
        synced_records: count_state(SyncState::Synced),
        failed_records: count_state(SyncState::Failed),
        conflict_records: count_state(SyncState::Conflict),
        pending_operations: store.pending_count(),
        failed_operations: store.failed_count(),
        open_conflicts: store.conflict_count(),
        checkpoint: store.checkpoint().to_string(),
    };

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("Journal: {} ({} bytes)", result.path, result.journal_bytes);
    println!(
        "Records: {} active, {} tombstones",
        result.record_count, result.tombstone_count
    );
    println!(
        "  pending {}, synced {}, failed {}, conflict {}",
        result.pending_records,
        result.synced_records,
        result.failed_records,
        result.conflict_records
    );
    println!(
        "Queue: {} pending, {} failed",
        result.pending_operations, result.failed_operations
    );
    println!("Open conflicts: {}", result.open_conflicts);
    println!("Checkpoint: {}", result.checkpoint);

    Ok(())
}
