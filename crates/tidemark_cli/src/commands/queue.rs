//! Queue dump command implementation.

use super::{format_millis, open_store};
use serde::Serialize;
use std::path::Path;

/// One operation row in the queue dump.
#[derive(Debug, Serialize)]
pub struct OperationRow {
    /// Operation ID.
    pub op_id: u64,
    /// Operation kind.
    pub kind: String,
    /// Target record key.
    pub record_key: String,
    /// Status name.
    pub status: String,
    /// Priority.
    pub priority: i32,
    /// Attempts so far / budget.
    pub retries: String,
    /// Earliest next attempt (Unix millis).
    pub scheduled_at: i64,
    /// Most recent failure message.
    pub last_error: Option<String>,
}

/// Runs the queue command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;

    let mut operations = store.operations();
    if let Some(limit) = limit {
        operations.truncate(limit);
    }

    let rows: Vec<OperationRow> = operations
        .iter()
        .map(|op| OperationRow {
            op_id: op.op_id,
            kind: op.kind.to_string(),
            record_key: op.record_key.to_string(),
            status: format!("{:?}", op.status).to_lowercase(),
            priority: op.priority,
            retries: format!("{}/{}", op.retry_count, op.max_retries),
            scheduled_at: op.scheduled_at,
            last_error: op.last_error.clone(),
        })
        .collect();

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("Queued operations: {}", rows.len());
    for row in &rows {
        println!(
            "  #{}  {}  {}  {}  prio={}  retries={}  next {}",
            row.op_id,
            row.kind,
            row.record_key,
            row.status,
            row.priority,
            row.retries,
            format_millis(row.scheduled_at),
        );
        if let Some(error) = &row.last_error {
            println!("      last error: {error}");
        }
    }

    Ok(())
}
