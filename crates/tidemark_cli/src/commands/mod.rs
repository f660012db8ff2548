//! CLI command implementations.

pub mod compact;
pub mod conflicts;
pub mod inspect;
pub mod queue;
pub mod status;

use std::path::Path;
use std::time::SystemTime;
use tidemark_protocol::UnixMillis;
use tidemark_store::{LocalStore, StoreConfig};

/// Opens the journal at `path` with default store settings.
pub fn open_store(path: &Path) -> Result<LocalStore, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("no journal found at {}", path.display()).into());
    }
    Ok(LocalStore::open_at_path(path, StoreConfig::default())?)
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> UnixMillis {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

/// Formats a Unix-millisecond timestamp for display.
pub fn format_millis(millis: UnixMillis) -> String {
    // Seconds precision is plenty for operator output.
    format!("{}s since epoch", millis / 1000)
}
