//! Compact command implementation.

use super::open_store;
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let before = store.journal_bytes()?;

    if dry_run {
        println!("Journal is {before} bytes; compaction would rewrite it as one snapshot.");
        return Ok(());
    }

    store.compact()?;
    let after = store.journal_bytes()?;
    let reclaimed = before.saturating_sub(after);
    println!("Compacted: {before} -> {after} bytes ({reclaimed} reclaimed).");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_protocol::Payload;
    use tidemark_store::{LocalStore, StoreConfig};

    #[test]
    fn compact_shrinks_a_churned_journal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.tm");

        {
            let store = LocalStore::open_at_path(&path, StoreConfig::default()).unwrap();
            let record = store
                .create(Payload::default().with_text("name", "a"), None, 0)
                .unwrap();
            for i in 0..25 {
                store
                    .update(
                        record.key,
                        Payload::default().with_integer("rev", i),
                        i,
                    )
                    .unwrap();
            }
        }

        run(&path, false).unwrap();

        let store = LocalStore::open_at_path(&path, StoreConfig::default()).unwrap();
        assert_eq!(store.list(&tidemark_store::ListFilter::all()).len(), 1);
    }
}
