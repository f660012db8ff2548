//! # Tidemark Store
//!
//! Durable local state for the Tidemark sync engine.
//!
//! This crate provides:
//! - `LocalStore`: records, operation queue, checkpoint, and conflicts
//! - An append-only CBOR journal with crash recovery
//! - Storage backends (in-memory and file with an exclusive lock)
//! - The retry backoff schedule
//!
//! ## Durability model
//!
//! Everything lives in one journal file. Each mutating call commits one
//! frame holding both the record change and its queue consequence, so a
//! crash can never persist one without the other; recovery replays the
//! journal and truncates a torn tail. A backup of the journal is a
//! consistent snapshot of records, queue, and checkpoint together.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod config;
mod error;
mod journal;
mod state;
mod store;

pub use backend::{FileBackend, InMemoryBackend, StorageBackend};
pub use config::{BackoffSchedule, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use journal::{compute_crc32, Journal, JournalEntry, FRAME_MAGIC, FRAME_VERSION};
pub use store::{ListFilter, LocalStore, RemoteApplied};
