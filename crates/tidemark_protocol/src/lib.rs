//! # Tidemark Protocol
//!
//! Shared data types for the Tidemark local-first sync engine.
//!
//! This crate provides:
//! - `Record` with per-record sync metadata
//! - `Payload` as a schema-tagged, field-addressable CBOR value
//! - `QueuedOperation` for the outbound operation queue
//! - `ConflictRecord` for detected local/remote divergence
//! - Pull/push wire shapes (`RemoteChange`, `ChangeBatch`, `Checkpoint`)
//!
//! This is a pure data crate with no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod operation;
mod payload;
mod record;
mod remote;

pub use conflict::{ConflictRecord, ConflictType, ResolutionChoice, ResolutionStrategy};
pub use operation::{OperationKind, OperationStatus, QueuedOperation};
pub use payload::Payload;
pub use record::{Record, RecordKey, SyncMeta, SyncState, UnixMillis};
pub use remote::{ChangeBatch, Checkpoint, RemoteAck, RemoteChange};
