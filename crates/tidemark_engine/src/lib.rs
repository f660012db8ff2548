//! # Tidemark Engine
//!
//! Local-first synchronization engine for Tidemark.
//!
//! This crate provides:
//! - `SyncEngine`: the application-facing facade (CRUD, status, sync)
//! - `SyncManager`: the push-then-pull cycle state machine
//! - A deterministic field-level conflict resolver
//! - A debounced connectivity monitor
//! - The `RemoteClient` adapter trait and an in-memory mock
//! - An injectable clock for deterministic tests
//!
//! ## Guarantees
//!
//! - Application calls always succeed or fail locally; nothing blocks
//!   on the network
//! - No operation is silently lost or duplicated when connectivity
//!   flaps; replayed creates deduplicate by record key
//! - Divergent local and remote changes converge without intervention
//!   unless the same unclassified field changed on both sides
//! - A crash mid-cycle leaves a recoverable state: stranded operations
//!   return to pending, and an unadvanced checkpoint re-fetches the
//!   same pull batch

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod connectivity;
mod engine;
mod error;
mod manager;
mod remote;
mod resolver;
mod status;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use connectivity::{ConnectivityMonitor, SubscriptionId};
pub use engine::{EngineBuilder, SyncEngine};
pub use error::{EngineError, EngineResult};
pub use manager::{SyncCycleResult, SyncManager, SyncPhase, SyncStats};
pub use remote::{MockRemoteClient, RemoteClient, RemoteError, RemoteErrorKind, RemoteResult};
pub use resolver::{resolve, ConflictInput, FieldCatalog, FieldClass, Resolution};
pub use status::{StatusHub, StatusSubscriptionId, SyncStatus};
