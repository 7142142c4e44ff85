//! sprout-core - Offline-first synchronization core for Sprout
//!
//! This crate contains the durable local store, the mutation journal, the
//! education repository, and the background sync engine shared by all
//! Sprout clients. The local database is the single source of truth; a
//! connectivity-gated engine reconciles it with the remote backend using
//! last-write-wins resolution.

pub mod db;
pub mod error;
pub mod models;
pub mod repo;
pub mod state;
pub mod sync;
pub mod util;

pub use db::{Database, LocalStore};
pub use error::{Error, Result};
pub use models::{JournalEntry, JournalOp, Lesson, Progress, ProgressId, SyncStatus, User};
pub use repo::EducationRepository;
pub use state::{Connectivity, EngineStatus};
pub use sync::{
    GatewayOptions, MockRemoteGateway, ProgressDocument, RemoteGateway, SyncEngine, SyncOptions,
};
