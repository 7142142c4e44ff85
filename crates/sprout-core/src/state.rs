//! Shared state types for connectivity and the sync engine lifecycle.

/// Lifecycle status published by the sync engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineStatus {
    Idle,
    Syncing,
    Error,
}

/// Coarse binary connectivity signal, produced outside the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}
