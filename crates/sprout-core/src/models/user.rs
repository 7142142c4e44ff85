//! User model

use serde::{Deserialize, Serialize};

use super::SyncStatus;

/// A learner account, seeded from the backend and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier
    pub id: String,
    /// Name shown in the app
    pub display_name: String,
    /// Contact address
    pub email: String,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Synchronization state
    pub sync_status: SyncStatus,
}

impl User {
    /// Create a synced user row, stamped with the current wall clock.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            email: email.into(),
            updated_at: crate::util::unix_millis_now(),
            sync_status: SyncStatus::Synced,
        }
    }
}
