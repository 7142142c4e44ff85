//! Lesson model

use serde::{Deserialize, Serialize};

use super::SyncStatus;

/// A unit of course content, seeded from the backend and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    /// Unique identifier
    pub id: String,
    /// Lesson title
    pub title: String,
    /// Short description of the content
    pub description: String,
    /// Expected duration in minutes
    pub duration_minutes: u32,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Synchronization state
    pub sync_status: SyncStatus,
}

impl Lesson {
    /// Create a synced lesson row, stamped with the current wall clock.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        duration_minutes: u32,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            duration_minutes,
            updated_at: crate::util::unix_millis_now(),
            sync_status: SyncStatus::Synced,
        }
    }
}
