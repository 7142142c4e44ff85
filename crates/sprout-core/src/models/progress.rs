//! Lesson progress model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A unique identifier for a progress record.
///
/// Allocated locally as a UUID v4 on first creation and stable thereafter;
/// the backend never reassigns it. Stored as an opaque string because
/// records accepted from the backend may carry ids minted elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgressId(String);

impl ProgressId {
    /// Create a new unique progress ID using UUID v4
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProgressId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProgressId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProgressId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ProgressId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Synchronization state of a locally stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Row matches what the backend has acknowledged
    Synced,
    /// Row has local changes awaiting upload
    Pending,
    /// Row's last upload attempt failed
    Failed,
}

impl SyncStatus {
    /// Database tag for this status
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending" => Ok(Self::Pending),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown sync status '{other}'")),
        }
    }
}

/// Per-user completion state for a single lesson.
///
/// At most one row exists per (user, lesson) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Unique identifier
    pub id: ProgressId,
    /// User this record belongs to
    pub user_id: String,
    /// Lesson this record tracks
    pub lesson_id: String,
    /// Completion percentage, always within 0..=100
    pub progress_percent: u8,
    /// Last mutation timestamp (Unix ms)
    pub updated_at: i64,
    /// Synchronization state
    pub sync_status: SyncStatus,
}

impl Progress {
    /// Create a new pending progress record for the given pair.
    #[must_use]
    pub fn new(user_id: impl Into<String>, lesson_id: impl Into<String>, percent: u8) -> Self {
        Self {
            id: ProgressId::new(),
            user_id: user_id.into(),
            lesson_id: lesson_id.into(),
            progress_percent: percent.min(100),
            updated_at: crate::util::unix_millis_now(),
            sync_status: SyncStatus::Pending,
        }
    }
}

/// Clamp an arbitrary percentage computation into the valid 0..=100 range.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // clamped to 0..=100 first
pub fn clamp_percent(value: i32) -> u8 {
    value.clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_id_unique() {
        assert_ne!(ProgressId::new(), ProgressId::new());
    }

    #[test]
    fn progress_id_preserves_foreign_values() {
        let id = ProgressId::from("p1");
        assert_eq!(id.as_str(), "p1");
        assert_eq!(id.to_string(), "p1");
    }

    #[test]
    fn sync_status_round_trips_through_tags() {
        for status in [SyncStatus::Synced, SyncStatus::Pending, SyncStatus::Failed] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("gone".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn new_progress_is_pending() {
        let progress = Progress::new("u1", "l1", 10);
        assert_eq!(progress.progress_percent, 10);
        assert_eq!(progress.sync_status, SyncStatus::Pending);
        assert!(progress.updated_at > 0);
    }

    #[test]
    fn clamp_percent_saturates() {
        assert_eq!(clamp_percent(-30), 0);
        assert_eq!(clamp_percent(0), 0);
        assert_eq!(clamp_percent(55), 55);
        assert_eq!(clamp_percent(100), 100);
        assert_eq!(clamp_percent(640), 100);
    }
}
