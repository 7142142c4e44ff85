//! Last-write-wins resolution for downloaded progress records.

use crate::models::{Progress, ProgressId};
use crate::sync::gateway::RemoteProgress;

/// Decide whether a downloaded record replaces the local row.
///
/// Pure last-write-wins over `updated_at`, compared as instants:
///
/// - no local row: the remote record is inserted as-is;
/// - remote strictly newer: the remote values win, but the row keeps the
///   *local* id so the identity allocated on first local write survives
///   even when the backend knows the pair under a different id;
/// - remote older **or equal**: the local row stands. Ties go to local
///   because under clock skew the user's latest action on this device is
///   the better guess.
///
/// Returns the merged row to write back, or `None` to leave the store
/// untouched.
#[must_use]
pub fn resolve_last_write(local: Option<&Progress>, remote: &RemoteProgress) -> Option<Progress> {
    match local {
        None => {
            let id = ProgressId::from(remote.id.as_str());
            Some(remote.clone().into_progress(id))
        }
        Some(row) if remote.updated_at > row.updated_at => {
            Some(remote.clone().into_progress(row.id.clone()))
        }
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncStatus;

    fn local_row(updated_at: i64, percent: u8) -> Progress {
        Progress {
            id: ProgressId::from("local-id"),
            user_id: "u1".to_string(),
            lesson_id: "l1".to_string(),
            progress_percent: percent,
            updated_at,
            sync_status: SyncStatus::Pending,
        }
    }

    fn remote_record(updated_at: i64, percent: u8) -> RemoteProgress {
        RemoteProgress {
            id: "remote-id".to_string(),
            user_id: "u1".to_string(),
            lesson_id: "l1".to_string(),
            progress_percent: percent,
            updated_at,
        }
    }

    #[test]
    fn missing_local_row_inserts_remote() {
        let merged = resolve_last_write(None, &remote_record(1_000, 80)).unwrap();
        assert_eq!(merged.id.as_str(), "remote-id");
        assert_eq!(merged.progress_percent, 80);
        assert_eq!(merged.sync_status, SyncStatus::Synced);
    }

    #[test]
    fn newer_remote_wins_and_keeps_local_id() {
        let local = local_row(1_000, 30);
        let merged = resolve_last_write(Some(&local), &remote_record(2_000, 80)).unwrap();
        assert_eq!(merged.id.as_str(), "local-id");
        assert_eq!(merged.progress_percent, 80);
        assert_eq!(merged.updated_at, 2_000);
        assert_eq!(merged.sync_status, SyncStatus::Synced);
    }

    #[test]
    fn older_remote_loses() {
        let local = local_row(2_000, 60);
        assert!(resolve_last_write(Some(&local), &remote_record(1_000, 40)).is_none());
    }

    #[test]
    fn equal_timestamps_keep_local() {
        let local = local_row(1_500, 45);
        assert!(resolve_last_write(Some(&local), &remote_record(1_500, 90)).is_none());
    }
}
