//! Education repository: the sole write entry point over the local store.
//!
//! Application code and the sync engine both mutate Sprout data through
//! this facade. It owns the two write rules the store cannot express on
//! its own: a local progress mutation always commits together with its
//! journal entry, and a downloaded record only lands if it wins
//! last-write-wins resolution.

use std::sync::Arc;

use tokio::sync::watch;

use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::models::{
    clamp_percent, JournalEntry, JournalOp, Lesson, Progress, ProgressId, SyncStatus, User,
};
use crate::sync::gateway::{LessonDocument, ProgressDocument, RemoteProgress, UserDocument};
use crate::sync::resolver::resolve_last_write;
use crate::util::{parse_instant, unix_millis_now};

/// Facade over [`LocalStore`] enforcing the journaling and resolution rules.
pub struct EducationRepository {
    store: Arc<LocalStore>,
}

impl EducationRepository {
    /// Create a repository over the given store.
    #[must_use]
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Apply a local progress increment for a (user, lesson) pair.
    ///
    /// The row and its journal entry commit in one transaction: the first
    /// write for a pair allocates a fresh id and records a create, any
    /// later write keeps the existing id and records an update. The
    /// resulting percentage saturates at the 0..=100 bounds.
    pub async fn update_progress(
        &self,
        user_id: &str,
        lesson_id: &str,
        increment_by: i32,
    ) -> Result<Progress> {
        require_id(user_id, "user id")?;
        require_id(lesson_id, "lesson id")?;

        let existing = self.store.get_progress_by_user(user_id, lesson_id).await?;
        let now = unix_millis_now();

        let (id, current_percent, op, updated_at) = match &existing {
            Some(row) => (
                row.id.clone(),
                i32::from(row.progress_percent),
                JournalOp::UpdateProgress,
                // The wall clock may step backwards; a local write never
                // decreases updated_at.
                now.max(row.updated_at),
            ),
            None => (ProgressId::new(), 0, JournalOp::CreateProgress, now),
        };

        let progress = Progress {
            id,
            user_id: user_id.to_string(),
            lesson_id: lesson_id.to_string(),
            progress_percent: clamp_percent(current_percent.saturating_add(increment_by)),
            updated_at,
            sync_status: SyncStatus::Pending,
        };

        let payload = serde_json::to_string(&ProgressDocument::from(&progress))?;
        self.store
            .insert_progress_with_journal(&progress, op, &payload)
            .await?;

        Ok(progress)
    }

    /// Mark a progress row as acknowledged by the backend.
    ///
    /// A missing row is worth a warning but is not an error: the row may
    /// have been replaced by a downloaded record since the upload snapshot
    /// was taken.
    pub async fn mark_progress_synced(&self, id: &ProgressId) -> Result<()> {
        if !self.store.mark_progress_synced(id).await? {
            tracing::warn!("No progress row found to mark synced for id {id}");
        }
        Ok(())
    }

    /// Remove a journal entry after its upload succeeded.
    pub async fn delete_journal_entry(&self, id: i64) -> Result<()> {
        self.store.delete_journal_entry(id).await
    }

    /// Record a failed upload attempt against a journal entry.
    pub async fn increment_retry_count(&self, id: i64, observed_count: u32) -> Result<()> {
        self.store.increment_retry_count(id, observed_count).await
    }

    /// Journal entries still eligible for upload, in insertion order.
    pub async fn pending_journal(&self, max_retry: u32) -> Result<Vec<JournalEntry>> {
        self.store.pending_journal(max_retry).await
    }

    /// Apply a downloaded progress document under last-write-wins.
    ///
    /// Returns whether the store was updated. Malformed documents are
    /// logged and skipped; they never fail the caller.
    pub async fn upsert_progress_if_newer(&self, doc: &ProgressDocument) -> Result<bool> {
        let remote = match RemoteProgress::try_from(doc) {
            Ok(remote) => remote,
            Err(error) => {
                tracing::warn!("Skipping malformed remote progress document: {error}");
                return Ok(false);
            }
        };

        let local = self
            .store
            .get_progress_by_user(&remote.user_id, &remote.lesson_id)
            .await?;

        match resolve_last_write(local.as_ref(), &remote) {
            Some(merged) => {
                self.store.upsert_progress(&merged).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Unconditionally upsert seeded user documents.
    pub async fn seed_users(&self, docs: Vec<UserDocument>) -> Result<()> {
        for doc in docs {
            if doc.id.trim().is_empty() {
                tracing::warn!("Skipping user document without an id");
                continue;
            }
            let user = User {
                id: doc.id,
                display_name: doc.display_name,
                email: doc.email,
                updated_at: doc
                    .updated_at
                    .as_deref()
                    .and_then(parse_instant)
                    .unwrap_or_else(unix_millis_now),
                sync_status: SyncStatus::Synced,
            };
            self.store.upsert_user(&user).await?;
        }
        Ok(())
    }

    /// Unconditionally upsert seeded lesson documents.
    pub async fn seed_lessons(&self, docs: Vec<LessonDocument>) -> Result<()> {
        for doc in docs {
            if doc.id.trim().is_empty() {
                tracing::warn!("Skipping lesson document without an id");
                continue;
            }
            let lesson = Lesson {
                id: doc.id,
                title: doc.title,
                description: doc.description,
                duration_minutes: doc.duration_minutes,
                updated_at: doc
                    .updated_at
                    .as_deref()
                    .and_then(parse_instant)
                    .unwrap_or_else(unix_millis_now),
                sync_status: SyncStatus::Synced,
            };
            self.store.upsert_lesson(&lesson).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read-only pass-through
    // ------------------------------------------------------------------

    /// Stream of the full users table.
    pub fn users(&self) -> watch::Receiver<Vec<User>> {
        self.store.users()
    }

    /// Stream of the full lessons table.
    pub fn lessons(&self) -> watch::Receiver<Vec<Lesson>> {
        self.store.lessons()
    }

    /// Stream of the full progress table.
    pub fn progress(&self) -> watch::Receiver<Vec<Progress>> {
        self.store.progress()
    }

    /// Stream of the journal row count, shelved entries included.
    pub fn journal_count(&self) -> watch::Receiver<usize> {
        self.store.journal_count()
    }

    /// Progress row for a (user, lesson) pair, if any.
    pub async fn progress_for(&self, user_id: &str, lesson_id: &str) -> Result<Option<Progress>> {
        self.store.get_progress_by_user(user_id, lesson_id).await
    }

    /// Completion percentage for a (user, lesson) pair; 0 when untouched.
    pub async fn progress_percent_for(&self, user_id: &str, lesson_id: &str) -> Result<u8> {
        Ok(self
            .progress_for(user_id, lesson_id)
            .await?
            .map(|row| row.progress_percent)
            .unwrap_or(0))
    }

    /// Sync status for a (user, lesson) pair, if a row exists.
    pub async fn sync_status_for(
        &self,
        user_id: &str,
        lesson_id: &str,
    ) -> Result<Option<SyncStatus>> {
        Ok(self
            .progress_for(user_id, lesson_id)
            .await?
            .map(|row| row.sync_status))
    }
}

fn require_id(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(())
}
