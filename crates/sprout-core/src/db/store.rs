//! Local store: the durable single source of truth for Sprout data.
//!
//! Owns all SQL over the four tables and publishes a change stream per
//! table. Every committing write refreshes the affected streams, so
//! subscribers always converge on the latest table contents.

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // percents and retry counters fit their narrow types

use std::str::FromStr;

use libsql::params;
use tokio::sync::{watch, Mutex};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{JournalEntry, JournalOp, Lesson, Progress, ProgressId, SyncStatus, User};

const PROGRESS_COLUMNS: &str = "id, user_id, lesson_id, progress_percent, updated_at, sync_status";
const JOURNAL_COLUMNS: &str = "id, op, entity_id, payload, retry_count, created_at";

const UPSERT_PROGRESS: &str = "INSERT OR REPLACE INTO progress
     (id, user_id, lesson_id, progress_percent, updated_at, sync_status)
     VALUES (?, ?, ?, ?, ?, ?)";

/// Durable store over the users, lessons, progress, and journal tables.
///
/// Writes are serialized through an internal lock; reads for the change
/// streams re-run the corresponding table query after each commit.
pub struct LocalStore {
    db: Mutex<Database>,
    users_tx: watch::Sender<Vec<User>>,
    lessons_tx: watch::Sender<Vec<Lesson>>,
    progress_tx: watch::Sender<Vec<Progress>>,
    journal_count_tx: watch::Sender<usize>,
}

impl LocalStore {
    /// Wrap an open database and publish the initial table snapshots.
    pub async fn new(db: Database) -> Result<Self> {
        let (users_tx, _) = watch::channel(Vec::new());
        let (lessons_tx, _) = watch::channel(Vec::new());
        let (progress_tx, _) = watch::channel(Vec::new());
        let (journal_count_tx, _) = watch::channel(0);

        let store = Self {
            db: Mutex::new(db),
            users_tx,
            lessons_tx,
            progress_tx,
            journal_count_tx,
        };

        // The database may be a reopened file with existing rows.
        store.refresh_users().await?;
        store.refresh_lessons().await?;
        store.refresh_progress().await?;
        store.refresh_journal_count().await?;

        Ok(store)
    }

    // ------------------------------------------------------------------
    // Change streams
    // ------------------------------------------------------------------

    /// Stream of the full users table; yields the current contents immediately.
    pub fn users(&self) -> watch::Receiver<Vec<User>> {
        self.users_tx.subscribe()
    }

    /// Stream of the full lessons table; yields the current contents immediately.
    pub fn lessons(&self) -> watch::Receiver<Vec<Lesson>> {
        self.lessons_tx.subscribe()
    }

    /// Stream of the full progress table; yields the current contents immediately.
    pub fn progress(&self) -> watch::Receiver<Vec<Progress>> {
        self.progress_tx.subscribe()
    }

    /// Stream of the journal row count.
    ///
    /// Counts every journal row, including entries shelved at the retry
    /// cap; the processing scan in [`LocalStore::pending_journal`] filters
    /// those out.
    pub fn journal_count(&self) -> watch::Receiver<usize> {
        self.journal_count_tx.subscribe()
    }

    // ------------------------------------------------------------------
    // Users and lessons
    // ------------------------------------------------------------------

    /// Insert or replace a user row.
    pub async fn upsert_user(&self, user: &User) -> Result<()> {
        {
            let db = self.db.lock().await;
            db.connection()
                .execute(
                    "INSERT OR REPLACE INTO users
                     (id, display_name, email, updated_at, sync_status)
                     VALUES (?, ?, ?, ?, ?)",
                    params![
                        user.id.as_str(),
                        user.display_name.as_str(),
                        user.email.as_str(),
                        user.updated_at,
                        user.sync_status.as_str()
                    ],
                )
                .await?;
        }
        self.refresh_users().await
    }

    /// Insert or replace a lesson row.
    pub async fn upsert_lesson(&self, lesson: &Lesson) -> Result<()> {
        {
            let db = self.db.lock().await;
            db.connection()
                .execute(
                    "INSERT OR REPLACE INTO lessons
                     (id, title, description, duration_minutes, updated_at, sync_status)
                     VALUES (?, ?, ?, ?, ?, ?)",
                    params![
                        lesson.id.as_str(),
                        lesson.title.as_str(),
                        lesson.description.as_str(),
                        i64::from(lesson.duration_minutes),
                        lesson.updated_at,
                        lesson.sync_status.as_str()
                    ],
                )
                .await?;
        }
        self.refresh_lessons().await
    }

    /// List all users, ordered by display name.
    pub async fn list_users(&self) -> Result<Vec<User>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT id, display_name, email, updated_at, sync_status
                 FROM users ORDER BY display_name",
                (),
            )
            .await?;

        let mut users = Vec::new();
        while let Some(row) = rows.next().await? {
            users.push(Self::parse_user(&row)?);
        }
        Ok(users)
    }

    /// List all lessons, ordered by title.
    pub async fn list_lessons(&self) -> Result<Vec<Lesson>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT id, title, description, duration_minutes, updated_at, sync_status
                 FROM lessons ORDER BY title",
                (),
            )
            .await?;

        let mut lessons = Vec::new();
        while let Some(row) = rows.next().await? {
            lessons.push(Self::parse_lesson(&row)?);
        }
        Ok(lessons)
    }

    // ------------------------------------------------------------------
    // Progress
    // ------------------------------------------------------------------

    /// Get the progress row for a (user, lesson) pair, if any.
    pub async fn get_progress_by_user(
        &self,
        user_id: &str,
        lesson_id: &str,
    ) -> Result<Option<Progress>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                &format!("SELECT {PROGRESS_COLUMNS} FROM progress WHERE user_id = ? AND lesson_id = ?"),
                [user_id, lesson_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_progress(&row)?)),
            None => Ok(None),
        }
    }

    /// List all progress rows, most recently updated first.
    pub async fn list_progress(&self) -> Result<Vec<Progress>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                &format!("SELECT {PROGRESS_COLUMNS} FROM progress ORDER BY updated_at DESC, id"),
                (),
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_progress(&row)?);
        }
        Ok(records)
    }

    /// Insert or replace a single progress row without journaling.
    ///
    /// This is the write path for records accepted from the backend; local
    /// mutations go through [`LocalStore::insert_progress_with_journal`].
    pub async fn upsert_progress(&self, progress: &Progress) -> Result<()> {
        {
            let db = self.db.lock().await;
            db.connection()
                .execute(
                    UPSERT_PROGRESS,
                    params![
                        progress.id.as_str(),
                        progress.user_id.as_str(),
                        progress.lesson_id.as_str(),
                        i64::from(progress.progress_percent),
                        progress.updated_at,
                        progress.sync_status.as_str()
                    ],
                )
                .await?;
        }
        self.refresh_progress().await
    }

    /// Commit a progress upsert and its journal entry as one transaction.
    ///
    /// Either both writes land or neither does. Returns the id assigned to
    /// the journal entry.
    pub async fn insert_progress_with_journal(
        &self,
        progress: &Progress,
        op: JournalOp,
        payload: &str,
    ) -> Result<i64> {
        let journal_id = {
            let db = self.db.lock().await;
            let conn = db.connection();

            conn.execute("BEGIN IMMEDIATE", ()).await?;

            if let Err(e) = conn
                .execute(
                    UPSERT_PROGRESS,
                    params![
                        progress.id.as_str(),
                        progress.user_id.as_str(),
                        progress.lesson_id.as_str(),
                        i64::from(progress.progress_percent),
                        progress.updated_at,
                        progress.sync_status.as_str()
                    ],
                )
                .await
            {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e.into());
            }

            if let Err(e) = conn
                .execute(
                    "INSERT INTO sync_journal (op, entity_id, payload, retry_count, created_at)
                     VALUES (?, ?, ?, 0, ?)",
                    params![
                        op.as_str(),
                        progress.id.as_str(),
                        payload,
                        progress.updated_at
                    ],
                )
                .await
            {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e.into());
            }

            let journal_id = conn.last_insert_rowid();

            if let Err(e) = conn.execute("COMMIT", ()).await {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e.into());
            }

            journal_id
        };

        self.refresh_progress().await?;
        self.refresh_journal_count().await?;
        Ok(journal_id)
    }

    /// Mark a progress row as synced. Returns false when no row matched.
    pub async fn mark_progress_synced(&self, id: &ProgressId) -> Result<bool> {
        let updated = {
            let db = self.db.lock().await;
            db.connection()
                .execute(
                    "UPDATE progress SET sync_status = ? WHERE id = ?",
                    params![SyncStatus::Synced.as_str(), id.as_str()],
                )
                .await?
        };

        if updated > 0 {
            self.refresh_progress().await?;
        }
        Ok(updated > 0)
    }

    // ------------------------------------------------------------------
    // Journal
    // ------------------------------------------------------------------

    /// Journal entries still eligible for upload, in insertion order.
    ///
    /// Entries whose retry count has reached `max_retry` are excluded but
    /// kept in the table for inspection.
    pub async fn pending_journal(&self, max_retry: u32) -> Result<Vec<JournalEntry>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                &format!(
                    "SELECT {JOURNAL_COLUMNS} FROM sync_journal
                     WHERE retry_count < ? ORDER BY id ASC"
                ),
                params![i64::from(max_retry)],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_journal_entry(&row)?);
        }
        Ok(entries)
    }

    /// Every journal row regardless of retry count, in insertion order.
    pub async fn journal_entries(&self) -> Result<Vec<JournalEntry>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                &format!("SELECT {JOURNAL_COLUMNS} FROM sync_journal ORDER BY id ASC"),
                (),
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_journal_entry(&row)?);
        }
        Ok(entries)
    }

    /// Delete a journal entry by id.
    pub async fn delete_journal_entry(&self, id: i64) -> Result<()> {
        {
            let db = self.db.lock().await;
            db.connection()
                .execute("DELETE FROM sync_journal WHERE id = ?", params![id])
                .await?;
        }
        self.refresh_journal_count().await
    }

    /// Bump a journal entry's retry count from the value the caller observed.
    ///
    /// The observed count guards the write: if another task already bumped
    /// the entry, this call is a no-op rather than a double increment.
    pub async fn increment_retry_count(&self, id: i64, observed_count: u32) -> Result<()> {
        {
            let db = self.db.lock().await;
            db.connection()
                .execute(
                    "UPDATE sync_journal SET retry_count = ? WHERE id = ? AND retry_count = ?",
                    params![
                        i64::from(observed_count) + 1,
                        id,
                        i64::from(observed_count)
                    ],
                )
                .await?;
        }
        self.refresh_journal_count().await
    }

    // ------------------------------------------------------------------
    // Row mapping and stream refresh
    // ------------------------------------------------------------------

    fn parse_status(raw: &str) -> Result<SyncStatus> {
        SyncStatus::from_str(raw).map_err(Error::InvalidInput)
    }

    fn parse_user(row: &libsql::Row) -> Result<User> {
        Ok(User {
            id: row.get(0)?,
            display_name: row.get(1)?,
            email: row.get(2)?,
            updated_at: row.get(3)?,
            sync_status: Self::parse_status(&row.get::<String>(4)?)?,
        })
    }

    fn parse_lesson(row: &libsql::Row) -> Result<Lesson> {
        let duration: i64 = row.get(3)?;
        Ok(Lesson {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            duration_minutes: duration.max(0) as u32,
            updated_at: row.get(4)?,
            sync_status: Self::parse_status(&row.get::<String>(5)?)?,
        })
    }

    fn parse_progress(row: &libsql::Row) -> Result<Progress> {
        let percent: i64 = row.get(3)?;
        Ok(Progress {
            id: ProgressId::from(row.get::<String>(0)?),
            user_id: row.get(1)?,
            lesson_id: row.get(2)?,
            progress_percent: percent.clamp(0, 100) as u8,
            updated_at: row.get(4)?,
            sync_status: Self::parse_status(&row.get::<String>(5)?)?,
        })
    }

    fn parse_journal_entry(row: &libsql::Row) -> Result<JournalEntry> {
        let retry_count: i64 = row.get(4)?;
        Ok(JournalEntry {
            id: row.get(0)?,
            op: JournalOp::from_str(&row.get::<String>(1)?).map_err(Error::InvalidInput)?,
            entity_id: row.get(2)?,
            payload: row.get(3)?,
            retry_count: retry_count.max(0) as u32,
            created_at: row.get(5)?,
        })
    }

    async fn refresh_users(&self) -> Result<()> {
        let users = self.list_users().await?;
        self.users_tx.send_replace(users);
        Ok(())
    }

    async fn refresh_lessons(&self) -> Result<()> {
        let lessons = self.list_lessons().await?;
        self.lessons_tx.send_replace(lessons);
        Ok(())
    }

    async fn refresh_progress(&self) -> Result<()> {
        let records = self.list_progress().await?;
        self.progress_tx.send_replace(records);
        Ok(())
    }

    async fn refresh_journal_count(&self) -> Result<()> {
        let count = {
            let db = self.db.lock().await;
            let mut rows = db
                .connection()
                .query("SELECT COUNT(*) FROM sync_journal", ())
                .await?;
            match rows.next().await? {
                Some(row) => row.get::<i64>(0)?,
                None => 0,
            }
        };
        self.journal_count_tx
            .send_replace(usize::try_from(count).unwrap_or_default());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> LocalStore {
        let db = Database::open_in_memory().await.unwrap();
        LocalStore::new(db).await.unwrap()
    }

    fn sample_progress(user_id: &str, lesson_id: &str, percent: u8) -> Progress {
        Progress::new(user_id, lesson_id, percent)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upsert_and_list_users() {
        let store = setup().await;

        store
            .upsert_user(&User::new("u1", "Ada", "ada@example.com"))
            .await
            .unwrap();
        store
            .upsert_user(&User::new("u2", "Blaise", "blaise@example.com"))
            .await
            .unwrap();

        let users = store.list_users().await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].display_name, "Ada");

        // Upsert by primary key replaces, never duplicates
        store
            .upsert_user(&User::new("u1", "Ada L.", "ada@example.com"))
            .await
            .unwrap();
        let users = store.list_users().await.unwrap();
        assert_eq!(users.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_progress_and_journal_commit_together() {
        let store = setup().await;
        let progress = sample_progress("u1", "l1", 10);

        let journal_id = store
            .insert_progress_with_journal(&progress, JournalOp::CreateProgress, "{}")
            .await
            .unwrap();

        let stored = store
            .get_progress_by_user("u1", "l1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, progress.id);
        assert_eq!(stored.progress_percent, 10);

        let entries = store.journal_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, journal_id);
        assert_eq!(entries[0].entity_id, progress.id.as_str());
        assert_eq!(entries[0].op, JournalOp::CreateProgress);
        assert_eq!(entries[0].retry_count, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mark_progress_synced() {
        let store = setup().await;
        let progress = sample_progress("u1", "l1", 10);
        store.upsert_progress(&progress).await.unwrap();

        assert!(store.mark_progress_synced(&progress.id).await.unwrap());
        let stored = store
            .get_progress_by_user("u1", "l1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Synced);

        // Unknown id is reported, not an error
        assert!(!store
            .mark_progress_synced(&ProgressId::from("missing"))
            .await
            .unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pending_journal_filters_and_orders() {
        let store = setup().await;

        let first = sample_progress("u1", "l1", 10);
        let second = sample_progress("u1", "l2", 20);
        let first_id = store
            .insert_progress_with_journal(&first, JournalOp::CreateProgress, "{}")
            .await
            .unwrap();
        let second_id = store
            .insert_progress_with_journal(&second, JournalOp::CreateProgress, "{}")
            .await
            .unwrap();
        assert!(first_id < second_id);

        // Shelve the first entry at the cap
        for attempt in 0..5 {
            store.increment_retry_count(first_id, attempt).await.unwrap();
        }

        let pending = store.pending_journal(5).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second_id);

        // The shelved entry stays in the table
        let all = store.journal_entries().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].retry_count, 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_increment_retry_count_is_guarded() {
        let store = setup().await;
        let progress = sample_progress("u1", "l1", 10);
        let id = store
            .insert_progress_with_journal(&progress, JournalOp::CreateProgress, "{}")
            .await
            .unwrap();

        store.increment_retry_count(id, 0).await.unwrap();
        // A stale observation does not double-bump
        store.increment_retry_count(id, 0).await.unwrap();

        let entries = store.journal_entries().await.unwrap();
        assert_eq!(entries[0].retry_count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_streams_publish_snapshots_and_updates() {
        let store = setup().await;

        let mut progress_rx = store.progress();
        let mut count_rx = store.journal_count();
        assert!(progress_rx.borrow().is_empty());
        assert_eq!(*count_rx.borrow(), 0);

        let progress = sample_progress("u1", "l1", 10);
        store
            .insert_progress_with_journal(&progress, JournalOp::CreateProgress, "{}")
            .await
            .unwrap();

        progress_rx.changed().await.unwrap();
        assert_eq!(progress_rx.borrow_and_update().len(), 1);
        count_rx.changed().await.unwrap();
        assert_eq!(*count_rx.borrow_and_update(), 1);

        store.delete_journal_entry(1).await.unwrap();
        count_rx.changed().await.unwrap();
        assert_eq!(*count_rx.borrow_and_update(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_new_store_snapshots_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sprout.db");

        {
            let db = Database::open(&path).await.unwrap();
            let store = LocalStore::new(db).await.unwrap();
            store
                .upsert_lesson(&Lesson::new("l1", "Intro", "First steps", 30))
                .await
                .unwrap();
        }

        let db = Database::open(&path).await.unwrap();
        let store = LocalStore::new(db).await.unwrap();
        let lessons_rx = store.lessons();
        assert_eq!(lessons_rx.borrow().len(), 1);
    }
}
