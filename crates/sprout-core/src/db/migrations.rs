//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
///
/// A fresh database has no schema_version table yet; failing to read it
/// reads as version 0, and every migration is idempotent anyway.
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = match conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await
    {
        Ok(rows) => rows,
        Err(_) => return Ok(0),
    };

    let version: i32 = match rows.next().await {
        Ok(Some(row)) => row.get(0)?,
        _ => 0,
    };

    Ok(version)
}

/// Migration to version 1: Initial schema
async fn migrate_v1(conn: &Connection) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    // Using a transaction for atomicity

    conn.execute("BEGIN TRANSACTION", ()).await?;

    let statements = [
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Learner accounts, seeded from the backend
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            email TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            sync_status TEXT NOT NULL DEFAULT 'synced'
        )",
        // Course content, seeded from the backend
        "CREATE TABLE IF NOT EXISTS lessons (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            duration_minutes INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            sync_status TEXT NOT NULL DEFAULT 'synced'
        )",
        // Per-user lesson completion; one row per (user, lesson) pair.
        // No foreign keys: progress can be recorded offline before the
        // referenced user or lesson has been seeded.
        "CREATE TABLE IF NOT EXISTS progress (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            lesson_id TEXT NOT NULL,
            progress_percent INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            UNIQUE (user_id, lesson_id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_progress_user ON progress(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_progress_updated ON progress(updated_at DESC)",
        // Outbound mutation journal; id order is processing order
        "CREATE TABLE IF NOT EXISTS sync_journal (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            op TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_journal_retry ON sync_journal(retry_count)",
        // Record migration version
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    async fn setup() -> Connection {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_idempotent() {
        let conn = setup().await;
        run(&conn).await.unwrap();
        run(&conn).await.unwrap(); // Should not fail

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migration_v1_creates_all_tables() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        for table in ["users", "lessons", "progress", "sync_journal"] {
            let mut rows = conn
                .query(
                    "SELECT EXISTS(
                        SELECT 1 FROM sqlite_master
                        WHERE type = 'table' AND name = ?
                    )",
                    [table],
                )
                .await
                .unwrap();

            let exists = rows
                .next()
                .await
                .unwrap()
                .is_some_and(|row| row.get::<i32>(0).unwrap() != 0);

            assert!(exists, "missing table {table}");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_progress_pair_is_unique() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        conn.execute(
            "INSERT INTO progress (id, user_id, lesson_id, progress_percent, updated_at)
             VALUES ('p1', 'u1', 'l1', 10, 0)",
            (),
        )
        .await
        .unwrap();

        let duplicate = conn
            .execute(
                "INSERT INTO progress (id, user_id, lesson_id, progress_percent, updated_at)
                 VALUES ('p2', 'u1', 'l1', 20, 0)",
                (),
            )
            .await;

        assert!(duplicate.is_err());
    }
}
