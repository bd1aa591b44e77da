//! Session store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::SessionRepo;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined session store trait.
#[async_trait]
pub trait SessionStore: SessionRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS upload_sessions (
    session_id      TEXT PRIMARY KEY,
    original_name   TEXT NOT NULL,
    mime_type       TEXT NOT NULL,
    declared_size   INTEGER NOT NULL,
    uploaded_chunks INTEGER NOT NULL DEFAULT 0,
    total_chunks    INTEGER NOT NULL,
    status          TEXT NOT NULL,
    blob_ref        TEXT,
    uploaded_by     TEXT,
    error_message   TEXT,
    retry_count     INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    expires_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_upload_sessions_status ON upload_sessions(status);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_created_at ON upload_sessions(created_at);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_expires_at ON upload_sessions(expires_at);
"#;

/// SQLite-based session store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store and run migrations.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
            .map_err(sqlx::Error::from)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // avoids persistent "database is locked" failures under load.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        MetadataError::Internal(format!("I/O error: {e}"))
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::SessionRow;
    use crate::repos::{SessionFilter, SessionPage};
    use time::OffsetDateTime;

    #[async_trait]
    impl SessionRepo for SqliteStore {
        async fn create_session(&self, session: &SessionRow) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                INSERT INTO upload_sessions (
                    session_id, original_name, mime_type, declared_size,
                    uploaded_chunks, total_chunks, status, blob_ref,
                    uploaded_by, error_message, retry_count,
                    created_at, updated_at, expires_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&session.session_id)
            .bind(&session.original_name)
            .bind(&session.mime_type)
            .bind(session.declared_size)
            .bind(session.uploaded_chunks)
            .bind(session.total_chunks)
            .bind(&session.status)
            .bind(&session.blob_ref)
            .bind(&session.uploaded_by)
            .bind(&session.error_message)
            .bind(session.retry_count)
            .bind(session.created_at)
            .bind(session.updated_at)
            .bind(session.expires_at)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(sqlx::Error::Database(db_err))
                    if db_err.message().contains("UNIQUE constraint") =>
                {
                    Err(MetadataError::AlreadyExists(format!(
                        "session_id {} already exists",
                        session.session_id
                    )))
                }
                Err(e) => Err(e.into()),
            }
        }

        async fn get_session(&self, session_id: &str) -> MetadataResult<Option<SessionRow>> {
            let row = sqlx::query_as::<_, SessionRow>(
                "SELECT * FROM upload_sessions WHERE session_id = ?",
            )
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn advance_progress(
            &self,
            session_id: &str,
            current: i64,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE upload_sessions
                SET uploaded_chunks = ?, updated_at = ?
                WHERE session_id = ?
                  AND uploaded_chunks = ?
                  AND status = 'uploading'
                "#,
            )
            .bind(current + 1)
            .bind(updated_at)
            .bind(session_id)
            .bind(current)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn mark_uploading(
            &self,
            session_id: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE upload_sessions
                SET status = 'uploading', error_message = NULL, updated_at = ?
                WHERE session_id = ? AND status IN ('pending', 'failed')
                "#,
            )
            .bind(updated_at)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn begin_processing(
            &self,
            session_id: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE upload_sessions
                SET status = 'processing', updated_at = ?
                WHERE session_id = ? AND status = 'uploading'
                "#,
            )
            .bind(updated_at)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn complete_session(
            &self,
            session_id: &str,
            blob_ref: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE upload_sessions
                SET status = 'completed', blob_ref = ?, error_message = NULL, updated_at = ?
                WHERE session_id = ? AND status = 'processing'
                "#,
            )
            .bind(blob_ref)
            .bind(updated_at)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn fail_session(
            &self,
            session_id: &str,
            error_message: &str,
            count_retry: bool,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE upload_sessions
                SET status = 'failed',
                    error_message = ?,
                    retry_count = retry_count + ?,
                    updated_at = ?
                WHERE session_id = ? AND status = 'processing'
                "#,
            )
            .bind(error_message)
            .bind(i64::from(count_retry))
            .bind(updated_at)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn cancel_session(
            &self,
            session_id: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE upload_sessions
                SET status = 'cancelled', updated_at = ?
                WHERE session_id = ? AND status IN ('pending', 'uploading')
                "#,
            )
            .bind(updated_at)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn delete_session(&self, session_id: &str) -> MetadataResult<bool> {
            let result = sqlx::query("DELETE FROM upload_sessions WHERE session_id = ?")
                .bind(session_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn list_sessions(&self, filter: &SessionFilter) -> MetadataResult<SessionPage> {
            // Column and direction come from closed enums, never from input.
            let order_clause = format!(
                "ORDER BY {} {}",
                filter.sort_by.as_column(),
                filter.sort_order.as_sql()
            );

            let (rows, total) = match &filter.status {
                Some(status) => {
                    let query = format!(
                        "SELECT * FROM upload_sessions WHERE status = ? {order_clause} LIMIT ? OFFSET ?"
                    );
                    let rows = sqlx::query_as::<_, SessionRow>(&query)
                        .bind(status)
                        .bind(i64::from(filter.normalized_limit()))
                        .bind(i64::from(filter.offset()))
                        .fetch_all(&self.pool)
                        .await?;
                    let total: i64 = sqlx::query_scalar(
                        "SELECT COUNT(*) FROM upload_sessions WHERE status = ?",
                    )
                    .bind(status)
                    .fetch_one(&self.pool)
                    .await?;
                    (rows, total)
                }
                None => {
                    let query = format!(
                        "SELECT * FROM upload_sessions {order_clause} LIMIT ? OFFSET ?"
                    );
                    let rows = sqlx::query_as::<_, SessionRow>(&query)
                        .bind(i64::from(filter.normalized_limit()))
                        .bind(i64::from(filter.offset()))
                        .fetch_all(&self.pool)
                        .await?;
                    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM upload_sessions")
                        .fetch_one(&self.pool)
                        .await?;
                    (rows, total)
                }
            };

            Ok(SessionPage {
                rows,
                total: total as u64,
            })
        }

        async fn list_session_ids(&self) -> MetadataResult<Vec<String>> {
            let rows: Vec<(String,)> = sqlx::query_as("SELECT session_id FROM upload_sessions")
                .fetch_all(&self.pool)
                .await?;
            Ok(rows.into_iter().map(|(id,)| id).collect())
        }

        async fn expired_sessions(
            &self,
            now: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<SessionRow>> {
            let rows = sqlx::query_as::<_, SessionRow>(
                "SELECT * FROM upload_sessions WHERE expires_at < ? ORDER BY expires_at LIMIT ?",
            )
            .bind(now)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn stale_sessions(
            &self,
            older_than: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<SessionRow>> {
            let rows = sqlx::query_as::<_, SessionRow>(
                r#"
                SELECT * FROM upload_sessions
                WHERE status IN ('pending', 'uploading') AND updated_at < ?
                ORDER BY updated_at LIMIT ?
                "#,
            )
            .bind(older_than)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn stuck_processing_sessions(
            &self,
            older_than: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<SessionRow>> {
            let rows = sqlx::query_as::<_, SessionRow>(
                r#"
                SELECT * FROM upload_sessions
                WHERE status = 'processing' AND updated_at < ?
                ORDER BY updated_at LIMIT ?
                "#,
            )
            .bind(older_than)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionRow;
    use crate::repos::{SessionFilter, SortBy, SortOrder};
    use depot_core::UploadSession;
    use time::OffsetDateTime;

    async fn new_store() -> (tempfile::TempDir, SqliteStore) {
        let temp = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(temp.path().join("metadata.db"))
            .await
            .unwrap();
        (temp, store)
    }

    fn sample_row(total_chunks: u32) -> SessionRow {
        let session = UploadSession::new(
            "a.bin".to_string(),
            300,
            "application/octet-stream".to_string(),
            total_chunks,
            None,
            time::Duration::hours(24),
        );
        SessionRow::from_session(&session)
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let (_temp, store) = new_store().await;
        let row = sample_row(3);

        store.create_session(&row).await.unwrap();
        let fetched = store.get_session(&row.session_id).await.unwrap().unwrap();
        assert_eq!(fetched.session_id, row.session_id);
        assert_eq!(fetched.status, "pending");

        assert!(store.delete_session(&row.session_id).await.unwrap());
        assert!(store.get_session(&row.session_id).await.unwrap().is_none());
        assert!(!store.delete_session(&row.session_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let (_temp, store) = new_store().await;
        let row = sample_row(3);

        store.create_session(&row).await.unwrap();
        match store.create_session(&row).await {
            Err(MetadataError::AlreadyExists(_)) => {}
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_advance_progress_cas() {
        let (_temp, store) = new_store().await;
        let row = sample_row(3);
        store.create_session(&row).await.unwrap();
        let now = OffsetDateTime::now_utc();

        // CAS requires 'uploading'; a pending session never advances.
        assert!(!store.advance_progress(&row.session_id, 0, now).await.unwrap());

        assert!(store.mark_uploading(&row.session_id, now).await.unwrap());
        assert!(store.advance_progress(&row.session_id, 0, now).await.unwrap());
        // The stale expected value loses the compare-and-set.
        assert!(!store.advance_progress(&row.session_id, 0, now).await.unwrap());
        assert!(store.advance_progress(&row.session_id, 1, now).await.unwrap());

        let fetched = store.get_session(&row.session_id).await.unwrap().unwrap();
        assert_eq!(fetched.uploaded_chunks, 2);
        assert_eq!(fetched.status, "uploading");
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let (_temp, store) = new_store().await;
        let row = sample_row(1);
        store.create_session(&row).await.unwrap();
        let now = OffsetDateTime::now_utc();

        // Cannot start processing from pending.
        assert!(!store.begin_processing(&row.session_id, now).await.unwrap());

        assert!(store.mark_uploading(&row.session_id, now).await.unwrap());
        assert!(store.begin_processing(&row.session_id, now).await.unwrap());
        // Second processing handoff loses the CAS.
        assert!(!store.begin_processing(&row.session_id, now).await.unwrap());

        assert!(
            store
                .complete_session(&row.session_id, "objects/abc", now)
                .await
                .unwrap()
        );
        let fetched = store.get_session(&row.session_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, "completed");
        assert_eq!(fetched.blob_ref.as_deref(), Some("objects/abc"));

        // Completed is terminal for every conditional update.
        assert!(!store.mark_uploading(&row.session_id, now).await.unwrap());
        assert!(!store.cancel_session(&row.session_id, now).await.unwrap());
        assert!(
            !store
                .fail_session(&row.session_id, "boom", true, now)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_fail_and_retry_counting() {
        let (_temp, store) = new_store().await;
        let row = sample_row(1);
        store.create_session(&row).await.unwrap();
        let now = OffsetDateTime::now_utc();

        store.mark_uploading(&row.session_id, now).await.unwrap();
        store.begin_processing(&row.session_id, now).await.unwrap();
        assert!(
            store
                .fail_session(&row.session_id, "sink error", true, now)
                .await
                .unwrap()
        );

        let fetched = store.get_session(&row.session_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, "failed");
        assert_eq!(fetched.retry_count, 1);
        assert_eq!(fetched.error_message.as_deref(), Some("sink error"));

        // Re-submission path: failed -> uploading clears the error.
        assert!(store.mark_uploading(&row.session_id, now).await.unwrap());
        let fetched = store.get_session(&row.session_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, "uploading");
        assert!(fetched.error_message.is_none());
        assert_eq!(fetched.retry_count, 1);

        // Janitor-style failure does not count a retry.
        store.begin_processing(&row.session_id, now).await.unwrap();
        assert!(
            store
                .fail_session(&row.session_id, "stuck", false, now)
                .await
                .unwrap()
        );
        let fetched = store.get_session(&row.session_id).await.unwrap().unwrap();
        assert_eq!(fetched.retry_count, 1);
    }

    #[tokio::test]
    async fn test_sweep_queries() {
        let (_temp, store) = new_store().await;
        let now = OffsetDateTime::now_utc();

        let mut expired = sample_row(1);
        expired.expires_at = now - time::Duration::hours(1);
        store.create_session(&expired).await.unwrap();

        let mut stale = sample_row(1);
        stale.updated_at = now - time::Duration::hours(3);
        store.create_session(&stale).await.unwrap();

        let mut stuck = sample_row(1);
        stuck.status = "processing".to_string();
        stuck.updated_at = now - time::Duration::hours(3);
        store.create_session(&stuck).await.unwrap();

        let fresh = sample_row(1);
        store.create_session(&fresh).await.unwrap();

        let expired_rows = store.expired_sessions(now, 100).await.unwrap();
        assert_eq!(expired_rows.len(), 1);
        assert_eq!(expired_rows[0].session_id, expired.session_id);

        let cutoff = now - time::Duration::hours(2);
        let stale_rows = store.stale_sessions(cutoff, 100).await.unwrap();
        assert_eq!(stale_rows.len(), 1);
        assert_eq!(stale_rows[0].session_id, stale.session_id);

        let stuck_rows = store.stuck_processing_sessions(cutoff, 100).await.unwrap();
        assert_eq!(stuck_rows.len(), 1);
        assert_eq!(stuck_rows[0].session_id, stuck.session_id);
    }

    #[tokio::test]
    async fn test_list_sessions_paging_and_filter() {
        let (_temp, store) = new_store().await;
        let now = OffsetDateTime::now_utc();

        for i in 0..5 {
            let mut row = sample_row(1);
            row.created_at = now + time::Duration::seconds(i);
            if i < 2 {
                row.status = "completed".to_string();
            }
            store.create_session(&row).await.unwrap();
        }

        let page = store
            .list_sessions(&SessionFilter {
                limit: 2,
                sort_by: SortBy::CreatedAt,
                sort_order: SortOrder::Asc,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.total, 5);

        let page2 = store
            .list_sessions(&SessionFilter {
                page: 3,
                limit: 2,
                sort_by: SortBy::CreatedAt,
                sort_order: SortOrder::Asc,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page2.rows.len(), 1);

        let completed = store
            .list_sessions(&SessionFilter {
                status: Some("completed".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(completed.total, 2);
        assert!(completed.rows.iter().all(|r| r.status == "completed"));

        assert_eq!(store.list_session_ids().await.unwrap().len(), 5);
    }
}
