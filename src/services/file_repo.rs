//! Persistence port for [`StoredFile`] metadata and its SQLite adapter.
//!
//! The blob store only talks to [`FileRecordRepo`]; the SQLite pool is
//! injected at startup. Derived location columns (`file_path`, `file_name`)
//! are written from the record's accessors on every save so the external
//! directory browser can map a path on disk back to a record.

use crate::{
    models::stored_file::StoredFile,
    services::blob_store::StoreResult,
};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const INIT_MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

const SELECT_COLUMNS: &str = "SELECT id, file_type, original_name, digest, base_path, size_bytes,
            added_by, added_at, is_current, removed_by, removed_at, modified_at
     FROM stored_files";

/// Metadata persistence used by the blob store.
#[async_trait]
pub trait FileRecordRepo: Send + Sync {
    /// Insert or update a record by id.
    async fn save(&self, file: &StoredFile) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<StoredFile>>;

    /// Record bound to the blob at `file_path/file_name`.
    ///
    /// Deduplicated uploads share a blob, so several records may match;
    /// current records win, then the most recently modified.
    async fn find_by_location(
        &self,
        file_path: &str,
        file_name: &str,
    ) -> StoreResult<Option<StoredFile>>;

    /// All records, current ones first, then oldest first.
    async fn list(&self, include_removed: bool) -> StoreResult<Vec<StoredFile>>;

    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> StoreResult<()>;
}

/// [`FileRecordRepo`] backed by a shared SQLite pool.
#[derive(Clone)]
pub struct SqliteFileRepo {
    db: Arc<SqlitePool>,
}

impl SqliteFileRepo {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FileRecordRepo for SqliteFileRepo {
    async fn save(&self, file: &StoredFile) -> StoreResult<()> {
        let file_path = file.get_path().to_string_lossy().into_owned();
        sqlx::query(
            r#"
            INSERT INTO stored_files (
                id, file_type, original_name, digest, base_path, file_path, file_name,
                size_bytes, added_by, added_at, is_current, removed_by, removed_at, modified_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                file_type = excluded.file_type,
                original_name = excluded.original_name,
                digest = excluded.digest,
                base_path = excluded.base_path,
                file_path = excluded.file_path,
                file_name = excluded.file_name,
                size_bytes = excluded.size_bytes,
                is_current = excluded.is_current,
                removed_by = excluded.removed_by,
                removed_at = excluded.removed_at,
                modified_at = excluded.modified_at
            "#,
        )
        .bind(file.id)
        .bind(&file.file_type)
        .bind(&file.original_name)
        .bind(&file.digest)
        .bind(&file.base_path)
        .bind(&file_path)
        .bind(file.get_file_name())
        .bind(file.size_bytes)
        .bind(&file.tracking.added_by)
        .bind(file.tracking.added_at)
        .bind(file.tracking.is_current)
        .bind(file.tracking.removed_by.as_deref())
        .bind(file.tracking.removed_at)
        .bind(file.tracking.modified_at)
        .execute(&*self.db)
        .await?;

        debug!(id = %file.id, digest = %file.digest, "saved file record");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<StoredFile>> {
        let file = sqlx::query_as::<_, StoredFile>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(file)
    }

    async fn find_by_location(
        &self,
        file_path: &str,
        file_name: &str,
    ) -> StoreResult<Option<StoredFile>> {
        let file = sqlx::query_as::<_, StoredFile>(&format!(
            "{SELECT_COLUMNS} WHERE file_path = ? AND file_name = ?
             ORDER BY is_current DESC, modified_at DESC LIMIT 1"
        ))
        .bind(file_path)
        .bind(file_name)
        .fetch_optional(&*self.db)
        .await?;
        Ok(file)
    }

    async fn list(&self, include_removed: bool) -> StoreResult<Vec<StoredFile>> {
        let filter = if include_removed {
            ""
        } else {
            " WHERE is_current = 1"
        };
        let files = sqlx::query_as::<_, StoredFile>(&format!(
            "{SELECT_COLUMNS}{filter} ORDER BY is_current DESC, added_at ASC"
        ))
        .fetch_all(&*self.db)
        .await?;
        Ok(files)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}

/// Run the embedded schema migration statement by statement.
///
/// Statements use `IF NOT EXISTS`, so running this twice is harmless.
pub async fn run_migrations(db: &SqlitePool) -> StoreResult<usize> {
    let statements = INIT_MIGRATION
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in &statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(statements.len())
}
