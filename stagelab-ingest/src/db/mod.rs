//! SQLite persistence backend
//!
//! Local implementation of [`PersistenceService`] used when no remote
//! persistence URL is configured, and by the integration tests.
//!
//! Tables: `ingest_sessions`, `ingest_items`, `subjects`, `stage_logs`.
//! Timestamps are RFC 3339 text; structured values are JSON text.

pub mod items;
pub mod logs;
pub mod sessions;
pub mod subjects;

use async_trait::async_trait;
use sqlx::SqlitePool;
use stagelab_common::{Error, Result, SessionStatus};
use std::path::Path;
use uuid::Uuid;

use crate::models::{NewLogRecord, Session, Subject};
use crate::types::{ItemUpdate, NewRemoteItem, PersistenceService, RemoteItem};

/// Open (creating if needed) the database file and its tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!(url = %db_url, "Connecting to database");

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_sessions (
            id TEXT PRIMARY KEY,
            collection_id TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_ingest_sessions_owner
            ON ingest_sessions (collection_id, owner_id, status)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_items (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES ingest_sessions(id),
            position INTEGER NOT NULL,
            filename TEXT NOT NULL,
            object_url TEXT,
            status TEXT NOT NULL,
            classification_result TEXT,
            cropped_image_url TEXT,
            mask_image_url TEXT,
            subject_id TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS subjects (
            id TEXT PRIMARY KEY,
            collection_id TEXT NOT NULL,
            name TEXT NOT NULL,
            name_key TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (collection_id, name_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stage_logs (
            id TEXT PRIMARY KEY,
            collection_id TEXT NOT NULL,
            subject_id TEXT NOT NULL REFERENCES subjects(id),
            session_id TEXT,
            item_id TEXT,
            stage TEXT NOT NULL,
            confidence REAL NOT NULL,
            features TEXT NOT NULL DEFAULT '{}',
            reasoning TEXT NOT NULL DEFAULT '',
            payload TEXT NOT NULL DEFAULT '{}',
            image_url TEXT,
            recorded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (ingest_sessions, ingest_items, subjects, stage_logs)");
    Ok(())
}

pub(crate) fn parse_uuid(column: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Invalid UUID in {}: {}", column, e)))
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

/// [`PersistenceService`] over a SQLite pool
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl PersistenceService for SqlitePersistence {
    async fn create_session(&self, collection_id: Uuid, owner_id: Uuid) -> Result<Session> {
        let session = Session::new(collection_id, owner_id);
        sessions::insert_session(&self.pool, &session).await?;
        Ok(session)
    }

    async fn fetch_pending_session(
        &self,
        collection_id: Uuid,
        owner_id: Uuid,
    ) -> Result<Option<Session>> {
        sessions::latest_pending(&self.pool, collection_id, owner_id).await
    }

    async fn create_items(
        &self,
        session_id: Uuid,
        new_items: &[NewRemoteItem],
    ) -> Result<Vec<RemoteItem>> {
        items::insert_placeholders(&self.pool, session_id, new_items).await
    }

    async fn update_item(&self, item_id: Uuid, update: &ItemUpdate) -> Result<()> {
        items::update_item(&self.pool, item_id, update).await
    }

    async fn list_items(&self, session_id: Uuid) -> Result<Vec<RemoteItem>> {
        items::list_items(&self.pool, session_id).await
    }

    async fn find_or_create_subject(&self, collection_id: Uuid, name: &str) -> Result<Subject> {
        subjects::find_or_create(&self.pool, collection_id, name).await
    }

    async fn insert_logs(&self, records: &[NewLogRecord]) -> Result<usize> {
        logs::insert_logs(&self.pool, records).await
    }

    async fn update_session_status(&self, session_id: Uuid, status: SessionStatus) -> Result<()> {
        sessions::update_status(&self.pool, session_id, status).await
    }
}
