//! Ingestion session rows

use sqlx::{Row, SqlitePool};
use stagelab_common::{Error, Result, SessionStatus};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};
use crate::models::Session;
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT};

pub async fn insert_session(pool: &SqlitePool, session: &Session) -> Result<()> {
    let id = session.id.to_string();
    let collection_id = session.collection_id.to_string();
    let owner_id = session.owner_id.to_string();
    let created_at = session.created_at.to_rfc3339();

    retry_on_lock("insert_session", DEFAULT_MAX_LOCK_WAIT, || async {
        sqlx::query(
            r#"
            INSERT INTO ingest_sessions (id, collection_id, owner_id, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&collection_id)
        .bind(&owner_id)
        .bind(session.status.as_str())
        .bind(&created_at)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// Most recent pending session for (collection, owner)
pub async fn latest_pending(
    pool: &SqlitePool,
    collection_id: Uuid,
    owner_id: Uuid,
) -> Result<Option<Session>> {
    let row = sqlx::query(
        r#"
        SELECT id, collection_id, owner_id, status, created_at
        FROM ingest_sessions
        WHERE collection_id = ? AND owner_id = ? AND status = 'pending'
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(collection_id.to_string())
    .bind(owner_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        let id: String = row.get("id");
        let collection_id: String = row.get("collection_id");
        let owner_id: String = row.get("owner_id");
        let status: String = row.get("status");
        let created_at: String = row.get("created_at");

        Ok(Session {
            id: parse_uuid("ingest_sessions.id", &id)?,
            collection_id: parse_uuid("ingest_sessions.collection_id", &collection_id)?,
            owner_id: parse_uuid("ingest_sessions.owner_id", &owner_id)?,
            status: status.parse()?,
            created_at: parse_timestamp("ingest_sessions.created_at", &created_at)?,
        })
    })
    .transpose()
}

pub async fn update_status(pool: &SqlitePool, session_id: Uuid, status: SessionStatus) -> Result<()> {
    let id = session_id.to_string();

    let result = retry_on_lock("update_session_status", DEFAULT_MAX_LOCK_WAIT, || async {
        Ok(sqlx::query("UPDATE ingest_sessions SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(&id)
            .execute(pool)
            .await?)
    })
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Session {}", session_id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::memory_pool;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_latest_pending_prefers_newest_and_ignores_completed() {
        let pool = memory_pool().await;
        let collection = Uuid::new_v4();
        let owner = Uuid::new_v4();

        let mut older = Session::new(collection, owner);
        older.created_at = Utc::now() - Duration::hours(2);
        let newer = Session::new(collection, owner);
        insert_session(&pool, &older).await.unwrap();
        insert_session(&pool, &newer).await.unwrap();

        let found = latest_pending(&pool, collection, owner).await.unwrap().unwrap();
        assert_eq!(found.id, newer.id);

        update_status(&pool, newer.id, SessionStatus::Completed).await.unwrap();
        let found = latest_pending(&pool, collection, owner).await.unwrap().unwrap();
        assert_eq!(found.id, older.id);
    }

    #[tokio::test]
    async fn test_other_owner_sessions_are_not_returned() {
        let pool = memory_pool().await;
        let collection = Uuid::new_v4();
        insert_session(&pool, &Session::new(collection, Uuid::new_v4())).await.unwrap();

        assert!(latest_pending(&pool, collection, Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_session_is_not_found() {
        let pool = memory_pool().await;
        let err = update_status(&pool, Uuid::new_v4(), SessionStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
