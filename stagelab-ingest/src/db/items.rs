//! Ingestion item rows

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use stagelab_common::{Error, ItemStatus, Result};
use uuid::Uuid;

use super::parse_uuid;
use crate::models::ClassificationResult;
use crate::types::{ItemUpdate, NewRemoteItem, RemoteItem};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT};

/// Register placeholders for a batch; one transaction, results in request order
pub async fn insert_placeholders(
    pool: &SqlitePool,
    session_id: Uuid,
    new_items: &[NewRemoteItem],
) -> Result<Vec<RemoteItem>> {
    if new_items.is_empty() {
        return Ok(Vec::new());
    }

    let session = session_id.to_string();
    let now = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;

    let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ingest_sessions WHERE id = ?")
        .bind(&session)
        .fetch_one(&mut *tx)
        .await?;
    if known == 0 {
        return Err(Error::NotFound(format!("Session {}", session_id)));
    }

    let start: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ingest_items WHERE session_id = ?")
        .bind(&session)
        .fetch_one(&mut *tx)
        .await?;

    let mut created = Vec::with_capacity(new_items.len());
    for (offset, new_item) in new_items.iter().enumerate() {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO ingest_items (id, session_id, position, filename, object_url, status, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&session)
        .bind(start + offset as i64)
        .bind(&new_item.filename)
        .bind(&new_item.object_path)
        .bind(ItemStatus::Pending.as_str())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        created.push(RemoteItem {
            id,
            session_id,
            filename: new_item.filename.clone(),
            object_url: Some(new_item.object_path.clone()),
            status: ItemStatus::Pending,
            classification_result: None,
            cropped_image_url: None,
            mask_image_url: None,
            subject_id: None,
        });
    }

    tx.commit().await?;
    tracing::debug!(session_id = %session_id, count = created.len(), "Item placeholders registered");
    Ok(created)
}

/// Apply the set fields of `update`; unset fields keep their stored value
pub async fn update_item(pool: &SqlitePool, item_id: Uuid, update: &ItemUpdate) -> Result<()> {
    let id = item_id.to_string();
    let status = update.status.map(|s| s.as_str());
    let subject_id = update.subject_id.map(|s| s.to_string());
    let classification = update
        .classification_result
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize classification: {}", e)))?;
    let now = Utc::now().to_rfc3339();

    let result = retry_on_lock("update_item", DEFAULT_MAX_LOCK_WAIT, || async {
        Ok(sqlx::query(
            r#"
            UPDATE ingest_items SET
                status = COALESCE(?, status),
                object_url = COALESCE(?, object_url),
                subject_id = COALESCE(?, subject_id),
                classification_result = COALESCE(?, classification_result),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(&update.object_url)
        .bind(&subject_id)
        .bind(&classification)
        .bind(&now)
        .bind(&id)
        .execute(pool)
        .await?)
    })
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Item {}", item_id)));
    }
    Ok(())
}

/// Record analysis output for one item
///
/// Written by the analysis side; the pipeline only ever reads it back.
pub async fn record_analysis(
    pool: &SqlitePool,
    item_id: Uuid,
    status: ItemStatus,
    result: Option<&ClassificationResult>,
    cropped_image_url: Option<&str>,
    mask_image_url: Option<&str>,
) -> Result<()> {
    let classification = result
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize classification: {}", e)))?;

    let updated = sqlx::query(
        r#"
        UPDATE ingest_items SET
            status = ?,
            classification_result = COALESCE(?, classification_result),
            cropped_image_url = COALESCE(?, cropped_image_url),
            mask_image_url = COALESCE(?, mask_image_url),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(&classification)
    .bind(cropped_image_url)
    .bind(mask_image_url)
    .bind(Utc::now().to_rfc3339())
    .bind(item_id.to_string())
    .execute(pool)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Item {}", item_id)));
    }
    Ok(())
}

fn row_to_item(row: &SqliteRow) -> Result<RemoteItem> {
    let id: String = row.get("id");
    let session_id: String = row.get("session_id");
    let status: String = row.get("status");
    let classification: Option<String> = row.get("classification_result");
    let subject_id: Option<String> = row.get("subject_id");

    Ok(RemoteItem {
        id: parse_uuid("ingest_items.id", &id)?,
        session_id: parse_uuid("ingest_items.session_id", &session_id)?,
        filename: row.get("filename"),
        object_url: row.get("object_url"),
        status: status.parse()?,
        classification_result: classification
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| Error::Internal(format!("Failed to deserialize classification: {}", e)))?,
        cropped_image_url: row.get("cropped_image_url"),
        mask_image_url: row.get("mask_image_url"),
        subject_id: subject_id
            .map(|s| parse_uuid("ingest_items.subject_id", &s))
            .transpose()?,
    })
}

/// All items of a session in registration order
pub async fn list_items(pool: &SqlitePool, session_id: Uuid) -> Result<Vec<RemoteItem>> {
    let rows = sqlx::query(
        r#"
        SELECT id, session_id, filename, object_url, status, classification_result,
               cropped_image_url, mask_image_url, subject_id
        FROM ingest_items
        WHERE session_id = ?
        ORDER BY position ASC
        "#,
    )
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_item).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sessions::insert_session;
    use crate::db::tests::memory_pool;
    use crate::models::Session;

    async fn pool_with_session() -> (SqlitePool, Uuid) {
        let pool = memory_pool().await;
        let session = Session::new(Uuid::new_v4(), Uuid::new_v4());
        insert_session(&pool, &session).await.unwrap();
        (pool, session.id)
    }

    fn placeholder(name: &str) -> NewRemoteItem {
        NewRemoteItem {
            filename: name.to_string(),
            object_path: format!("pending/{}", name),
        }
    }

    #[tokio::test]
    async fn test_placeholders_keep_request_order_across_batches() {
        let (pool, session_id) = pool_with_session().await;
        insert_placeholders(&pool, session_id, &[placeholder("a.jpg"), placeholder("b.jpg")])
            .await
            .unwrap();
        insert_placeholders(&pool, session_id, &[placeholder("c.jpg")]).await.unwrap();

        let listed = list_items(&pool, session_id).await.unwrap();
        let names: Vec<_> = listed.iter().map(|i| i.filename.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg", "c.jpg"]);
        assert!(listed.iter().all(|i| i.status == ItemStatus::Pending));
    }

    #[tokio::test]
    async fn test_placeholders_for_unknown_session_fail() {
        let pool = memory_pool().await;
        let err = insert_placeholders(&pool, Uuid::new_v4(), &[placeholder("a.jpg")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_partial_update_keeps_other_columns() {
        let (pool, session_id) = pool_with_session().await;
        let created = insert_placeholders(&pool, session_id, &[placeholder("a.jpg")]).await.unwrap();
        let id = created[0].id;

        update_item(
            &pool,
            id,
            &ItemUpdate {
                status: Some(ItemStatus::Uploaded),
                object_url: Some("https://cdn.example.org/a.jpg".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let subject = Uuid::new_v4();
        update_item(
            &pool,
            id,
            &ItemUpdate {
                subject_id: Some(subject),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let item = list_items(&pool, session_id).await.unwrap().remove(0);
        assert_eq!(item.status, ItemStatus::Uploaded);
        assert_eq!(item.object_url.as_deref(), Some("https://cdn.example.org/a.jpg"));
        assert_eq!(item.subject_id, Some(subject));
    }

    #[tokio::test]
    async fn test_recorded_analysis_round_trips_classification() {
        let (pool, session_id) = pool_with_session().await;
        let created = insert_placeholders(&pool, session_id, &[placeholder("a.jpg")]).await.unwrap();
        let result = ClassificationResult {
            primary_stage: "Metestrus".into(),
            ..Default::default()
        };

        record_analysis(
            &pool,
            created[0].id,
            ItemStatus::Complete,
            Some(&result),
            Some("https://cdn.example.org/a_crop.jpg"),
            None,
        )
        .await
        .unwrap();

        let item = list_items(&pool, session_id).await.unwrap().remove(0);
        assert_eq!(item.status, ItemStatus::Complete);
        assert_eq!(item.classification_result, Some(result));
        assert_eq!(item.cropped_image_url.as_deref(), Some("https://cdn.example.org/a_crop.jpg"));
        assert!(item.mask_image_url.is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_item_is_not_found() {
        let pool = memory_pool().await;
        let err = update_item(&pool, Uuid::new_v4(), &ItemUpdate::default()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
