//! Stage log rows

use sqlx::{Row, SqlitePool};
use stagelab_common::{Error, Result};
use uuid::Uuid;

use crate::models::NewLogRecord;

/// Insert every record or none
pub async fn insert_logs(pool: &SqlitePool, records: &[NewLogRecord]) -> Result<usize> {
    if records.is_empty() {
        return Ok(0);
    }

    // Serialize before taking a connection
    let mut prepared = Vec::with_capacity(records.len());
    for record in records {
        let features = serde_json::to_string(&record.features)
            .map_err(|e| Error::Internal(format!("Failed to serialize features: {}", e)))?;
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| Error::Internal(format!("Failed to serialize payload: {}", e)))?;
        prepared.push((record, features, payload));
    }

    let mut tx = pool.begin().await?;
    for (record, features, payload) in &prepared {
        sqlx::query(
            r#"
            INSERT INTO stage_logs (
                id, collection_id, subject_id, session_id, item_id, stage, confidence,
                features, reasoning, payload, image_url, recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(record.collection_id.to_string())
        .bind(record.subject_id.to_string())
        .bind(record.session_id.map(|id| id.to_string()))
        .bind(record.item_id.map(|id| id.to_string()))
        .bind(&record.stage)
        .bind(record.confidence)
        .bind(features)
        .bind(&record.reasoning)
        .bind(payload)
        .bind(&record.image_url)
        .bind(record.recorded_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::debug!(count = records.len(), "Stage logs inserted");
    Ok(records.len())
}

/// Stage log summary row
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StageLogRow {
    pub subject_id: String,
    pub item_id: Option<String>,
    pub stage: String,
    pub confidence: f64,
}

/// Logs recorded for a collection, oldest first
pub async fn list_logs(pool: &SqlitePool, collection_id: Uuid) -> Result<Vec<StageLogRow>> {
    let rows = sqlx::query(
        r#"
        SELECT subject_id, item_id, stage, confidence
        FROM stage_logs
        WHERE collection_id = ?
        ORDER BY recorded_at ASC
        "#,
    )
    .bind(collection_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| StageLogRow {
            subject_id: row.get("subject_id"),
            item_id: row.get("item_id"),
            stage: row.get("stage"),
            confidence: row.get("confidence"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::subjects::find_or_create;
    use crate::db::tests::memory_pool;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn record(collection_id: Uuid, subject_id: Uuid, stage: &str) -> NewLogRecord {
        NewLogRecord {
            collection_id,
            subject_id,
            session_id: None,
            item_id: Some(Uuid::new_v4()),
            stage: stage.to_string(),
            confidence: 0.8,
            features: BTreeMap::from([("swelling".into(), "none".into())]),
            reasoning: "test".into(),
            payload: serde_json::json!({ "confidence_scores": {}, "internal_notes": "" }),
            image_url: None,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_batch_insert_and_list() {
        let pool = memory_pool().await;
        let collection = Uuid::new_v4();
        let subject = find_or_create(&pool, collection, "229B").await.unwrap();

        let inserted = insert_logs(
            &pool,
            &[record(collection, subject.id, "Estrus"), record(collection, subject.id, "Diestrus")],
        )
        .await
        .unwrap();
        assert_eq!(inserted, 2);

        let logs = list_logs(&pool, collection).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|l| l.subject_id == subject.id.to_string()));
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let pool = memory_pool().await;
        assert_eq!(insert_logs(&pool, &[]).await.unwrap(), 0);
    }
}
