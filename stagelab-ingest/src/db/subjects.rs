//! Subject rows
//!
//! Names are unique per collection, compared case-insensitively through the
//! stored `name_key`.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use stagelab_common::{Error, Result};
use uuid::Uuid;

use super::parse_uuid;
use crate::models::Subject;
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT};

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

async fn find_by_key(pool: &SqlitePool, collection_id: Uuid, key: &str) -> Result<Option<Subject>> {
    let row = sqlx::query("SELECT id, name FROM subjects WHERE collection_id = ? AND name_key = ?")
        .bind(collection_id.to_string())
        .bind(key)
        .fetch_optional(pool)
        .await?;

    row.map(|row| {
        let id: String = row.get("id");
        Ok(Subject {
            id: parse_uuid("subjects.id", &id)?,
            collection_id,
            name: row.get("name"),
        })
    })
    .transpose()
}

/// Existing subject with this name (any case), or a new one
pub async fn find_or_create(pool: &SqlitePool, collection_id: Uuid, name: &str) -> Result<Subject> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("Subject name must not be empty".to_string()));
    }
    let key = name_key(name);

    if let Some(existing) = find_by_key(pool, collection_id, &key).await? {
        return Ok(existing);
    }

    let id = Uuid::new_v4().to_string();
    let collection = collection_id.to_string();
    let created_at = Utc::now().to_rfc3339();

    // A concurrent insert of the same name wins; re-read below picks it up
    retry_on_lock("create_subject", DEFAULT_MAX_LOCK_WAIT, || async {
        sqlx::query(
            r#"
            INSERT INTO subjects (id, collection_id, name, name_key, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (collection_id, name_key) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(&collection)
        .bind(name)
        .bind(&key)
        .bind(&created_at)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await?;

    let subject = find_by_key(pool, collection_id, &key)
        .await?
        .ok_or_else(|| Error::Internal(format!("Subject '{}' missing after insert", name)))?;

    tracing::debug!(subject_id = %subject.id, collection_id = %collection_id, name = %subject.name, "Subject ready");
    Ok(subject)
}
