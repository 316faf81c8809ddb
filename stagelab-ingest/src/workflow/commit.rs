//! Commit stage
//!
//! Turns analyzed items into persistent stage log records.
//!
//! **Algorithm:**
//! 1. Keep items that are `complete` with a non-empty primary stage
//! 2. Resolve the subject per item: assigned id, else find-or-create by typed
//!    name, else (when enabled) the first filename token; unresolved items are
//!    skipped
//! 3. Insert all records in one batch; failure leaves every item `complete`
//! 4. Best-effort: mark remote items `saved` with their subject
//! 5. Mark the session `completed` when one was given

use chrono::Utc;
use serde_json::json;
use stagelab_common::events::{EventBus, IngestEvent};
use stagelab_common::{ItemStatus, SessionStatus};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::{Item, NewLogRecord};
use crate::types::{ItemUpdate, PersistenceService};
use crate::workflow::subject_resolver::legacy_subject_from_filename;

/// Commit options
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitOptions {
    /// Derive a subject from the filename when the item has none
    pub legacy_filename_fallback: bool,
}

/// Outcome of a successful commit
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CommitReport {
    pub logs_inserted: usize,
    /// Local ids whose log record was inserted
    pub committed: Vec<Uuid>,
    /// Eligible items left out for lack of a subject
    pub skipped: Vec<Uuid>,
    /// Remote status updates that failed after the insert
    pub secondary_failures: usize,
    pub session_completed: bool,
}

/// Subject lookups memoized per commit, keyed by lowercase name
struct SubjectCache<'a> {
    persistence: &'a dyn PersistenceService,
    collection_id: Uuid,
    by_name: HashMap<String, Uuid>,
}

impl<'a> SubjectCache<'a> {
    fn new(persistence: &'a dyn PersistenceService, collection_id: Uuid) -> Self {
        Self {
            persistence,
            collection_id,
            by_name: HashMap::new(),
        }
    }

    async fn resolve(&mut self, name: &str) -> Result<Uuid, PipelineError> {
        let key = name.trim().to_lowercase();
        if let Some(id) = self.by_name.get(&key) {
            return Ok(*id);
        }
        let subject = self
            .persistence
            .find_or_create_subject(self.collection_id, name.trim())
            .await
            .map_err(|e| PipelineError::Commit(format!("subject '{}' not resolved: {}", name.trim(), e)))?;
        self.by_name.insert(key, subject.id);
        Ok(subject.id)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Subject for one item by precedence; `None` when nothing identifies one
async fn subject_for(
    item: &Item,
    cache: &mut SubjectCache<'_>,
    options: CommitOptions,
) -> Result<Option<Uuid>, PipelineError> {
    if let Some(id) = item.assigned_subject_id {
        return Ok(Some(id));
    }
    if let Some(name) = non_blank(item.new_subject_name.as_deref()) {
        return cache.resolve(name).await.map(Some);
    }
    if options.legacy_filename_fallback {
        if let Some(name) = legacy_subject_from_filename(&item.filename) {
            return cache.resolve(&name).await.map(Some);
        }
    }
    Ok(None)
}

/// Log record for one committable item
pub fn build_log_record(
    item: &Item,
    collection_id: Uuid,
    subject_id: Uuid,
    session_id: Option<Uuid>,
) -> Option<NewLogRecord> {
    let result = item.classification_result.as_ref()?;
    Some(NewLogRecord {
        collection_id,
        subject_id,
        session_id,
        item_id: item.remote_id,
        stage: result.canonical_stage(),
        confidence: result.primary_confidence(),
        features: result.string_features(),
        reasoning: result.reasoning.clone(),
        payload: json!({
            "confidence_scores": result.normalized_scores(),
            "internal_notes": result.internal_notes,
        }),
        image_url: item.remote_object_url.clone(),
        recorded_at: Utc::now(),
    })
}

/// Commit analyzed items
///
/// Works on a snapshot of the items; the caller applies
/// the `saved` status to [`CommitReport::committed`] afterwards.
pub async fn commit(
    persistence: &dyn PersistenceService,
    events: &EventBus,
    collection_id: Uuid,
    items: &[Item],
    session_id: Option<Uuid>,
    options: CommitOptions,
) -> Result<CommitReport, PipelineError> {
    let mut report = CommitReport::default();
    let mut cache = SubjectCache::new(persistence, collection_id);
    let mut records = Vec::new();
    let mut linked: Vec<(Uuid, Option<Uuid>, Uuid)> = Vec::new();

    for item in items.iter().filter(|item| item.is_committable()) {
        let subject_id = match subject_for(item, &mut cache, options).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                tracing::debug!(local_id = %item.local_id, filename = %item.filename, "No subject; item left for later");
                report.skipped.push(item.local_id);
                continue;
            }
            Err(e) => {
                emit_failure(events, session_id, collection_id, &e);
                return Err(e);
            }
        };

        if let Some(record) = build_log_record(item, collection_id, subject_id, session_id) {
            records.push(record);
            linked.push((item.local_id, item.remote_id, subject_id));
        }
    }

    if records.is_empty() {
        tracing::info!(collection_id = %collection_id, skipped = report.skipped.len(), "Nothing to commit");
        return Ok(report);
    }

    report.logs_inserted = match persistence.insert_logs(&records).await {
        Ok(inserted) => inserted,
        Err(e) => {
            let err = PipelineError::Commit(format!("log insert failed: {}", e));
            emit_failure(events, session_id, collection_id, &err);
            tracing::error!(collection_id = %collection_id, records = records.len(), error = %e, "Commit failed");
            return Err(err);
        }
    };

    for (local_id, remote_id, subject_id) in linked {
        report.committed.push(local_id);
        let Some(remote_id) = remote_id else {
            continue;
        };
        let update = ItemUpdate {
            status: Some(ItemStatus::Saved),
            subject_id: Some(subject_id),
            ..Default::default()
        };
        if let Err(e) = persistence.update_item(remote_id, &update).await {
            report.secondary_failures += 1;
            tracing::warn!(remote_id = %remote_id, error = %e, "Saved status not recorded remotely");
        }
    }

    if let Some(session_id) = session_id {
        match persistence
            .update_session_status(session_id, SessionStatus::Completed)
            .await
        {
            Ok(()) => report.session_completed = true,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Session not marked completed");
            }
        }
    }

    events.emit_lossy(IngestEvent::CommitCompleted {
        session_id,
        collection_id,
        logs_inserted: report.logs_inserted,
        timestamp: Utc::now(),
    });
    tracing::info!(
        collection_id = %collection_id,
        logs_inserted = report.logs_inserted,
        skipped = report.skipped.len(),
        secondary_failures = report.secondary_failures,
        "Commit completed"
    );

    Ok(report)
}

fn emit_failure(events: &EventBus, session_id: Option<Uuid>, collection_id: Uuid, err: &PipelineError) {
    events.emit_lossy(IngestEvent::CommitFailed {
        session_id,
        collection_id,
        message: err.to_string(),
        timestamp: Utc::now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClassificationResult;
    use crate::workflow::store::tests::pending_item;
    use std::collections::BTreeMap;

    fn complete_item(filename: &str) -> Item {
        let mut item = pending_item(filename);
        item.set_status(ItemStatus::Complete);
        item.remote_id = Some(Uuid::new_v4());
        item.remote_object_url = Some(format!("https://cdn.example.org/{}", filename));
        item.classification_result = Some(ClassificationResult {
            primary_stage: "diestrus".into(),
            confidence_scores: BTreeMap::from([("DIESTRUS".into(), 0.9), ("ESTRUS".into(), 0.1)]),
            reasoning: "Leukocytes dominate".into(),
            internal_notes: "n=1".into(),
            features: BTreeMap::from([("cell_type".into(), json!("leukocyte"))]),
        });
        item
    }

    #[test]
    fn test_log_record_carries_canonical_stage_and_payload() {
        let item = complete_item("229B.jpg");
        let subject = Uuid::new_v4();
        let record = build_log_record(&item, Uuid::new_v4(), subject, None).unwrap();

        assert_eq!(record.stage, "Diestrus");
        assert!((record.confidence - 0.9).abs() < f64::EPSILON);
        assert_eq!(record.features.get("cell_type").map(String::as_str), Some("leukocyte"));
        assert_eq!(record.payload["confidence_scores"]["Diestrus"], json!(0.9));
        assert_eq!(record.payload["internal_notes"], json!("n=1"));
        assert_eq!(record.image_url.as_deref(), Some("https://cdn.example.org/229B.jpg"));
        assert_eq!(record.item_id, item.remote_id);
    }

    #[test]
    fn test_non_blank_trims() {
        assert_eq!(non_blank(Some("  ")), None);
        assert_eq!(non_blank(Some(" 229B ")), Some("229B"));
        assert_eq!(non_blank(None), None);
    }
}
