//! Upload coordinator
//!
//! Transfers `pending` items to object storage in bounded waves.
//!
//! **Algorithm:**
//! 1. Snapshot eligible items (`pending` with readable source bytes)
//! 2. Split into waves of `chunk_size` ([`plan_waves`])
//! 3. Per wave: mark all `uploading`, run every transfer concurrently and
//!    wait for the whole wave before starting the next
//! 4. Per transfer: issue destination, reject it if already expired, write,
//!    then best-effort record `uploaded` and the object reference remotely
//! 5. A failed transfer marks only its own item `error`

use futures::future::join_all;
use stagelab_common::ItemStatus;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::SourceFile;
use crate::types::{ItemUpdate, ObjectStorage, PersistenceService};
use crate::workflow::store::SharedStore;

/// Outcome of one upload run
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct UploadReport {
    pub uploaded: usize,
    pub failed: usize,
    /// Size of each wave, in order
    pub waves: Vec<usize>,
}

struct UploadJob {
    local_id: Uuid,
    remote_id: Option<Uuid>,
    filename: String,
    source: SourceFile,
}

/// Split ids into consecutive waves of at most `chunk_size`
pub fn plan_waves(ids: &[Uuid], chunk_size: usize) -> Vec<Vec<Uuid>> {
    ids.chunks(chunk_size.max(1)).map(<[Uuid]>::to_vec).collect()
}

/// Transfer one item; returns the public object reference
async fn upload_one(
    storage: &dyn ObjectStorage,
    persistence: &dyn PersistenceService,
    job: &UploadJob,
) -> Result<String, PipelineError> {
    let fail = |message: String| PipelineError::Upload {
        filename: job.filename.clone(),
        message,
    };

    let destination = storage
        .issue_write_destination(&job.filename, job.source.content_type)
        .await
        .map_err(|e| fail(format!("destination not issued: {}", e)))?;

    if destination.is_expired(chrono::Utc::now()) {
        return Err(fail("destination expired before transfer".to_string()));
    }

    let bytes = job
        .source
        .read()
        .await
        .map_err(|e| fail(format!("source unreadable: {}", e)))?;

    storage
        .write(&destination, bytes, job.source.content_type)
        .await
        .map_err(|e| fail(format!("write failed: {}", e)))?;

    if let Some(remote_id) = job.remote_id {
        let update = ItemUpdate {
            status: Some(ItemStatus::Uploaded),
            object_url: Some(destination.read_ref.clone()),
            ..Default::default()
        };
        if let Err(e) = persistence.update_item(remote_id, &update).await {
            tracing::warn!(
                local_id = %job.local_id,
                remote_id = %remote_id,
                error = %e,
                "Uploaded status not recorded remotely; next reconcile will retry"
            );
        }
    }

    Ok(destination.read_ref)
}

/// Upload every eligible pending item
pub async fn upload_pending(
    store: &SharedStore,
    storage: &dyn ObjectStorage,
    persistence: &dyn PersistenceService,
    chunk_size: usize,
) -> UploadReport {
    let (session_id, eligible) = {
        let store = store.read().await;
        let eligible: Vec<Uuid> = store
            .items()
            .iter()
            .filter(|item| item.status() == ItemStatus::Pending && item.source.is_some())
            .map(|item| item.local_id)
            .collect();
        (store.session_id(), eligible)
    };

    let mut report = UploadReport::default();
    if eligible.is_empty() {
        tracing::debug!(session_id = %session_id, "No pending items to upload");
        return report;
    }

    let waves = plan_waves(&eligible, chunk_size);
    tracing::info!(
        session_id = %session_id,
        items = eligible.len(),
        waves = waves.len(),
        chunk_size,
        "Starting upload"
    );

    for (wave_index, wave) in waves.into_iter().enumerate() {
        let jobs: Vec<UploadJob> = {
            let mut store = store.write().await;
            let mut jobs = Vec::with_capacity(wave.len());
            for local_id in wave {
                // Skip items that moved on or vanished since the snapshot
                if store.transition(local_id, ItemStatus::Uploading).is_err() {
                    continue;
                }
                if let Some(item) = store.get(local_id) {
                    if let Some(source) = item.source.clone() {
                        jobs.push(UploadJob {
                            local_id,
                            remote_id: item.remote_id,
                            filename: item.filename.clone(),
                            source,
                        });
                    }
                }
            }
            jobs
        };

        if jobs.is_empty() {
            continue;
        }
        report.waves.push(jobs.len());

        let results = join_all(jobs.iter().map(|job| upload_one(storage, persistence, job))).await;

        let mut failed_remote = Vec::new();
        {
            let mut store = store.write().await;
            for (job, result) in jobs.iter().zip(results) {
                match result {
                    Ok(object_url) => {
                        if let Some(item) = store.get_mut(job.local_id) {
                            item.remote_object_url = Some(object_url);
                        }
                        if store.transition(job.local_id, ItemStatus::Uploaded).is_ok() {
                            report.uploaded += 1;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            session_id = %session_id,
                            local_id = %job.local_id,
                            error = %e,
                            "Upload failed"
                        );
                        if store.transition(job.local_id, ItemStatus::Error).is_ok() {
                            report.failed += 1;
                            if let Some(remote_id) = job.remote_id {
                                failed_remote.push(remote_id);
                            }
                        }
                    }
                }
            }
        }

        for remote_id in failed_remote {
            let update = ItemUpdate {
                status: Some(ItemStatus::Error),
                ..Default::default()
            };
            if let Err(e) = persistence.update_item(remote_id, &update).await {
                tracing::warn!(remote_id = %remote_id, error = %e, "Error status not recorded remotely");
            }
        }

        tracing::debug!(session_id = %session_id, wave = wave_index + 1, "Upload wave finished");
    }

    tracing::info!(
        session_id = %session_id,
        uploaded = report.uploaded,
        failed = report.failed,
        "Upload finished"
    );

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_waves_chunks_in_order() {
        let ids: Vec<Uuid> = (0..7).map(|_| Uuid::new_v4()).collect();
        let waves = plan_waves(&ids, 3);
        let sizes: Vec<usize> = waves.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(waves[2][0], ids[6]);
    }

    #[test]
    fn test_plan_waves_exact_multiple_and_empty() {
        let ids: Vec<Uuid> = (0..10).map(|_| Uuid::new_v4()).collect();
        assert_eq!(plan_waves(&ids, 5).len(), 2);
        assert!(plan_waves(&[], 3).is_empty());
    }

    #[test]
    fn test_plan_waves_zero_chunk_never_panics() {
        let ids: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
        assert_eq!(plan_waves(&ids, 0).len(), 2);
    }
}
