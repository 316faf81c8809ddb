//! Analysis dispatcher
//!
//! Optimistically flips every `uploaded` item to `analyzing`, then triggers
//! the remote job once for the whole session. A rejected trigger reverts the
//! flip so the user can retry.

use chrono::Utc;
use stagelab_common::events::IngestEvent;
use stagelab_common::ItemStatus;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::types::JobDispatcher;
use crate::workflow::store::SharedStore;

/// Flip uploaded items and trigger analysis
///
/// Returns the number of items flipped; zero means nothing was triggered.
pub async fn start_analysis(
    store: &SharedStore,
    jobs: &dyn JobDispatcher,
) -> Result<usize, PipelineError> {
    let (session_id, flipped) = {
        let mut store = store.write().await;
        let mut flipped: Vec<Uuid> = Vec::new();
        for local_id in store.ids_with_status(ItemStatus::Uploaded) {
            if store.transition(local_id, ItemStatus::Analyzing).is_ok() {
                flipped.push(local_id);
            }
        }
        (store.session_id(), flipped)
    };

    if flipped.is_empty() {
        tracing::debug!(session_id = %session_id, "No uploaded items; analysis not triggered");
        return Ok(0);
    }

    match jobs.trigger(session_id).await {
        Ok(()) => {
            let store = store.read().await;
            store.events().emit_lossy(IngestEvent::AnalysisDispatched {
                session_id,
                item_count: flipped.len(),
                timestamp: Utc::now(),
            });
            tracing::info!(session_id = %session_id, items = flipped.len(), "Analysis dispatched");
            Ok(flipped.len())
        }
        Err(e) => {
            let mut store = store.write().await;
            // Items the poller already moved past analyzing keep their status
            let reverted = flipped
                .iter()
                .filter(|local_id| store.revert_dispatch(**local_id).is_ok())
                .count();

            tracing::warn!(
                session_id = %session_id,
                reverted,
                error = %e,
                "Analysis dispatch rejected; items reverted to uploaded"
            );
            store.events().emit_lossy(IngestEvent::AnalysisDispatchFailed {
                session_id,
                reverted,
                message: e.to_string(),
                timestamp: Utc::now(),
            });

            Err(PipelineError::Dispatch(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::store::tests::{pending_item, test_store};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJobs {
        accept: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobDispatcher for CountingJobs {
        async fn trigger(&self, _session_id: Uuid) -> stagelab_common::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.accept {
                Ok(())
            } else {
                Err(stagelab_common::Error::remote("jobs", "503 Service Unavailable"))
            }
        }
    }

    async fn store_with_uploaded(count: usize) -> (SharedStore, Vec<Uuid>) {
        let mut store = test_store();
        let mut ids = Vec::new();
        for i in 0..count {
            let item = pending_item(&format!("{}.jpg", i));
            let id = item.local_id;
            store.insert(item);
            store.transition(id, ItemStatus::Uploading).unwrap();
            store.transition(id, ItemStatus::Uploaded).unwrap();
            ids.push(id);
        }
        (store.into_shared(), ids)
    }

    #[tokio::test]
    async fn test_accepted_trigger_leaves_items_analyzing() {
        let (store, ids) = store_with_uploaded(2).await;
        let jobs = CountingJobs { accept: true, calls: AtomicUsize::new(0) };

        assert_eq!(start_analysis(&store, &jobs).await.unwrap(), 2);
        assert_eq!(jobs.calls.load(Ordering::SeqCst), 1);
        let store = store.read().await;
        for id in ids {
            assert_eq!(store.get(id).unwrap().status(), ItemStatus::Analyzing);
        }
    }

    #[tokio::test]
    async fn test_rejected_trigger_reverts_to_uploaded() {
        let (store, ids) = store_with_uploaded(3).await;
        let jobs = CountingJobs { accept: false, calls: AtomicUsize::new(0) };

        let err = start_analysis(&store, &jobs).await.unwrap_err();
        assert!(matches!(err, PipelineError::Dispatch(_)));
        let store = store.read().await;
        for id in ids {
            assert_eq!(store.get(id).unwrap().status(), ItemStatus::Uploaded);
        }
    }

    #[tokio::test]
    async fn test_nothing_uploaded_skips_trigger() {
        let store = test_store().into_shared();
        let jobs = CountingJobs { accept: true, calls: AtomicUsize::new(0) };

        assert_eq!(start_analysis(&store, &jobs).await.unwrap(), 0);
        assert_eq!(jobs.calls.load(Ordering::SeqCst), 0);
    }
}
