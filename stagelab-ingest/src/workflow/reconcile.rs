//! Reconciliation
//!
//! Merges the persistence service's item records into the local store and
//! runs the background poller that does so periodically while analysis is
//! outstanding.
//!
//! **Merge rules:**
//! - Matched by `remote_id`; unmatched records that left `pending` are
//!   appended (uploads from another device or a previous run)
//! - Status is adopted only when it moves the item forward; stale server
//!   statuses (e.g. `uploaded` while we already flipped to `analyzing`) are
//!   ignored
//! - The object reference is adopted only once it is an absolute http(s) URL,
//!   never the placeholder path
//! - Classification, auxiliary images and subject are adopted when present
//! - Local items are never deleted
//!
//! Merging the same snapshot twice leaves the store unchanged.

use chrono::Utc;
use reqwest::Url;
use stagelab_common::events::IngestEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::models::Item;
use crate::types::{PersistenceService, RemoteItem};
use crate::workflow::store::{ItemStore, SharedStore};

/// What one merge changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub updated: usize,
    pub appended: usize,
    pub ignored_regressions: usize,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        self.updated > 0 || self.appended > 0
    }
}

/// True for a final object reference (absolute http or https URL with a host)
pub fn is_absolute_url(value: &str) -> bool {
    Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

fn adopt<T: PartialEq + Clone>(local: &mut Option<T>, remote: &Option<T>) -> bool {
    match remote {
        Some(value) if local.as_ref() != Some(value) => {
            *local = Some(value.clone());
            true
        }
        _ => false,
    }
}

/// Merge one server snapshot into the store
pub fn merge_remote_items(store: &mut ItemStore, remote_items: &[RemoteItem]) -> MergeReport {
    let mut report = MergeReport::default();

    for remote in remote_items {
        let Some(local_id) = store.find_by_remote(remote.id).map(|item| item.local_id) else {
            if remote.status != stagelab_common::ItemStatus::Pending {
                store.insert(Item::from_remote(remote));
                report.appended += 1;
            }
            continue;
        };

        let mut changed = false;
        if let Some(item) = store.get_mut(local_id) {
            if let Some(url) = remote.object_url.as_deref().filter(|url| is_absolute_url(url)) {
                if item.remote_object_url.as_deref() != Some(url) {
                    item.remote_object_url = Some(url.to_string());
                    changed = true;
                }
            }
            changed |= adopt(&mut item.classification_result, &remote.classification_result);
            changed |= adopt(&mut item.cropped_image_ref, &remote.cropped_image_url);
            changed |= adopt(&mut item.mask_image_ref, &remote.mask_image_url);
            changed |= adopt(&mut item.assigned_subject_id, &remote.subject_id);
        }

        let current = store.get(local_id).map(Item::status);
        match current {
            Some(status) if status == remote.status => {}
            Some(status) if status.can_advance_to(remote.status) => {
                if store.transition(local_id, remote.status).is_ok() {
                    changed = true;
                }
            }
            Some(_) => report.ignored_regressions += 1,
            None => {}
        }

        if changed {
            report.updated += 1;
        }
    }

    report
}

/// Fetch the session's items and merge them
pub async fn reconcile(
    store: &SharedStore,
    persistence: &dyn PersistenceService,
) -> Result<MergeReport, PipelineError> {
    let session_id = store.read().await.session_id();
    let remote_items = persistence.list_items(session_id).await?;

    let mut store = store.write().await;
    let report = merge_remote_items(&mut store, &remote_items);
    if report.changed() {
        tracing::debug!(
            session_id = %session_id,
            updated = report.updated,
            appended = report.appended,
            ignored_regressions = report.ignored_regressions,
            "Reconciled with server"
        );
    }
    Ok(report)
}

/// Poll until nothing awaits analysis or `cancel` fires
///
/// Tick failures are logged and the loop continues; only the outstanding
/// work or cancellation ends it.
pub async fn run_poller(
    store: SharedStore,
    persistence: Arc<dyn PersistenceService>,
    interval: Duration,
    cancel: CancellationToken,
) -> u64 {
    let session_id = store.read().await.session_id();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    let mut ticks = 0u64;
    tracing::debug!(session_id = %session_id, interval_ms = interval.as_millis() as u64, "Poller started");

    loop {
        if !store.read().await.has_awaiting_analysis() {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(session_id = %session_id, "Poller cancelled");
                break;
            }
            _ = ticker.tick() => {}
        }

        ticks += 1;
        if let Err(e) = reconcile(&store, persistence.as_ref()).await {
            tracing::warn!(session_id = %session_id, tick = ticks, error = %e, "Poll tick failed");
        }
    }

    store.read().await.events().emit_lossy(IngestEvent::PollingStopped {
        session_id,
        ticks,
        timestamp: Utc::now(),
    });
    tracing::info!(session_id = %session_id, ticks, "Poller stopped");

    ticks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClassificationResult;
    use crate::workflow::store::tests::{pending_item, test_store};
    use stagelab_common::ItemStatus;
    use uuid::Uuid;

    fn remote(id: Uuid, session_id: Uuid, status: ItemStatus) -> RemoteItem {
        RemoteItem {
            id,
            session_id,
            filename: "a.jpg".into(),
            object_url: None,
            status,
            classification_result: None,
            cropped_image_url: None,
            mask_image_url: None,
            subject_id: None,
        }
    }

    fn analyzing_store() -> (ItemStore, Uuid, Uuid) {
        let mut store = test_store();
        let item = pending_item("a.jpg");
        let local = item.local_id;
        let remote_id = Uuid::new_v4();
        store.insert(item);
        store.set_remote_id(local, remote_id).unwrap();
        store.transition(local, ItemStatus::Uploading).unwrap();
        store.transition(local, ItemStatus::Uploaded).unwrap();
        store.transition(local, ItemStatus::Analyzing).unwrap();
        (store, local, remote_id)
    }

    #[test]
    fn test_absolute_url_detection() {
        assert!(is_absolute_url("https://cdn.example.org/a.jpg"));
        assert!(is_absolute_url("http://localhost:9000/bucket/a.jpg"));
        assert!(!is_absolute_url("pending/abc/def/a.jpg"));
        assert!(!is_absolute_url("file:///tmp/a.jpg"));
    }

    #[test]
    fn test_stale_server_status_is_ignored() {
        let (mut store, local, remote_id) = analyzing_store();
        let session = store.session_id();

        let report = merge_remote_items(&mut store, &[remote(remote_id, session, ItemStatus::Uploaded)]);

        assert_eq!(report.ignored_regressions, 1);
        assert_eq!(store.get(local).unwrap().status(), ItemStatus::Analyzing);
    }

    #[test]
    fn test_completion_is_adopted_once() {
        let (mut store, local, remote_id) = analyzing_store();
        let session = store.session_id();
        let mut snapshot = remote(remote_id, session, ItemStatus::Complete);
        snapshot.object_url = Some("https://cdn.example.org/a.jpg".into());
        snapshot.cropped_image_url = Some("https://cdn.example.org/a_crop.jpg".into());
        snapshot.classification_result = Some(ClassificationResult {
            primary_stage: "Estrus".into(),
            ..Default::default()
        });

        let first = merge_remote_items(&mut store, &[snapshot.clone()]);
        assert_eq!(first.updated, 1);
        let item = store.get(local).unwrap();
        assert_eq!(item.status(), ItemStatus::Complete);
        assert_eq!(item.remote_object_url.as_deref(), Some("https://cdn.example.org/a.jpg"));
        assert!(item.is_committable());

        let second = merge_remote_items(&mut store, &[snapshot]);
        assert_eq!(second, MergeReport::default());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_placeholder_object_path_is_not_adopted() {
        let (mut store, local, remote_id) = analyzing_store();
        let session = store.session_id();
        let mut snapshot = remote(remote_id, session, ItemStatus::Analyzing);
        snapshot.object_url = Some("pending/x/y/a.jpg".into());

        merge_remote_items(&mut store, &[snapshot]);
        assert!(store.get(local).unwrap().remote_object_url.is_none());
    }

    #[test]
    fn test_unknown_items_are_appended_unless_pending() {
        let mut store = test_store();
        let session = store.session_id();

        let report = merge_remote_items(
            &mut store,
            &[
                remote(Uuid::new_v4(), session, ItemStatus::Complete),
                remote(Uuid::new_v4(), session, ItemStatus::Pending),
            ],
        );

        assert_eq!(report.appended, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.items()[0].status(), ItemStatus::Complete);
        assert!(store.items()[0].source.is_none());
    }

    #[test]
    fn test_local_items_missing_remotely_are_kept() {
        let (mut store, _, _) = analyzing_store();
        let report = merge_remote_items(&mut store, &[]);
        assert_eq!(report, MergeReport::default());
        assert_eq!(store.len(), 1);
    }
}
