//! Batch ingestion workflow
//!
//! Stages, in data-flow order:
//! - [`session_store`]: resume or create the session
//! - [`ingestion`]: expand archives, create `pending` items, register placeholders
//! - [`subject_resolver`]: filename guesses, off the critical path
//! - [`upload`]: chunked concurrent transfers
//! - [`dispatch`]: optimistic `analyzing` flip and job trigger
//! - [`reconcile`]: server merge and background poller
//! - [`commit`]: log records and `saved` marking
//!
//! [`IngestPipeline`] owns one session's [`store::ItemStore`] and drives the
//! stages against the collaborator services.

pub mod commit;
pub mod dispatch;
pub mod ingestion;
pub mod reconcile;
pub mod session_store;
pub mod store;
pub mod subject_resolver;
pub mod upload;

use chrono::Utc;
use serde::Serialize;
use stagelab_common::events::{EventBus, IngestEvent};
use stagelab_common::ItemStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::{Item, Session, StatusCounts};
use crate::types::{FilenameAssist, JobDispatcher, ObjectStorage, PersistenceService};

pub use commit::{CommitOptions, CommitReport};
pub use ingestion::{IngestInput, IngestReport};
pub use reconcile::MergeReport;
pub use store::{ItemStore, SharedStore};
pub use subject_resolver::ResolutionReport;
pub use upload::UploadReport;

/// Default number of concurrent uploads per wave
pub const DEFAULT_CHUNK_SIZE: usize = 3;

/// Default reconciliation poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(6);

/// External services the pipeline talks to
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn ObjectStorage>,
    pub jobs: Arc<dyn JobDispatcher>,
    pub persistence: Arc<dyn PersistenceService>,
    /// Optional; without it low-confidence filenames stay unresolved
    pub assist: Option<Arc<dyn FilenameAssist>>,
}

/// Pipeline tuning
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub chunk_size: usize,
    pub poll_interval: Duration,
    pub legacy_filename_fallback: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            legacy_filename_fallback: true,
        }
    }
}

/// Snapshot of a session for status displays
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub collection_id: Uuid,
    pub resumed: bool,
    pub counts: StatusCounts,
    pub total: usize,
    pub polling: bool,
}

struct PollerHandle {
    cancel: CancellationToken,
    task: JoinHandle<u64>,
}

/// One ingestion session and its stage drivers
pub struct IngestPipeline {
    store: SharedStore,
    collaborators: Collaborators,
    settings: PipelineSettings,
    events: EventBus,
    resumed: bool,
    poller: Mutex<Option<PollerHandle>>,
    resolvers: Mutex<Vec<JoinHandle<ResolutionReport>>>,
}

impl IngestPipeline {
    /// Resume the pending session for (collection, owner) or start a new one
    ///
    /// A resumed session is reconciled immediately and polled if analysis is
    /// still outstanding.
    pub async fn open(
        collection_id: Uuid,
        owner_id: Uuid,
        collaborators: Collaborators,
        settings: PipelineSettings,
        events: EventBus,
    ) -> Result<Self, PipelineError> {
        let outcome =
            session_store::ensure_session(collaborators.persistence.as_ref(), collection_id, owner_id)
                .await?;

        events.emit_lossy(IngestEvent::SessionStarted {
            session_id: outcome.session.id,
            collection_id,
            resumed: outcome.resumed,
            timestamp: Utc::now(),
        });

        let pipeline = Self {
            store: ItemStore::new(outcome.session, events.clone()).into_shared(),
            collaborators,
            settings,
            events,
            resumed: outcome.resumed,
            poller: Mutex::new(None),
            resolvers: Mutex::new(Vec::new()),
        };

        if pipeline.resumed {
            let session_id = pipeline.session_id().await;
            match pipeline.reconcile().await {
                Ok(report) => tracing::info!(
                    session_id = %session_id,
                    restored = report.appended,
                    "Resumed session restored from server"
                ),
                Err(e) => tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    "Initial reconcile of resumed session failed"
                ),
            }
            pipeline.spawn_poller().await;
        }

        Ok(pipeline)
    }

    pub async fn session(&self) -> Session {
        self.store.read().await.session().clone()
    }

    pub async fn session_id(&self) -> Uuid {
        self.store.read().await.session_id()
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Items in ingestion order
    pub async fn items(&self) -> Vec<Item> {
        self.store.read().await.items().to_vec()
    }

    pub async fn summary(&self) -> SessionSummary {
        let polling = self.is_polling().await;
        let store = self.store.read().await;
        let counts = store.counts();
        SessionSummary {
            session_id: store.session_id(),
            collection_id: store.session().collection_id,
            resumed: self.resumed,
            total: counts.total(),
            counts,
            polling,
        }
    }

    /// Accept files and start subject resolution in the background
    pub async fn ingest(&self, inputs: Vec<IngestInput>) -> Result<IngestReport, PipelineError> {
        let report =
            ingestion::ingest(&self.store, self.collaborators.persistence.as_ref(), inputs).await?;

        let batch: Vec<(Uuid, String)> = {
            let store = self.store.read().await;
            self.events.emit_lossy(IngestEvent::ItemsIngested {
                session_id: store.session_id(),
                count: report.created.len(),
                skipped: report.skipped.len(),
                timestamp: Utc::now(),
            });
            report
                .created
                .iter()
                .filter_map(|id| store.get(*id).map(|item| (*id, item.filename.clone())))
                .collect()
        };

        let store = self.store.clone();
        let assist = self.collaborators.assist.clone();
        let handle = tokio::spawn(async move {
            subject_resolver::resolve_batch(&store, assist.as_deref(), batch).await
        });
        self.resolvers.lock().await.push(handle);

        Ok(report)
    }

    /// Wait for every outstanding subject resolution
    pub async fn wait_for_resolution(&self) -> Vec<ResolutionReport> {
        let handles: Vec<_> = self.resolvers.lock().await.drain(..).collect();
        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => tracing::warn!(error = %e, "Subject resolution task failed"),
            }
        }
        reports
    }

    pub async fn upload_pending(&self) -> UploadReport {
        upload::upload_pending(
            &self.store,
            self.collaborators.storage.as_ref(),
            self.collaborators.persistence.as_ref(),
            self.settings.chunk_size,
        )
        .await
    }

    /// Trigger analysis, then reconcile once and poll until results land
    pub async fn start_analysis(&self) -> Result<usize, PipelineError> {
        let flipped = dispatch::start_analysis(&self.store, self.collaborators.jobs.as_ref()).await?;
        if flipped > 0 {
            if let Err(e) = self.reconcile().await {
                tracing::warn!(error = %e, "Post-dispatch reconcile failed; poller will retry");
            }
            self.spawn_poller().await;
        }
        Ok(flipped)
    }

    pub async fn reconcile(&self) -> Result<MergeReport, PipelineError> {
        reconcile::reconcile(&self.store, self.collaborators.persistence.as_ref()).await
    }

    /// Start the background poller unless one is running or nothing awaits analysis
    pub async fn spawn_poller(&self) -> bool {
        if !self.store.read().await.has_awaiting_analysis() {
            return false;
        }

        let mut poller = self.poller.lock().await;
        if poller.as_ref().is_some_and(|p| !p.task.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(reconcile::run_poller(
            self.store.clone(),
            self.collaborators.persistence.clone(),
            self.settings.poll_interval,
            cancel.clone(),
        ));
        *poller = Some(PollerHandle { cancel, task });
        true
    }

    pub async fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .await
            .as_ref()
            .is_some_and(|p| !p.task.is_finished())
    }

    /// Wait for the poller to exit; returns its tick count
    pub async fn wait_for_poller(&self) -> Option<u64> {
        let handle = self.poller.lock().await.take()?;
        match handle.task.await {
            Ok(ticks) => Some(ticks),
            Err(e) => {
                tracing::warn!(error = %e, "Poller task failed");
                None
            }
        }
    }

    /// User edit of an item's subject
    pub async fn set_subject(
        &self,
        local_id: Uuid,
        assigned_subject_id: Option<Uuid>,
        new_subject_name: Option<String>,
    ) -> Result<Item, PipelineError> {
        let mut store = self.store.write().await;
        store.set_subject(local_id, assigned_subject_id, new_subject_name)?;
        store
            .get(local_id)
            .cloned()
            .ok_or(PipelineError::ItemNotFound(local_id))
    }

    /// Commit every complete item and mark the committed ones `saved`
    pub async fn commit(&self) -> Result<CommitReport, PipelineError> {
        let (session_id, collection_id, items) = {
            let store = self.store.read().await;
            (
                store.session_id(),
                store.session().collection_id,
                store.items().to_vec(),
            )
        };

        let report = commit::commit(
            self.collaborators.persistence.as_ref(),
            &self.events,
            collection_id,
            &items,
            Some(session_id),
            CommitOptions {
                legacy_filename_fallback: self.settings.legacy_filename_fallback,
            },
        )
        .await?;

        let mut store = self.store.write().await;
        for local_id in &report.committed {
            if let Err(e) = store.transition(*local_id, ItemStatus::Saved) {
                tracing::warn!(local_id = %local_id, error = %e, "Committed item not marked saved");
            }
        }

        Ok(report)
    }

    /// Stop polling and forget all local items
    ///
    /// Uploads already in flight run to completion; their results no longer
    /// reach the store.
    pub async fn discard(&self) {
        if let Some(poller) = self.poller.lock().await.take() {
            poller.cancel.cancel();
        }
        let mut store = self.store.write().await;
        let dropped = store.len();
        store.clear();
        tracing::info!(session_id = %store.session_id(), dropped, "Session discarded locally");
    }
}

impl Drop for IngestPipeline {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.get_mut().take() {
            poller.cancel.cancel();
        }
    }
}
