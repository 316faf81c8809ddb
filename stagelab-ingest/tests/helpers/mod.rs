//! Test Helper Utilities
//!
//! In-memory collaborator fakes for driving the ingestion pipeline without
//! network services.

#![allow(dead_code)]

use async_trait::async_trait;
use stagelab_common::events::EventBus;
use stagelab_common::{Error, ItemStatus, Result, SessionStatus};
use stagelab_ingest::models::{ClassificationResult, NewLogRecord, ParsedFilenameInfo, Session, Subject};
use stagelab_ingest::types::{
    FilenameAssist, ItemUpdate, JobDispatcher, NewRemoteItem, ObjectStorage, PersistenceService,
    RemoteItem, WriteDestination,
};
use stagelab_ingest::workflow::{Collaborators, IngestInput, IngestPipeline, PipelineSettings};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Object storage
// ============================================================================

/// Storage that records writes and the peak number of concurrent writes
#[derive(Default)]
pub struct FakeStorage {
    pub write_delay: Duration,
    fail_filenames: Mutex<HashSet<String>>,
    expired_filenames: Mutex<HashSet<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    issued: AtomicUsize,
    written: Mutex<Vec<String>>,
}

impl FakeStorage {
    pub fn with_delay(write_delay: Duration) -> Self {
        Self {
            write_delay,
            ..Default::default()
        }
    }

    /// Refuse destinations for `filename`
    pub fn fail_on(&self, filename: &str) {
        self.fail_filenames.lock().unwrap().insert(filename.to_string());
    }

    /// Issue destinations for `filename` that are already past their deadline
    pub fn expire_on(&self, filename: &str) {
        self.expired_filenames.lock().unwrap().insert(filename.to_string());
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Public references of completed writes
    pub fn written(&self) -> Vec<String> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn issue_write_destination(
        &self,
        filename: &str,
        _content_type: &str,
    ) -> Result<WriteDestination> {
        if self.fail_filenames.lock().unwrap().contains(filename) {
            return Err(Error::remote("storage", "403 destination refused"));
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let expires_at = self
            .expired_filenames
            .lock()
            .unwrap()
            .contains(filename)
            .then(|| chrono::Utc::now() - chrono::Duration::seconds(30));
        Ok(WriteDestination {
            write_ref: format!("https://upload.test/put/{}", n),
            read_ref: format!("https://cdn.test/{}/{}", n, filename),
            expires_at,
        })
    }

    async fn write(
        &self,
        destination: &WriteDestination,
        _bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.write_delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.written.lock().unwrap().push(destination.read_ref.clone());
        Ok(())
    }
}

// ============================================================================
// Job dispatcher
// ============================================================================

/// Dispatcher that accepts or rejects triggers on demand
#[derive(Default)]
pub struct FakeJobs {
    reject: AtomicBool,
    triggers: Mutex<Vec<Uuid>>,
}

impl FakeJobs {
    pub fn set_rejecting(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn triggers(&self) -> Vec<Uuid> {
        self.triggers.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobDispatcher for FakeJobs {
    async fn trigger(&self, session_id: Uuid) -> Result<()> {
        self.triggers.lock().unwrap().push(session_id);
        if self.reject.load(Ordering::SeqCst) {
            return Err(Error::remote("jobs", "503 queue unavailable"));
        }
        Ok(())
    }
}

// ============================================================================
// Persistence
// ============================================================================

#[derive(Default)]
struct PersistenceState {
    sessions: Vec<Session>,
    items: Vec<RemoteItem>,
    subjects: Vec<Subject>,
    logs: Vec<NewLogRecord>,
}

/// Persistence service held entirely in memory
#[derive(Default)]
pub struct FakePersistence {
    state: Mutex<PersistenceState>,
    pub fail_insert_logs: AtomicBool,
    pub fail_session_lookup: AtomicBool,
    pub fail_list_items: AtomicBool,
    list_calls: AtomicUsize,
    created_count: Mutex<Option<usize>>,
}

impl FakePersistence {
    pub fn logs(&self) -> Vec<NewLogRecord> {
        self.state.lock().unwrap().logs.clone()
    }

    pub fn subjects(&self) -> Vec<Subject> {
        self.state.lock().unwrap().subjects.clone()
    }

    pub fn session(&self, session_id: Uuid) -> Option<Session> {
        self.state
            .lock()
            .unwrap()
            .sessions
            .iter()
            .find(|s| s.id == session_id)
            .cloned()
    }

    pub fn item(&self, item_id: Uuid) -> Option<RemoteItem> {
        self.state
            .lock()
            .unwrap()
            .items
            .iter()
            .find(|i| i.id == item_id)
            .cloned()
    }

    /// Make `create_items` answer with exactly `count` records, dropping or
    /// inventing records as needed
    pub fn answer_create_items_with(&self, count: usize) {
        *self.created_count.lock().unwrap() = Some(count);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Register an existing pending session, as if left by an earlier run
    pub fn seed_session(&self, collection_id: Uuid, owner_id: Uuid) -> Session {
        let session = Session::new(collection_id, owner_id);
        self.state.lock().unwrap().sessions.push(session.clone());
        session
    }

    pub fn seed_item(&self, item: RemoteItem) {
        self.state.lock().unwrap().items.push(item);
    }

    pub fn seed_subject(&self, collection_id: Uuid, name: &str) -> Subject {
        let subject = Subject {
            id: Uuid::new_v4(),
            collection_id,
            name: name.to_string(),
        };
        self.state.lock().unwrap().subjects.push(subject.clone());
        subject
    }

    /// Simulate the analysis job finishing every uploaded or analyzing item
    pub fn complete_analysis(&self, session_id: Uuid, stage: &str) -> usize {
        let mut state = self.state.lock().unwrap();
        let mut completed = 0;
        for item in state
            .items
            .iter_mut()
            .filter(|i| i.session_id == session_id && i.status.is_awaiting_analysis())
        {
            item.status = ItemStatus::Complete;
            item.classification_result = Some(classification(stage));
            item.cropped_image_url = Some(format!("https://cdn.test/crops/{}", item.id));
            completed += 1;
        }
        completed
    }
}

#[async_trait]
impl PersistenceService for FakePersistence {
    async fn create_session(&self, collection_id: Uuid, owner_id: Uuid) -> Result<Session> {
        let session = Session::new(collection_id, owner_id);
        self.state.lock().unwrap().sessions.push(session.clone());
        Ok(session)
    }

    async fn fetch_pending_session(
        &self,
        collection_id: Uuid,
        owner_id: Uuid,
    ) -> Result<Option<Session>> {
        if self.fail_session_lookup.load(Ordering::SeqCst) {
            return Err(Error::remote("persistence", "500 lookup failed"));
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .sessions
            .iter()
            .rev()
            .find(|s| s.collection_id == collection_id && s.owner_id == owner_id && s.is_pending())
            .cloned())
    }

    async fn create_items(
        &self,
        session_id: Uuid,
        items: &[NewRemoteItem],
    ) -> Result<Vec<RemoteItem>> {
        let count = self.created_count.lock().unwrap().unwrap_or(items.len());
        let created: Vec<RemoteItem> = (0..count)
            .map(|i| match items.get(i) {
                Some(new) => (new.filename.clone(), new.object_path.clone()),
                None => (format!("unrequested-{}.jpg", i), format!("pending/unrequested-{}", i)),
            })
            .map(|(filename, object_path)| RemoteItem {
                id: Uuid::new_v4(),
                session_id,
                filename,
                object_url: Some(object_path),
                status: ItemStatus::Pending,
                classification_result: None,
                cropped_image_url: None,
                mask_image_url: None,
                subject_id: None,
            })
            .collect();
        self.state.lock().unwrap().items.extend(created.iter().cloned());
        Ok(created)
    }

    async fn update_item(&self, item_id: Uuid, update: &ItemUpdate) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let item = state
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| Error::NotFound(format!("item {}", item_id)))?;
        if let Some(status) = update.status {
            item.status = status;
        }
        if let Some(url) = &update.object_url {
            item.object_url = Some(url.clone());
        }
        if let Some(subject_id) = update.subject_id {
            item.subject_id = Some(subject_id);
        }
        if let Some(result) = &update.classification_result {
            item.classification_result = Some(result.clone());
        }
        Ok(())
    }

    async fn list_items(&self, session_id: Uuid) -> Result<Vec<RemoteItem>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list_items.load(Ordering::SeqCst) {
            return Err(Error::remote("persistence", "502 bad gateway"));
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .items
            .iter()
            .filter(|i| i.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn find_or_create_subject(&self, collection_id: Uuid, name: &str) -> Result<Subject> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state
            .subjects
            .iter()
            .find(|s| s.collection_id == collection_id && s.name.eq_ignore_ascii_case(name))
        {
            return Ok(existing.clone());
        }
        let subject = Subject {
            id: Uuid::new_v4(),
            collection_id,
            name: name.to_string(),
        };
        state.subjects.push(subject.clone());
        Ok(subject)
    }

    async fn insert_logs(&self, logs: &[NewLogRecord]) -> Result<usize> {
        if self.fail_insert_logs.load(Ordering::SeqCst) {
            return Err(Error::remote("persistence", "503 insert rejected"));
        }
        self.state.lock().unwrap().logs.extend(logs.iter().cloned());
        Ok(logs.len())
    }

    async fn update_session_status(&self, session_id: Uuid, status: SessionStatus) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let session = state
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))?;
        session.status = status;
        Ok(())
    }
}

// ============================================================================
// Filename assist
// ============================================================================

/// Assist service answering every filename with the same guess
pub struct FakeAssist {
    pub answer: ParsedFilenameInfo,
    pub fail: bool,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeAssist {
    pub fn answering(subject: &str, confidence: f32) -> Self {
        Self {
            answer: ParsedFilenameInfo {
                subject_id_guess: Some(subject.to_string()),
                ground_truth_stage_guess: None,
                date_guess: None,
                confidence,
            },
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::answering("unused", 0.0)
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FilenameAssist for FakeAssist {
    async fn parse(&self, filenames: &[String]) -> Result<Vec<ParsedFilenameInfo>> {
        self.calls.lock().unwrap().push(filenames.to_vec());
        if self.fail {
            return Err(Error::remote("assist", "timeout"));
        }
        Ok(vec![self.answer.clone(); filenames.len()])
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// The fakes plus a collaborator set pointing at them
pub struct Harness {
    pub storage: Arc<FakeStorage>,
    pub jobs: Arc<FakeJobs>,
    pub persistence: Arc<FakePersistence>,
    pub assist: Option<Arc<FakeAssist>>,
    pub events: EventBus,
    pub collection_id: Uuid,
    pub owner_id: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_storage(FakeStorage::default())
    }

    pub fn with_storage(storage: FakeStorage) -> Self {
        Self {
            storage: Arc::new(storage),
            jobs: Arc::new(FakeJobs::default()),
            persistence: Arc::new(FakePersistence::default()),
            assist: None,
            events: EventBus::new(256),
            collection_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
        }
    }

    pub fn with_assist(mut self, assist: FakeAssist) -> Self {
        self.assist = Some(Arc::new(assist));
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            storage: self.storage.clone(),
            jobs: self.jobs.clone(),
            persistence: self.persistence.clone(),
            assist: self
                .assist
                .clone()
                .map(|assist| assist as Arc<dyn FilenameAssist>),
        }
    }

    /// Settings with a poll interval short enough for tests
    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    pub async fn open(&self) -> IngestPipeline {
        self.open_with(self.settings()).await
    }

    pub async fn open_with(&self, settings: PipelineSettings) -> IngestPipeline {
        IngestPipeline::open(
            self.collection_id,
            self.owner_id,
            self.collaborators(),
            settings,
            self.events.clone(),
        )
        .await
        .unwrap()
    }
}

/// In-memory image input
pub fn image(name: &str) -> IngestInput {
    IngestInput::Memory {
        name: name.to_string(),
        bytes: vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10],
    }
}

pub fn classification(stage: &str) -> ClassificationResult {
    ClassificationResult {
        primary_stage: stage.to_string(),
        confidence_scores: BTreeMap::from([(stage.to_ascii_uppercase(), 0.8), ("ESTRUS".to_string(), 0.2)]),
        reasoning: "Cornified epithelial cells".to_string(),
        internal_notes: String::new(),
        features: BTreeMap::new(),
    }
}

/// Poll `check` until it holds or `timeout` passes
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
