//! Collaborator contracts consumed by the ingestion pipeline
//!
//! The pipeline depends only on these traits:
//! - [`ObjectStorage`] - write destinations and object writes
//! - [`JobDispatcher`] - fire-and-forget analysis trigger
//! - [`PersistenceService`] - sessions, items, subjects, logs
//! - [`FilenameAssist`] - batched filename parsing for low-confidence names
//!
//! The classification service itself is never called directly; its results
//! arrive through [`PersistenceService::list_items`].
//!
//! HTTP implementations live in [`crate::services`], the SQLite persistence
//! backend in [`crate::db`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stagelab_common::{ItemStatus, Result, SessionStatus};
use uuid::Uuid;

use crate::models::{ClassificationResult, NewLogRecord, ParsedFilenameInfo, Session, Subject};

// ============================================================================
// Wire Types
// ============================================================================

/// Pre-authorized write target plus the public reference the object will have
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteDestination {
    pub write_ref: String,
    pub read_ref: String,
    /// End of the validity window; `None` means no expiry
    pub expires_at: Option<DateTime<Utc>>,
}

impl WriteDestination {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Placeholder registration for a freshly ingested item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRemoteItem {
    pub filename: String,
    /// Temporary object path, replaced by the real reference after upload
    pub object_path: String,
}

/// Authoritative item record as held by the persistence service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: Uuid,
    pub session_id: Uuid,
    pub filename: String,
    /// Object reference; a placeholder path until the upload lands
    pub object_url: Option<String>,
    pub status: ItemStatus,
    #[serde(default)]
    pub classification_result: Option<ClassificationResult>,
    #[serde(default)]
    pub cropped_image_url: Option<String>,
    #[serde(default)]
    pub mask_image_url: Option<String>,
    #[serde(default)]
    pub subject_id: Option<Uuid>,
}

/// Partial item update; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification_result: Option<ClassificationResult>,
}

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Object storage service
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Obtain a write target for one file
    async fn issue_write_destination(
        &self,
        filename: &str,
        content_type: &str,
    ) -> Result<WriteDestination>;

    /// Write bytes to a previously issued destination
    async fn write(
        &self,
        destination: &WriteDestination,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;
}

/// Background job dispatcher
///
/// `trigger` returns once the job is accepted; completion is only observable
/// through the persistence service.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn trigger(&self, session_id: Uuid) -> Result<()>;
}

/// Persistence service
#[async_trait]
pub trait PersistenceService: Send + Sync {
    async fn create_session(&self, collection_id: Uuid, owner_id: Uuid) -> Result<Session>;

    /// Most recent pending session for (collection, owner)
    async fn fetch_pending_session(
        &self,
        collection_id: Uuid,
        owner_id: Uuid,
    ) -> Result<Option<Session>>;

    /// Bulk placeholder creation; results are in request order
    async fn create_items(
        &self,
        session_id: Uuid,
        items: &[NewRemoteItem],
    ) -> Result<Vec<RemoteItem>>;

    async fn update_item(&self, item_id: Uuid, update: &ItemUpdate) -> Result<()>;

    async fn list_items(&self, session_id: Uuid) -> Result<Vec<RemoteItem>>;

    /// Case-insensitive name match within the collection, created when absent
    async fn find_or_create_subject(&self, collection_id: Uuid, name: &str) -> Result<Subject>;

    /// Insert all records or none; returns the number inserted
    async fn insert_logs(&self, logs: &[NewLogRecord]) -> Result<usize>;

    async fn update_session_status(&self, session_id: Uuid, status: SessionStatus) -> Result<()>;
}

/// Filename-parsing assist service
///
/// Results are positionally aligned with the request.
#[async_trait]
pub trait FilenameAssist: Send + Sync {
    async fn parse(&self, filenames: &[String]) -> Result<Vec<ParsedFilenameInfo>>;
}
