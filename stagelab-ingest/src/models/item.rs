//! Ingestion item
//!
//! An item's `status` is private: it only changes through
//! [`ItemStore::transition`](crate::workflow::store::ItemStore::transition),
//! which enforces the status state machine. `local_id` never leaves this
//! process; `remote_id` is the durable cross-reference key.

use serde::{Deserialize, Serialize};
use stagelab_common::ItemStatus;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use super::{ClassificationResult, ParsedFilenameInfo};
use crate::types::RemoteItem;

/// Where an item's bytes come from
#[derive(Debug, Clone)]
pub enum SourceData {
    /// File on the local filesystem
    Path(PathBuf),
    /// Entry extracted from an archive
    Memory(Arc<Vec<u8>>),
}

/// Source bytes plus their content type
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub data: SourceData,
    pub content_type: &'static str,
}

impl SourceFile {
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        match &self.data {
            SourceData::Path(path) => tokio::fs::read(path).await,
            SourceData::Memory(bytes) => Ok(bytes.as_ref().clone()),
        }
    }
}

/// One image tracked end-to-end through upload, analysis and commit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub local_id: Uuid,
    pub remote_id: Option<Uuid>,
    #[serde(skip)]
    pub source: Option<SourceFile>,
    pub filename: String,
    pub preview_ref: String,
    pub remote_object_url: Option<String>,
    status: ItemStatus,
    pub classification_result: Option<ClassificationResult>,
    pub cropped_image_ref: Option<String>,
    pub mask_image_ref: Option<String>,
    pub assigned_subject_id: Option<Uuid>,
    pub new_subject_name: Option<String>,
    /// Set once the user edits `new_subject_name`; resolver guesses never overwrite it
    #[serde(default)]
    pub subject_name_user_set: bool,
    pub parsed_filename_info: Option<ParsedFilenameInfo>,
}

impl Item {
    /// New local item in `pending` status
    pub fn new_pending(filename: String, preview_ref: String, source: SourceFile) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            remote_id: None,
            source: Some(source),
            filename,
            preview_ref,
            remote_object_url: None,
            status: ItemStatus::Pending,
            classification_result: None,
            cropped_image_ref: None,
            mask_image_ref: None,
            assigned_subject_id: None,
            new_subject_name: None,
            subject_name_user_set: false,
            parsed_filename_info: None,
        }
    }

    /// Local item for a server record with no local counterpart
    /// (another device, or a resumed session)
    pub fn from_remote(remote: &RemoteItem) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            remote_id: Some(remote.id),
            source: None,
            filename: remote.filename.clone(),
            preview_ref: remote.object_url.clone().unwrap_or_default(),
            remote_object_url: remote.object_url.clone(),
            status: remote.status,
            classification_result: remote.classification_result.clone(),
            cropped_image_ref: remote.cropped_image_url.clone(),
            mask_image_ref: remote.mask_image_url.clone(),
            assigned_subject_id: remote.subject_id,
            new_subject_name: None,
            subject_name_user_set: false,
            parsed_filename_info: None,
        }
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    /// Only the item store may move status
    pub(crate) fn set_status(&mut self, status: ItemStatus) {
        self.status = status;
    }

    /// Eligible for commit: complete with a non-empty primary stage
    pub fn is_committable(&self) -> bool {
        self.status == ItemStatus::Complete
            && self
                .classification_result
                .as_ref()
                .is_some_and(ClassificationResult::has_prediction)
    }
}

/// Per-status item counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub uploading: usize,
    pub uploaded: usize,
    pub analyzing: usize,
    pub complete: usize,
    pub error: usize,
    pub saved: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: ItemStatus) {
        match status {
            ItemStatus::Pending => self.pending += 1,
            ItemStatus::Uploading => self.uploading += 1,
            ItemStatus::Uploaded => self.uploaded += 1,
            ItemStatus::Analyzing => self.analyzing += 1,
            ItemStatus::Complete => self.complete += 1,
            ItemStatus::Error => self.error += 1,
            ItemStatus::Saved => self.saved += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending
            + self.uploading
            + self.uploaded
            + self.analyzing
            + self.complete
            + self.error
            + self.saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_source() -> SourceFile {
        SourceFile {
            data: SourceData::Memory(Arc::new(vec![0xFF, 0xD8, 0xFF])),
            content_type: "image/jpeg",
        }
    }

    #[test]
    fn test_new_item_is_pending_without_remote_id() {
        let item = Item::new_pending("a.jpg".into(), "file://a.jpg".into(), memory_source());
        assert_eq!(item.status(), ItemStatus::Pending);
        assert!(item.remote_id.is_none());
        assert!(item.source.is_some());
    }

    #[tokio::test]
    async fn test_memory_source_reads_bytes() {
        let bytes = memory_source().read().await.unwrap();
        assert_eq!(bytes, vec![0xFF, 0xD8, 0xFF]);
    }

    #[test]
    fn test_committable_requires_complete_and_prediction() {
        let mut item = Item::new_pending("a.jpg".into(), String::new(), memory_source());
        item.classification_result = Some(ClassificationResult {
            primary_stage: "Estrus".into(),
            ..Default::default()
        });
        assert!(!item.is_committable());

        item.set_status(ItemStatus::Complete);
        assert!(item.is_committable());

        item.classification_result = Some(ClassificationResult::default());
        assert!(!item.is_committable());
    }

    #[test]
    fn test_status_counts_total() {
        let mut counts = StatusCounts::default();
        for status in ItemStatus::ALL {
            counts.record(status);
        }
        counts.record(ItemStatus::Error);
        assert_eq!(counts.total(), 8);
        assert_eq!(counts.error, 2);
    }
}
