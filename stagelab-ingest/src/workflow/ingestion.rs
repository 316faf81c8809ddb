//! Ingestion stage
//!
//! Accepts loose files and `.zip` archives, flattens archives, keeps only
//! supported image types, creates one `pending` item per image and registers
//! placeholders remotely.
//!
//! **Algorithm:**
//! 1. Expand inputs (blocking I/O on the blocking pool); unsupported or
//!    unreadable entries are skipped, never fatal
//! 2. Zero usable images → [`PipelineError::Ingestion`]
//! 3. Insert local items in `pending`
//! 4. Bulk-create remote placeholders and back-fill `remote_id` by position,
//!    only for pairs present on both sides

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;
use zip::ZipArchive;

use crate::error::PipelineError;
use crate::models::{Item, SourceData, SourceFile};
use crate::types::{NewRemoteItem, PersistenceService};
use crate::workflow::store::SharedStore;

/// Supported image extensions and their content types
/// Upper bound on the buffer reserved from an entry's declared size
const MAX_ENTRY_RESERVE: u64 = 16 * 1024 * 1024;

const IMAGE_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
    ("heic", "image/heic"),
    ("heif", "image/heif"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
];

/// One submitted file
#[derive(Debug, Clone)]
pub enum IngestInput {
    /// File on disk (image or archive)
    Path(PathBuf),
    /// Uploaded bytes with their original name
    Memory { name: String, bytes: Vec<u8> },
}

impl IngestInput {
    fn name(&self) -> String {
        match self {
            IngestInput::Path(path) => path.to_string_lossy().replace('\\', "/"),
            IngestInput::Memory { name, .. } => name.clone(),
        }
    }
}

/// A file or archive entry that was dropped
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SkippedEntry {
    pub name: String,
    pub reason: String,
}

/// Image ready to become an item
#[derive(Debug, Clone)]
pub struct Candidate {
    pub filename: String,
    pub preview_ref: String,
    pub source: SourceFile,
}

/// Outcome of one ingestion call
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IngestReport {
    /// Local ids of created items, in submission order
    pub created: Vec<Uuid>,
    pub skipped: Vec<SkippedEntry>,
    /// Items that received a remote id
    pub registered: usize,
}

fn extension(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    base.rsplit_once('.')
        .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

/// Content type for a supported image name
pub fn content_type_for(name: &str) -> Option<&'static str> {
    let ext = extension(name)?;
    IMAGE_TYPES
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, content_type)| *content_type)
}

pub fn is_supported_image(name: &str) -> bool {
    content_type_for(name).is_some()
}

pub fn is_archive(name: &str) -> bool {
    extension(name).as_deref() == Some("zip")
}

/// macOS metadata that rides along in archives
fn is_os_junk(entry_name: &str) -> bool {
    let base = entry_name.rsplit('/').next().unwrap_or(entry_name);
    base.starts_with("._") || entry_name.starts_with("__MACOSX/") || entry_name.contains("/__MACOSX/")
}

/// Temporary object path registered before the upload lands
pub fn placeholder_path(session_id: Uuid, local_id: Uuid, filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    format!("pending/{}/{}/{}", session_id, local_id, base)
}

/// Flatten inputs into image candidates
///
/// Performs blocking reads; call from `spawn_blocking`.
pub fn expand_inputs(inputs: Vec<IngestInput>) -> (Vec<Candidate>, Vec<SkippedEntry>) {
    let mut candidates = Vec::new();
    let mut skipped = Vec::new();

    for input in inputs {
        let name = input.name();

        if is_archive(&name) {
            let bytes = match input {
                IngestInput::Path(path) => match std::fs::read(&path) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(archive = %name, error = %e, "Archive unreadable, skipping");
                        skipped.push(SkippedEntry { name, reason: e.to_string() });
                        continue;
                    }
                },
                IngestInput::Memory { bytes, .. } => bytes,
            };
            expand_archive(&name, bytes, &mut candidates, &mut skipped);
            continue;
        }

        let Some(content_type) = content_type_for(&name) else {
            tracing::debug!(file = %name, "Unsupported file type, skipping");
            skipped.push(SkippedEntry {
                name,
                reason: "unsupported file type".to_string(),
            });
            continue;
        };

        let (data, preview_ref) = match input {
            IngestInput::Path(path) => {
                if !path.is_file() {
                    skipped.push(SkippedEntry {
                        name,
                        reason: "not a readable file".to_string(),
                    });
                    continue;
                }
                let preview = format!("file://{}", name);
                (SourceData::Path(path), preview)
            }
            IngestInput::Memory { bytes, .. } => {
                let preview = format!("memory://{}", name);
                (SourceData::Memory(Arc::new(bytes)), preview)
            }
        };

        candidates.push(Candidate {
            filename: display_name(&name),
            preview_ref,
            source: SourceFile { data, content_type },
        });
    }

    (candidates, skipped)
}

/// Loose files keep only their base name; archive entries keep their inner path
fn display_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string())
}

fn expand_archive(
    archive_name: &str,
    bytes: Vec<u8>,
    candidates: &mut Vec<Candidate>,
    skipped: &mut Vec<SkippedEntry>,
) {
    let mut archive = match ZipArchive::new(Cursor::new(bytes)) {
        Ok(archive) => archive,
        Err(e) => {
            tracing::warn!(archive = %archive_name, error = %e, "Invalid zip archive, skipping");
            skipped.push(SkippedEntry {
                name: archive_name.to_string(),
                reason: format!("invalid archive: {}", e),
            });
            return;
        }
    };

    let mut kept = 0usize;
    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(archive = %archive_name, index, error = %e, "Archive entry unreadable");
                skipped.push(SkippedEntry {
                    name: format!("{}#{}", archive_name, index),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let entry_name = entry.name().replace('\\', "/");
        if entry.is_dir() || is_os_junk(&entry_name) {
            continue;
        }

        let Some(content_type) = content_type_for(&entry_name) else {
            skipped.push(SkippedEntry {
                name: entry_name,
                reason: "unsupported file type".to_string(),
            });
            continue;
        };

        let mut data = Vec::with_capacity(entry_reserve(entry.size()));
        if let Err(e) = entry.read_to_end(&mut data) {
            tracing::warn!(archive = %archive_name, entry = %entry_name, error = %e, "Archive entry unreadable");
            skipped.push(SkippedEntry {
                name: entry_name,
                reason: e.to_string(),
            });
            continue;
        }

        candidates.push(Candidate {
            preview_ref: format!("archive://{}!/{}", archive_name, entry_name),
            filename: entry_name,
            source: SourceFile {
                data: SourceData::Memory(Arc::new(data)),
                content_type,
            },
        });
        kept += 1;
    }

    tracing::debug!(archive = %archive_name, entries = archive.len(), kept, "Archive expanded");
}

/// Initial buffer size for an archive entry; the header size is untrusted
fn entry_reserve(declared: u64) -> usize {
    usize::try_from(declared.min(MAX_ENTRY_RESERVE)).unwrap_or(0)
}

/// Run the ingestion stage for one batch of inputs
pub async fn ingest(
    store: &SharedStore,
    persistence: &dyn PersistenceService,
    inputs: Vec<IngestInput>,
) -> Result<IngestReport, PipelineError> {
    let input_count = inputs.len();
    let (candidates, skipped) = tokio::task::spawn_blocking(move || expand_inputs(inputs))
        .await
        .map_err(|e| PipelineError::Ingestion(format!("Expansion task failed: {}", e)))?;

    if candidates.is_empty() {
        return Err(PipelineError::Ingestion(format!(
            "No supported images among {} submitted file(s) ({} skipped)",
            input_count,
            skipped.len()
        )));
    }

    let (session_id, created, requests) = {
        let mut store = store.write().await;
        let session_id = store.session_id();
        let mut created = Vec::with_capacity(candidates.len());
        let mut requests = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let item = Item::new_pending(candidate.filename, candidate.preview_ref, candidate.source);
            requests.push(NewRemoteItem {
                filename: item.filename.clone(),
                object_path: placeholder_path(session_id, item.local_id, &item.filename),
            });
            created.push(item.local_id);
            store.insert(item);
        }
        (session_id, created, requests)
    };

    let registered = match persistence.create_items(session_id, &requests).await {
        Ok(remote_items) => {
            if remote_items.len() != requests.len() {
                tracing::warn!(
                    session_id = %session_id,
                    requested = requests.len(),
                    returned = remote_items.len(),
                    "Placeholder count mismatch; mapping only aligned pairs"
                );
            }

            let mut store = store.write().await;
            let mut registered = 0usize;
            for (local_id, remote) in created.iter().zip(remote_items.iter()) {
                match store.set_remote_id(*local_id, remote.id) {
                    Ok(()) => registered += 1,
                    Err(e) => tracing::warn!(local_id = %local_id, error = %e, "Remote id not applied"),
                }
            }
            registered
        }
        Err(e) => {
            tracing::warn!(
                session_id = %session_id,
                error = %e,
                "Placeholder registration failed; items stay local-only"
            );
            0
        }
    };

    tracing::info!(
        session_id = %session_id,
        created = created.len(),
        registered,
        skipped = skipped.len(),
        "Ingestion batch accepted"
    );

    Ok(IngestReport {
        created,
        skipped,
        registered,
    })
}
