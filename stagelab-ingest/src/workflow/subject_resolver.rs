//! Subject resolver
//!
//! Guesses subject, stage and date from filenames so the user starts from a
//! prefilled subject name instead of typing one per image.
//!
//! **Algorithm:**
//! 1. Local heuristic on every filename ([`extract_heuristic`])
//! 2. Filenames scoring below [`ESCALATION_THRESHOLD`] go to the assist
//!    service in one batched call
//! 3. Assist failure or a misaligned response degrades every escalated entry
//!    to a zero-confidence result; it never fails the batch
//! 4. An escalated guess replaces the stored one only when strictly more
//!    confident
//!
//! Prefilling never touches a name the user typed.

use chrono::Utc;
use stagelab_common::events::IngestEvent;
use uuid::Uuid;

use crate::models::{ParsedFilenameInfo, Stage};
use crate::types::FilenameAssist;
use crate::workflow::store::{ItemStore, SharedStore};

/// Heuristic results below this go to the assist service
pub const ESCALATION_THRESHOLD: f32 = 0.5;

/// Escalated results at or above this prefill the subject name
pub const ESCALATED_PREFILL_THRESHOLD: f32 = 0.7;

const CONFIDENCE_SUBJECT_AND_STAGE: f32 = 0.95;
const CONFIDENCE_SUBJECT_ONLY: f32 = 0.80;
const CONFIDENCE_UNRESOLVED: f32 = 0.10;

/// Device-generated name prefixes that never identify a subject
const CAMERA_PREFIXES: &[&str] = &[
    "IMG", "DSC", "DSCN", "DCIM", "PXL", "PHOTO", "IMAGE", "SCAN", "SCREENSHOT", "MVIMG", "VID",
    "PIC",
];

/// Summary of one resolver run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    pub resolved_locally: usize,
    pub escalated: usize,
    /// Escalated entries whose guess replaced the heuristic one
    pub improved: usize,
    pub assist_failed: bool,
}

/// Base name without directory or extension
fn file_stem(filename: &str) -> &str {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    }
}

fn is_separator(c: char) -> bool {
    matches!(c, '_' | '-' | ' ')
}

/// Drop a leading epoch-style timestamp ("1697461234567_...")
fn strip_timestamp_prefix(stem: &str) -> &str {
    let digits = stem.chars().take_while(char::is_ascii_digit).count();
    if digits >= 10 {
        let rest = &stem[digits..];
        if rest.starts_with(is_separator) {
            return &rest[1..];
        }
    }
    stem
}

fn is_numeric(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

fn is_camera_prefix(token: &str) -> bool {
    CAMERA_PREFIXES
        .iter()
        .any(|prefix| prefix.eq_ignore_ascii_case(token))
}

/// Local filename heuristic
///
/// Tokens are split on `_`, `-` and spaces after removing the directory,
/// the extension and any leading timestamp. Stage words (including
/// abbreviations) set the stage and one- or two-digit numbers form the date.
/// Years (`20xx`) and device prefixes with their counters are ignored. The
/// first remaining token of two or more characters is the subject, so a
/// numeric id such as `4512` qualifies.
///
/// Confidence is 0.95 with subject and stage, 0.80 with subject only, 0.10
/// otherwise.
pub fn extract_heuristic(filename: &str) -> ParsedFilenameInfo {
    let stem = strip_timestamp_prefix(file_stem(filename));
    let tokens: Vec<&str> = stem.split(is_separator).filter(|t| !t.is_empty()).collect();

    let mut subject: Option<String> = None;
    let mut stage: Option<Stage> = None;
    let mut date_parts: Vec<&str> = Vec::new();
    let mut skip_counter = false;

    for token in tokens {
        if skip_counter {
            skip_counter = false;
            if is_numeric(token) {
                continue;
            }
        }

        if let Some(parsed) = Stage::parse(token) {
            stage.get_or_insert(parsed);
            continue;
        }

        if is_numeric(token) {
            if token.len() <= 2 {
                date_parts.push(token);
                continue;
            }
            if token.len() == 4 && token.starts_with("20") {
                continue;
            }
        }

        if is_camera_prefix(token) {
            skip_counter = true;
            continue;
        }

        if subject.is_none() && token.chars().count() >= 2 {
            subject = Some(token.to_string());
        }
    }

    let date_guess = (date_parts.len() >= 2).then(|| date_parts[..2].join("_"));

    let confidence = match (&subject, &stage) {
        (Some(_), Some(_)) => CONFIDENCE_SUBJECT_AND_STAGE,
        (Some(_), None) => CONFIDENCE_SUBJECT_ONLY,
        _ => CONFIDENCE_UNRESOLVED,
    };

    ParsedFilenameInfo {
        subject_id_guess: subject,
        ground_truth_stage_guess: stage,
        date_guess,
        confidence,
    }
}

/// Subject name recovered from the first filename token
///
/// Used at commit time for items that never received a subject.
pub fn legacy_subject_from_filename(filename: &str) -> Option<String> {
    file_stem(filename)
        .split('_')
        .next()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Apply a guess to an item, prefilling the subject name when allowed
///
/// Returns the prefilled name, if any.
fn apply_guess(
    store: &mut ItemStore,
    local_id: Uuid,
    guess: ParsedFilenameInfo,
    prefill_threshold: f32,
) -> Option<(String, f32)> {
    let item = store.get_mut(local_id)?;
    let confidence = guess.confidence;
    let name = guess.subject_id_guess.clone();
    item.parsed_filename_info = Some(guess);

    let name = name?;
    if confidence < prefill_threshold || item.subject_name_user_set {
        return None;
    }
    item.new_subject_name = Some(name.clone());
    Some((name, confidence))
}

fn emit_guess(store: &ItemStore, local_id: Uuid, name: String, confidence: f32) {
    store.events().emit_lossy(IngestEvent::SubjectGuessUpdated {
        session_id: store.session_id(),
        local_id,
        subject_name: name,
        confidence,
        timestamp: Utc::now(),
    });
}

/// Resolve subject guesses for a batch of newly ingested items
///
/// Items discarded while the assist call is in flight are silently skipped.
pub async fn resolve_batch(
    store: &SharedStore,
    assist: Option<&dyn FilenameAssist>,
    batch: Vec<(Uuid, String)>,
) -> ResolutionReport {
    let mut report = ResolutionReport::default();
    let mut escalate: Vec<(Uuid, String)> = Vec::new();

    {
        let mut store = store.write().await;
        for (local_id, filename) in &batch {
            let guess = extract_heuristic(filename);
            if guess.confidence < ESCALATION_THRESHOLD {
                escalate.push((*local_id, filename.clone()));
            } else {
                report.resolved_locally += 1;
            }
            if let Some((name, confidence)) =
                apply_guess(&mut store, *local_id, guess, ESCALATION_THRESHOLD)
            {
                emit_guess(&store, *local_id, name, confidence);
            }
        }
    }

    if escalate.is_empty() {
        return report;
    }
    report.escalated = escalate.len();

    let filenames: Vec<String> = escalate.iter().map(|(_, name)| name.clone()).collect();
    let results = match assist {
        Some(assist) => match assist.parse(&filenames).await {
            Ok(results) if results.len() == filenames.len() => results,
            Ok(results) => {
                tracing::warn!(
                    requested = filenames.len(),
                    returned = results.len(),
                    "Filename assist response misaligned; treating as unresolved"
                );
                report.assist_failed = true;
                vec![ParsedFilenameInfo::unresolved(); filenames.len()]
            }
            Err(e) => {
                tracing::warn!(
                    count = filenames.len(),
                    error = %e,
                    "Filename assist failed; treating as unresolved"
                );
                report.assist_failed = true;
                vec![ParsedFilenameInfo::unresolved(); filenames.len()]
            }
        },
        None => {
            tracing::debug!(count = filenames.len(), "No filename assist configured");
            vec![ParsedFilenameInfo::unresolved(); filenames.len()]
        }
    };

    let mut store = store.write().await;
    for ((local_id, _), guess) in escalate.into_iter().zip(results) {
        let current = store
            .get(local_id)
            .and_then(|item| item.parsed_filename_info.as_ref())
            .map(|info| info.confidence);
        let Some(current) = current else {
            continue;
        };
        if guess.confidence <= current {
            continue;
        }

        report.improved += 1;
        if let Some((name, confidence)) =
            apply_guess(&mut store, local_id, guess, ESCALATED_PREFILL_THRESHOLD)
        {
            emit_guess(&store, local_id, name, confidence);
        }
    }

    tracing::debug!(
        session_id = %store.session_id(),
        resolved_locally = report.resolved_locally,
        escalated = report.escalated,
        improved = report.improved,
        "Subject resolution finished"
    );

    report
}
